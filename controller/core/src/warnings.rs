use crate::{Kind, ResourceKey, ResourceRef};
use std::collections::BTreeMap;

/// Problems found while resolving or building a resource, grouped by the resource they should
/// be reported against. Warnings never abort configuration; they surface as events.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Warnings(BTreeMap<ResourceRef, Vec<String>>);

// === impl Warnings ===

impl Warnings {
    pub fn add(&mut self, kind: Kind, key: &ResourceKey, msg: impl Into<String>) {
        self.0
            .entry(ResourceRef::new(kind, key.clone()))
            .or_default()
            .push(msg.into());
    }

    pub fn add_all(&mut self, kind: Kind, key: &ResourceKey, msgs: impl IntoIterator<Item = String>) {
        let mut msgs = msgs.into_iter().peekable();
        if msgs.peek().is_none() {
            return;
        }
        self.0
            .entry(ResourceRef::new(kind, key.clone()))
            .or_default()
            .extend(msgs);
    }

    pub fn extend(&mut self, other: Warnings) {
        for (r, msgs) in other.0 {
            self.0.entry(r).or_default().extend(msgs);
        }
    }

    pub fn get(&self, kind: Kind, key: &ResourceKey) -> &[String] {
        self.0
            .get(&ResourceRef::new(kind, key.clone()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The total number of warnings across all resources.
    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceRef, &[String])> {
        self.0.iter().map(|(r, msgs)| (r, msgs.as_slice()))
    }
}

impl IntoIterator for Warnings {
    type Item = (ResourceRef, Vec<String>);
    type IntoIter = std::collections::btree_map::IntoIter<ResourceRef, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
