use nginx_ingress_core::{model::UpstreamLabels, PodInfo};
use std::collections::BTreeMap;

/// Receives the upstreams NGINX currently serves, for metric labels.
pub trait LabelUpdater: Send {
    /// Sets the servers of an upstream, replacing any previous set.
    fn update_upstream(&mut self, upstream: &UpstreamMetric);

    fn remove_upstream(&mut self, upstream: &str);
}

/// The labels of one rendered upstream and its servers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpstreamMetric {
    pub name: String,
    pub labels: UpstreamLabels,
    pub servers: Vec<ServerMetric>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerMetric {
    pub address: String,
    /// Unset for servers that are not pods (ExternalName services, the empty upstream).
    pub pod: Option<PodInfo>,
}

/// Discards all labels.
#[derive(Clone, Debug, Default)]
pub struct NoopLabels(());

// === impl NoopLabels ===

impl LabelUpdater for NoopLabels {
    fn update_upstream(&mut self, _: &UpstreamMetric) {}

    fn remove_upstream(&mut self, _: &str) {}
}

// === impl ServerMetric ===

impl ServerMetric {
    pub(crate) fn new(address: &str, pods_by_ip: &BTreeMap<String, PodInfo>) -> Self {
        Self {
            address: address.to_string(),
            pod: pods_by_ip.get(address).cloned(),
        }
    }
}

/// Moves `updater` from the `old` upstreams of a resource to its `new` ones.
pub(crate) fn sync(updater: &mut dyn LabelUpdater, old: &[UpstreamMetric], new: &[UpstreamMetric]) {
    for upstream in old {
        if !new.iter().any(|u| u.name == upstream.name) {
            updater.remove_upstream(&upstream.name);
        }
    }
    for upstream in new {
        if !old.contains(upstream) {
            updater.update_upstream(upstream);
        }
    }
}
