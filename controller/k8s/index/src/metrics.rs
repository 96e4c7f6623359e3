use kube::ResourceExt;
use kubert::index::NamespacedRemoved;
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::{collections::BTreeSet, sync::Arc};

/// Wraps an index to count the changes applied to it and the resources it holds.
pub struct IndexMetrics<T> {
    inner: T,
    size: Family<ResourceLabels, Gauge>,
    applies: Family<ResourceLabels, Counter>,
    deletes: Family<ResourceLabels, Counter>,
    resets: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResourceLabels {
    kind: String,
    namespace: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: String,
}

/// Counts the resources of kind `R` an index holds in a namespace.
pub trait SizedIndex<R> {
    fn size(&self, namespace: &str) -> usize;
}

impl<T, R> SizedIndex<R> for Arc<RwLock<T>>
where
    T: SizedIndex<R>,
{
    fn size(&self, namespace: &str) -> usize {
        self.read().size(namespace)
    }
}

// === impl IndexMetrics ===

impl<T> IndexMetrics<T> {
    pub fn register(inner: T, prom: &mut Registry) -> Self {
        let size = Family::default();
        prom.register(
            "index_size",
            "The number of resources held by the index",
            size.clone(),
        );

        let applies = Family::default();
        prom.register(
            "index_applies",
            "The number of resource updates applied to the index",
            applies.clone(),
        );

        let deletes = Family::default();
        prom.register(
            "index_deletes",
            "The number of resource deletions applied to the index",
            deletes.clone(),
        );

        let resets = Family::default();
        prom.register(
            "index_resets",
            "The number of times a resource kind was relisted",
            resets.clone(),
        );

        Self {
            inner,
            size,
            applies,
            deletes,
            resets,
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }
}

impl<T> IndexMetrics<Arc<RwLock<T>>> {
    fn observe_size<R>(&self, kind: &str, namespace: String)
    where
        T: SizedIndex<R>,
    {
        let size = SizedIndex::<R>::size(&self.inner, &namespace);
        self.size
            .get_or_create(&ResourceLabels {
                kind: kind.to_string(),
                namespace,
            })
            .set(size as i64);
    }
}

impl<R, T> kubert::index::IndexNamespacedResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R>,
    T: kubert::index::IndexNamespacedResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let kind = R::kind(&());
        let namespace = resource.namespace().unwrap_or_default();
        self.applies
            .get_or_create(&ResourceLabels {
                kind: kind.to_string(),
                namespace: namespace.clone(),
            })
            .inc();
        self.inner.write().apply(resource);
        self.observe_size::<R>(&kind, namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let kind = R::kind(&());
        self.deletes
            .get_or_create(&ResourceLabels {
                kind: kind.to_string(),
                namespace: namespace.clone(),
            })
            .inc();
        self.inner.write().delete(namespace.clone(), name);
        self.observe_size::<R>(&kind, namespace);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        let kind = R::kind(&());
        let namespaces = resources
            .iter()
            .filter_map(|r| r.namespace())
            .chain(removed.keys().cloned())
            .collect::<BTreeSet<_>>();
        self.resets
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
        self.inner.write().reset(resources, removed);
        for namespace in namespaces {
            self.observe_size::<R>(&kind, namespace);
        }
    }
}
