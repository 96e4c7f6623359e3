use crate::{secrets, ClusterInfo};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use kubert::index::NamespacedRemoved;
use nginx_ingress_core::{Kind, PodInfo, ResourceKey, ResourceRef, SecretReference};
use nginx_ingress_k8s_api::{
    ConfigMap, EndpointSlice, GlobalConfiguration, Ingress, Labels, Pod, Policy, ResourceExt,
    Secret, Service, TransportServer, VirtualServer, VirtualServerRoute, SERVICE_NAME_LABEL,
};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::sync::mpsc::UnboundedSender;

mod endpoints;
mod resolve;

pub(crate) const MERGEABLE_INGRESS_TYPE: &str = "nginx.org/mergeable-ingress-type";
pub(crate) const BASIC_AUTH_SECRET: &str = "nginx.org/basic-auth-secret";
pub(crate) const JWT_KEY: &str = "nginx.org/jwt-key";

pub type SharedIndex = Arc<RwLock<Index>>;

/// Caches the cluster objects the controller configures NGINX from.
///
/// Every change is translated into the set of routing resources it affects and published on
/// the update channel; the event loop resolves those resources against the index and hands
/// them to the configurator.
#[derive(Debug)]
pub struct Index {
    cluster_info: ClusterInfo,
    updates: UnboundedSender<Update>,

    ingresses: BTreeMap<ResourceKey, Ingress>,
    virtual_servers: BTreeMap<ResourceKey, VirtualServer>,
    virtual_server_routes: BTreeMap<ResourceKey, VirtualServerRoute>,
    transport_servers: BTreeMap<ResourceKey, TransportServer>,
    policies: BTreeMap<ResourceKey, Policy>,
    global_configuration: Option<GlobalConfiguration>,
    config_map: Option<ConfigMap>,

    services: HashMap<ResourceKey, Service>,
    /// Slices of a service, keyed by the service and then by slice name.
    endpoint_slices: HashMap<ResourceKey, HashMap<String, EndpointSlice>>,
    secrets: HashMap<ResourceKey, Secret>,
    pods: HashMap<ResourceKey, PodMeta>,

    /// Kinds whose initial list has not been observed yet.
    unsynced: HashSet<String>,
    synced: bool,
}

/// A change the event loop must act on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Update {
    /// The resource, or something it references, changed. Resolving it may yield nothing, in
    /// which case its configuration must be removed.
    Reconcile(ResourceRef),

    /// Only the endpoints of services the resource references changed.
    Endpoints(ResourceRef),

    ConfigMap,

    GlobalConfiguration,

    /// The wildcard or default server TLS secret changed.
    SpecialSecrets,

    /// The initial state of every tracked kind has been observed.
    Synced,
}

/// The secrets configured by flags rather than referenced by resources.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpecialSecrets {
    pub wildcard: Option<SecretReference>,
    pub default_server: Option<SecretReference>,
}

#[derive(Clone, Debug)]
struct PodMeta {
    labels: Labels,
    info: PodInfo,
}

/// What a routing resource references, used to find the resources affected by a change.
#[derive(Debug, Default)]
struct Dependencies {
    services: HashSet<ResourceKey>,
    secrets: HashSet<ResourceKey>,
    policies: HashSet<ResourceKey>,
    routes: HashSet<ResourceKey>,
}

// === impl Index ===

impl Index {
    pub fn shared(cluster_info: ClusterInfo, updates: UnboundedSender<Update>) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            cluster_info,
            updates,
            ingresses: BTreeMap::new(),
            virtual_servers: BTreeMap::new(),
            virtual_server_routes: BTreeMap::new(),
            transport_servers: BTreeMap::new(),
            policies: BTreeMap::new(),
            global_configuration: None,
            config_map: None,
            services: HashMap::new(),
            endpoint_slices: HashMap::new(),
            secrets: HashMap::new(),
            pods: HashMap::new(),
            unsynced: HashSet::new(),
            synced: false,
        }))
    }

    /// Delays [`Update::Synced`] until the initial list of `R` has been indexed.
    pub fn track_sync<R>(&mut self)
    where
        R: kube::Resource<DynamicType = ()>,
    {
        self.unsynced.insert(R::kind(&()).into_owned());
    }

    pub fn cluster_info(&self) -> &ClusterInfo {
        &self.cluster_info
    }

    pub fn config_map(&self) -> Option<&ConfigMap> {
        self.config_map.as_ref()
    }

    /// Every resource that may render a configuration file, in a stable order.
    pub fn resources(&self) -> Vec<ResourceRef> {
        let ingresses = self
            .ingresses
            .iter()
            .filter(|(_, ing)| mergeable_type(ing) != Some("minion"))
            .map(|(k, _)| ResourceRef::new(Kind::Ingress, k.clone()));
        let virtual_servers = self
            .virtual_servers
            .keys()
            .map(|k| ResourceRef::new(Kind::VirtualServer, k.clone()));
        ingresses
            .chain(virtual_servers)
            .chain(self.transport_servers())
            .collect()
    }

    pub fn transport_servers(&self) -> impl Iterator<Item = ResourceRef> + '_ {
        self.transport_servers
            .keys()
            .map(|k| ResourceRef::new(Kind::TransportServer, k.clone()))
    }

    pub fn special_secrets(&self) -> SpecialSecrets {
        let lookup = |key: &Option<ResourceKey>| {
            key.as_ref()
                .map(|k| secrets::reference(self.secrets.get(k)))
        };
        SpecialSecrets {
            wildcard: lookup(&self.cluster_info.wildcard_tls_secret),
            default_server: lookup(&self.cluster_info.default_server_tls_secret),
        }
    }

    fn send(&self, update: Update) {
        if let Err(error) = self.updates.send(update) {
            tracing::error!(%error, "Failed to send index update");
        }
    }

    fn reconcile(&self, refs: BTreeSet<ResourceRef>) {
        for r in refs {
            tracing::debug!(resource = %r, "Reconciling");
            self.send(Update::Reconcile(r));
        }
    }

    fn mark_synced(&mut self, kind: &str) {
        if self.unsynced.remove(kind) && self.unsynced.is_empty() && !self.synced {
            self.synced = true;
            tracing::info!("Initial state indexed");
            self.send(Update::Synced);
        }
    }

    /// Applies and deletes every resource of a relisted kind, then records that the kind
    /// has been listed.
    fn reset_kind<R>(&mut self, resources: Vec<R>, removed: NamespacedRemoved)
    where
        Self: kubert::index::IndexNamespacedResource<R>,
        R: kube::Resource<DynamicType = ()>,
    {
        for resource in resources {
            <Self as kubert::index::IndexNamespacedResource<R>>::apply(self, resource);
        }
        for (namespace, names) in removed.iter() {
            for name in names.iter() {
                <Self as kubert::index::IndexNamespacedResource<R>>::delete(
                    self,
                    namespace.clone(),
                    name.clone(),
                );
            }
        }
        self.mark_synced(&R::kind(&()));
    }

    fn accepts_class(&self, class: Option<&str>) -> bool {
        match class {
            None | Some("") => true,
            Some(class) => class == self.cluster_info.ingress_class,
        }
    }

    /// The resources that render an Ingress: the Ingress itself and, for a minion, the master
    /// of its host.
    fn ingress_owners(&self, key: &ResourceKey) -> BTreeSet<ResourceRef> {
        let mut refs = BTreeSet::new();
        let Some(ingress) = self.ingresses.get(key) else {
            return refs;
        };
        refs.insert(ResourceRef::new(Kind::Ingress, key.clone()));
        if mergeable_type(ingress) == Some("minion") {
            if let Some(master) = first_host(ingress).and_then(|h| self.master_for(h)) {
                refs.insert(ResourceRef::new(Kind::Ingress, master.clone()));
            }
        }
        refs
    }

    /// The first master Ingress of `host`, in key order.
    fn master_for(&self, host: &str) -> Option<&ResourceKey> {
        self.ingresses
            .iter()
            .filter(|(_, ing)| {
                mergeable_type(ing) == Some("master")
                    && first_host(ing) == Some(host)
                    && self.accepts_class(ingress_class(ing))
            })
            .map(|(k, _)| k)
            .next()
    }

    fn ingress_dependencies(&self, key: &ResourceKey, ingress: &Ingress) -> Dependencies {
        let mut deps = Dependencies::default();
        let ns = key.namespace.as_str();
        for backend in ingress_backends(ingress) {
            deps.services.insert(ResourceKey::new(ns, backend.0));
        }
        for secret in ingress_secrets(ingress) {
            deps.secrets.insert(ResourceKey::parse(secret, ns));
        }
        deps
    }

    fn virtual_server_dependencies(&self, key: &ResourceKey, vs: &VirtualServer) -> Dependencies {
        let mut deps = Dependencies::default();
        let ns = key.namespace.as_str();
        if let Some(secret) = vs.spec.tls.as_ref().and_then(|t| t.secret.as_deref()) {
            deps.secrets.insert(ResourceKey::parse(secret, ns));
        }

        let mut upstreams = vec![(ns, &vs.spec.upstreams)];
        let mut policy_refs = vs
            .spec
            .policies
            .iter()
            .chain(vs.spec.routes.iter().flat_map(|r| r.policies.iter()))
            .map(|p| policy_key(p, ns))
            .collect::<Vec<_>>();
        for route in &vs.spec.routes {
            let Some((route_ns, name)) = route.route_ref(ns) else {
                continue;
            };
            let route_key = ResourceKey::new(route_ns, name);
            if let Some(vsr) = self.virtual_server_routes.get(&route_key) {
                let vsr_ns = vsr.namespace().unwrap_or_default();
                policy_refs.extend(
                    vsr.spec
                        .subroutes
                        .iter()
                        .flat_map(|r| r.policies.iter())
                        .map(|p| policy_key(p, &vsr_ns)),
                );
                upstreams.push((route_ns, &vsr.spec.upstreams));
            }
            deps.routes.insert(route_key);
        }

        for (ns, upstreams) in upstreams {
            for u in upstreams {
                deps.services.insert(ResourceKey::new(ns, u.service.clone()));
                if let Some(backup) = &u.backup {
                    deps.services.insert(ResourceKey::new(ns, backup.clone()));
                }
            }
        }

        for pkey in policy_refs {
            if let Some(policy) = self.policies.get(&pkey) {
                for secret in policy.spec.secret_names() {
                    deps.secrets
                        .insert(ResourceKey::parse(secret, &pkey.namespace));
                }
            }
            deps.policies.insert(pkey);
        }
        deps
    }

    fn transport_server_dependencies(key: &ResourceKey, ts: &TransportServer) -> Dependencies {
        let mut deps = Dependencies::default();
        for u in &ts.spec.upstreams {
            deps.services
                .insert(ResourceKey::new(key.namespace.clone(), u.service.clone()));
        }
        deps
    }

    /// Finds the routing resources whose dependencies satisfy `f`.
    fn dependents(&self, f: impl Fn(&Dependencies) -> bool) -> BTreeSet<ResourceRef> {
        let mut refs = BTreeSet::new();
        for (key, ingress) in &self.ingresses {
            if f(&self.ingress_dependencies(key, ingress)) {
                refs.extend(self.ingress_owners(key));
            }
        }
        for (key, vs) in &self.virtual_servers {
            if f(&self.virtual_server_dependencies(key, vs)) {
                refs.insert(ResourceRef::new(Kind::VirtualServer, key.clone()));
            }
        }
        for (key, ts) in &self.transport_servers {
            if f(&Self::transport_server_dependencies(key, ts)) {
                refs.insert(ResourceRef::new(Kind::TransportServer, key.clone()));
            }
        }
        refs
    }

    fn watches_namespace(&self, ns: &str) -> bool {
        self.cluster_info.watches_namespace(ns)
    }

    fn is_special_secret(&self, key: &ResourceKey) -> bool {
        self.cluster_info.wildcard_tls_secret.as_ref() == Some(key)
            || self.cluster_info.default_server_tls_secret.as_ref() == Some(key)
    }
}

impl kubert::index::IndexNamespacedResource<Ingress> for Index {
    fn apply(&mut self, ingress: Ingress) {
        let key = ResourceKey::of(&ingress);
        if !self.watches_namespace(&key.namespace) {
            return;
        }
        let mut affected = self.ingress_owners(&key);
        self.ingresses.insert(key.clone(), ingress);
        affected.extend(self.ingress_owners(&key));
        self.reconcile(affected);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = ResourceKey::new(namespace, name);
        let affected = self.ingress_owners(&key);
        if self.ingresses.remove(&key).is_some() {
            self.reconcile(affected);
        }
    }

    fn reset(&mut self, resources: Vec<Ingress>, removed: NamespacedRemoved) {
        self.reset_kind(resources, removed)
    }
}

impl kubert::index::IndexNamespacedResource<VirtualServer> for Index {
    fn apply(&mut self, vs: VirtualServer) {
        let key = ResourceKey::of(&vs);
        if !self.watches_namespace(&key.namespace) {
            return;
        }
        self.virtual_servers.insert(key.clone(), vs);
        self.send(Update::Reconcile(ResourceRef::new(Kind::VirtualServer, key)));
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = ResourceKey::new(namespace, name);
        if self.virtual_servers.remove(&key).is_some() {
            self.send(Update::Reconcile(ResourceRef::new(Kind::VirtualServer, key)));
        }
    }

    fn reset(&mut self, resources: Vec<VirtualServer>, removed: NamespacedRemoved) {
        self.reset_kind(resources, removed)
    }
}

impl kubert::index::IndexNamespacedResource<VirtualServerRoute> for Index {
    fn apply(&mut self, vsr: VirtualServerRoute) {
        let key = ResourceKey::of(&vsr);
        if !self.watches_namespace(&key.namespace) {
            return;
        }
        self.virtual_server_routes.insert(key.clone(), vsr);
        self.reconcile(self.dependents(|d| d.routes.contains(&key)));
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = ResourceKey::new(namespace, name);
        if self.virtual_server_routes.remove(&key).is_some() {
            self.reconcile(self.dependents(|d| d.routes.contains(&key)));
        }
    }

    fn reset(&mut self, resources: Vec<VirtualServerRoute>, removed: NamespacedRemoved) {
        self.reset_kind(resources, removed)
    }
}

impl kubert::index::IndexNamespacedResource<TransportServer> for Index {
    fn apply(&mut self, ts: TransportServer) {
        let key = ResourceKey::of(&ts);
        if !self.watches_namespace(&key.namespace) {
            return;
        }
        self.transport_servers.insert(key.clone(), ts);
        self.send(Update::Reconcile(ResourceRef::new(Kind::TransportServer, key)));
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = ResourceKey::new(namespace, name);
        if self.transport_servers.remove(&key).is_some() {
            self.send(Update::Reconcile(ResourceRef::new(Kind::TransportServer, key)));
        }
    }

    fn reset(&mut self, resources: Vec<TransportServer>, removed: NamespacedRemoved) {
        self.reset_kind(resources, removed)
    }
}

impl kubert::index::IndexNamespacedResource<Policy> for Index {
    fn apply(&mut self, policy: Policy) {
        let key = ResourceKey::of(&policy);
        // A policy's secrets may have changed, so dependents are found after the update.
        let mut affected = self.dependents(|d| d.policies.contains(&key));
        self.policies.insert(key.clone(), policy);
        affected.extend(self.dependents(|d| d.policies.contains(&key)));
        self.reconcile(affected);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = ResourceKey::new(namespace, name);
        if self.policies.remove(&key).is_some() {
            self.reconcile(self.dependents(|d| d.policies.contains(&key)));
        }
    }

    fn reset(&mut self, resources: Vec<Policy>, removed: NamespacedRemoved) {
        self.reset_kind(resources, removed)
    }
}

impl kubert::index::IndexNamespacedResource<GlobalConfiguration> for Index {
    fn apply(&mut self, gc: GlobalConfiguration) {
        let key = ResourceKey::of(&gc);
        if self.cluster_info.global_configuration.as_ref() != Some(&key) {
            tracing::debug!(%key, "Ignoring GlobalConfiguration");
            return;
        }
        self.global_configuration = Some(gc);
        self.send(Update::GlobalConfiguration);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = ResourceKey::new(namespace, name);
        if self.cluster_info.global_configuration.as_ref() == Some(&key)
            && self.global_configuration.take().is_some()
        {
            self.send(Update::GlobalConfiguration);
        }
    }

    fn reset(&mut self, resources: Vec<GlobalConfiguration>, removed: NamespacedRemoved) {
        self.reset_kind(resources, removed)
    }
}

impl kubert::index::IndexNamespacedResource<ConfigMap> for Index {
    fn apply(&mut self, cm: ConfigMap) {
        let key = ResourceKey::of(&cm);
        if self.cluster_info.config_map.as_ref() != Some(&key) {
            return;
        }
        self.config_map = Some(cm);
        self.send(Update::ConfigMap);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = ResourceKey::new(namespace, name);
        if self.cluster_info.config_map.as_ref() == Some(&key) && self.config_map.take().is_some()
        {
            self.send(Update::ConfigMap);
        }
    }

    fn reset(&mut self, resources: Vec<ConfigMap>, removed: NamespacedRemoved) {
        self.reset_kind(resources, removed)
    }
}

impl kubert::index::IndexNamespacedResource<Service> for Index {
    fn apply(&mut self, svc: Service) {
        let key = ResourceKey::of(&svc);
        self.services.insert(key.clone(), svc);
        self.reconcile(self.dependents(|d| d.services.contains(&key)));
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = ResourceKey::new(namespace, name);
        if self.services.remove(&key).is_some() {
            self.reconcile(self.dependents(|d| d.services.contains(&key)));
        }
    }

    fn reset(&mut self, resources: Vec<Service>, removed: NamespacedRemoved) {
        self.reset_kind(resources, removed)
    }
}

impl kubert::index::IndexNamespacedResource<EndpointSlice> for Index {
    fn apply(&mut self, slice: EndpointSlice) {
        let namespace = slice.namespace().unwrap_or_default();
        let Some(service) = slice.labels().get(SERVICE_NAME_LABEL).cloned() else {
            return;
        };
        let key = ResourceKey::new(namespace, service);
        self.endpoint_slices
            .entry(key.clone())
            .or_default()
            .insert(slice.name_any(), slice);

        for r in self.dependents(|d| d.services.contains(&key)) {
            self.send(Update::Endpoints(r));
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        // The slice's labels are gone with it, so every service's slices are searched.
        let Some(key) = self
            .endpoint_slices
            .iter_mut()
            .filter(|(k, _)| k.namespace == namespace)
            .find_map(|(k, slices)| slices.remove(&name).map(|_| k.clone()))
        else {
            return;
        };
        if self
            .endpoint_slices
            .get(&key)
            .is_some_and(|slices| slices.is_empty())
        {
            self.endpoint_slices.remove(&key);
        }

        for r in self.dependents(|d| d.services.contains(&key)) {
            self.send(Update::Endpoints(r));
        }
    }

    fn reset(&mut self, resources: Vec<EndpointSlice>, removed: NamespacedRemoved) {
        self.reset_kind(resources, removed)
    }
}

impl kubert::index::IndexNamespacedResource<Secret> for Index {
    fn apply(&mut self, secret: Secret) {
        let key = ResourceKey::of(&secret);
        self.secrets.insert(key.clone(), secret);
        if self.is_special_secret(&key) {
            self.send(Update::SpecialSecrets);
        }
        self.reconcile(self.dependents(|d| d.secrets.contains(&key)));
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = ResourceKey::new(namespace, name);
        if self.secrets.remove(&key).is_none() {
            return;
        }
        if self.is_special_secret(&key) {
            self.send(Update::SpecialSecrets);
        }
        self.reconcile(self.dependents(|d| d.secrets.contains(&key)));
    }

    fn reset(&mut self, resources: Vec<Secret>, removed: NamespacedRemoved) {
        self.reset_kind(resources, removed)
    }
}

/// Pods only label metrics, so their changes are indexed without triggering updates.
impl kubert::index::IndexNamespacedResource<Pod> for Index {
    fn apply(&mut self, pod: Pod) {
        let key = ResourceKey::of(&pod);
        let meta = PodMeta {
            labels: pod.metadata.labels.clone().into(),
            info: PodInfo {
                name: key.name.clone(),
                owner: pod_owner(&pod),
            },
        };
        self.pods.insert(key, meta);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.pods.remove(&ResourceKey::new(namespace, name));
    }

    fn reset(&mut self, resources: Vec<Pod>, removed: NamespacedRemoved) {
        self.reset_kind(resources, removed)
    }
}

// === impl ClusterInfo ===

impl ClusterInfo {
    pub fn watches_namespace(&self, ns: &str) -> bool {
        self.watch_namespaces.is_empty() || self.watch_namespaces.iter().any(|n| n == ns)
    }
}

// === helpers ===

pub(crate) fn mergeable_type(ingress: &Ingress) -> Option<&str> {
    ingress
        .annotations()
        .get(MERGEABLE_INGRESS_TYPE)
        .map(String::as_str)
}

pub(crate) fn ingress_class(ingress: &Ingress) -> Option<&str> {
    ingress
        .annotations()
        .get(nginx_ingress_k8s_api::INGRESS_CLASS_ANNOTATION)
        .map(String::as_str)
        .filter(|c| !c.is_empty())
        .or_else(|| {
            ingress
                .spec
                .as_ref()
                .and_then(|s| s.ingress_class_name.as_deref())
        })
}

pub(crate) fn first_host(ingress: &Ingress) -> Option<&str> {
    ingress
        .spec
        .as_ref()?
        .rules
        .as_ref()?
        .first()?
        .host
        .as_deref()
}

/// Every service backend of an Ingress as `(service, port)`, the default backend first.
pub(crate) fn ingress_backends(
    ingress: &Ingress,
) -> impl Iterator<Item = (&str, Option<&nginx_ingress_k8s_api::ServiceBackendPort>)> {
    let spec = ingress.spec.as_ref();
    let default = spec
        .and_then(|s| s.default_backend.as_ref())
        .into_iter();
    let paths = spec
        .and_then(|s| s.rules.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|r| r.http.as_ref())
        .flat_map(|http| http.paths.iter().map(|p| &p.backend));
    default
        .chain(paths)
        .filter_map(|b| b.service.as_ref())
        .map(|s| (s.name.as_str(), s.port.as_ref()))
}

/// The secrets an Ingress names: TLS secrets and the auth annotations. Names may be qualified
/// as `namespace/name`.
pub(crate) fn ingress_secrets(ingress: &Ingress) -> Vec<&str> {
    let mut names = ingress
        .spec
        .as_ref()
        .and_then(|s| s.tls.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|tls| tls.secret_name.as_deref())
        .collect::<Vec<_>>();
    for annotation in [BASIC_AUTH_SECRET, JWT_KEY] {
        if let Some(name) = ingress.annotations().get(annotation) {
            names.push(name.as_str());
        }
    }
    names
}

pub(crate) fn policy_key(
    p: &nginx_ingress_k8s_api::virtual_server::PolicyReference,
    default_ns: &str,
) -> ResourceKey {
    ResourceKey::new(
        p.namespace.as_deref().unwrap_or(default_ns),
        p.name.clone(),
    )
}

/// Names the workload that owns a pod, stripping the pod template hash from ReplicaSet names so
/// pods of a Deployment share an owner across rollouts.
fn pod_owner(pod: &Pod) -> Option<String> {
    let owner = pod
        .owner_references()
        .iter()
        .find(|o| o.controller == Some(true))?;
    if owner.kind == "ReplicaSet" {
        if let Some(hash) = pod.labels().get("pod-template-hash") {
            if let Some(deployment) = owner.name.strip_suffix(&format!("-{hash}")) {
                return Some(deployment.to_string());
            }
        }
    }
    Some(owner.name.clone())
}

// === impl SizedIndex ===

macro_rules! sized_by_key {
    ($($resource:ty => $field:ident),+ $(,)?) => {
        $(
            impl crate::metrics::SizedIndex<$resource> for Index {
                fn size(&self, namespace: &str) -> usize {
                    self.$field.keys().filter(|k| k.namespace == namespace).count()
                }
            }
        )+
    };
}

sized_by_key! {
    Ingress => ingresses,
    VirtualServer => virtual_servers,
    VirtualServerRoute => virtual_server_routes,
    TransportServer => transport_servers,
    Policy => policies,
    Service => services,
    EndpointSlice => endpoint_slices,
    Secret => secrets,
    Pod => pods,
}

impl crate::metrics::SizedIndex<ConfigMap> for Index {
    fn size(&self, _namespace: &str) -> usize {
        self.config_map.iter().count()
    }
}

impl crate::metrics::SizedIndex<GlobalConfiguration> for Index {
    fn size(&self, _namespace: &str) -> usize {
        self.global_configuration.iter().count()
    }
}
