use super::{
    endpoints::{Backend, PortRef},
    first_host, ingress_backends, ingress_class, ingress_secrets, mergeable_type, policy_key, Index,
};
use crate::secrets;
use nginx_ingress_core::{
    backend_port, endpoints_key, ex::Endpoints, IngressEx, Kind, MergeableIngresses, PodInfo,
    Resource, ResourceKey, ResourceRef, SecretReference, TransportServerEx, VirtualServerEx,
    Warnings,
};
use nginx_ingress_k8s_api::{
    virtual_server::Upstream, Ingress, ResourceExt, ServiceBackendPort, TransportServer,
    VirtualServer,
};
use std::collections::{BTreeMap, BTreeSet};

/// Accumulates the secondary objects of one enriched resource.
#[derive(Default)]
struct Joined {
    endpoints: Endpoints,
    external_name_services: BTreeSet<String>,
    pods_by_ip: BTreeMap<String, PodInfo>,
    secret_refs: BTreeMap<String, SecretReference>,
}

// === impl Index ===

impl Index {
    /// Produces the enriched form of a routing resource.
    ///
    /// Yields no resource when the resource is gone, belongs to another ingress class, is a
    /// minion (rendered by its master), or cannot be configured; any configuration it had must
    /// then be removed. Resolution never fails: problems are returned as warnings.
    pub fn resolve(&self, r: &ResourceRef) -> (Option<Resource>, Warnings) {
        let mut warnings = Warnings::default();
        let resource = match r.kind {
            Kind::Ingress => self.resolve_ingress(&r.key, &mut warnings),
            Kind::VirtualServer => self
                .virtual_servers
                .get(&r.key)
                .filter(|vs| self.accepts_class(vs.spec.ingress_class_name.as_deref()))
                .map(|vs| Resource::VirtualServer(Box::new(self.virtual_server_ex(vs)))),
            Kind::TransportServer => self
                .transport_servers
                .get(&r.key)
                .filter(|ts| self.accepts_class(ts.spec.ingress_class_name.as_deref()))
                .and_then(|ts| self.transport_server_ex(&r.key, ts, &mut warnings))
                .map(|ex| Resource::TransportServer(Box::new(ex))),
            kind => {
                tracing::debug!(%kind, "Not a routing resource");
                None
            }
        };
        (resource, warnings)
    }

    fn resolve_ingress(&self, key: &ResourceKey, warnings: &mut Warnings) -> Option<Resource> {
        let ingress = self.ingresses.get(key)?;
        if !self.accepts_class(ingress_class(ingress)) {
            return None;
        }

        match mergeable_type(ingress) {
            Some("minion") => None,
            Some("master") => {
                let Some(host) = first_host(ingress) else {
                    warnings.add(Kind::Ingress, key, "a master Ingress must define a host");
                    return None;
                };
                if let Some(other) = self.master_for(host).filter(|k| *k != key) {
                    warnings.add(
                        Kind::Ingress,
                        key,
                        format!("host {host} already has master Ingress {other}"),
                    );
                    return None;
                }
                let minions = self
                    .ingresses
                    .values()
                    .filter(|ing| {
                        mergeable_type(ing) == Some("minion")
                            && first_host(ing) == Some(host)
                            && self.accepts_class(ingress_class(ing))
                    })
                    .map(|ing| self.ingress_ex(ing))
                    .collect();
                Some(Resource::MergeableIngresses(Box::new(MergeableIngresses {
                    master: self.ingress_ex(ingress),
                    minions,
                })))
            }
            Some(other) => {
                warnings.add(
                    Kind::Ingress,
                    key,
                    format!("invalid mergeable Ingress type {other:?}; the Ingress is treated as a regular Ingress"),
                );
                Some(Resource::Ingress(Box::new(self.ingress_ex(ingress))))
            }
            None => Some(Resource::Ingress(Box::new(self.ingress_ex(ingress)))),
        }
    }

    fn ingress_ex(&self, ingress: &Ingress) -> IngressEx {
        let ns = ingress.namespace().unwrap_or_default();
        let mut joined = Joined::default();

        for (service, port) in ingress_backends(ingress) {
            let port_ref = match port {
                Some(ServiceBackendPort {
                    number: Some(n), ..
                }) => PortRef::Number(*n),
                Some(ServiceBackendPort {
                    name: Some(name), ..
                }) => PortRef::Name(name),
                _ => PortRef::Number(0),
            };
            let backend = self.service_endpoints(&ns, service, port_ref, None, false);
            let ekey = endpoints_key(&ns, service, None, backend_port(port));
            if backend.external_name {
                joined.external_name_services.insert(service.to_string());
            }
            joined.add(ekey, backend);
        }

        for name in ingress_secrets(ingress) {
            joined.secret(self, ResourceKey::parse(name, &ns));
        }

        IngressEx {
            ingress: ingress.clone(),
            endpoints: joined.endpoints,
            external_name_services: joined.external_name_services,
            pods_by_ip: joined.pods_by_ip,
            secret_refs: joined.secret_refs,
        }
    }

    fn virtual_server_ex(&self, vs: &VirtualServer) -> VirtualServerEx {
        let ns = vs.namespace().unwrap_or_default();
        let mut joined = Joined::default();

        let mut routes = Vec::new();
        let mut seen = BTreeSet::new();
        for route in &vs.spec.routes {
            let Some((route_ns, name)) = route.route_ref(&ns) else {
                continue;
            };
            let key = ResourceKey::new(route_ns, name);
            let Some(vsr) = self.virtual_server_routes.get(&key) else {
                continue;
            };
            if self.accepts_class(vsr.spec.ingress_class_name.as_deref()) && seen.insert(key) {
                routes.push(vsr.clone());
            }
        }

        self.join_upstreams(&mut joined, &ns, &vs.spec.upstreams);
        for vsr in &routes {
            let vsr_ns = vsr.namespace().unwrap_or_default();
            self.join_upstreams(&mut joined, &vsr_ns, &vsr.spec.upstreams);
        }

        if let Some(secret) = vs.spec.tls.as_ref().and_then(|t| t.secret.as_deref()) {
            joined.secret(self, ResourceKey::parse(secret, &ns));
        }

        let mut refs = vs
            .spec
            .policies
            .iter()
            .chain(vs.spec.routes.iter().flat_map(|r| r.policies.iter()))
            .map(|p| policy_key(p, &ns))
            .collect::<Vec<_>>();
        for vsr in &routes {
            let vsr_ns = vsr.namespace().unwrap_or_default();
            refs.extend(
                vsr.spec
                    .subroutes
                    .iter()
                    .flat_map(|r| r.policies.iter())
                    .map(|p| policy_key(p, &vsr_ns)),
            );
        }
        let mut policies = BTreeMap::new();
        for pkey in refs {
            let Some(policy) = self
                .policies
                .get(&pkey)
                .filter(|p| self.accepts_class(p.spec.ingress_class_name.as_deref()))
            else {
                continue;
            };
            for secret in policy.spec.secret_names() {
                joined.secret(self, ResourceKey::parse(secret, &pkey.namespace));
            }
            policies.insert(pkey.to_string(), policy.clone());
        }

        VirtualServerEx {
            virtual_server: vs.clone(),
            virtual_server_routes: routes,
            endpoints: joined.endpoints,
            external_name_services: joined.external_name_services,
            pods_by_ip: joined.pods_by_ip,
            secret_refs: joined.secret_refs,
            policies,
        }
    }

    fn join_upstreams(&self, joined: &mut Joined, ns: &str, upstreams: &[Upstream]) {
        for u in upstreams {
            let backend = self.service_endpoints(
                ns,
                &u.service,
                PortRef::Number(i32::from(u.port)),
                u.subselector.as_ref(),
                u.uses_cluster_ip(),
            );
            if backend.external_name {
                joined
                    .external_name_services
                    .insert(format!("{ns}/{}", u.service));
            }
            joined.add(
                endpoints_key(ns, &u.service, u.subselector.as_ref(), u.port),
                backend,
            );

            if let (Some(backup), Some(port)) = (&u.backup, u.backup_port) {
                let backend =
                    self.service_endpoints(ns, backup, PortRef::Number(i32::from(port)), None, false);
                joined.add(endpoints_key(ns, backup, None, port), backend);
            }
        }
    }

    fn transport_server_ex(
        &self,
        key: &ResourceKey,
        ts: &TransportServer,
        warnings: &mut Warnings,
    ) -> Option<TransportServerEx> {
        let listener = &ts.spec.listener;
        let listener_port = if ts.spec.is_tls_passthrough() {
            if !self.cluster_info.tls_passthrough {
                warnings.add(
                    Kind::TransportServer,
                    key,
                    "TLS passthrough is not enabled; the TransportServer is ignored",
                );
                return None;
            }
            self.cluster_info.tls_passthrough_port
        } else {
            let defined = self
                .global_configuration
                .as_ref()
                .and_then(|gc| gc.spec.listener(&listener.name));
            match defined {
                Some(l) if l.protocol.eq_ignore_ascii_case(&listener.protocol) => l.port,
                Some(l) => {
                    warnings.add(
                        Kind::TransportServer,
                        key,
                        format!(
                            "listener {} is defined with protocol {}, not {}",
                            listener.name, l.protocol, listener.protocol
                        ),
                    );
                    return None;
                }
                None => {
                    warnings.add(
                        Kind::TransportServer,
                        key,
                        format!(
                            "listener {} is not defined in the GlobalConfiguration",
                            listener.name
                        ),
                    );
                    return None;
                }
            }
        };

        let ns = key.namespace.as_str();
        let mut joined = Joined::default();
        for u in &ts.spec.upstreams {
            let backend =
                self.service_endpoints(ns, &u.service, PortRef::Number(i32::from(u.port)), None, false);
            if backend.external_name {
                joined
                    .external_name_services
                    .insert(format!("{ns}/{}", u.service));
            }
            joined.add(endpoints_key(ns, &u.service, None, u.port), backend);
        }

        Some(TransportServerEx {
            transport_server: ts.clone(),
            endpoints: joined.endpoints,
            external_name_services: joined.external_name_services,
            pods_by_ip: joined.pods_by_ip,
            listener_port,
        })
    }
}

// === impl Joined ===

impl Joined {
    /// Records a backend. Every referenced service gets an entry, empty or not.
    fn add(&mut self, key: String, backend: Backend) {
        let Backend {
            addresses, pods, ..
        } = backend;
        self.pods_by_ip.extend(pods);
        let entry = self.endpoints.entry(key).or_default();
        for address in addresses {
            if !entry.contains(&address) {
                entry.push(address);
            }
        }
    }

    fn secret(&mut self, index: &Index, key: ResourceKey) {
        let name = key.to_string();
        if self.secret_refs.contains_key(&name) {
            return;
        }
        let secret = index.secrets.get(&key);
        let reference = secrets::reference(secret);
        if let Some(error) = &reference.error {
            tracing::debug!(secret = %name, %error, "Secret is unusable");
        }
        self.secret_refs.insert(name, reference);
    }
}
