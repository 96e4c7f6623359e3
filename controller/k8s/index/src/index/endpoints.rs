use super::Index;
use nginx_ingress_core::{PodInfo, ResourceKey};
use nginx_ingress_k8s_api::{Selector, ServicePort};
use std::{
    collections::{BTreeMap, BTreeSet},
    net::{IpAddr, SocketAddr},
};

/// How a backend names a port of its service.
#[derive(Copy, Clone, Debug)]
pub(crate) enum PortRef<'a> {
    Number(i32),
    Name(&'a str),
}

/// The addresses behind one service port.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Backend {
    pub addresses: Vec<String>,
    pub pods: BTreeMap<String, PodInfo>,
    pub external_name: bool,
}

// === impl Index ===

impl Index {
    /// Resolves the ready endpoints of a service port, sorted by address and port.
    ///
    /// An ExternalName service yields its external name. With `use_cluster_ip` the service's
    /// cluster IP is used instead of its endpoints. A missing service or port yields no
    /// addresses; the builder renders such upstreams as empty.
    pub(crate) fn service_endpoints(
        &self,
        namespace: &str,
        service: &str,
        port: PortRef<'_>,
        subselector: Option<&Selector>,
        use_cluster_ip: bool,
    ) -> Backend {
        let key = ResourceKey::new(namespace, service);
        let Some(spec) = self.services.get(&key).and_then(|s| s.spec.as_ref()) else {
            tracing::debug!(%key, "Service not found");
            return Backend::default();
        };
        let ports = spec.ports.as_deref().unwrap_or_default();

        if spec.type_.as_deref() == Some("ExternalName") {
            let Some(external_name) = spec.external_name.as_deref() else {
                return Backend::default();
            };
            let number = match port {
                PortRef::Number(n) => Some(n),
                PortRef::Name(_) => find_port(ports, port).map(|p| p.port),
            };
            return Backend {
                addresses: number
                    .map(|n| format!("{external_name}:{n}"))
                    .into_iter()
                    .collect(),
                pods: BTreeMap::new(),
                external_name: true,
            };
        }

        let Some(svc_port) = find_port(ports, port) else {
            tracing::debug!(%key, ?port, "Service port not found");
            return Backend::default();
        };

        if use_cluster_ip {
            let addresses = spec
                .cluster_ip
                .as_deref()
                .and_then(|ip| ip.parse::<IpAddr>().ok())
                .and_then(|ip| Some(SocketAddr::new(ip, u16::try_from(svc_port.port).ok()?)))
                .map(|addr| addr.to_string())
                .into_iter()
                .collect();
            return Backend {
                addresses,
                ..Backend::default()
            };
        }

        let port_name = svc_port.name.as_deref().unwrap_or_default();
        let mut addresses = BTreeSet::new();
        let mut pods = BTreeMap::new();
        for slice in self.endpoint_slices.get(&key).into_iter().flat_map(|s| s.values()) {
            // Slice ports carry the service port's name and the resolved target port.
            let Some(target) = slice
                .ports
                .iter()
                .flatten()
                .find(|p| p.name.as_deref().unwrap_or_default() == port_name)
                .and_then(|p| p.port)
                .and_then(|p| u16::try_from(p).ok())
            else {
                continue;
            };

            for endpoint in &slice.endpoints {
                if endpoint.conditions.as_ref().and_then(|c| c.ready) != Some(true) {
                    continue;
                }
                let pod = endpoint
                    .target_ref
                    .as_ref()
                    .filter(|r| r.kind.as_deref() == Some("Pod"))
                    .and_then(|r| {
                        let ns = r.namespace.as_deref().unwrap_or(namespace);
                        self.pods.get(&ResourceKey::new(ns, r.name.clone()?))
                    });
                if let Some(selector) = subselector {
                    if !pod.is_some_and(|p| selector.matches(&p.labels)) {
                        continue;
                    }
                }

                for ip in &endpoint.addresses {
                    let Ok(ip) = ip.parse::<IpAddr>() else {
                        tracing::debug!(%key, address = %ip, "Ignoring non-IP endpoint");
                        continue;
                    };
                    let addr = SocketAddr::new(ip, target);
                    if let Some(pod) = pod {
                        pods.insert(addr.to_string(), pod.info.clone());
                    }
                    addresses.insert(addr);
                }
            }
        }

        Backend {
            addresses: addresses.into_iter().map(|a| a.to_string()).collect(),
            pods,
            external_name: false,
        }
    }
}

fn find_port<'p>(ports: &'p [ServicePort], port: PortRef<'_>) -> Option<&'p ServicePort> {
    ports.iter().find(|p| match port {
        PortRef::Number(n) => p.port == n,
        PortRef::Name(name) => p.name.as_deref() == Some(name),
    })
}
