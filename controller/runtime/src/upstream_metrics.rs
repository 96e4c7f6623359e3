use crate::configurator::{LabelUpdater, UpstreamMetric};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{family::Family, gauge::Gauge},
    registry::Registry,
};
use std::collections::HashMap;

/// Exposes the servers of every upstream NGINX serves as an info gauge.
#[derive(Clone, Debug)]
pub struct UpstreamServerMetrics {
    servers: Family<ServerLabels, Gauge>,
    current: HashMap<String, Vec<ServerLabels>>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ServerLabels {
    upstream: String,
    server: String,
    service: String,
    resource_type: String,
    resource_name: String,
    resource_namespace: String,
    pod: String,
    pod_owner: String,
}

// === impl UpstreamServerMetrics ===

impl UpstreamServerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let servers = Family::default();
        prom.register(
            "upstream_server_info",
            "The servers of each configured upstream",
            servers.clone(),
        );
        Self {
            servers,
            current: HashMap::new(),
        }
    }
}

impl LabelUpdater for UpstreamServerMetrics {
    fn update_upstream(&mut self, upstream: &UpstreamMetric) {
        self.remove_upstream(&upstream.name);

        let labels = upstream
            .servers
            .iter()
            .map(|server| {
                let (pod, pod_owner) = match &server.pod {
                    Some(pod) => (pod.name.clone(), pod.owner.clone().unwrap_or_default()),
                    None => Default::default(),
                };
                ServerLabels {
                    upstream: upstream.name.clone(),
                    server: server.address.clone(),
                    service: upstream.labels.service.clone(),
                    resource_type: upstream.labels.resource_type.clone(),
                    resource_name: upstream.labels.resource_name.clone(),
                    resource_namespace: upstream.labels.resource_namespace.clone(),
                    pod,
                    pod_owner,
                }
            })
            .collect::<Vec<_>>();
        for l in &labels {
            self.servers.get_or_create(l).set(1);
        }
        self.current.insert(upstream.name.clone(), labels);
    }

    fn remove_upstream(&mut self, upstream: &str) {
        for l in self.current.remove(upstream).into_iter().flatten() {
            self.servers.remove(&l);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configurator::ServerMetric;
    use nginx_ingress_core::{model::UpstreamLabels, PodInfo};
    use prometheus_client::encoding::text::encode;

    fn mk_upstream(servers: &[(&str, Option<&str>)]) -> UpstreamMetric {
        UpstreamMetric {
            name: "vs_default_cafe_tea".to_string(),
            labels: UpstreamLabels {
                service: "tea-svc".to_string(),
                resource_type: "virtualserver".to_string(),
                resource_name: "cafe".to_string(),
                resource_namespace: "default".to_string(),
            },
            servers: servers
                .iter()
                .map(|(address, pod)| ServerMetric {
                    address: address.to_string(),
                    pod: pod.map(|name| PodInfo {
                        name: name.to_string(),
                        owner: Some("deployment/tea".to_string()),
                    }),
                })
                .collect(),
        }
    }

    fn encoded(prom: &Registry) -> String {
        let mut out = String::new();
        encode(&mut out, prom).expect("metrics must encode");
        out
    }

    #[test]
    fn replaces_the_servers_of_an_upstream() {
        let mut prom = Registry::with_prefix("nginx_ingress");
        let mut metrics = UpstreamServerMetrics::register(&mut prom);

        metrics.update_upstream(&mk_upstream(&[("10.0.0.1:80", Some("tea-1"))]));
        let out = encoded(&prom);
        assert!(out.contains(r#"server="10.0.0.1:80""#), "{out}");
        assert!(out.contains(r#"pod="tea-1""#), "{out}");

        metrics.update_upstream(&mk_upstream(&[("10.0.0.2:80", None)]));
        let out = encoded(&prom);
        assert!(!out.contains(r#"server="10.0.0.1:80""#), "{out}");
        assert!(out.contains(r#"server="10.0.0.2:80""#), "{out}");

        metrics.remove_upstream("vs_default_cafe_tea");
        let out = encoded(&prom);
        assert!(!out.contains("10.0.0.2:80"), "{out}");
    }
}
