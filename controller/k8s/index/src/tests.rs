use crate::{ClusterInfo, Index, SharedIndex, Update};
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use maplit::btreemap;
use nginx_ingress_core::{Kind, PodInfo, Resource, ResourceKey, ResourceRef};
use nginx_ingress_k8s_api::{
    api::core::v1::{PodStatus, ServiceSpec},
    global_configuration::{GlobalConfigurationSpec, Listener},
    policy::{BasicAuth, PolicySpec},
    transport_server::{TransportServerListener, TransportServerUpstream},
    virtual_server::{PolicyReference, Route, Tls, Upstream},
    ByteString, ConfigMap, Endpoint, EndpointConditions, EndpointPort, EndpointSlice,
    GlobalConfiguration, HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend,
    IngressRule, IngressServiceBackend, IngressSpec, ObjectMeta, ObjectReference, OwnerReference,
    Pod, Policy, Secret, Selector, Service, ServiceBackendPort, ServicePort, TransportServer,
    TransportServerSpec, VirtualServer, VirtualServerSpec, SERVICE_NAME_LABEL,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

fn mk_index(cluster_info: ClusterInfo) -> (SharedIndex, UnboundedReceiver<Update>) {
    let (tx, rx) = unbounded_channel();
    (Index::shared(cluster_info, tx), rx)
}

fn mk_cluster_info() -> ClusterInfo {
    ClusterInfo {
        ingress_class: "nginx".to_string(),
        config_map: Some(ResourceKey::new("nginx-ingress", "nginx-config")),
        global_configuration: Some(ResourceKey::new("nginx-ingress", "nginx-configuration")),
        tls_passthrough_port: 443,
        ..Default::default()
    }
}

fn drain(rx: &mut UnboundedReceiver<Update>) -> Vec<Update> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

fn mk_meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(ns.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn mk_ingress(name: &str, host: &str, service: &str, annotations: BTreeMap<String, String>) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            annotations: Some(annotations),
            ..mk_meta("default", name)
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(format!("/{name}")),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(80),
                                    name: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_service(name: &str) -> Service {
    Service {
        metadata: mk_meta("default", name),
        spec: Some(ServiceSpec {
            cluster_ip: Some("10.96.0.10".to_string()),
            ports: Some(vec![ServicePort {
                port: 80,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A slice of `service` whose endpoints are `(ip, ready, pod)`, all on target port 8080.
fn mk_slice(service: &str, endpoints: &[(&str, bool, &str)]) -> EndpointSlice {
    EndpointSlice {
        metadata: ObjectMeta {
            labels: Some(btreemap! { SERVICE_NAME_LABEL.to_string() => service.to_string() }),
            ..mk_meta("default", &format!("{service}-abcde"))
        },
        address_type: "IPv4".to_string(),
        endpoints: endpoints
            .iter()
            .map(|(ip, ready, pod)| Endpoint {
                addresses: vec![ip.to_string()],
                conditions: Some(EndpointConditions {
                    ready: Some(*ready),
                    ..Default::default()
                }),
                target_ref: Some(ObjectReference {
                    kind: Some("Pod".to_string()),
                    namespace: Some("default".to_string()),
                    name: Some(pod.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
        ports: Some(vec![EndpointPort {
            port: Some(8080),
            ..Default::default()
        }]),
    }
}

fn mk_pod(name: &str, ip: &str, labels: BTreeMap<String, String>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            labels: Some(labels),
            owner_references: Some(vec![OwnerReference {
                controller: Some(true),
                kind: "ReplicaSet".to_string(),
                name: "tea-5d4f9c".to_string(),
                ..Default::default()
            }]),
            ..mk_meta("default", name)
        },
        status: Some(PodStatus {
            pod_ip: Some(ip.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_virtual_server(spec: VirtualServerSpec) -> VirtualServer {
    let mut vs = VirtualServer::new("cafe", spec);
    vs.metadata.namespace = Some("default".to_string());
    vs
}

fn mk_upstream(name: &str, service: &str) -> Upstream {
    Upstream {
        name: name.to_string(),
        service: service.to_string(),
        port: 80,
        ..Default::default()
    }
}

fn ingress_ref(name: &str) -> ResourceRef {
    ResourceRef::new(Kind::Ingress, ResourceKey::new("default", name))
}

fn vs_ref() -> ResourceRef {
    ResourceRef::new(Kind::VirtualServer, ResourceKey::new("default", "cafe"))
}

#[test]
fn ingress_resolves_ready_endpoints() {
    let (index, _rx) = mk_index(mk_cluster_info());
    let mut idx = index.write();
    idx.apply(mk_service("tea-svc"));
    idx.apply(mk_pod(
        "tea-5d4f9c-x1",
        "10.0.0.2",
        btreemap! { "pod-template-hash".to_string() => "5d4f9c".to_string() },
    ));
    idx.apply(mk_slice(
        "tea-svc",
        &[
            ("10.0.0.2", true, "tea-5d4f9c-x1"),
            ("10.0.0.1", true, "tea-5d4f9c-x2"),
            ("10.0.0.3", false, "tea-5d4f9c-x3"),
        ],
    ));
    idx.apply(mk_ingress("cafe", "cafe.example.com", "tea-svc", BTreeMap::new()));

    let (resource, warnings) = idx.resolve(&ingress_ref("cafe"));
    assert!(warnings.is_empty());
    let Some(Resource::Ingress(ex)) = resource else {
        panic!("expected an Ingress");
    };
    assert_eq!(
        ex.endpoints,
        btreemap! {
            "default|tea-svc||80".to_string() => vec![
                "10.0.0.1:8080".to_string(),
                "10.0.0.2:8080".to_string(),
            ],
        }
    );
    assert_eq!(
        ex.pods_by_ip,
        btreemap! {
            "10.0.0.2:8080".to_string() => PodInfo {
                name: "tea-5d4f9c-x1".to_string(),
                owner: Some("tea".to_string()),
            },
        }
    );
}

#[test]
fn missing_services_resolve_to_empty_endpoints() {
    let (index, _rx) = mk_index(mk_cluster_info());
    let mut idx = index.write();
    idx.apply(mk_ingress("cafe", "cafe.example.com", "tea-svc", BTreeMap::new()));

    let (resource, _) = idx.resolve(&ingress_ref("cafe"));
    let Some(Resource::Ingress(ex)) = resource else {
        panic!("expected an Ingress");
    };
    assert_eq!(ex.endpoints.get("default|tea-svc||80"), Some(&Vec::new()));
}

#[test]
fn external_name_services() {
    let (index, _rx) = mk_index(mk_cluster_info());
    let mut idx = index.write();
    idx.apply(Service {
        metadata: mk_meta("default", "tea-svc"),
        spec: Some(ServiceSpec {
            type_: Some("ExternalName".to_string()),
            external_name: Some("tea.example.com".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    });
    idx.apply(mk_ingress("cafe", "cafe.example.com", "tea-svc", BTreeMap::new()));

    let (resource, _) = idx.resolve(&ingress_ref("cafe"));
    let Some(Resource::Ingress(ex)) = resource else {
        panic!("expected an Ingress");
    };
    assert_eq!(
        ex.endpoints["default|tea-svc||80"],
        vec!["tea.example.com:80".to_string()]
    );
    assert!(ex.external_name_services.contains("tea-svc"));
}

#[test]
fn ingress_class_filter() {
    let (index, _rx) = mk_index(mk_cluster_info());
    let mut idx = index.write();
    let other = btreemap! {
        "kubernetes.io/ingress.class".to_string() => "other".to_string(),
    };
    idx.apply(mk_ingress("ignored", "a.example.com", "tea-svc", other));
    idx.apply(mk_ingress("unclassed", "b.example.com", "tea-svc", BTreeMap::new()));

    assert!(idx.resolve(&ingress_ref("ignored")).0.is_none());
    assert!(idx.resolve(&ingress_ref("unclassed")).0.is_some());
}

#[test]
fn minions_are_rendered_by_their_master() {
    let (index, mut rx) = mk_index(mk_cluster_info());
    let mut idx = index.write();
    let master = btreemap! {
        "nginx.org/mergeable-ingress-type".to_string() => "master".to_string(),
    };
    let minion = btreemap! {
        "nginx.org/mergeable-ingress-type".to_string() => "minion".to_string(),
    };
    idx.apply(mk_ingress("cafe-master", "cafe.example.com", "tea-svc", master));
    drain(&mut rx);

    idx.apply(mk_ingress("tea", "cafe.example.com", "tea-svc", minion));
    assert_eq!(
        drain(&mut rx),
        [
            Update::Reconcile(ingress_ref("cafe-master")),
            Update::Reconcile(ingress_ref("tea")),
        ]
    );

    assert!(idx.resolve(&ingress_ref("tea")).0.is_none());
    let (resource, _) = idx.resolve(&ingress_ref("cafe-master"));
    let Some(Resource::MergeableIngresses(m)) = resource else {
        panic!("expected mergeable Ingresses");
    };
    assert_eq!(m.minions.len(), 1);
    assert!(m.minions[0].endpoints.contains_key("default|tea-svc||80"));
    assert_eq!(
        idx.resources(),
        [ingress_ref("cafe-master")],
        "minions have no configuration of their own"
    );

    IndexNamespacedResource::<Ingress>::delete(&mut *idx, "default".to_string(), "tea".to_string());
    assert_eq!(
        drain(&mut rx),
        [
            Update::Reconcile(ingress_ref("cafe-master")),
            Update::Reconcile(ingress_ref("tea")),
        ]
    );
}

#[test]
fn endpoint_slices_publish_endpoint_updates() {
    let (index, mut rx) = mk_index(mk_cluster_info());
    let mut idx = index.write();
    idx.apply(mk_virtual_server(VirtualServerSpec {
        host: "cafe.example.com".to_string(),
        upstreams: vec![mk_upstream("tea", "tea-svc")],
        ..Default::default()
    }));
    assert_eq!(drain(&mut rx), [Update::Reconcile(vs_ref())]);

    idx.apply(mk_service("tea-svc"));
    assert_eq!(drain(&mut rx), [Update::Reconcile(vs_ref())]);

    idx.apply(mk_slice("tea-svc", &[("10.0.0.1", true, "p1")]));
    assert_eq!(drain(&mut rx), [Update::Endpoints(vs_ref())]);

    IndexNamespacedResource::<EndpointSlice>::delete(
        &mut *idx,
        "default".to_string(),
        "tea-svc-abcde".to_string(),
    );
    assert_eq!(drain(&mut rx), [Update::Endpoints(vs_ref())]);

    // Pods only label metrics.
    idx.apply(mk_pod("p1", "10.0.0.1", BTreeMap::new()));
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn virtual_server_subselector_and_cluster_ip() {
    let (index, _rx) = mk_index(mk_cluster_info());
    let mut idx = index.write();
    idx.apply(mk_service("tea-svc"));
    idx.apply(mk_pod("v1", "10.0.0.1", btreemap! { "version".to_string() => "v1".to_string() }));
    idx.apply(mk_pod("v2", "10.0.0.2", btreemap! { "version".to_string() => "v2".to_string() }));
    idx.apply(mk_slice(
        "tea-svc",
        &[("10.0.0.1", true, "v1"), ("10.0.0.2", true, "v2")],
    ));

    let v2 = Selector::from_iter(vec![("version", "v2")]);
    idx.apply(mk_virtual_server(VirtualServerSpec {
        host: "cafe.example.com".to_string(),
        upstreams: vec![
            Upstream {
                subselector: Some(v2),
                ..mk_upstream("tea-v2", "tea-svc")
            },
            Upstream {
                use_cluster_ip: Some(true),
                ..mk_upstream("tea-cluster", "tea-svc")
            },
        ],
        ..Default::default()
    }));

    let (resource, _) = idx.resolve(&vs_ref());
    let Some(Resource::VirtualServer(ex)) = resource else {
        panic!("expected a VirtualServer");
    };
    assert_eq!(
        ex.endpoints,
        btreemap! {
            "default|tea-svc|version=v2|80".to_string() => vec!["10.0.0.2:8080".to_string()],
            "default|tea-svc||80".to_string() => vec!["10.96.0.10:80".to_string()],
        }
    );
}

#[test]
fn virtual_server_secrets_and_policies() {
    let (index, mut rx) = mk_index(mk_cluster_info());
    let mut idx = index.write();
    idx.apply(mk_virtual_server(VirtualServerSpec {
        host: "cafe.example.com".to_string(),
        tls: Some(Tls {
            secret: Some("cafe-secret".to_string()),
            ..Default::default()
        }),
        routes: vec![Route {
            path: "/".to_string(),
            policies: vec![PolicyReference {
                name: "auth".to_string(),
                namespace: None,
            }],
            ..Default::default()
        }],
        ..Default::default()
    }));
    drain(&mut rx);

    let (resource, _) = idx.resolve(&vs_ref());
    let Some(Resource::VirtualServer(ex)) = resource else {
        panic!("expected a VirtualServer");
    };
    let tls = &ex.secret_refs["default/cafe-secret"];
    assert_eq!(tls.error.as_deref(), Some("secret is not found"));
    assert!(ex.policies.is_empty(), "missing policies are left out");

    let mut policy = Policy::new(
        "auth",
        PolicySpec {
            basic_auth: Some(BasicAuth {
                realm: None,
                secret: "htpasswd".to_string(),
            }),
            ..Default::default()
        },
    );
    policy.metadata.namespace = Some("default".to_string());
    idx.apply(policy);
    assert_eq!(drain(&mut rx), [Update::Reconcile(vs_ref())]);

    idx.apply(Secret {
        metadata: mk_meta("default", "htpasswd"),
        type_: Some("nginx.org/htpasswd".to_string()),
        data: Some(btreemap! {
            "htpasswd".to_string() => ByteString(b"user:hash".to_vec()),
        }),
        ..Default::default()
    });
    assert_eq!(drain(&mut rx), [Update::Reconcile(vs_ref())]);

    let (resource, _) = idx.resolve(&vs_ref());
    let Some(Resource::VirtualServer(ex)) = resource else {
        panic!("expected a VirtualServer");
    };
    assert!(ex.policies.contains_key("default/auth"));
    assert_eq!(ex.secret_refs["default/htpasswd"].content, b"user:hash");
}

fn mk_transport_server(listener: &str, protocol: &str) -> TransportServer {
    let mut ts = TransportServer::new(
        "dns",
        TransportServerSpec {
            listener: TransportServerListener {
                name: listener.to_string(),
                protocol: protocol.to_string(),
            },
            upstreams: vec![TransportServerUpstream {
                name: "dns".to_string(),
                service: "coredns".to_string(),
                port: 53,
                ..Default::default()
            }],
            ..Default::default()
        },
    );
    ts.metadata.namespace = Some("default".to_string());
    ts
}

#[test]
fn transport_servers_bind_to_defined_listeners() {
    let (index, mut rx) = mk_index(mk_cluster_info());
    let mut idx = index.write();
    let ts_ref = ResourceRef::new(Kind::TransportServer, ResourceKey::new("default", "dns"));

    idx.apply(mk_transport_server("dns-udp", "UDP"));
    let (resource, warnings) = idx.resolve(&ts_ref);
    assert!(resource.is_none());
    assert_eq!(warnings.len(), 1);

    let mut gc = GlobalConfiguration::new(
        "nginx-configuration",
        GlobalConfigurationSpec {
            listeners: vec![Listener {
                name: "dns-udp".to_string(),
                port: 5353,
                protocol: "UDP".to_string(),
            }],
        },
    );
    gc.metadata.namespace = Some("nginx-ingress".to_string());
    drain(&mut rx);
    idx.apply(gc);
    assert_eq!(drain(&mut rx), [Update::GlobalConfiguration]);

    let (resource, warnings) = idx.resolve(&ts_ref);
    assert!(warnings.is_empty());
    let Some(Resource::TransportServer(ex)) = resource else {
        panic!("expected a TransportServer");
    };
    assert_eq!(ex.listener_port, 5353);
    assert!(ex.endpoints.contains_key("default|coredns||53"));

    idx.apply(mk_transport_server("tls-passthrough", "TLS_PASSTHROUGH"));
    let (resource, warnings) = idx.resolve(&ts_ref);
    assert!(resource.is_none(), "passthrough is disabled");
    assert_eq!(warnings.len(), 1);
}

#[test]
fn only_the_controller_config_map_is_indexed() {
    let (index, mut rx) = mk_index(mk_cluster_info());
    let mut idx = index.write();
    idx.apply(ConfigMap {
        metadata: mk_meta("default", "unrelated"),
        ..Default::default()
    });
    assert!(drain(&mut rx).is_empty());
    assert!(idx.config_map().is_none());

    idx.apply(ConfigMap {
        metadata: mk_meta("nginx-ingress", "nginx-config"),
        data: Some(btreemap! { "server-tokens".to_string() => "off".to_string() }),
        ..Default::default()
    });
    assert_eq!(drain(&mut rx), [Update::ConfigMap]);
    assert!(idx.config_map().is_some());
}

#[test]
fn synced_once_every_kind_is_listed() {
    let (index, mut rx) = mk_index(mk_cluster_info());
    let mut idx = index.write();
    idx.track_sync::<Ingress>();
    idx.track_sync::<Service>();

    IndexNamespacedResource::<Ingress>::reset(
        &mut *idx,
        vec![mk_ingress("cafe", "cafe.example.com", "tea-svc", BTreeMap::new())],
        NamespacedRemoved::default(),
    );
    assert_eq!(drain(&mut rx), [Update::Reconcile(ingress_ref("cafe"))]);

    IndexNamespacedResource::<Service>::reset(
        &mut *idx,
        vec![mk_service("tea-svc")],
        NamespacedRemoved::default(),
    );
    assert_eq!(
        drain(&mut rx),
        [Update::Reconcile(ingress_ref("cafe")), Update::Synced]
    );

    // A relist after a watch restart does not sync again.
    IndexNamespacedResource::<Service>::reset(&mut *idx, vec![], NamespacedRemoved::default());
    assert!(drain(&mut rx).is_empty());
}
