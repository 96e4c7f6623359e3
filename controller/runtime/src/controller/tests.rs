use super::*;
use crate::{
    configurator::NoopLabels,
    core::{Kind, ResourceKey, StaticParams},
    index::{ClusterInfo, Index},
    k8s::{
        Endpoint, EndpointConditions, EndpointPort, EndpointSlice, HTTPIngressPath,
        HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
        IngressSpec, ObjectMeta, Service, ServiceBackendPort, ServicePort, ServiceSpec,
        SERVICE_NAME_LABEL,
    },
    nginx::{fake::FakeManager, ReloadKind},
};
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use maplit::btreemap;
use nginx_ingress_templates::Engine;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc::unbounded_channel;

struct Test {
    index: SharedIndex,
    updates: UnboundedReceiver<Update>,
    controller: Controller<FakeManager>,
    nginx: FakeManager,
    warnings: UnboundedReceiver<Warnings>,
}

fn mk_test() -> Test {
    let (tx, updates) = unbounded_channel();
    let index = Index::shared(
        ClusterInfo {
            ingress_class: "nginx".to_string(),
            ..Default::default()
        },
        tx,
    );
    {
        let mut idx = index.write();
        idx.track_sync::<Ingress>();
        idx.track_sync::<Service>();
        idx.track_sync::<EndpointSlice>();
    }

    let nginx = FakeManager::default();
    let configurator = Configurator::new(
        nginx.clone(),
        Engine::bundled().expect("bundled templates must parse"),
        StaticParams::default(),
        Box::<NoopLabels>::default(),
    );
    let (warnings_tx, warnings) = unbounded_channel();
    Test {
        controller: Controller::new(index.clone(), configurator, warnings_tx),
        index,
        updates,
        nginx,
        warnings,
    }
}

fn mk_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some("default".to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn mk_ingress(name: &str) -> Ingress {
    Ingress {
        metadata: mk_meta(name),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(format!("{name}.example.com")),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/tea".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: "tea-svc".to_string(),
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

fn mk_service() -> Service {
    Service {
        metadata: mk_meta("tea-svc"),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port: 80,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_slice(ips: &[&str]) -> EndpointSlice {
    EndpointSlice {
        metadata: ObjectMeta {
            labels: Some(btreemap! { SERVICE_NAME_LABEL.to_string() => "tea-svc".to_string() }),
            ..mk_meta("tea-svc-abcde")
        },
        address_type: "IPv4".to_string(),
        endpoints: ips
            .iter()
            .map(|ip| Endpoint {
                addresses: vec![ip.to_string()],
                conditions: Some(EndpointConditions {
                    ready: Some(true),
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

fn drain(rx: &mut UnboundedReceiver<Update>) -> Vec<Update> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

fn cafe_ref() -> ResourceRef {
    ResourceRef::new(Kind::Ingress, ResourceKey::new("default", "cafe"))
}

/// Lists the initial state and processes the resulting updates.
async fn sync(test: &mut Test) {
    {
        let mut idx = test.index.write();
        IndexNamespacedResource::<Ingress>::reset(
            &mut *idx,
            vec![mk_ingress("cafe")],
            NamespacedRemoved::default(),
        );
        IndexNamespacedResource::<Service>::reset(
            &mut *idx,
            vec![mk_service()],
            NamespacedRemoved::default(),
        );
        IndexNamespacedResource::<EndpointSlice>::reset(
            &mut *idx,
            vec![mk_slice(&["10.0.0.1"])],
            NamespacedRemoved::default(),
        );
    }
    let updates = drain(&mut test.updates);
    assert_eq!(updates.last(), Some(&Update::Synced));
    test.controller
        .process(updates)
        .await
        .expect("initial configuration must apply");
}

#[tokio::test(flavor = "current_thread")]
async fn starts_nginx_with_the_initial_state() {
    let mut test = mk_test();
    sync(&mut test).await;

    assert!(test.nginx.is_running());
    assert!(test.nginx.take_reloads().is_empty());
    let conf = test
        .nginx
        .file("conf.d/ingress_default_cafe.conf")
        .expect("ingress must be written");
    assert!(conf.contains("10.0.0.1:8080"), "{conf}");
    assert!(test.nginx.file("nginx.conf").is_some());
}

#[tokio::test(flavor = "current_thread")]
async fn ignores_updates_before_sync() {
    let mut test = mk_test();
    test.index.write().apply(mk_ingress("cafe"));
    let updates = drain(&mut test.updates);
    assert_eq!(updates, [Update::Reconcile(cafe_ref())]);

    test.controller
        .process(updates)
        .await
        .expect("updates must be processed");
    assert!(test.nginx.take_writes().is_empty());
    assert!(!test.nginx.is_running());
}

#[tokio::test(flavor = "current_thread")]
async fn removes_deleted_resources() {
    let mut test = mk_test();
    sync(&mut test).await;

    IndexNamespacedResource::<Ingress>::delete(
        &mut *test.index.write(),
        "default".to_string(),
        "cafe".to_string(),
    );
    let updates = drain(&mut test.updates);
    assert_eq!(updates, [Update::Reconcile(cafe_ref())]);
    test.controller
        .process(updates)
        .await
        .expect("updates must be processed");

    assert!(test.nginx.file("conf.d/ingress_default_cafe.conf").is_none());
    assert_eq!(test.nginx.take_reloads(), [ReloadKind::Config]);
}

#[tokio::test(flavor = "current_thread")]
async fn applies_endpoint_changes_with_one_reload() {
    let mut test = mk_test();
    sync(&mut test).await;
    test.index.write().apply(mk_ingress("tea"));

    test.index.write().apply(mk_slice(&["10.0.0.1", "10.0.0.2"]));
    let updates = drain(&mut test.updates);
    assert!(updates.contains(&Update::Endpoints(cafe_ref())), "{updates:?}");
    test.controller
        .process(updates)
        .await
        .expect("updates must be processed");

    // The new ingress reloads once; both endpoint changes share one reload.
    assert_eq!(
        test.nginx.take_reloads(),
        [ReloadKind::Config, ReloadKind::Endpoints]
    );
    let conf = test
        .nginx
        .file("conf.d/ingress_default_tea.conf")
        .expect("ingress must be written");
    assert!(conf.contains("10.0.0.2:8080"), "{conf}");
}

#[tokio::test(flavor = "current_thread")]
async fn publishes_rejections_as_warnings() {
    let mut test = mk_test();
    sync(&mut test).await;
    while test.warnings.try_recv().is_ok() {}

    let mut ingress = mk_ingress("cafe");
    ingress.metadata.annotations = Some(btreemap! {
        "nginx.org/lb-method".to_string() => "bogus".to_string(),
    });
    test.index.write().apply(ingress);
    let updates = drain(&mut test.updates);
    test.controller
        .process(updates)
        .await
        .expect("updates must be processed");

    let warnings = test.warnings.try_recv().expect("a warning must be published");
    assert_eq!(warnings.get(Kind::Ingress, &cafe_ref().key).len(), 1, "{warnings:?}");
}
