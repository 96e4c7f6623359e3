//! Builds configurations and renders them with the bundled templates.

use crate::{
    annotations::*, generate_ingress_config, generate_mergeable_ingress_config,
    generate_transport_server_config, PassthroughHosts,
};
use maplit::btreemap;
use nginx_ingress_core::{
    ConfigParams, IngressEx, Kind, MergeableIngresses, ResourceKey, StaticParams,
    TransportServerEx, EMPTY_UPSTREAM_SERVER,
};
use nginx_ingress_k8s_api::{
    transport_server::{TransportServerAction, TransportServerListener, TransportServerUpstream},
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ObjectMeta, ServiceBackendPort, TransportServer,
    TransportServerSpec,
};
use nginx_ingress_templates::Engine;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

fn mk_ingress(
    name: &str,
    host: &str,
    paths: &[(&str, &str)],
    annotations: BTreeMap<String, String>,
) -> Ingress {
    let paths = paths
        .iter()
        .map(|(path, service)| HTTPIngressPath {
            path: Some(path.to_string()),
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
        })
        .collect();
    Ingress {
        metadata: ObjectMeta {
            namespace: Some("default".to_string()),
            name: Some(name.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue { paths }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_cafe(annotations: BTreeMap<String, String>) -> IngressEx {
    IngressEx {
        ingress: mk_ingress(
            "cafe",
            "cafe.example.com",
            &[("/tea", "tea-svc"), ("/coffee", "coffee-svc")],
            annotations,
        ),
        endpoints: btreemap! {
            "default|tea-svc||80".to_string() => vec![
                "10.0.0.1:8080".to_string(),
                "10.0.0.2:8080".to_string(),
            ],
            "default|coffee-svc||80".to_string() => vec![
                "10.0.0.3:8080".to_string(),
                "10.0.0.4:8080".to_string(),
            ],
        },
        ..Default::default()
    }
}

fn render_ingress(ex: &IngressEx) -> String {
    let (config, _) = generate_ingress_config(ex, &ConfigParams::default(), &StaticParams::default());
    let engine = Engine::bundled().expect("bundled templates must parse");
    String::from_utf8(engine.execute_ingress(&config).expect("ingress must render"))
        .expect("rendered configuration must be utf-8")
}

fn directive_lines(out: &str) -> Vec<&str> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

#[test]
fn default_ingress() {
    let ex = mk_cafe(BTreeMap::new());
    assert_eq!(
        ResourceKey::of(&ex.ingress).file_name(Kind::Ingress),
        "ingress_default_cafe"
    );

    let out = render_ingress(&ex);
    let lines = directive_lines(&out);
    assert_eq!(lines.iter().filter(|l| l.starts_with("upstream ")).count(), 2);
    assert_eq!(
        lines.iter().filter(|l| l.starts_with("server 10.0.0.")).count(),
        4
    );
    assert_eq!(lines.iter().filter(|l| **l == "server {").count(), 1);
    assert_eq!(lines.iter().filter(|l| l.starts_with("location ")).count(), 2);
    assert!(lines.contains(&"upstream default-cafe-cafe.example.com-tea-svc-80 {"));
    assert!(lines.contains(&"server 10.0.0.1:8080 max_fails=1 fail_timeout=10s;"));
    assert!(lines.contains(&"proxy_pass http://default-cafe-cafe.example.com-coffee-svc-80;"));
}

#[test]
fn rate_limit_annotations() {
    let ex = mk_cafe(btreemap! {
        LIMIT_REQ_RATE.to_string() => "200r/s".to_string(),
        LIMIT_REQ_KEY.to_string() => "${binary_remote_addr}".to_string(),
        LIMIT_REQ_ZONE_SIZE.to_string() => "10m".to_string(),
        LIMIT_REQ_BURST.to_string() => "100".to_string(),
        LIMIT_REQ_DELAY.to_string() => "50".to_string(),
        LIMIT_REQ_REJECT_CODE.to_string() => "429".to_string(),
        LIMIT_REQ_DRY_RUN.to_string() => "true".to_string(),
        LIMIT_REQ_LOG_LEVEL.to_string() => "info".to_string(),
    });
    let out = render_ingress(&ex);
    let lines = directive_lines(&out);

    let zone = "limit_req_zone ${binary_remote_addr} zone=default/cafe:10m rate=200r/s;";
    assert_eq!(lines.iter().filter(|l| **l == zone).count(), 1);
    for directive in [
        "limit_req zone=default/cafe burst=100 delay=50;",
        "limit_req_status 429;",
        "limit_req_dry_run on;",
        "limit_req_log_level info;",
    ] {
        assert_eq!(
            lines.iter().filter(|l| **l == directive).count(),
            2,
            "{directive}"
        );
    }
}

#[test]
fn minion_path_regex() {
    let master = IngressEx {
        ingress: mk_ingress(
            "cafe-master",
            "cafe.example.com",
            &[],
            btreemap! { MERGEABLE_INGRESS_TYPE.to_string() => "master".to_string() },
        ),
        ..Default::default()
    };
    let coffee = IngressEx {
        ingress: mk_ingress(
            "coffee",
            "cafe.example.com",
            &[("/coffee", "coffee-svc")],
            btreemap! {
                MERGEABLE_INGRESS_TYPE.to_string() => "minion".to_string(),
                PATH_REGEX.to_string() => "case_insensitive".to_string(),
            },
        ),
        ..Default::default()
    };
    let tea = IngressEx {
        ingress: mk_ingress(
            "tea",
            "cafe.example.com",
            &[("/tea", "tea-svc")],
            btreemap! { MERGEABLE_INGRESS_TYPE.to_string() => "minion".to_string() },
        ),
        ..Default::default()
    };
    let mergeable = MergeableIngresses {
        master,
        minions: vec![coffee, tea],
    };

    let (config, warnings) = generate_mergeable_ingress_config(
        &mergeable,
        &ConfigParams::default(),
        &StaticParams::default(),
    );
    assert!(warnings.is_empty(), "{warnings:?}");
    let engine = Engine::bundled().expect("bundled templates must parse");
    let out = String::from_utf8(engine.execute_ingress(&config).expect("ingress must render"))
        .expect("rendered configuration must be utf-8");
    let lines = directive_lines(&out);
    assert!(lines.contains(&"location ~* \"^/coffee\" {"));
    assert!(lines.contains(&"location /tea {"));
    assert!(lines.contains(&"set $resource_name \"coffee\";"));
}

fn mk_passthrough(name: &str) -> TransportServerEx {
    let mut ts = TransportServer::new(
        name,
        TransportServerSpec {
            listener: TransportServerListener {
                name: "tls-passthrough".to_string(),
                protocol: "TLS_PASSTHROUGH".to_string(),
            },
            host: Some("app.example.com".to_string()),
            upstreams: vec![TransportServerUpstream {
                name: "app".to_string(),
                service: "app-svc".to_string(),
                port: 8443,
                ..Default::default()
            }],
            action: Some(TransportServerAction {
                pass: "app".to_string(),
            }),
            ..Default::default()
        },
    );
    ts.metadata.namespace = Some("ns".to_string());
    TransportServerEx {
        transport_server: ts,
        listener_port: 443,
        ..Default::default()
    }
}

#[test]
fn passthrough_servers_share_a_host() {
    let static_params = StaticParams {
        tls_passthrough: true,
        ..Default::default()
    };
    let servers = [mk_passthrough("a"), mk_passthrough("b")];
    let engine = Engine::bundled().expect("bundled templates must parse");
    for ex in &servers {
        let (config, warnings) =
            generate_transport_server_config(ex, &ConfigParams::default(), &static_params);
        assert!(warnings.is_empty(), "{warnings:?}");
        let out = engine
            .execute_transport_server(&config)
            .expect("transport server must render");
        let out = String::from_utf8(out).expect("rendered configuration must be utf-8");
        assert!(out.contains(&format!(
            "listen unix:/var/lib/nginx/passthrough-ns_{}.sock proxy_protocol;",
            config.server.name
        )));
    }

    let keys = servers
        .iter()
        .map(|ex| ResourceKey::of(&ex.transport_server))
        .collect::<Vec<_>>();
    let (hosts, warnings) = PassthroughHosts::build(keys.iter().map(|k| (k, "app.example.com")));
    assert_eq!(hosts.len(), 1);
    assert_eq!(
        String::from_utf8(hosts.render()).expect("hosts map must be utf-8"),
        "app.example.com unix:/var/lib/nginx/passthrough-ns_b.sock;\n"
    );
    assert_eq!(warnings.len(), 1);
}

#[test]
fn empty_endpoints_render_placeholder_server() {
    let mut ex = mk_cafe(BTreeMap::new());
    ex.endpoints.remove("default|coffee-svc||80");
    let out = render_ingress(&ex);
    let lines = directive_lines(&out);
    assert!(lines.contains(&format!("server {EMPTY_UPSTREAM_SERVER} max_fails=1 fail_timeout=10s;").as_str()));

    let mut in_upstream = false;
    let mut servers = 0;
    for line in &lines {
        if line.starts_with("upstream ") {
            in_upstream = true;
            servers = 0;
        } else if in_upstream && line.starts_with("server ") {
            servers += 1;
        } else if in_upstream && *line == "}" {
            assert!(servers >= 1, "every upstream has at least one server");
            in_upstream = false;
        }
    }
}

#[test]
fn rewrites_win_over_rewrite_target() {
    let ex = mk_cafe(btreemap! {
        REWRITES.to_string() => "serviceName=tea-svc rewrite=/beverages/".to_string(),
        REWRITE_TARGET.to_string() => "/other".to_string(),
    });
    let (_, warnings) =
        generate_ingress_config(&ex, &ConfigParams::default(), &StaticParams::default());
    assert_eq!(warnings.len(), 1);

    let out = render_ingress(&ex);
    let lines = directive_lines(&out);
    assert!(lines.contains(&"proxy_pass http://default-cafe-cafe.example.com-tea-svc-80/beverages/;"));
    assert!(lines.contains(&"proxy_pass http://default-cafe-cafe.example.com-coffee-svc-80;"));
    assert!(!out.contains("/other"));
}

#[test]
fn builds_are_deterministic() {
    let ex = mk_cafe(btreemap! {
        LIMIT_REQ_RATE.to_string() => "10r/s".to_string(),
        PROXY_READ_TIMEOUT.to_string() => "5s".to_string(),
    });
    assert_eq!(render_ingress(&ex), render_ingress(&ex));

    // Upstream names depend on identity, not on the endpoint set.
    let (before, _) =
        generate_ingress_config(&ex, &ConfigParams::default(), &StaticParams::default());
    let mut moved = ex.clone();
    moved.endpoints.insert(
        "default|tea-svc||80".to_string(),
        vec!["10.1.0.9:8080".to_string()],
    );
    let (after, _) =
        generate_ingress_config(&moved, &ConfigParams::default(), &StaticParams::default());
    let names = |c: &nginx_ingress_core::model::v1::IngressNginxConfig| {
        c.upstreams.iter().map(|u| u.name.clone()).collect::<Vec<_>>()
    };
    assert_eq!(names(&before), names(&after));
}
