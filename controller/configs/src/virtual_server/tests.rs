use super::*;
use maplit::btreemap;
use nginx_ingress_core::{SecretReference, EMPTY_UPSTREAM_SERVER};
use nginx_ingress_k8s_api::{
    virtual_server::{ActionReturn, ErrorPageReturn, Match, Tls},
    VirtualServer, VirtualServerRouteSpec, VirtualServerSpec,
};

fn mk_vs(spec: VirtualServerSpec) -> VirtualServer {
    let mut vs = VirtualServer::new("cafe", spec);
    vs.metadata.namespace = Some("default".to_string());
    vs
}

fn mk_vsr(name: &str, spec: VirtualServerRouteSpec) -> VirtualServerRoute {
    let mut vsr = VirtualServerRoute::new(name, spec);
    vsr.metadata.namespace = Some("default".to_string());
    vsr
}

fn mk_upstream(name: &str, service: &str) -> spec::Upstream {
    spec::Upstream {
        name: name.to_string(),
        service: service.to_string(),
        port: 80,
        ..Default::default()
    }
}

fn mk_pass(upstream: &str) -> Option<Action> {
    Some(Action {
        pass: Some(upstream.to_string()),
        ..Default::default()
    })
}

fn mk_route(path: &str, upstream: &str) -> Route {
    Route {
        path: path.to_string(),
        action: mk_pass(upstream),
        ..Default::default()
    }
}

fn mk_cafe(routes: Vec<Route>) -> VirtualServerEx {
    VirtualServerEx {
        virtual_server: mk_vs(VirtualServerSpec {
            host: "cafe.example.com".to_string(),
            upstreams: vec![mk_upstream("tea", "tea-svc"), mk_upstream("coffee", "coffee-svc")],
            routes,
            ..Default::default()
        }),
        endpoints: btreemap! {
            "default|tea-svc||80".to_string() => vec!["10.0.0.1:80".to_string(), "10.0.0.2:80".to_string()],
            "default|coffee-svc||80".to_string() => vec![],
        },
        ..Default::default()
    }
}

fn build(ex: &VirtualServerEx, plus: bool) -> (VirtualServerConfig, Warnings) {
    let static_params = StaticParams {
        nginx_plus: plus,
        ..Default::default()
    };
    generate_virtual_server_config(ex, &ConfigParams::default(), &static_params)
}

fn vs_key() -> ResourceKey {
    ResourceKey::new("default", "cafe")
}

#[test]
fn routes_pass_to_upstreams() {
    let ex = mk_cafe(vec![mk_route("/tea", "tea"), mk_route("/coffee", "coffee")]);
    let (config, warnings) = build(&ex, false);
    assert!(warnings.is_empty(), "{warnings:?}");

    let names = config.upstreams.iter().map(|u| u.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, ["vs_default_cafe_tea", "vs_default_cafe_coffee"]);
    let tea = config.upstream("vs_default_cafe_tea").expect("tea upstream");
    assert_eq!(tea.servers.len(), 2);
    assert_eq!(tea.upstream_labels.resource_type, "virtualserver");
    let coffee = config.upstream("vs_default_cafe_coffee").expect("coffee upstream");
    assert_eq!(coffee.servers[0].address, EMPTY_UPSTREAM_SERVER);

    let locations = &config.server.locations;
    assert_eq!(locations.len(), 2);
    assert_eq!(locations[0].path, "/tea");
    assert_eq!(locations[0].proxy_pass, "http://vs_default_cafe_tea");
    assert_eq!(locations[0].proxy_next_upstream, "error timeout");
    assert_eq!(locations[0].service_name, "tea-svc");
    assert!(!locations[0].internal);
    assert_eq!(config.server.listens, ["80", "[::]:80"]);
    assert_eq!(config.server.ssl, None);
}

#[test]
fn missing_tls_secret_rejects_handshakes() {
    let mut ex = mk_cafe(vec![mk_route("/tea", "tea")]);
    ex.virtual_server.spec.tls = Some(Tls {
        secret: Some("cafe-secret".to_string()),
        redirect: None,
    });
    let (config, warnings) = build(&ex, false);
    let ssl = config.server.ssl.expect("TLS server");
    assert!(ssl.reject_handshake);
    assert_eq!(warnings.get(Kind::VirtualServer, &vs_key()).len(), 1);

    ex.secret_refs = btreemap! {
        "default/cafe-secret".to_string() => SecretReference::valid(secret_type::TLS, b"pem".to_vec()),
    };
    let (config, warnings) = build(&ex, false);
    let ssl = config.server.ssl.expect("TLS server");
    assert!(!ssl.reject_handshake);
    assert_eq!(ssl.certificate, "/etc/nginx/secrets/default_cafe-secret");
    assert!(config.server.listens.contains(&"443 ssl".to_string()));
    assert!(warnings.is_empty());
}

#[test]
fn undefined_upstream_returns_bad_gateway() {
    let ex = mk_cafe(vec![mk_route("/milk", "milk")]);
    let (config, warnings) = build(&ex, false);
    assert_eq!(config.server.locations[0].return_.as_ref().map(|r| r.code), Some(502));
    assert_eq!(
        warnings.get(Kind::VirtualServer, &vs_key()),
        ["upstream milk of route /milk is not defined"]
    );
}

#[test]
fn splits_skip_zero_weights() {
    let route = Route {
        path: "/tea".to_string(),
        splits: vec![
            Split { weight: 90, action: mk_pass("tea") },
            Split { weight: 10, action: mk_pass("coffee") },
            Split { weight: 0, action: mk_pass("coffee") },
        ],
        ..Default::default()
    };
    let (config, _) = build(&mk_cafe(vec![route]), false);

    assert_eq!(
        config.split_clients,
        [SplitClient {
            source: "$request_id".to_string(),
            variable: "$vs_default_cafe_splits_0".to_string(),
            distributions: vec![
                Distribution {
                    weight: "90%".to_string(),
                    value: "/internal_location_splits_0_split_0".to_string(),
                },
                Distribution {
                    weight: "10%".to_string(),
                    value: "/internal_location_splits_0_split_1".to_string(),
                },
            ],
        }]
    );
    assert_eq!(
        config.server.internal_redirect_locations,
        [InternalRedirectLocation {
            path: "/tea".to_string(),
            destination: "$vs_default_cafe_splits_0".to_string(),
        }]
    );
    let locations = &config.server.locations;
    assert_eq!(locations.len(), 2);
    assert!(locations.iter().all(|l| l.internal));
    assert_eq!(locations[0].proxy_pass, "http://vs_default_cafe_tea$request_uri");
}

#[test]
fn two_way_splits_use_keyval_on_plus() {
    let route = Route {
        path: "/tea".to_string(),
        splits: vec![
            Split { weight: 80, action: mk_pass("tea") },
            Split { weight: 20, action: mk_pass("coffee") },
        ],
        ..Default::default()
    };
    let (config, _) = build(&mk_cafe(vec![route]), true);

    assert_eq!(config.key_val_zones.len(), 1);
    assert_eq!(config.key_val_zones[0].name, "vs_default_cafe_keyval_zone");
    assert_eq!(
        config.key_vals,
        [KeyVal {
            key: "vs_default_cafe_keyval_key_0".to_string(),
            variable: "$vs_default_cafe_keyval_0".to_string(),
            zone_name: "vs_default_cafe_keyval_zone".to_string(),
        }]
    );
    assert_eq!(config.split_clients.len(), 101);
    assert_eq!(
        config.two_way_split_clients,
        [TwoWaySplitClients {
            key: "vs_default_cafe_keyval_key_0".to_string(),
            zone_name: "vs_default_cafe_keyval_zone".to_string(),
            weight: 80,
        }]
    );
    let map = &config.maps[0];
    assert_eq!(map.variable, "$vs_default_cafe_splits_0");
    assert_eq!(
        map.parameters.last(),
        Some(&Parameter {
            value: "default".to_string(),
            result: "$vs_default_cafe_split_clients_0_80".to_string(),
        })
    );
}

#[test]
fn matches_chain_conditions() {
    let route = Route {
        path: "/tea".to_string(),
        matches: vec![Match {
            conditions: vec![
                Condition {
                    header: Some("X-Version".to_string()),
                    value: "v2".to_string(),
                    ..Default::default()
                },
                Condition {
                    cookie: Some("user".to_string()),
                    value: "!guest".to_string(),
                    ..Default::default()
                },
            ],
            action: mk_pass("coffee"),
            splits: vec![],
        }],
        action: mk_pass("tea"),
        ..Default::default()
    };
    let (config, warnings) = build(&mk_cafe(vec![route]), false);
    assert!(warnings.is_empty(), "{warnings:?}");

    let prefix = "$vs_default_cafe_matches_0";
    assert_eq!(
        config.maps,
        [
            Map {
                source: "$http_x_version".to_string(),
                variable: format!("{prefix}_match_0_cond_0"),
                parameters: vec![
                    Parameter {
                        value: "\"v2\"".to_string(),
                        result: format!("{prefix}_match_0_cond_1"),
                    },
                    Parameter {
                        value: "default".to_string(),
                        result: "0".to_string(),
                    },
                ],
            },
            Map {
                source: "$cookie_user".to_string(),
                variable: format!("{prefix}_match_0_cond_1"),
                parameters: vec![
                    Parameter {
                        value: "\"guest\"".to_string(),
                        result: "0".to_string(),
                    },
                    Parameter {
                        value: "default".to_string(),
                        result: "1".to_string(),
                    },
                ],
            },
            Map {
                source: format!("{prefix}_match_0_cond_0"),
                variable: prefix.to_string(),
                parameters: vec![
                    Parameter {
                        value: "~^1".to_string(),
                        result: "/internal_location_matches_0_match_0".to_string(),
                    },
                    Parameter {
                        value: "default".to_string(),
                        result: "/internal_location_matches_0_default".to_string(),
                    },
                ],
            },
        ]
    );
    let paths = config.server.locations.iter().map(|l| l.path.as_str()).collect::<Vec<_>>();
    assert_eq!(
        paths,
        ["/internal_location_matches_0_match_0", "/internal_location_matches_0_default"]
    );
}

#[test]
fn delegates_to_virtual_server_routes() {
    let mut ex = mk_cafe(vec![
        Route {
            path: "/tea".to_string(),
            route: Some("tea-routes".to_string()),
            ..Default::default()
        },
        Route {
            path: "/milk".to_string(),
            route: Some("default/milk-routes".to_string()),
            ..Default::default()
        },
    ]);
    ex.virtual_server_routes = vec![mk_vsr(
        "tea-routes",
        VirtualServerRouteSpec {
            host: "cafe.example.com".to_string(),
            upstreams: vec![mk_upstream("green", "green-tea")],
            subroutes: vec![mk_route("/tea/green", "green"), mk_route("/coffee", "green")],
            ..Default::default()
        },
    )];
    let (config, warnings) = build(&ex, false);

    let green = config
        .upstream("vs_default_cafe_vsr_default_tea-routes_green")
        .expect("upstream of the VirtualServerRoute");
    assert_eq!(green.upstream_labels.resource_type, "virtualserverroute");
    assert_eq!(green.upstream_labels.resource_name, "tea-routes");

    assert_eq!(config.server.locations.len(), 1);
    let location = &config.server.locations[0];
    assert_eq!(location.path, "/tea/green");
    assert!(location.is_vsr);
    assert_eq!(location.vsr_name, "tea-routes");

    let vsr = ResourceKey::new("default", "tea-routes");
    assert_eq!(warnings.get(Kind::VirtualServerRoute, &vsr).len(), 1);
    assert_eq!(
        warnings.get(Kind::VirtualServer, &vs_key()),
        ["VirtualServerRoute default/milk-routes is not found; route /milk is ignored"]
    );
}

#[test]
fn return_actions_and_error_pages() {
    let route = Route {
        path: "/tea".to_string(),
        action: Some(Action {
            return_: Some(ActionReturn {
                code: None,
                type_: None,
                body: "say \"hi\"".to_string(),
            }),
            ..Default::default()
        }),
        error_pages: vec![spec::ErrorPage {
            codes: vec![502, 503],
            return_: Some(ErrorPageReturn {
                code: Some(200),
                type_: None,
                body: "sorry".to_string(),
                headers: vec![],
            }),
            redirect: None,
        }],
        ..Default::default()
    };
    let (config, _) = build(&mk_cafe(vec![route]), false);

    let location = &config.server.locations[0];
    assert_eq!(
        location.return_,
        Some(Return {
            code: 200,
            default_type: "text/plain".to_string(),
            text: "say \\\"hi\\\"".to_string(),
        })
    );
    assert_eq!(
        location.error_pages,
        [ErrorPage {
            codes: "502 503".to_string(),
            name: "@error_page_0_0".to_string(),
            response_code: 200,
        }]
    );
    assert_eq!(config.server.error_page_locations[0].default_type, "text/html");
}

#[test]
fn plus_only_upstream_settings_are_ignored_on_oss() {
    let mut ex = mk_cafe(vec![mk_route("/tea", "tea")]);
    ex.virtual_server.spec.upstreams[0].slow_start = Some("10s".to_string());
    ex.virtual_server.spec.upstreams[0].health_check = Some(spec::HealthCheck {
        enable: true,
        status_match: Some("200".to_string()),
        ..Default::default()
    });

    let (config, warnings) = build(&ex, false);
    assert_eq!(config.upstreams[0].slow_start, "");
    assert!(config.server.health_checks.is_empty());
    assert_eq!(warnings.get(Kind::VirtualServer, &vs_key()).len(), 2);

    let (config, warnings) = build(&ex, true);
    assert!(warnings.is_empty(), "{warnings:?}");
    assert_eq!(config.upstreams[0].slow_start, "10s");
    let check = &config.server.health_checks[0];
    assert_eq!(check.name, "vs_default_cafe_tea");
    assert_eq!(check.match_, "vs_default_cafe_tea_match");
    assert_eq!(check.interval, "5s");
    assert_eq!(config.status_matches[0].code, "200");
}
