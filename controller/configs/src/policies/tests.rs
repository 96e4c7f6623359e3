use super::*;
use maplit::btreemap;
use nginx_ingress_core::SecretReference;
use nginx_ingress_k8s_api::{
    policy::{AccessControl, BasicAuth as BasicAuthSpec, RateLimit, RateLimitCondition, VariableCondition},
    PolicySpec,
};

fn mk_policy(name: &str, spec: PolicySpec) -> Policy {
    let mut policy = Policy::new(name, spec);
    policy.metadata.namespace = Some("default".to_string());
    policy
}

fn mk_ref(name: &str) -> PolicyReference {
    PolicyReference {
        name: name.to_string(),
        namespace: None,
    }
}

fn mk_rate_limit(rate: &str, condition: Option<RateLimitCondition>) -> PolicySpec {
    PolicySpec {
        rate_limit: Some(RateLimit {
            rate: rate.to_string(),
            key: "${binary_remote_addr}".to_string(),
            zone_size: "10M".to_string(),
            condition,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_ex(policies: Vec<Policy>) -> VirtualServerEx {
    VirtualServerEx {
        policies: policies
            .into_iter()
            .map(|p| (ResourceKey::of(&p).to_string(), p))
            .collect(),
        ..Default::default()
    }
}

fn generate_for(ex: &VirtualServerEx, refs: &[PolicyReference], scope: Scope) -> (Policies, Vec<String>) {
    let vs = ResourceKey::new("default", "cafe");
    let static_params = StaticParams::default();
    let ctx = Context {
        ex,
        vs: &vs,
        static_params: &static_params,
        tls: true,
    };
    let mut msgs = Vec::new();
    let policies = generate(refs, "default", scope, &ctx, &mut msgs);
    (policies, msgs)
}

#[test]
fn first_policy_of_a_kind_wins() {
    let ex = mk_ex(vec![
        mk_policy(
            "allow",
            PolicySpec {
                access_control: Some(AccessControl {
                    allow: vec!["10.0.0.0/8".to_string()],
                    deny: vec![],
                }),
                ..Default::default()
            },
        ),
        mk_policy(
            "deny",
            PolicySpec {
                access_control: Some(AccessControl {
                    allow: vec![],
                    deny: vec!["10.0.0.1".to_string()],
                }),
                ..Default::default()
            },
        ),
    ]);

    let (policies, msgs) = generate_for(&ex, &[mk_ref("allow"), mk_ref("deny")], Scope::Location);
    assert_eq!(policies.allow, ["10.0.0.0/8"]);
    assert!(policies.deny.is_empty());
    assert_eq!(msgs.len(), 1);
    assert_eq!(policies.error_return, None);
}

#[test]
fn missing_policy_returns_error() {
    let (policies, msgs) = generate_for(&mk_ex(vec![]), &[mk_ref("nope")], Scope::Location);
    assert_eq!(policies.error_return.map(|r| r.code), Some(500));
    assert_eq!(msgs, ["policy default/nope is missing or invalid"]);
}

#[test]
fn rate_limit_zone_names_are_stable() {
    let ex = mk_ex(vec![mk_policy("rl", mk_rate_limit("10r/s", None))]);
    let (policies, msgs) = generate_for(&ex, &[mk_ref("rl")], Scope::Server);
    assert!(msgs.is_empty());
    assert_eq!(
        policies.limit_req_zones,
        [LimitReqZone {
            key: "${binary_remote_addr}".to_string(),
            zone_name: "pol_rl_default_rl_default_cafe".to_string(),
            zone_size: "10M".to_string(),
            rate: "10r/s".to_string(),
        }]
    );
    assert_eq!(policies.limit_req_options.reject_code, 503);
    assert_eq!(policies.limit_req_options.log_level, "error");
}

#[test]
fn tiered_rate_limits_select_zone_by_variable() {
    let condition = |value: &str, default: bool| RateLimitCondition {
        jwt: None,
        variables: vec![VariableCondition {
            name: "$request_method".to_string(),
            match_: value.to_string(),
        }],
        default,
    };
    let ex = mk_ex(vec![
        mk_policy("basic", mk_rate_limit("10r/s", Some(condition("GET", true)))),
        mk_policy("premium", mk_rate_limit("100r/s", Some(condition("POST", false)))),
    ]);

    let (policies, msgs) = generate_for(&ex, &[mk_ref("basic"), mk_ref("premium")], Scope::Location);
    assert!(msgs.is_empty(), "{msgs:?}");
    assert_eq!(policies.limit_reqs.len(), 2);
    assert_eq!(policies.limit_req_zones[0].key, "$pol_rl_default_basic_default_cafe");

    let selector = "$rl_default_cafe_match_request_method";
    assert_eq!(
        policies.maps[0],
        Map {
            source: "$request_method".to_string(),
            variable: selector.to_string(),
            parameters: vec![
                Parameter {
                    value: "\"GET\"".to_string(),
                    result: "pol_rl_default_basic_default_cafe".to_string(),
                },
                Parameter {
                    value: "\"POST\"".to_string(),
                    result: "pol_rl_default_premium_default_cafe".to_string(),
                },
                Parameter {
                    value: "default".to_string(),
                    result: "pol_rl_default_basic_default_cafe".to_string(),
                },
            ],
        }
    );
    assert_eq!(policies.maps.len(), 3);
    assert_eq!(policies.maps[1].source, selector);
    assert_eq!(policies.maps[1].parameters[0].result, "${binary_remote_addr}");
}

#[test]
fn ingress_mtls_is_server_only() {
    let ex = VirtualServerEx {
        secret_refs: btreemap! {
            "default/ca".to_string() => SecretReference::valid(secret_type::CA, b"pem".to_vec()),
        },
        ..mk_ex(vec![mk_policy(
            "mtls",
            PolicySpec {
                ingress_mtls: Some(policy::IngressMtls {
                    client_cert_secret: "ca".to_string(),
                    verify_client: None,
                    verify_depth: None,
                }),
                ..Default::default()
            },
        )])
    };

    let (policies, msgs) = generate_for(&ex, &[mk_ref("mtls")], Scope::Location);
    assert_eq!(policies.ingress_mtls, None);
    assert_eq!(msgs.len(), 1);

    let (policies, msgs) = generate_for(&ex, &[mk_ref("mtls")], Scope::Server);
    assert!(msgs.is_empty());
    assert_eq!(
        policies.ingress_mtls,
        Some(IngressMtls {
            client_cert: "/etc/nginx/secrets/default_ca".to_string(),
            verify_client: "on".to_string(),
            verify_depth: 1,
        })
    );
}

#[test]
fn invalid_basic_auth_secret_returns_error() {
    let ex = VirtualServerEx {
        secret_refs: btreemap! {
            "default/htpasswd".to_string() => SecretReference::invalid(secret_type::HTPASSWD, "missing htpasswd"),
        },
        ..mk_ex(vec![mk_policy(
            "basic",
            PolicySpec {
                basic_auth: Some(BasicAuthSpec {
                    realm: None,
                    secret: "htpasswd".to_string(),
                }),
                ..Default::default()
            },
        )])
    };

    let (policies, msgs) = generate_for(&ex, &[mk_ref("basic")], Scope::Location);
    assert_eq!(policies.basic_auth, None);
    assert_eq!(policies.error_return.map(|r| r.code), Some(500));
    assert_eq!(msgs.len(), 1);
}

#[test]
fn jwt_and_waf_need_their_modules() {
    let ex = mk_ex(vec![
        mk_policy(
            "jwt",
            PolicySpec {
                jwt_auth: Some(policy::JwtAuth {
                    realm: "cafe".to_string(),
                    jwks_uri: Some("https://idp.example.com/keys".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ),
        mk_policy(
            "waf",
            PolicySpec {
                waf: Some(policy::Waf {
                    enable: true,
                    ..Default::default()
                }),
                ..Default::default()
            },
        ),
    ]);

    let (policies, msgs) = generate_for(&ex, &[mk_ref("jwt"), mk_ref("waf")], Scope::Server);
    assert_eq!(policies.jwt_auth, None);
    assert_eq!(policies.waf, None);
    assert_eq!(msgs.len(), 2);
    assert_eq!(policies.error_return.map(|r| r.code), Some(500));
}
