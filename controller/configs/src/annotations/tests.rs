use super::*;
use maplit::btreemap;
use quickcheck::quickcheck;
use rstest::rstest;

#[rstest]
#[case("true", true)]
#[case("True", true)]
#[case("TRUE", true)]
#[case("1", true)]
#[case("false", false)]
#[case("tRUE", false)]
#[case("yes", false)]
#[case(" true", false)]
#[case("", false)]
fn boolean_values(#[case] value: &str, #[case] expected: bool) {
    assert_eq!(is_true(value), expected);
}

quickcheck! {
    fn only_fixed_strings_are_true(value: String) -> bool {
        is_true(&value) == ["true", "True", "TRUE", "1"].contains(&value.as_str())
    }
}

#[test]
fn rewrites_are_parsed_per_service() {
    let rewrites = parse_rewrites("serviceName=tea-svc rewrite=/;serviceName=coffee-svc rewrite=/beans/")
        .expect("must parse");
    assert_eq!(
        rewrites,
        btreemap! {
            "coffee-svc".to_string() => "/beans/".to_string(),
            "tea-svc".to_string() => "/".to_string(),
        }
    );

    parse_rewrites("tea-svc=/").expect_err("service name is required");
    parse_rewrites("serviceName=tea-svc rewrite=/ extra").expect_err("trailing token");
}

#[test]
fn sticky_cookies_keep_arguments() {
    let cookies =
        parse_sticky_cookies("serviceName=tea-svc srv_id expires=1h path=/tea").expect("must parse");
    assert_eq!(cookies["tea-svc"], "srv_id expires=1h path=/tea");
    parse_sticky_cookies("serviceName=tea-svc").expect_err("cookie name is required");
}

#[test]
fn proxy_set_headers_forward_client_values() {
    assert_eq!(
        parse_proxy_set_headers("X-Forwarded-ABC, X-Custom: value"),
        vec![
            Header {
                name: "X-Forwarded-ABC".to_string(),
                value: "$http_x_forwarded_abc".to_string(),
            },
            Header {
                name: "X-Custom".to_string(),
                value: "value".to_string(),
            },
        ]
    );
}

#[test]
fn invalid_values_keep_defaults() {
    let params = ConfigParams::default();
    let annotations = btreemap! {
        PROXY_CONNECT_TIMEOUT.to_string() => "soon".to_string(),
        MAX_FAILS.to_string() => "-1".to_string(),
        CLIENT_MAX_BODY_SIZE.to_string() => "4m".to_string(),
        LISTEN_PORTS.to_string() => "80,eighty".to_string(),
    };
    let (settings, warnings) =
        parse_ingress_annotations(&annotations, &params, &StaticParams::default());

    assert_eq!(warnings.len(), 3, "{warnings:?}");
    assert_eq!(settings.proxy_connect_timeout, params.proxy_connect_timeout);
    assert_eq!(settings.max_fails, params.max_fails);
    assert_eq!(settings.client_max_body_size, "4m");
    assert_eq!(settings.listen_ports, vec![80]);
}

#[test]
fn rewrites_take_precedence_over_rewrite_target() {
    let annotations = btreemap! {
        REWRITES.to_string() => "serviceName=tea-svc rewrite=/".to_string(),
        REWRITE_TARGET.to_string() => "/other".to_string(),
    };
    let (settings, warnings) = parse_ingress_annotations(
        &annotations,
        &ConfigParams::default(),
        &StaticParams::default(),
    );
    assert_eq!(settings.rewrite_target, None);
    assert_eq!(settings.rewrites.len(), 1);
    assert_eq!(warnings.len(), 1);
}

#[test]
fn malformed_rewrites_fall_back_to_rewrite_target() {
    let annotations = btreemap! {
        REWRITES.to_string() => "tea-svc=/".to_string(),
        REWRITE_TARGET.to_string() => "/other".to_string(),
    };
    let (settings, warnings) = parse_ingress_annotations(
        &annotations,
        &ConfigParams::default(),
        &StaticParams::default(),
    );
    assert_eq!(settings.rewrite_target.as_deref(), Some("/other"));
    assert!(settings.rewrites.is_empty());
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains(REWRITES), "{warnings:?}");
}

#[rstest]
#[case("0r/s")]
#[case("10r/h")]
#[case("ten")]
fn invalid_rate_disables_rate_limiting(#[case] rate: &str) {
    let annotations = btreemap! {
        LIMIT_REQ_RATE.to_string() => rate.to_string(),
    };
    let (settings, warnings) = parse_ingress_annotations(
        &annotations,
        &ConfigParams::default(),
        &StaticParams::default(),
    );
    assert_eq!(settings.limit_req, None);
    assert_eq!(warnings.len(), 1);
}

#[test]
fn rate_limit_defaults() {
    let annotations = btreemap! {
        LIMIT_REQ_RATE.to_string() => "200r/s".to_string(),
    };
    let (settings, warnings) = parse_ingress_annotations(
        &annotations,
        &ConfigParams::default(),
        &StaticParams::default(),
    );
    assert!(warnings.is_empty());
    assert_eq!(
        settings.limit_req,
        Some(LimitReqSettings {
            rate: "200r/s".to_string(),
            key: "${binary_remote_addr}".to_string(),
            zone_size: "10m".to_string(),
            burst: 0,
            delay: 0,
            no_delay: false,
            reject_code: 429,
            dry_run: false,
            log_level: "error".to_string(),
        })
    );
}

#[test]
fn snippets_require_opt_in() {
    let annotations = btreemap! {
        SERVER_SNIPPETS.to_string() => "add_header X-Test 1;".to_string(),
    };
    let (settings, warnings) = parse_ingress_annotations(
        &annotations,
        &ConfigParams::default(),
        &StaticParams::default(),
    );
    assert!(settings.server_snippets.is_empty());
    assert_eq!(warnings.len(), 1);

    let (settings, warnings) = parse_ingress_annotations(
        &annotations,
        &ConfigParams::default(),
        &StaticParams {
            enable_snippets: true,
            ..Default::default()
        },
    );
    assert_eq!(settings.server_snippets, vec!["add_header X-Test 1;"]);
    assert!(warnings.is_empty());
}

#[test]
fn minions_inherit_master_annotations() {
    let mut master = btreemap! {
        HSTS.to_string() => "true".to_string(),
        REWRITES.to_string() => "serviceName=tea-svc rewrite=/".to_string(),
        PROXY_CONNECT_TIMEOUT.to_string() => "30s".to_string(),
        PROXY_READ_TIMEOUT.to_string() => "30s".to_string(),
        MERGEABLE_INGRESS_TYPE.to_string() => "master".to_string(),
    };
    assert_eq!(filter_master_annotations(&mut master), vec![REWRITES]);

    let mut minion = btreemap! {
        SERVER_TOKENS.to_string() => "false".to_string(),
        PROXY_READ_TIMEOUT.to_string() => "5s".to_string(),
        MERGEABLE_INGRESS_TYPE.to_string() => "minion".to_string(),
    };
    assert_eq!(
        merge_minion_annotations(&mut minion, &master),
        vec![SERVER_TOKENS]
    );
    assert_eq!(
        minion,
        btreemap! {
            PROXY_CONNECT_TIMEOUT.to_string() => "30s".to_string(),
            PROXY_READ_TIMEOUT.to_string() => "5s".to_string(),
            MERGEABLE_INGRESS_TYPE.to_string() => "minion".to_string(),
        }
    );
}
