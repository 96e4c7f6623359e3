//! Ingress annotations.
//!
//! Each supported annotation overrides one ConfigMap-derived parameter, or configures an
//! Ingress-only feature. Unknown annotations are ignored. An invalid value is reported as a
//! warning and the parameter keeps the value it had before the annotation was read.

use nginx_ingress_core::{model::Header, ConfigParams, StaticParams};
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::LazyLock,
};

pub const PROXY_CONNECT_TIMEOUT: &str = "nginx.org/proxy-connect-timeout";
pub const PROXY_READ_TIMEOUT: &str = "nginx.org/proxy-read-timeout";
pub const PROXY_SEND_TIMEOUT: &str = "nginx.org/proxy-send-timeout";
pub const CLIENT_MAX_BODY_SIZE: &str = "nginx.org/client-max-body-size";
pub const PROXY_BUFFERING: &str = "nginx.org/proxy-buffering";
pub const PROXY_BUFFERS: &str = "nginx.org/proxy-buffers";
pub const PROXY_BUFFER_SIZE: &str = "nginx.org/proxy-buffer-size";
pub const PROXY_MAX_TEMP_FILE_SIZE: &str = "nginx.org/proxy-max-temp-file-size";
pub const PROXY_HIDE_HEADERS: &str = "nginx.org/proxy-hide-headers";
pub const PROXY_PASS_HEADERS: &str = "nginx.org/proxy-pass-headers";
pub const PROXY_SET_HEADERS: &str = "nginx.org/proxy-set-headers";
pub const SERVER_TOKENS: &str = "nginx.org/server-tokens";
pub const LB_METHOD: &str = "nginx.org/lb-method";
pub const MAX_FAILS: &str = "nginx.org/max-fails";
pub const MAX_CONNS: &str = "nginx.org/max-conns";
pub const FAIL_TIMEOUT: &str = "nginx.org/fail-timeout";
pub const UPSTREAM_ZONE_SIZE: &str = "nginx.org/upstream-zone-size";
pub const KEEPALIVE: &str = "nginx.org/keepalive";
pub const REDIRECT_TO_HTTPS: &str = "nginx.org/redirect-to-https";
pub const SSL_REDIRECT: &str = "ingress.kubernetes.io/ssl-redirect";
pub const HSTS: &str = "nginx.org/hsts";
pub const HSTS_MAX_AGE: &str = "nginx.org/hsts-max-age";
pub const HSTS_INCLUDE_SUBDOMAINS: &str = "nginx.org/hsts-include-subdomains";
pub const HSTS_BEHIND_PROXY: &str = "nginx.org/hsts-behind-proxy";
pub const SSL_CIPHERS: &str = "nginx.org/ssl-ciphers";
pub const SSL_PREFER_SERVER_CIPHERS: &str = "nginx.org/ssl-prefer-server-ciphers";
pub const WEBSOCKET_SERVICES: &str = "nginx.org/websocket-services";
pub const SSL_SERVICES: &str = "nginx.org/ssl-services";
pub const GRPC_SERVICES: &str = "nginx.org/grpc-services";
pub const REWRITES: &str = "nginx.org/rewrites";
pub const REWRITE_TARGET: &str = "nginx.org/rewrite-target";
pub const SERVER_SNIPPETS: &str = "nginx.org/server-snippets";
pub const LOCATION_SNIPPETS: &str = "nginx.org/location-snippets";
pub const LISTEN_PORTS: &str = "nginx.org/listen-ports";
pub const LISTEN_PORTS_SSL: &str = "nginx.org/listen-ports-ssl";
pub const PATH_REGEX: &str = "nginx.org/path-regex";
pub const MERGEABLE_INGRESS_TYPE: &str = "nginx.org/mergeable-ingress-type";
pub const LIMIT_REQ_RATE: &str = "nginx.org/limit-req-rate";
pub const LIMIT_REQ_KEY: &str = "nginx.org/limit-req-key";
pub const LIMIT_REQ_ZONE_SIZE: &str = "nginx.org/limit-req-zone-size";
pub const LIMIT_REQ_BURST: &str = "nginx.org/limit-req-burst";
pub const LIMIT_REQ_DELAY: &str = "nginx.org/limit-req-delay";
pub const LIMIT_REQ_NO_DELAY: &str = "nginx.org/limit-req-no-delay";
pub const LIMIT_REQ_REJECT_CODE: &str = "nginx.org/limit-req-reject-code";
pub const LIMIT_REQ_DRY_RUN: &str = "nginx.org/limit-req-dry-run";
pub const LIMIT_REQ_LOG_LEVEL: &str = "nginx.org/limit-req-log-level";
pub const BASIC_AUTH_SECRET: &str = "nginx.org/basic-auth-secret";
pub const BASIC_AUTH_REALM: &str = "nginx.org/basic-auth-realm";
pub const JWT_KEY: &str = "nginx.org/jwt-key";
pub const JWT_REALM: &str = "nginx.org/jwt-realm";
pub const JWT_TOKEN: &str = "nginx.org/jwt-token";
pub const JWT_LOGIN_URL: &str = "nginx.org/jwt-login-url";
pub const STICKY_COOKIE_SERVICES: &str = "nginx.org/sticky-cookie-services";
pub const SLOW_START: &str = "nginx.org/slow-start";
pub const HEALTH_CHECKS: &str = "nginx.org/health-checks";
pub const HEALTH_CHECKS_MANDATORY: &str = "nginx.org/health-checks-mandatory";
pub const HEALTH_CHECKS_MANDATORY_QUEUE: &str = "nginx.org/health-checks-mandatory-queue";

/// Annotations that only a master may set. They configure the shared server.
pub const MASTER_ONLY: &[&str] = &[
    HSTS,
    HSTS_MAX_AGE,
    HSTS_INCLUDE_SUBDOMAINS,
    HSTS_BEHIND_PROXY,
    SERVER_TOKENS,
    SERVER_SNIPPETS,
    LISTEN_PORTS,
    LISTEN_PORTS_SSL,
    REDIRECT_TO_HTTPS,
    SSL_REDIRECT,
    SSL_CIPHERS,
    SSL_PREFER_SERVER_CIPHERS,
];

/// Annotations that only a minion may set. They configure the minion's locations.
pub const MINION_ONLY: &[&str] = &[
    REWRITES,
    SSL_SERVICES,
    GRPC_SERVICES,
    WEBSOCKET_SERVICES,
    STICKY_COOKIE_SERVICES,
    LOCATION_SNIPPETS,
    PATH_REGEX,
    REWRITE_TARGET,
];

const PLUS_ONLY: &[&str] = &[
    JWT_KEY,
    JWT_REALM,
    JWT_TOKEN,
    JWT_LOGIN_URL,
    STICKY_COOKIE_SERVICES,
    SLOW_START,
    HEALTH_CHECKS,
    HEALTH_CHECKS_MANDATORY,
    HEALTH_CHECKS_MANDATORY_QUEUE,
];

const LOG_LEVELS: &[&str] = &["info", "notice", "warn", "error"];

static TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+(ms|[smhdwMy])?)+$").expect("time regex must compile"));
static SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+[kKmMgG]?$").expect("size regex must compile"));
static RATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]*r/[sm]$").expect("rate regex must compile"));
static ZONE_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+[mM]$").expect("zone size regex must compile"));

/// The location modifier selected by `nginx.org/path-regex`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PathRegex {
    CaseSensitive,
    CaseInsensitive,
    Exact,
}

/// Per-Ingress settings: the ConfigMap parameters overridden by the Ingress' annotations, plus
/// the features only annotations configure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressSettings {
    pub server_tokens: String,
    pub lb_method: String,
    pub proxy_connect_timeout: String,
    pub proxy_read_timeout: String,
    pub proxy_send_timeout: String,
    pub client_max_body_size: String,
    pub proxy_buffering: bool,
    pub proxy_buffers: String,
    pub proxy_buffer_size: String,
    pub proxy_max_temp_file_size: String,
    pub proxy_hide_headers: Vec<String>,
    pub proxy_pass_headers: Vec<String>,
    pub proxy_set_headers: Vec<Header>,

    pub max_fails: u32,
    pub max_conns: u32,
    pub fail_timeout: String,
    pub upstream_zone_size: String,
    pub keepalive: u32,
    pub slow_start: String,

    pub http2: bool,
    pub redirect_to_https: bool,
    pub ssl_redirect: bool,
    pub hsts: bool,
    pub hsts_max_age: i64,
    pub hsts_include_subdomains: bool,
    pub hsts_behind_proxy: bool,
    pub ssl_ciphers: String,
    pub ssl_prefer_server_ciphers: bool,

    pub proxy_protocol: bool,
    pub real_ip_header: String,
    pub set_real_ip_from: Vec<String>,
    pub real_ip_recursive: bool,

    pub server_snippets: Vec<String>,
    pub location_snippets: Vec<String>,
    pub listen_ports: Vec<u16>,
    pub listen_ports_ssl: Vec<u16>,

    pub websocket_services: BTreeSet<String>,
    pub ssl_services: BTreeSet<String>,
    pub grpc_services: BTreeSet<String>,
    pub rewrites: BTreeMap<String, String>,
    pub rewrite_target: Option<String>,
    pub path_regex: Option<PathRegex>,
    pub limit_req: Option<LimitReqSettings>,
    pub basic_auth: Option<BasicAuthSettings>,
    pub jwt: Option<JwtSettings>,
    /// Arguments of `sticky cookie` keyed by service name.
    pub sticky_cookies: BTreeMap<String, String>,
    pub health_checks: bool,
    pub health_checks_mandatory: bool,
    pub health_checks_mandatory_queue: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LimitReqSettings {
    pub rate: String,
    pub key: String,
    pub zone_size: String,
    pub burst: u32,
    pub delay: u32,
    pub no_delay: bool,
    pub reject_code: u16,
    pub dry_run: bool,
    pub log_level: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicAuthSettings {
    pub secret: String,
    pub realm: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JwtSettings {
    pub key: String,
    pub realm: String,
    pub token: String,
    pub login_url: String,
}

/// Parses a boolean annotation. Only `true`, `True`, `TRUE` and `1` are true; every other
/// value, including malformed ones, is false.
pub fn is_true(value: &str) -> bool {
    matches!(value, "true" | "True" | "TRUE" | "1")
}

/// Parses a boolean ConfigMap value, rejecting anything that is neither true nor false.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "True" | "TRUE" | "1" | "t" | "T" => Some(true),
        "false" | "False" | "FALSE" | "0" | "f" | "F" => Some(false),
        _ => None,
    }
}

pub(crate) fn is_valid_time(value: &str) -> bool {
    TIME.is_match(value)
}

pub(crate) fn is_valid_size(value: &str) -> bool {
    SIZE.is_match(value)
}

pub fn is_valid_rate(value: &str) -> bool {
    RATE.is_match(value)
}

pub fn is_valid_zone_size(value: &str) -> bool {
    ZONE_SIZE.is_match(value)
}

pub fn is_valid_log_level(value: &str) -> bool {
    LOG_LEVELS.contains(&value)
}

/// Splits a comma separated list, dropping empty items.
pub(crate) fn split_list(value: &str, sep: char) -> Vec<String> {
    value
        .split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `serviceName=tea rewrite=/;serviceName=coffee rewrite=/beans/`.
pub fn parse_rewrites(value: &str) -> Result<BTreeMap<String, String>, String> {
    let mut rewrites = BTreeMap::new();
    for entry in split_list(value, ';') {
        let mut parts = entry.split_whitespace();
        let service = parts.next().and_then(|p| p.strip_prefix("serviceName="));
        let rewrite = parts.next().and_then(|p| p.strip_prefix("rewrite="));
        match (service, rewrite, parts.next()) {
            (Some(service), Some(rewrite), None) if !service.is_empty() => {
                rewrites.insert(service.to_string(), rewrite.to_string());
            }
            _ => return Err(format!("invalid rewrite format: {entry:?}")),
        }
    }
    Ok(rewrites)
}

/// Parses `serviceName=tea srv_id expires=1h path=/tea;serviceName=coffee ...` into the
/// arguments of `sticky cookie` per service.
pub fn parse_sticky_cookies(value: &str) -> Result<BTreeMap<String, String>, String> {
    let mut cookies = BTreeMap::new();
    for entry in split_list(value, ';') {
        let (service, args) = entry
            .split_once(char::is_whitespace)
            .ok_or_else(|| format!("invalid sticky cookie format: {entry:?}"))?;
        let service = service
            .strip_prefix("serviceName=")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("invalid sticky cookie format: {entry:?}"))?;
        cookies.insert(service.to_string(), args.trim().to_string());
    }
    Ok(cookies)
}

pub fn parse_ports(value: &str) -> Result<Vec<u16>, String> {
    let mut ports = Vec::new();
    for port in split_list(value, ',') {
        match port.parse::<u16>() {
            Ok(p) if p > 0 => ports.push(p),
            _ => return Err(format!("invalid port: {port:?}")),
        }
    }
    if ports.is_empty() {
        return Err("no ports given".to_string());
    }
    Ok(ports)
}

/// Parses `X-Custom: value, X-Other`. A header without a value is forwarded from the client.
pub fn parse_proxy_set_headers(value: &str) -> Vec<Header> {
    split_list(value, ',')
        .into_iter()
        .map(|h| match h.split_once(':') {
            Some((name, value)) => Header {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            },
            None => Header {
                value: format!("$http_{}", h.to_lowercase().replace('-', "_")),
                name: h,
            },
        })
        .collect()
}

/// Drops the minion-only annotations from a master. Returns the dropped keys.
pub fn filter_master_annotations(annotations: &mut BTreeMap<String, String>) -> Vec<String> {
    remove_keys(annotations, MINION_ONLY)
}

/// Drops the master-only annotations from a minion, then copies every remaining master
/// annotation the minion does not set itself. Returns the dropped keys.
pub fn merge_minion_annotations(
    minion: &mut BTreeMap<String, String>,
    master: &BTreeMap<String, String>,
) -> Vec<String> {
    let removed = remove_keys(minion, MASTER_ONLY);
    for (key, value) in master {
        if MASTER_ONLY.contains(&key.as_str()) || key == MERGEABLE_INGRESS_TYPE {
            continue;
        }
        minion.entry(key.clone()).or_insert_with(|| value.clone());
    }
    removed
}

fn remove_keys(annotations: &mut BTreeMap<String, String>, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter_map(|k| annotations.remove(*k).map(|_| k.to_string()))
        .collect()
}

/// Reads the annotations of one Ingress on top of the ConfigMap parameters.
pub fn parse_ingress_annotations(
    annotations: &BTreeMap<String, String>,
    params: &ConfigParams,
    static_params: &StaticParams,
) -> (IngressSettings, Vec<String>) {
    let mut warnings = Vec::new();
    let mut s = IngressSettings::from_params(params, static_params);
    let get = |key: &str| annotations.get(key).map(String::as_str);

    if !static_params.nginx_plus {
        for key in PLUS_ONLY.iter().filter(|k| annotations.contains_key(**k)) {
            warnings.push(format!("annotation {key} requires NGINX Plus and is ignored"));
        }
    }

    let time = |key: &str, field: &mut String, warnings: &mut Vec<String>| {
        if let Some(v) = get(key) {
            if is_valid_time(v) {
                *field = v.to_string();
            } else {
                warnings.push(format!("annotation {key}: invalid time {v:?}"));
            }
        }
    };
    time(PROXY_CONNECT_TIMEOUT, &mut s.proxy_connect_timeout, &mut warnings);
    time(PROXY_READ_TIMEOUT, &mut s.proxy_read_timeout, &mut warnings);
    time(PROXY_SEND_TIMEOUT, &mut s.proxy_send_timeout, &mut warnings);
    time(FAIL_TIMEOUT, &mut s.fail_timeout, &mut warnings);

    let size = |key: &str, field: &mut String, warnings: &mut Vec<String>| {
        if let Some(v) = get(key) {
            if is_valid_size(v) {
                *field = v.to_string();
            } else {
                warnings.push(format!("annotation {key}: invalid size {v:?}"));
            }
        }
    };
    size(CLIENT_MAX_BODY_SIZE, &mut s.client_max_body_size, &mut warnings);
    size(PROXY_BUFFER_SIZE, &mut s.proxy_buffer_size, &mut warnings);
    size(PROXY_MAX_TEMP_FILE_SIZE, &mut s.proxy_max_temp_file_size, &mut warnings);
    size(UPSTREAM_ZONE_SIZE, &mut s.upstream_zone_size, &mut warnings);

    let number = |key: &str, field: &mut u32, warnings: &mut Vec<String>| {
        if let Some(v) = get(key) {
            match v.parse() {
                Ok(n) => *field = n,
                Err(_) => warnings.push(format!("annotation {key}: invalid number {v:?}")),
            }
        }
    };
    number(MAX_FAILS, &mut s.max_fails, &mut warnings);
    number(MAX_CONNS, &mut s.max_conns, &mut warnings);
    number(KEEPALIVE, &mut s.keepalive, &mut warnings);

    let flag = |key: &str, field: &mut bool| {
        if let Some(v) = get(key) {
            *field = is_true(v);
        }
    };
    flag(PROXY_BUFFERING, &mut s.proxy_buffering);
    flag(REDIRECT_TO_HTTPS, &mut s.redirect_to_https);
    flag(SSL_REDIRECT, &mut s.ssl_redirect);
    flag(HSTS, &mut s.hsts);
    flag(HSTS_INCLUDE_SUBDOMAINS, &mut s.hsts_include_subdomains);
    flag(HSTS_BEHIND_PROXY, &mut s.hsts_behind_proxy);
    flag(SSL_PREFER_SERVER_CIPHERS, &mut s.ssl_prefer_server_ciphers);

    if let Some(v) = get(HSTS_MAX_AGE) {
        match v.parse::<i64>() {
            Ok(age) if age >= 0 => s.hsts_max_age = age,
            _ => warnings.push(format!("annotation {HSTS_MAX_AGE}: invalid number {v:?}")),
        }
    }
    if let Some(v) = get(PROXY_BUFFERS) {
        s.proxy_buffers = v.to_string();
    }
    if let Some(v) = get(SSL_CIPHERS) {
        s.ssl_ciphers = v.to_string();
    }
    if let Some(v) = get(SERVER_TOKENS) {
        // Plus accepts an arbitrary string; OSS only a boolean.
        s.server_tokens = if static_params.nginx_plus && !matches!(v, "true" | "false") {
            v.to_string()
        } else if is_true(v) {
            "on".to_string()
        } else {
            "off".to_string()
        };
    }
    if let Some(v) = get(LB_METHOD) {
        if crate::upstream::is_valid_lb_method(v, static_params.nginx_plus) {
            s.lb_method = v.to_string();
        } else {
            warnings.push(format!("annotation {LB_METHOD}: invalid method {v:?}"));
        }
    }
    if let Some(v) = get(PROXY_HIDE_HEADERS) {
        s.proxy_hide_headers = split_list(v, ',');
    }
    if let Some(v) = get(PROXY_PASS_HEADERS) {
        s.proxy_pass_headers = split_list(v, ',');
    }
    if let Some(v) = get(PROXY_SET_HEADERS) {
        s.proxy_set_headers = parse_proxy_set_headers(v);
    }

    for (key, field) in [
        (SERVER_SNIPPETS, &mut s.server_snippets),
        (LOCATION_SNIPPETS, &mut s.location_snippets),
    ] {
        if let Some(v) = get(key) {
            if static_params.enable_snippets {
                *field = split_list(v, '\n');
            } else {
                warnings.push(format!("annotation {key} is ignored because snippets are disabled"));
            }
        }
    }

    for (key, field) in [
        (LISTEN_PORTS, &mut s.listen_ports),
        (LISTEN_PORTS_SSL, &mut s.listen_ports_ssl),
    ] {
        if let Some(v) = get(key) {
            match parse_ports(v) {
                Ok(ports) => *field = ports,
                Err(error) => warnings.push(format!("annotation {key}: {error}")),
            }
        }
    }

    for (key, field) in [
        (WEBSOCKET_SERVICES, &mut s.websocket_services),
        (SSL_SERVICES, &mut s.ssl_services),
        (GRPC_SERVICES, &mut s.grpc_services),
    ] {
        if let Some(v) = get(key) {
            *field = split_list(v, ',').into_iter().collect();
        }
    }

    // A malformed rewrites annotation leaves rewrite-target in effect.
    let mut has_rewrites = false;
    if let Some(v) = get(REWRITES) {
        match parse_rewrites(v) {
            Ok(rewrites) => {
                s.rewrites = rewrites;
                has_rewrites = true;
            }
            Err(error) => warnings.push(format!("annotation {REWRITES}: {error}")),
        }
    }
    if let Some(v) = get(REWRITE_TARGET) {
        if has_rewrites {
            warnings.push(format!(
                "annotation {REWRITE_TARGET} is ignored because {REWRITES} is set"
            ));
        } else {
            s.rewrite_target = Some(v.to_string());
        }
    }

    if let Some(v) = get(PATH_REGEX) {
        s.path_regex = match v {
            "case_sensitive" => Some(PathRegex::CaseSensitive),
            "case_insensitive" => Some(PathRegex::CaseInsensitive),
            "exact" => Some(PathRegex::Exact),
            _ => {
                warnings.push(format!("annotation {PATH_REGEX}: unsupported value {v:?}"));
                None
            }
        };
    }

    if get(LIMIT_REQ_RATE).is_some() {
        match parse_limit_req(&get) {
            Ok(limit_req) => s.limit_req = Some(limit_req),
            Err(error) => {
                warnings.push(format!("{error}; rate limiting is disabled"));
            }
        }
    }

    if let Some(secret) = get(BASIC_AUTH_SECRET) {
        s.basic_auth = Some(BasicAuthSettings {
            secret: secret.to_string(),
            realm: get(BASIC_AUTH_REALM).unwrap_or_default().to_string(),
        });
    }

    if static_params.nginx_plus {
        if let Some(key) = get(JWT_KEY) {
            s.jwt = Some(JwtSettings {
                key: key.to_string(),
                realm: get(JWT_REALM).unwrap_or_default().to_string(),
                token: get(JWT_TOKEN).unwrap_or_default().to_string(),
                login_url: get(JWT_LOGIN_URL).unwrap_or_default().to_string(),
            });
        }
        if let Some(v) = get(STICKY_COOKIE_SERVICES) {
            match parse_sticky_cookies(v) {
                Ok(cookies) => s.sticky_cookies = cookies,
                Err(error) => warnings.push(format!("annotation {STICKY_COOKIE_SERVICES}: {error}")),
            }
        }
        if let Some(v) = get(SLOW_START) {
            if is_valid_time(v) {
                s.slow_start = v.to_string();
            } else {
                warnings.push(format!("annotation {SLOW_START}: invalid time {v:?}"));
            }
        }
        flag(HEALTH_CHECKS, &mut s.health_checks);
        flag(HEALTH_CHECKS_MANDATORY, &mut s.health_checks_mandatory);
        if let Some(v) = get(HEALTH_CHECKS_MANDATORY_QUEUE) {
            match v.parse() {
                Ok(queue) => s.health_checks_mandatory_queue = queue,
                Err(_) => warnings.push(format!(
                    "annotation {HEALTH_CHECKS_MANDATORY_QUEUE}: invalid number {v:?}"
                )),
            }
        }
    }

    (s, warnings)
}

fn parse_limit_req<'a>(get: &impl Fn(&str) -> Option<&'a str>) -> Result<LimitReqSettings, String> {
    let rate = get(LIMIT_REQ_RATE).unwrap_or_default();
    if !is_valid_rate(rate) {
        return Err(format!("annotation {LIMIT_REQ_RATE}: invalid rate {rate:?}"));
    }

    let key = get(LIMIT_REQ_KEY).unwrap_or("${binary_remote_addr}");
    if key.trim().is_empty() {
        return Err(format!("annotation {LIMIT_REQ_KEY}: empty key"));
    }

    let zone_size = get(LIMIT_REQ_ZONE_SIZE).unwrap_or("10m");
    if !is_valid_zone_size(zone_size) {
        return Err(format!(
            "annotation {LIMIT_REQ_ZONE_SIZE}: invalid zone size {zone_size:?}"
        ));
    }

    let number = |key: &str| -> Result<u32, String> {
        get(key)
            .map(|v| {
                v.parse()
                    .map_err(|_| format!("annotation {key}: invalid number {v:?}"))
            })
            .unwrap_or(Ok(0))
    };
    let burst = number(LIMIT_REQ_BURST)?;
    let delay = number(LIMIT_REQ_DELAY)?;

    let reject_code = match get(LIMIT_REQ_REJECT_CODE) {
        None => 429,
        Some(v) => match v.parse::<u16>() {
            Ok(code) if (400..=599).contains(&code) => code,
            _ => {
                return Err(format!(
                    "annotation {LIMIT_REQ_REJECT_CODE}: invalid status code {v:?}"
                ))
            }
        },
    };

    let log_level = get(LIMIT_REQ_LOG_LEVEL).unwrap_or("error");
    if !is_valid_log_level(log_level) {
        return Err(format!(
            "annotation {LIMIT_REQ_LOG_LEVEL}: invalid log level {log_level:?}"
        ));
    }

    Ok(LimitReqSettings {
        rate: rate.to_string(),
        key: key.to_string(),
        zone_size: zone_size.to_string(),
        burst,
        delay,
        no_delay: get(LIMIT_REQ_NO_DELAY).map(is_true).unwrap_or(false),
        reject_code,
        dry_run: get(LIMIT_REQ_DRY_RUN).map(is_true).unwrap_or(false),
        log_level: log_level.to_string(),
    })
}

// === impl IngressSettings ===

impl IngressSettings {
    fn from_params(params: &ConfigParams, static_params: &StaticParams) -> Self {
        Self {
            server_tokens: params.server_tokens.clone(),
            lb_method: params.lb_method.clone(),
            proxy_connect_timeout: params.proxy_connect_timeout.clone(),
            proxy_read_timeout: params.proxy_read_timeout.clone(),
            proxy_send_timeout: params.proxy_send_timeout.clone(),
            client_max_body_size: params.client_max_body_size.clone(),
            proxy_buffering: params.proxy_buffering,
            proxy_buffers: params.proxy_buffers.clone(),
            proxy_buffer_size: params.proxy_buffer_size.clone(),
            proxy_max_temp_file_size: params.proxy_max_temp_file_size.clone(),
            proxy_hide_headers: params.proxy_hide_headers.clone(),
            proxy_pass_headers: params.proxy_pass_headers.clone(),
            proxy_set_headers: Vec::new(),

            max_fails: params.max_fails,
            max_conns: params.max_conns,
            fail_timeout: params.fail_timeout.clone(),
            upstream_zone_size: params.upstream_zone_size.clone(),
            keepalive: params.keepalive,
            slow_start: String::new(),

            http2: params.http2,
            redirect_to_https: params.redirect_to_https,
            ssl_redirect: params.ssl_redirect,
            hsts: params.hsts,
            hsts_max_age: params.hsts_max_age,
            hsts_include_subdomains: params.hsts_include_subdomains,
            hsts_behind_proxy: params.hsts_behind_proxy,
            ssl_ciphers: String::new(),
            ssl_prefer_server_ciphers: false,

            proxy_protocol: params.proxy_protocol,
            real_ip_header: params.real_ip_header.clone(),
            set_real_ip_from: params.set_real_ip_from.clone(),
            real_ip_recursive: params.real_ip_recursive,

            server_snippets: params.server_snippets.clone(),
            location_snippets: params.location_snippets.clone(),
            listen_ports: vec![static_params.default_http_listener_port],
            listen_ports_ssl: vec![static_params.default_https_listener_port],

            websocket_services: BTreeSet::new(),
            ssl_services: BTreeSet::new(),
            grpc_services: BTreeSet::new(),
            rewrites: BTreeMap::new(),
            rewrite_target: None,
            path_regex: None,
            limit_req: None,
            basic_auth: None,
            jwt: None,
            sticky_cookies: BTreeMap::new(),
            health_checks: false,
            health_checks_mandatory: false,
            health_checks_mandatory_queue: 0,
        }
    }
}

#[cfg(test)]
mod tests;
