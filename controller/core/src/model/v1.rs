//! The Ingress configuration family.

use super::{Header, UpstreamLabels};
use std::{collections::BTreeMap, fmt};

/// One rendered Ingress file: a plain Ingress or a master merged with its minions.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngressNginxConfig {
    pub upstreams: Vec<Upstream>,
    pub servers: Vec<Server>,
    pub keepalive: u32,
    pub ingress: IngressMeta,
    pub limit_req_zones: Vec<LimitReqZone>,
    pub dynamic_ssl_reload_enabled: bool,
    pub static_ssl_path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngressMeta {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Upstream {
    pub name: String,
    pub servers: Vec<UpstreamServer>,
    pub lb_method: String,
    pub upstream_zone_size: String,
    /// Arguments of `sticky cookie`, empty when disabled.
    pub sticky_cookie: String,
    pub resolve: bool,
    pub upstream_labels: UpstreamLabels,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct UpstreamServer {
    pub address: String,
    pub max_fails: u32,
    pub max_conns: u32,
    pub fail_timeout: String,
    pub slow_start: String,
    pub resolve: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Server {
    pub name: String,
    pub server_tokens: String,
    pub http2: bool,
    pub status_zone: String,
    /// Arguments of each `listen` directive, e.g. `80` or `[::]:443 ssl`.
    pub listens: Vec<String>,

    pub ssl: bool,
    pub ssl_certificate: String,
    pub ssl_certificate_key: String,
    pub ssl_reject_handshake: bool,
    pub ssl_ciphers: String,
    pub ssl_prefer_server_ciphers: bool,
    pub redirect_to_https: bool,
    pub ssl_redirect: bool,

    pub hsts: bool,
    pub hsts_max_age: i64,
    pub hsts_include_subdomains: bool,
    pub hsts_behind_proxy: bool,

    pub real_ip_header: String,
    pub set_real_ip_from: Vec<String>,
    pub real_ip_recursive: bool,

    pub server_snippets: Vec<String>,
    pub locations: Vec<Location>,
    pub health_checks: Vec<HealthCheck>,
    pub jwt_auth: Option<JwtAuth>,
    pub jwt_redirect_locations: Vec<JwtRedirectLocation>,
    pub basic_auth: Option<BasicAuth>,
    /// Set when an authentication secret is unusable; every request gets this status.
    pub auth_error_return: Option<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Location {
    /// The location argument, including its modifier, e.g. `~* "^/coffee"`.
    pub path: String,
    pub upstream_name: String,
    pub service_name: String,
    /// `http://<upstream>`, `https://<upstream>` or `grpc://<upstream>`.
    pub proxy_pass: String,
    pub grpc: bool,
    pub websocket: bool,
    /// The rewrite target, empty when none.
    pub rewrite: String,

    pub proxy_connect_timeout: String,
    pub proxy_read_timeout: String,
    pub proxy_send_timeout: String,
    pub client_max_body_size: String,
    pub proxy_buffering: bool,
    pub proxy_buffers: String,
    pub proxy_buffer_size: String,
    pub proxy_max_temp_file_size: String,
    pub proxy_set_headers: Vec<Header>,
    pub proxy_hide_headers: Vec<String>,
    pub proxy_pass_headers: Vec<String>,

    pub location_snippets: Vec<String>,
    /// The minion a merged location came from.
    pub minion: Option<IngressMeta>,
    pub limit_req: Option<LimitReq>,
    pub jwt_auth: Option<JwtAuth>,
    pub basic_auth: Option<BasicAuth>,
    pub auth_error_return: Option<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct HealthCheck {
    pub upstream_name: String,
    pub uri: String,
    pub scheme: String,
    pub interval: String,
    pub fails: u32,
    pub passes: u32,
    pub mandatory: bool,
    pub mandatory_queue: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct LimitReqZone {
    pub name: String,
    pub key: String,
    pub size: String,
    pub rate: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct LimitReq {
    pub zone: String,
    pub burst: u32,
    pub delay: u32,
    pub no_delay: bool,
    pub reject_code: u16,
    pub dry_run: bool,
    pub log_level: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct JwtAuth {
    /// Path of the JWK file.
    pub key: String,
    pub realm: String,
    pub token: String,
    pub redirect_location_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct JwtRedirectLocation {
    pub name: String,
    pub login_url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct BasicAuth {
    /// Path of the htpasswd file.
    pub secret: String,
    pub realm: String,
}

// === impl IngressNginxConfig ===

impl IngressNginxConfig {
    pub fn upstream(&self, name: &str) -> Option<&Upstream> {
        self.upstreams.iter().find(|u| u.name == name)
    }
}

impl fmt::Display for IngressNginxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ingress {}/{}: {} servers, {} upstreams",
            self.ingress.namespace,
            self.ingress.name,
            self.servers.len(),
            self.upstreams.len()
        )
    }
}
