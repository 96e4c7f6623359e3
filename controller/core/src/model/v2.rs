//! The VirtualServer and TransportServer configuration family.

use super::{Header, UpstreamLabels};
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct VirtualServerConfig {
    pub upstreams: Vec<Upstream>,
    pub split_clients: Vec<SplitClient>,
    pub maps: Vec<Map>,
    pub auth_jwt_claim_sets: Vec<AuthJwtClaimSet>,
    pub key_val_zones: Vec<KeyValZone>,
    pub key_vals: Vec<KeyVal>,
    /// Two-way splits whose weights are held in a keyval zone. Not rendered directly.
    pub two_way_split_clients: Vec<TwoWaySplitClients>,
    pub limit_req_zones: Vec<LimitReqZone>,
    pub status_matches: Vec<StatusMatch>,
    pub http_snippets: Vec<String>,
    pub dynamic_ssl_reload_enabled: bool,
    pub static_ssl_path: String,
    pub server: Server,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Upstream {
    pub name: String,
    pub servers: Vec<UpstreamServer>,
    pub backup_servers: Vec<UpstreamServer>,
    /// The load balancing directive, empty for round robin.
    pub lb_method: String,
    pub resolve: bool,
    pub keepalive: u32,
    pub max_fails: u32,
    pub max_conns: u32,
    pub slow_start: String,
    pub fail_timeout: String,
    pub upstream_zone_size: String,
    pub queue: Option<Queue>,
    pub session_cookie: Option<SessionCookie>,
    pub upstream_labels: UpstreamLabels,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct UpstreamServer {
    pub address: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Queue {
    pub size: u32,
    pub timeout: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct SessionCookie {
    pub name: String,
    pub path: String,
    pub expires: String,
    pub domain: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Server {
    pub server_name: String,
    pub status_zone: String,
    pub listens: Vec<String>,
    pub ssl: Option<Ssl>,
    pub tls_redirect: Option<TlsRedirect>,
    pub server_tokens: String,
    pub real_ip_header: String,
    pub set_real_ip_from: Vec<String>,
    pub real_ip_recursive: bool,
    pub gunzip: bool,
    pub snippets: Vec<String>,

    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub limit_req_options: LimitReqOptions,
    pub limit_reqs: Vec<LimitReq>,
    pub jwt_auth: Option<JwtAuth>,
    pub basic_auth: Option<BasicAuth>,
    pub ingress_mtls: Option<IngressMtls>,
    pub egress_mtls: Option<EgressMtls>,
    pub waf: Option<Waf>,
    /// Set when a server-level policy is unusable; every request gets this response.
    pub policies_error_return: Option<Return>,

    pub internal_redirect_locations: Vec<InternalRedirectLocation>,
    pub locations: Vec<Location>,
    pub error_page_locations: Vec<ErrorPageLocation>,
    pub jwks_locations: Vec<JwksLocation>,
    pub health_checks: Vec<HealthCheck>,

    pub vs_namespace: String,
    pub vs_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Ssl {
    pub http2: bool,
    pub certificate: String,
    pub certificate_key: String,
    pub reject_handshake: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct TlsRedirect {
    pub code: u16,
    /// The variable compared against `http`, e.g. `$scheme`.
    pub based_on: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Location {
    /// The location argument, e.g. `/tea` or `~ ^/api`.
    pub path: String,
    pub internal: bool,
    pub snippets: Vec<String>,

    pub proxy_connect_timeout: String,
    pub proxy_read_timeout: String,
    pub proxy_send_timeout: String,
    pub client_max_body_size: String,
    pub proxy_buffering: bool,
    pub proxy_buffers: String,
    pub proxy_buffer_size: String,

    /// The `proxy_pass`/`grpc_pass` target, empty for return and redirect actions.
    pub proxy_pass: String,
    pub grpc: bool,
    pub has_keepalive: bool,
    pub proxy_next_upstream: String,
    pub proxy_next_upstream_timeout: String,
    pub proxy_next_upstream_tries: u32,
    pub proxy_intercept_errors: bool,
    pub proxy_pass_request_headers: bool,
    pub proxy_set_headers: Vec<Header>,
    pub proxy_hide_headers: Vec<String>,
    pub proxy_pass_headers: Vec<String>,
    pub proxy_ignore_headers: String,
    pub add_headers: Vec<AddHeader>,
    pub rewrites: Vec<String>,
    pub proxy_ssl_name: String,
    pub error_pages: Vec<ErrorPage>,
    /// A `return` action: a response body or a redirect.
    pub return_: Option<Return>,

    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub limit_req_options: LimitReqOptions,
    pub limit_reqs: Vec<LimitReq>,
    pub jwt_auth: Option<JwtAuth>,
    pub basic_auth: Option<BasicAuth>,
    pub egress_mtls: Option<EgressMtls>,
    pub waf: Option<Waf>,
    pub policies_error_return: Option<Return>,

    pub service_name: String,
    pub is_vsr: bool,
    pub vsr_name: String,
    pub vsr_namespace: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct AddHeader {
    pub name: String,
    pub value: String,
    pub always: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Return {
    pub code: u16,
    /// Set for body responses; redirects leave it empty.
    pub default_type: String,
    /// The response body or the redirect URL.
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ErrorPage {
    /// Space separated status codes.
    pub codes: String,
    /// A named location or a redirect URL.
    pub name: String,
    /// The status code the error page is answered with, zero to keep the original.
    pub response_code: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ErrorPageLocation {
    pub name: String,
    pub default_type: String,
    pub return_: Return,
    pub headers: Vec<Header>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct InternalRedirectLocation {
    pub path: String,
    pub destination: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct JwksLocation {
    pub path: String,
    pub uri: String,
    pub key_cache: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct SplitClient {
    pub source: String,
    pub variable: String,
    pub distributions: Vec<Distribution>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Distribution {
    /// A percentage such as `90%`, or `*` for the remainder.
    pub weight: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Map {
    pub source: String,
    pub variable: String,
    pub parameters: Vec<Parameter>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Parameter {
    pub value: String,
    pub result: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct AuthJwtClaimSet {
    pub variable: String,
    /// The claim path with segments separated by spaces.
    pub claim: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct KeyValZone {
    pub name: String,
    pub size: String,
    pub state: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct KeyVal {
    pub key: String,
    pub variable: String,
    pub zone_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct TwoWaySplitClients {
    pub key: String,
    pub zone_name: String,
    /// The weight of the first split, the value stored under `key`.
    pub weight: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusMatch {
    pub name: String,
    pub code: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub uri: String,
    pub interval: String,
    pub jitter: String,
    pub fails: u32,
    pub passes: u32,
    /// Zero checks the upstream servers' own port.
    pub port: u16,
    pub proxy_pass: String,
    pub grpc: bool,
    pub proxy_connect_timeout: String,
    pub proxy_read_timeout: String,
    pub proxy_send_timeout: String,
    pub headers: Vec<Header>,
    /// Name of the `match` block, empty when none.
    pub match_: String,
    pub mandatory: bool,
    pub persistent: bool,
    pub keepalive_time: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct LimitReqZone {
    pub key: String,
    pub zone_name: String,
    pub zone_size: String,
    pub rate: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct LimitReq {
    pub zone_name: String,
    pub burst: u32,
    pub no_delay: bool,
    pub delay: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct LimitReqOptions {
    pub dry_run: bool,
    pub log_level: String,
    pub reject_code: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct JwtAuth {
    /// Path of the JWK file, empty when keys come from `jwks_uri`.
    pub secret: String,
    pub realm: String,
    pub token: String,
    /// The internal location keys are requested from.
    pub key_request: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct BasicAuth {
    pub secret: String,
    pub realm: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngressMtls {
    pub client_cert: String,
    pub verify_client: String,
    pub verify_depth: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct EgressMtls {
    pub certificate: String,
    pub certificate_key: String,
    pub verify_server: bool,
    pub verify_depth: u32,
    pub protocols: String,
    pub ciphers: String,
    pub session_reuse: bool,
    pub server_name: bool,
    pub trusted_cert: String,
    pub ssl_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Waf {
    pub enable: String,
    pub ap_policy: String,
    pub ap_security_log_enable: bool,
    pub ap_log_conf: Vec<String>,
}

/// One rendered TransportServer file.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct TransportServerConfig {
    pub server: StreamServer,
    pub upstreams: Vec<StreamUpstream>,
    pub stream_snippets: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct StreamServer {
    pub name: String,
    pub namespace: String,
    pub status_zone: String,
    pub listens: Vec<String>,
    pub tls_passthrough: bool,
    pub proxy_pass: String,
    pub proxy_requests: u32,
    pub proxy_responses: u32,
    pub proxy_connect_timeout: String,
    pub proxy_timeout: String,
    pub proxy_next_upstream: bool,
    pub proxy_next_upstream_timeout: String,
    pub proxy_next_upstream_tries: u32,
    pub health_check: Option<StreamHealthCheck>,
    pub server_snippets: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct StreamUpstream {
    pub name: String,
    pub servers: Vec<StreamUpstreamServer>,
    pub load_balancing_method: String,
    pub resolve: bool,
    pub upstream_zone_size: String,
    pub upstream_labels: UpstreamLabels,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct StreamUpstreamServer {
    pub address: String,
    pub max_fails: u32,
    pub max_conns: u32,
    pub fail_timeout: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct StreamHealthCheck {
    pub timeout: String,
    pub jitter: String,
    pub port: u16,
    pub interval: String,
    pub passes: u32,
    pub fails: u32,
}

// === impl VirtualServerConfig ===

impl VirtualServerConfig {
    pub fn upstream(&self, name: &str) -> Option<&Upstream> {
        self.upstreams.iter().find(|u| u.name == name)
    }
}

impl fmt::Display for VirtualServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "virtualserver {}/{} ({}): {} locations, {} upstreams",
            self.server.vs_namespace,
            self.server.vs_name,
            self.server.server_name,
            self.server.locations.len(),
            self.upstreams.len()
        )
    }
}

// === impl TransportServerConfig ===

impl TransportServerConfig {
    pub fn upstream(&self, name: &str) -> Option<&StreamUpstream> {
        self.upstreams.iter().find(|u| u.name == name)
    }
}

impl fmt::Display for TransportServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transportserver {}/{}: {} upstreams",
            self.server.namespace,
            self.server.name,
            self.upstreams.len()
        )
    }
}
