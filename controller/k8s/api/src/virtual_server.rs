use crate::labels::Selector;

/// Describes a host-level HTTP load balancer.
#[derive(
    Clone,
    Debug,
    Default,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "k8s.nginx.org",
    version = "v1",
    kind = "VirtualServer",
    shortname = "vs",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServerSpec {
    pub ingress_class_name: Option<String>,
    pub host: String,
    pub tls: Option<Tls>,
    pub gunzip: Option<bool>,
    #[serde(default)]
    pub policies: Vec<PolicyReference>,
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
    #[serde(default)]
    pub routes: Vec<Route>,
    pub http_snippets: Option<String>,
    pub server_snippets: Option<String>,
}

/// Holds a set of subroutes delegated from a VirtualServer route.
#[derive(
    Clone,
    Debug,
    Default,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "k8s.nginx.org",
    version = "v1",
    kind = "VirtualServerRoute",
    shortname = "vsr",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServerRouteSpec {
    pub ingress_class_name: Option<String>,
    pub host: String,
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
    #[serde(default)]
    pub subroutes: Vec<Route>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    pub secret: Option<String>,
    pub redirect: Option<TlsRedirect>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsRedirect {
    #[serde(default)]
    pub enable: bool,
    pub code: Option<u16>,
    pub based_on: Option<String>,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct PolicyReference {
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    pub name: String,
    pub service: String,
    pub subselector: Option<Selector>,
    pub use_cluster_ip: Option<bool>,
    pub port: u16,
    pub lb_method: Option<String>,
    pub fail_timeout: Option<String>,
    pub max_fails: Option<u32>,
    pub max_conns: Option<u32>,
    pub keepalive: Option<u32>,
    pub connect_timeout: Option<String>,
    pub read_timeout: Option<String>,
    pub send_timeout: Option<String>,
    pub next_upstream: Option<String>,
    pub next_upstream_timeout: Option<String>,
    pub next_upstream_tries: Option<u32>,
    pub client_max_body_size: Option<String>,
    pub tls: Option<UpstreamTls>,
    pub health_check: Option<HealthCheck>,
    pub slow_start: Option<String>,
    pub queue: Option<UpstreamQueue>,
    pub session_cookie: Option<SessionCookie>,
    pub buffering: Option<bool>,
    pub buffers: Option<UpstreamBuffers>,
    pub buffer_size: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub backup: Option<String>,
    pub backup_port: Option<u16>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct UpstreamTls {
    #[serde(default)]
    pub enable: bool,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct UpstreamQueue {
    pub size: u32,
    pub timeout: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct UpstreamBuffers {
    pub number: u32,
    pub size: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(default)]
    pub enable: bool,
    pub path: Option<String>,
    pub interval: Option<String>,
    pub jitter: Option<String>,
    pub fails: Option<u32>,
    pub passes: Option<u32>,
    pub port: Option<u16>,
    pub connect_timeout: Option<String>,
    pub read_timeout: Option<String>,
    pub send_timeout: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub status_match: Option<String>,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub persistent: bool,
    pub keepalive_time: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    #[serde(default)]
    pub enable: bool,
    pub name: String,
    pub path: Option<String>,
    pub expires: Option<String>,
    pub domain: Option<String>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    pub same_site: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub path: String,
    #[serde(default)]
    pub policies: Vec<PolicyReference>,
    /// Delegates the route to a VirtualServerRoute, as `namespace/name` or `name`.
    pub route: Option<String>,
    pub action: Option<Action>,
    #[serde(default)]
    pub splits: Vec<Split>,
    #[serde(default)]
    pub matches: Vec<Match>,
    #[serde(default)]
    pub error_pages: Vec<ErrorPage>,
    pub location_snippets: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct Action {
    pub pass: Option<String>,
    pub redirect: Option<ActionRedirect>,
    #[serde(rename = "return")]
    pub return_: Option<ActionReturn>,
    pub proxy: Option<ActionProxy>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct ActionRedirect {
    pub url: String,
    pub code: Option<u16>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct ActionReturn {
    pub code: Option<u16>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub body: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionProxy {
    pub upstream: String,
    pub rewrite_path: Option<String>,
    pub request_headers: Option<ProxyRequestHeaders>,
    pub response_headers: Option<ProxyResponseHeaders>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct ProxyRequestHeaders {
    pub pass: Option<bool>,
    #[serde(default)]
    pub set: Vec<Header>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct ProxyResponseHeaders {
    #[serde(default)]
    pub hide: Vec<String>,
    #[serde(default)]
    pub pass: Vec<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub add: Vec<AddHeader>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct AddHeader {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub always: bool,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct Split {
    pub weight: u32,
    pub action: Option<Action>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct Match {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub action: Option<Action>,
    #[serde(default)]
    pub splits: Vec<Split>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct Condition {
    pub header: Option<String>,
    pub cookie: Option<String>,
    pub argument: Option<String>,
    pub variable: Option<String>,
    pub value: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct ErrorPage {
    pub codes: Vec<u16>,
    #[serde(rename = "return")]
    pub return_: Option<ErrorPageReturn>,
    pub redirect: Option<ErrorPageRedirect>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct ErrorPageReturn {
    pub code: Option<u16>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub body: String,
    #[serde(default)]
    pub headers: Vec<Header>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct ErrorPageRedirect {
    pub code: Option<u16>,
    pub url: String,
}

// === impl Upstream ===

impl Upstream {
    pub fn is_grpc(&self) -> bool {
        self.type_.as_deref() == Some("grpc")
    }

    pub fn uses_cluster_ip(&self) -> bool {
        self.use_cluster_ip.unwrap_or(false)
    }
}

// === impl Route ===

impl Route {
    /// Splits a `route` reference into its namespace and name, defaulting the namespace to
    /// that of the referencing VirtualServer.
    pub fn route_ref<'a>(&'a self, default_ns: &'a str) -> Option<(&'a str, &'a str)> {
        let route = self.route.as_deref()?;
        Some(match route.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => (default_ns, route),
        })
    }
}
