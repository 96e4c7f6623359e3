/// Describes a stream (TCP/UDP) load balancer bound to a listener of the
/// GlobalConfiguration, or to the TLS passthrough listener.
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
    kind = "TransportServer",
    shortname = "ts",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct TransportServerSpec {
    pub ingress_class_name: Option<String>,
    pub listener: TransportServerListener,
    pub host: Option<String>,
    #[serde(default)]
    pub upstreams: Vec<TransportServerUpstream>,
    pub upstream_parameters: Option<UpstreamParameters>,
    pub session_parameters: Option<SessionParameters>,
    pub action: Option<TransportServerAction>,
    pub server_snippets: Option<String>,
    pub stream_snippets: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct TransportServerListener {
    pub name: String,
    pub protocol: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransportServerUpstream {
    pub name: String,
    pub service: String,
    pub port: u16,
    pub fail_timeout: Option<String>,
    pub max_fails: Option<u32>,
    pub max_conns: Option<u32>,
    pub health_check: Option<TransportServerHealthCheck>,
    pub load_balancing_method: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct TransportServerHealthCheck {
    #[serde(default)]
    pub enable: bool,
    pub timeout: Option<String>,
    pub jitter: Option<String>,
    pub port: Option<u16>,
    pub interval: Option<String>,
    pub passes: Option<u32>,
    pub fails: Option<u32>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamParameters {
    pub udp_requests: Option<u32>,
    pub udp_responses: Option<u32>,
    pub connect_timeout: Option<String>,
    #[serde(default)]
    pub next_upstream: bool,
    pub next_upstream_timeout: Option<String>,
    pub next_upstream_tries: Option<u32>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct SessionParameters {
    pub timeout: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct TransportServerAction {
    pub pass: String,
}

// === impl TransportServerSpec ===

impl TransportServerSpec {
    pub fn is_tls_passthrough(&self) -> bool {
        self.listener.name == crate::TLS_PASSTHROUGH_LISTENER_NAME
    }

    pub fn is_udp(&self) -> bool {
        self.listener.protocol.eq_ignore_ascii_case("UDP")
    }
}
