/// A reusable traffic policy referenced by VirtualServers and VirtualServerRoutes. Exactly one
/// of the policy kinds is expected to be set.
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
    kind = "Policy",
    shortname = "pol",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub ingress_class_name: Option<String>,
    pub access_control: Option<AccessControl>,
    pub rate_limit: Option<RateLimit>,
    #[serde(rename = "jwt")]
    pub jwt_auth: Option<JwtAuth>,
    pub basic_auth: Option<BasicAuth>,
    #[serde(rename = "ingressMTLS")]
    pub ingress_mtls: Option<IngressMtls>,
    #[serde(rename = "egressMTLS")]
    pub egress_mtls: Option<EgressMtls>,
    pub waf: Option<Waf>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct AccessControl {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub rate: String,
    pub key: String,
    pub delay: Option<u32>,
    pub no_delay: Option<bool>,
    pub burst: Option<u32>,
    pub zone_size: String,
    pub dry_run: Option<bool>,
    pub log_level: Option<String>,
    pub reject_code: Option<u16>,
    pub condition: Option<RateLimitCondition>,
}

/// Selects the requests a tiered rate limit applies to.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct RateLimitCondition {
    pub jwt: Option<JwtCondition>,
    #[serde(default)]
    pub variables: Vec<VariableCondition>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct JwtCondition {
    pub claim: String,
    #[serde(rename = "match")]
    pub match_: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct VariableCondition {
    pub name: String,
    #[serde(rename = "match")]
    pub match_: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuth {
    pub realm: String,
    pub secret: Option<String>,
    pub token: Option<String>,
    #[serde(rename = "jwksURI")]
    pub jwks_uri: Option<String>,
    pub key_cache: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct BasicAuth {
    pub realm: Option<String>,
    pub secret: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressMtls {
    pub client_cert_secret: String,
    pub verify_client: Option<String>,
    pub verify_depth: Option<u32>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EgressMtls {
    pub tls_secret: Option<String>,
    #[serde(default)]
    pub verify_server: bool,
    pub verify_depth: Option<u32>,
    pub protocols: Option<String>,
    #[serde(default)]
    pub session_reuse: Option<bool>,
    pub trusted_cert_secret: Option<String>,
    pub ciphers: Option<String>,
    #[serde(default)]
    pub server_name: bool,
    pub ssl_name: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Waf {
    #[serde(default)]
    pub enable: bool,
    pub ap_policy: Option<String>,
    pub ap_bundle: Option<String>,
    #[serde(default)]
    pub security_logs: Vec<SecurityLog>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityLog {
    #[serde(default)]
    pub enable: bool,
    pub ap_log_conf: Option<String>,
    pub ap_log_bundle: Option<String>,
    pub log_dest: Option<String>,
}

/// The kind of a policy, determined by which of its fields is set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKind {
    AccessControl,
    RateLimit,
    Jwt,
    BasicAuth,
    IngressMtls,
    EgressMtls,
    Waf,
}

// === impl PolicySpec ===

impl PolicySpec {
    /// Returns the kind of the policy, or `None` when no kind (or more than one) is set.
    pub fn kind(&self) -> Option<PolicyKind> {
        let kinds = [
            self.access_control.as_ref().map(|_| PolicyKind::AccessControl),
            self.rate_limit.as_ref().map(|_| PolicyKind::RateLimit),
            self.jwt_auth.as_ref().map(|_| PolicyKind::Jwt),
            self.basic_auth.as_ref().map(|_| PolicyKind::BasicAuth),
            self.ingress_mtls.as_ref().map(|_| PolicyKind::IngressMtls),
            self.egress_mtls.as_ref().map(|_| PolicyKind::EgressMtls),
            self.waf.as_ref().map(|_| PolicyKind::Waf),
        ];
        let mut set = kinds.into_iter().flatten();
        match (set.next(), set.next()) {
            (Some(kind), None) => Some(kind),
            _ => None,
        }
    }

    /// Names of the secrets the policy reads, in the policy's namespace.
    pub fn secret_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        if let Some(jwt) = &self.jwt_auth {
            names.extend(jwt.secret.as_deref());
        }
        if let Some(basic) = &self.basic_auth {
            names.push(basic.secret.as_str());
        }
        if let Some(mtls) = &self.ingress_mtls {
            names.push(mtls.client_cert_secret.as_str());
        }
        if let Some(mtls) = &self.egress_mtls {
            names.extend(mtls.tls_secret.as_deref());
            names.extend(mtls.trusted_cert_secret.as_deref());
        }
        names
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::AccessControl => "accessControl",
            Self::RateLimit => "rateLimit",
            Self::Jwt => "jwt",
            Self::BasicAuth => "basicAuth",
            Self::IngressMtls => "ingressMTLS",
            Self::EgressMtls => "egressMTLS",
            Self::Waf => "waf",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_requires_exactly_one_field() {
        let mut spec = PolicySpec::default();
        assert_eq!(spec.kind(), None);

        spec.access_control = Some(AccessControl {
            allow: vec!["10.0.0.0/8".to_string()],
            deny: vec![],
        });
        assert_eq!(spec.kind(), Some(PolicyKind::AccessControl));

        spec.basic_auth = Some(BasicAuth {
            realm: None,
            secret: "htpasswd".to_string(),
        });
        assert_eq!(spec.kind(), None);
    }

    #[test]
    fn deserializes_camel_case_names() {
        let spec: PolicySpec = serde_json::from_value(serde_json::json!({
            "ingressMTLS": { "clientCertSecret": "ca", "verifyDepth": 2 },
        }))
        .expect("policy must deserialize");
        let mtls = spec.ingress_mtls.as_ref().expect("ingressMTLS must be set");
        assert_eq!(mtls.client_cert_secret, "ca");
        assert_eq!(mtls.verify_depth, Some(2));
        assert_eq!(spec.kind(), Some(PolicyKind::IngressMtls));
    }
}
