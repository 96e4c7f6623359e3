use std::fmt;

/// Identifies a namespaced resource, displayed as `namespace/name`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Ingress,
    VirtualServer,
    VirtualServerRoute,
    TransportServer,
    GlobalConfiguration,
    Policy,
    Service,
    Secret,
    ConfigMap,
}

/// A resource key qualified by its kind, used to attribute warnings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub kind: Kind,
    pub key: ResourceKey,
}

// === impl ResourceKey ===

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parses a `namespace/name` reference. A bare name is qualified with `default_ns`.
    pub fn parse(s: &str, default_ns: &str) -> Self {
        match s.split_once('/') {
            Some((ns, name)) => Self::new(ns, name),
            None => Self::new(default_ns, s),
        }
    }

    /// The stem of the file the resource is rendered to, e.g. `vs_default_cafe`.
    pub fn file_name(&self, kind: Kind) -> String {
        format!("{}_{}_{}", kind.file_prefix(), self.namespace, self.name)
    }

    /// The file name a secret is written to.
    pub fn secret_file_name(&self) -> String {
        format!("{}_{}", self.namespace, self.name)
    }

    pub fn of<T: nginx_ingress_k8s_api::ResourceExt>(resource: &T) -> Self {
        Self::new(resource.namespace().unwrap_or_default(), resource.name_any())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl Kind ===

impl Kind {
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::VirtualServer => "vs",
            Self::VirtualServerRoute => "vsr",
            Self::TransportServer => "ts",
            Self::GlobalConfiguration => "gc",
            Self::Policy => "pol",
            Self::Service => "svc",
            Self::Secret => "secret",
            Self::ConfigMap => "cm",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ingress => "Ingress",
            Self::VirtualServer => "VirtualServer",
            Self::VirtualServerRoute => "VirtualServerRoute",
            Self::TransportServer => "TransportServer",
            Self::GlobalConfiguration => "GlobalConfiguration",
            Self::Policy => "Policy",
            Self::Service => "Service",
            Self::Secret => "Secret",
            Self::ConfigMap => "ConfigMap",
        })
    }
}

// === impl ResourceRef ===

impl ResourceRef {
    pub fn new(kind: Kind, key: ResourceKey) -> Self {
        Self { kind, key }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        let key = ResourceKey::new("default", "cafe");
        assert_eq!(key.file_name(Kind::Ingress), "ingress_default_cafe");
        assert_eq!(key.file_name(Kind::VirtualServer), "vs_default_cafe");
        assert_eq!(key.file_name(Kind::TransportServer), "ts_default_cafe");
        assert_eq!(key.secret_file_name(), "default_cafe");
        assert_eq!(key.to_string(), "default/cafe");
    }

    #[test]
    fn parse_defaults_namespace() {
        assert_eq!(
            ResourceKey::parse("tea", "default"),
            ResourceKey::new("default", "tea")
        );
        assert_eq!(
            ResourceKey::parse("other/tea", "default"),
            ResourceKey::new("other", "tea")
        );
    }
}
