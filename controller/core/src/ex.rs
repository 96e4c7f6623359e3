//! Enriched resources: a routing resource joined with everything it references.
//!
//! These are immutable snapshots produced by the resolver. The builder reads nothing else, so
//! the same snapshot always yields the same configuration.

use crate::{Kind, ResourceKey, ResourceRef};
use nginx_ingress_k8s_api::{
    Ingress, Policy, ResourceExt, Selector, ServiceBackendPort, TransportServer, VirtualServer,
    VirtualServerRoute,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

/// Backend addresses (`ip:port`) keyed by [`endpoints_key`].
pub type Endpoints = BTreeMap<String, Vec<String>>;

#[derive(Clone, Debug, Default)]
pub struct IngressEx {
    pub ingress: Ingress,
    pub endpoints: Endpoints,
    /// Names of referenced services of type ExternalName.
    pub external_name_services: BTreeSet<String>,
    pub pods_by_ip: BTreeMap<String, PodInfo>,
    pub secret_refs: BTreeMap<String, SecretReference>,
}

/// A master Ingress and the minions that contribute paths to its host.
#[derive(Clone, Debug, Default)]
pub struct MergeableIngresses {
    pub master: IngressEx,
    pub minions: Vec<IngressEx>,
}

#[derive(Clone, Debug, Default)]
pub struct VirtualServerEx {
    pub virtual_server: VirtualServer,
    pub virtual_server_routes: Vec<VirtualServerRoute>,
    pub endpoints: Endpoints,
    /// `namespace/name` of referenced services of type ExternalName.
    pub external_name_services: BTreeSet<String>,
    pub pods_by_ip: BTreeMap<String, PodInfo>,
    pub secret_refs: BTreeMap<String, SecretReference>,
    /// Referenced policies keyed by `namespace/name`. Missing policies are absent.
    pub policies: BTreeMap<String, Policy>,
}

#[derive(Clone, Debug, Default)]
pub struct TransportServerEx {
    pub transport_server: TransportServer,
    pub endpoints: Endpoints,
    pub external_name_services: BTreeSet<String>,
    pub pods_by_ip: BTreeMap<String, PodInfo>,
    /// The port of the GlobalConfiguration listener the server binds to.
    pub listener_port: u16,
}

/// A resolved routing resource: the unit the configurator renders into one file.
#[derive(Clone, Debug)]
pub enum Resource {
    Ingress(Box<IngressEx>),
    MergeableIngresses(Box<MergeableIngresses>),
    VirtualServer(Box<VirtualServerEx>),
    TransportServer(Box<TransportServerEx>),
}

/// Identifies the pod behind an endpoint, for metric labels only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub owner: Option<String>,
}

/// A resolved secret. An unusable secret carries an error instead of content; the builder
/// disables the feature that needed it rather than failing the resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecretReference {
    pub secret_type: String,
    /// The bytes written to the secret's file.
    pub content: Vec<u8>,
    /// The on-disk path, set once the secret has been written.
    pub path: String,
    pub error: Option<String>,
}

/// Formats the key endpoints are stored under: `namespace|service|subselector|port`.
pub fn endpoints_key(
    namespace: &str,
    service: &str,
    subselector: Option<&Selector>,
    port: impl fmt::Display,
) -> String {
    let selector = subselector.map(ToString::to_string).unwrap_or_default();
    format!("{namespace}|{service}|{selector}|{port}")
}

/// The port of an Ingress backend as it appears in endpoint keys and upstream names: the port
/// number, or the port name when the backend refers to a named port.
pub fn backend_port(port: Option<&ServiceBackendPort>) -> String {
    match port {
        Some(ServiceBackendPort {
            number: Some(number),
            ..
        }) => number.to_string(),
        Some(ServiceBackendPort {
            name: Some(name), ..
        }) => name.clone(),
        _ => String::new(),
    }
}

// === impl SecretReference ===

impl SecretReference {
    pub fn valid(secret_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            secret_type: secret_type.into(),
            content,
            path: String::new(),
            error: None,
        }
    }

    pub fn invalid(secret_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            secret_type: secret_type.into(),
            content: Vec::new(),
            path: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

// === impl Resource ===

impl Resource {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Ingress(_) | Self::MergeableIngresses(_) => Kind::Ingress,
            Self::VirtualServer(_) => Kind::VirtualServer,
            Self::TransportServer(_) => Kind::TransportServer,
        }
    }

    /// The key of the resource that owns the rendered file. For mergeable Ingresses this is
    /// the master.
    pub fn key(&self) -> ResourceKey {
        match self {
            Self::Ingress(ex) => ResourceKey::of(&ex.ingress),
            Self::MergeableIngresses(m) => ResourceKey::of(&m.master.ingress),
            Self::VirtualServer(ex) => ResourceKey::of(&ex.virtual_server),
            Self::TransportServer(ex) => ResourceKey::of(&ex.transport_server),
        }
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(self.kind(), self.key())
    }
}

// === impl IngressEx ===

impl IngressEx {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.ingress.annotations().get(key).map(String::as_str)
    }
}

impl fmt::Display for IngressEx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IngressEx({}/{}, {} endpoint sets)",
            self.ingress.namespace().unwrap_or_default(),
            self.ingress.name_any(),
            self.endpoints.len()
        )
    }
}

impl fmt::Display for VirtualServerEx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VirtualServerEx({}/{}, {} routes, {} endpoint sets)",
            self.virtual_server.namespace().unwrap_or_default(),
            self.virtual_server.name_any(),
            self.virtual_server_routes.len(),
            self.endpoints.len()
        )
    }
}

impl fmt::Display for TransportServerEx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransportServerEx({}/{}, listener port {})",
            self.transport_server.namespace().unwrap_or_default(),
            self.transport_server.name_any(),
            self.listener_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn endpoints_key_includes_subselector() {
        assert_eq!(
            endpoints_key("default", "tea", None, 80),
            "default|tea||80"
        );
        let selector = Selector::from_iter(vec![("version", "v2"), ("app", "tea")]);
        assert_eq!(
            endpoints_key("default", "tea", Some(&selector), "http"),
            "default|tea|app=tea,version=v2|http"
        );
    }
}
