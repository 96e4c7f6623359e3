//! NGINX Ingress resource index
//!
//! The index caches every cluster object the controller configures NGINX from and resolves
//! routing resources into their enriched form. It watches:
//!
//! - `Ingress`, `VirtualServer`, `VirtualServerRoute`, `TransportServer` and `Policy` objects in
//!   the watched namespaces;
//! - the `Service`s, `EndpointSlice`s, `Secret`s and `Pod`s they reference;
//! - the controller's `ConfigMap` and `GlobalConfiguration`.
//!
//! ```text
//! [ EndpointSlice ] -> [ Service ] <- [ Ingress | VirtualServer (+ routes) | TransportServer ]
//!                                                   |            |
//!                        [ Secret ] <---------------+-------- [ Policy ]
//! ```
//!
//! Changes are not resolved eagerly. Each change is mapped to the routing resources that depend
//! on it and published as an [`Update`]; the event loop then calls [`Index::resolve`] to build
//! the `*Ex` snapshot the configuration builder consumes.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod index;
pub mod metrics;
pub mod secrets;

#[cfg(test)]
mod tests;

pub use self::index::{Index, SharedIndex, SpecialSecrets, Update};
use nginx_ingress_core::ResourceKey;

/// Holds the controller's view of the cluster, fixed at startup.
#[derive(Clone, Debug, Default)]
pub struct ClusterInfo {
    /// Resources of another ingress class are ignored. Resources without a class are accepted.
    pub ingress_class: String,

    /// The namespaces routing resources are read from. Empty means all namespaces.
    pub watch_namespaces: Vec<String>,

    pub config_map: Option<ResourceKey>,
    pub global_configuration: Option<ResourceKey>,

    pub tls_passthrough: bool,
    pub tls_passthrough_port: u16,

    pub wildcard_tls_secret: Option<ResourceKey>,
    pub default_server_tls_secret: Option<ResourceKey>,
}
