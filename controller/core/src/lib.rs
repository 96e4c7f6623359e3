//! Shared types of the NGINX Ingress configuration pipeline.
//!
//! The resolver produces enriched resources (`*Ex`), the builder turns them into the config
//! model, and the template engine renders the model. All three agree on the types in this crate:
//!
//! ```text
//! [ cluster objects ] -> resolver -> [ *Ex ] -> builder -> [ model ] -> templates -> [ bytes ]
//! ```

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod ex;
pub mod model;
pub mod params;
mod resource;
mod warnings;

pub use self::{
    ex::{
        backend_port, endpoints_key, IngressEx, MergeableIngresses, PodInfo, Resource, SecretReference,
        TransportServerEx, VirtualServerEx,
    },
    params::{ConfigParams, StaticParams},
    resource::{Kind, ResourceKey, ResourceRef},
    warnings::Warnings,
};

/// The sole server of an upstream without endpoints. NGINX parses the address but can never
/// connect to it, so requests fail with a 502 instead of the configuration being rejected.
pub const EMPTY_UPSTREAM_SERVER: &str = "unix:/var/lib/nginx/non-existing-unix-socket.sock";

/// The socket the NGINX Plus API is served on.
pub const PLUS_API_SOCKET: &str = "/var/lib/nginx/nginx-plus-api.sock";

/// The socket the running configuration version is served on.
pub const CONFIG_VERSION_SOCKET: &str = "/var/lib/nginx/nginx-config-version.sock";

/// The socket the default HTTPS server listens on behind the TLS passthrough listener.
pub const PASSTHROUGH_HTTPS_SOCKET: &str = "unix:/var/lib/nginx/passthrough-https.sock";

/// Returns the unix socket a TLS passthrough TransportServer listens on.
pub fn passthrough_socket(key: &ResourceKey) -> String {
    format!(
        "unix:/var/lib/nginx/passthrough-{}_{}.sock",
        key.namespace, key.name
    )
}
