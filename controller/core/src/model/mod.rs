//! The configuration model rendered by the templates.
//!
//! Two families exist: [`v1`] for Ingress resources and [`v2`] for VirtualServer and
//! TransportServer resources. [`MainConfig`] describes `nginx.conf`. The model carries no
//! behavior beyond equality and diagnostics; every value is ready to be printed.

mod main_config;
pub mod v1;
pub mod v2;

pub use self::main_config::MainConfig;

/// Labels attached to an upstream's metrics.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub struct UpstreamLabels {
    pub service: String,
    pub resource_type: String,
    pub resource_name: String,
    pub resource_namespace: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

// === impl UpstreamLabels ===

impl UpstreamLabels {
    /// The label values in the order metric families declare them.
    pub fn values(&self) -> [&str; 4] {
        [
            &self.service,
            &self.resource_type,
            &self.resource_name,
            &self.resource_namespace,
        ]
    }
}
