//! Renders the configuration model to NGINX configuration text.
//!
//! Each family (main, Ingress, VirtualServer, TransportServer) has one active template. The
//! template that was loaded at startup is kept so that a ConfigMap override can be reverted.
//! Templates see the model and a fixed set of helpers, nothing else.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod engine;
mod helpers;


pub use self::engine::{Engine, Family, TemplatePaths};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read the {family} template from {}: {source}", path.display())]
    Read {
        family: Family,
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse the {family} template: {source}")]
    Parse {
        family: Family,
        #[source]
        source: minijinja::Error,
    },

    #[error("failed to execute the {family} template: {source}")]
    Exec {
        family: Family,
        #[source]
        source: minijinja::Error,
    },
}
