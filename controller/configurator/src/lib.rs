//! Turns resolved resources into NGINX configuration and applies it.
//!
//! The [`Configurator`] is the single writer of the NGINX configuration. For every resource it
//! builds the model, renders it, writes the file and its secrets through a [`Manager`], and then
//! decides how NGINX picks up the change:
//!
//! ```text
//!   Resource -> build -> render -> bytes unchanged? -> done
//!                                        |
//!                     only upstream servers changed (Plus)? -> Plus API -> done
//!                                        |                        |
//!                                        v                   fallback
//!                                  write + reload  <--------------+
//! ```
//!
//! Until reloads are enabled, changes are written but NGINX is not reloaded, so the initial
//! configuration is applied by starting NGINX once.
//!
//! [`Manager`]: nginx_ingress_nginx::Manager

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod configurator;
mod labels;
mod render;


pub use self::{
    configurator::{Configurator, DEFAULT_SERVER_SECRET_FILE, WILDCARD_SECRET_FILE},
    labels::{LabelUpdater, NoopLabels, ServerMetric, UpstreamMetric},
};
use nginx_ingress_core::ResourceRef;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The resource could not be rendered; its previous configuration stays in effect.
    #[error("failed to render the configuration of {resource}: {source}")]
    Template {
        resource: ResourceRef,
        #[source]
        source: nginx_ingress_templates::Error,
    },

    #[error("failed to render the main configuration: {0}")]
    MainTemplate(#[source] nginx_ingress_templates::Error),

    #[error(transparent)]
    Manager(#[from] nginx_ingress_nginx::Error),
}
