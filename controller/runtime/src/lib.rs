//! Wires the NGINX Ingress controller together.
//!
//! The runtime watches the cluster into the resource index, turns index updates into
//! configurator operations on a single task and publishes resource warnings as Kubernetes
//! events:
//!
//! ```text
//!   watches -> [ Index ] --Update--> [ Controller ] --> [ Configurator ] --> NGINX
//!                  ^                       |
//!                  +------ resolve --------+----Warnings----> [ Events ]
//! ```
//!
//! NGINX is started once the initial state of every watched kind has been indexed and
//! configured, so the first configuration NGINX loads is complete.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use nginx_ingress_configurator as configurator;
pub use nginx_ingress_core as core;
pub use nginx_ingress_k8s_api as k8s;
pub use nginx_ingress_k8s_index as index;
pub use nginx_ingress_nginx as nginx;

mod args;
mod controller;
mod events;
mod upstream_metrics;

pub use self::{args::Args, controller::Controller, upstream_metrics::UpstreamServerMetrics};
