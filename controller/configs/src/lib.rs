//! Builds the configuration model from enriched resources.
//!
//! Every entry point is a pure function of its inputs: an enriched resource (or the ConfigMap),
//! the cluster-wide [`ConfigParams`] and the process-wide [`StaticParams`]. Nothing here reads
//! the cluster, the filesystem or the clock, so equal inputs always produce equal models.
//! Problems with user input never fail a build; they are returned as [`Warnings`] and the
//! affected setting falls back to its default.
//!
//! ```text
//!   IngressEx ─────────────┐
//!   MergeableIngresses ────┼──> v1::IngressNginxConfig
//!                          │
//!   VirtualServerEx ───────┼──> v2::VirtualServerConfig   (+ policies)
//!   TransportServerEx ─────┼──> v2::TransportServerConfig
//!                          │
//!   ConfigParams ──────────┴──> MainConfig
//! ```
//!
//! [`ConfigParams`]: nginx_ingress_core::ConfigParams
//! [`StaticParams`]: nginx_ingress_core::StaticParams
//! [`Warnings`]: nginx_ingress_core::Warnings

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
mod config_map;
mod ingress;
mod listen;
mod main_config;
mod passthrough;
mod policies;
mod secrets;
mod transport_server;
mod upstream;
mod virtual_server;

#[cfg(test)]
mod tests;

pub use self::{
    config_map::parse_config_map,
    ingress::{generate_ingress_config, generate_mergeable_ingress_config},
    main_config::{generate_main_config, DHPARAM_FILE},
    passthrough::PassthroughHosts,
    transport_server::generate_transport_server_config,
    virtual_server::generate_virtual_server_config,
};
