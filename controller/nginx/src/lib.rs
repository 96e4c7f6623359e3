//! Owns the NGINX configuration tree, the NGINX process and the NGINX Plus API.
//!
//! The configurator drives a [`Manager`]; [`LocalManager`] is the implementation backed by the
//! filesystem and a real NGINX binary, [`fake::FakeManager`] records operations in memory.
//!
//! ```text
//!                      +--------------+   atomic rename   +--------------------------+
//!   configurator ----> | LocalManager | ----------------> | <conf>/conf.d/*.conf ... |
//!                      +--------------+                   +--------------------------+
//!                        |          |
//!          reload(kind)  |          |  update_servers(..)
//!                        v          v
//!              +-----------+      +------------+
//!              | Coalescer |      | PlusClient | --> unix:/var/lib/nginx/nginx-plus-api.sock
//!              +-----------+      +------------+
//!                    |
//!                    v
//!       nginx -s reload, then poll unix:/var/lib/nginx/nginx-config-version.sock
//! ```
//!
//! Every reload bumps the configuration version. NGINX serves the version it loaded, so a
//! reload only succeeds once NGINX answers with the version that was written.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod client;
mod config_version;
pub mod fake;
mod files;
mod local;
pub mod plus;
mod process;
mod reload;
pub mod supervisor;
mod version;

pub use self::{
    config_version::{config_version_conf, VersionProbe},
    files::Layout,
    local::{LocalManager, ManagerConfig},
    plus::{Plane, PlusApi, PlusClient, ServerChanges, UpstreamServer},
    process::{Done, Exit},
    reload::{Coalescer, Reload, ReloadHandle},
    version::NginxVersion,
};
use std::{io, path::PathBuf, sync::Arc, time::Duration};

/// The mode secret files are written with.
pub const SECRET_FILE_MODE: u32 = 0o600;

/// The mode configuration files are written with.
pub const CONFIG_FILE_MODE: u32 = 0o644;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("failed to delete {}: {source}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("NGINX did not load configuration version {version} within {timeout:?}")]
    ReloadTimeout { version: u64, timeout: Duration },

    #[error("failed to reload NGINX: {0}")]
    Reload(String),

    /// The Plus API refused a live update; the caller must reload instead.
    #[error("NGINX Plus API request failed, falling back to a reload: {0}")]
    FallbackToReload(String),

    #[error("NGINX process failure: {0}")]
    Process(String),

    #[error("NGINX Plus API unavailable: {0}")]
    Api(String),
}

/// The deadline class of a reload.
///
/// A configuration change may take NGINX longer to apply than an endpoints-only change. When
/// requests are merged, `Config` wins.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReloadKind {
    #[default]
    Endpoints,
    Config,
}

/// The operations the configurator performs against NGINX.
///
/// File operations never expose a partially written file to NGINX. Reloads are serialized;
/// concurrent requests are merged into one.
#[async_trait::async_trait]
pub trait Manager: Send {
    fn write_main(&mut self, content: &[u8]) -> Result<()>;

    /// Writes `conf.d/<name>.conf`.
    fn write_config(&mut self, name: &str, content: &[u8]) -> Result<()>;

    fn delete_config(&mut self, name: &str) -> Result<()>;

    /// Writes `stream-conf.d/<name>.conf`.
    fn write_stream_config(&mut self, name: &str, content: &[u8]) -> Result<()>;

    fn delete_stream_config(&mut self, name: &str) -> Result<()>;

    /// Writes a secret file and returns its path.
    fn write_secret(&mut self, name: &str, content: &[u8], mode: u32) -> Result<String>;

    fn delete_secret(&mut self, name: &str) -> Result<()>;

    /// The path a secret is (or would be) written to.
    fn secret_path(&self, name: &str) -> String;

    fn write_passthrough_hosts(&mut self, content: &[u8]) -> Result<()>;

    /// Writes the DH parameters file and returns its path.
    fn write_dhparam(&mut self, content: &[u8]) -> Result<String>;

    /// Starts NGINX and waits until it serves the current configuration version.
    async fn start(&mut self) -> Result<Done>;

    async fn reload(&mut self, kind: ReloadKind) -> Result<()>;

    /// Gracefully stops NGINX and waits for it to exit.
    async fn quit(&mut self) -> Result<()>;

    /// Reconciles the servers of an HTTP upstream through the Plus API.
    async fn update_servers(&mut self, upstream: &str, servers: &[UpstreamServer])
        -> Result<()>;

    /// Reconciles the servers of a stream upstream through the Plus API.
    async fn update_stream_servers(
        &mut self,
        upstream: &str,
        servers: &[UpstreamServer],
    ) -> Result<()>;

    async fn upsert_key_val(&mut self, zone: &str, key: &str, value: &str) -> Result<()>;
}

// === impl Error ===

impl Error {
    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn delete(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Delete {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Whether a failed live update should be retried as a reload.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::FallbackToReload(_) | Self::Api(_))
    }
}
