use crate::{
    config_version::{config_version_conf, VersionProbe},
    files::{self, Layout},
    plus::{self, Plane, PlusClient, UpstreamServer},
    process::{self, Spawned},
    reload::{Coalescer, Reload, ReloadHandle},
    Done, Error, Manager, NginxVersion, ReloadKind, Result, CONFIG_FILE_MODE,
};
use std::{
    ffi::OsString,
    path::PathBuf,
    time::{Duration, Instant},
};
use tokio::process::Command;

/// How the manager runs NGINX.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub binary: PathBuf,
    pub layout: Layout,
    pub nginx_plus: bool,
    pub reload_timeout: Duration,
    pub endpoints_reload_timeout: Duration,
    /// How long a graceful quit may take before NGINX is killed.
    pub quit_timeout: Duration,
    pub config_version_socket: PathBuf,
    pub plus_api_socket: PathBuf,
}

/// Manages a local NGINX process and its configuration directory.
pub struct LocalManager {
    config: ManagerConfig,
    nginx: Option<Spawned>,
    reloads: Option<ReloadHandle>,
    plus: Option<PlusClient>,
}

/// Reloads NGINX and confirms the reload through the version probe.
struct NginxReloader {
    config: ManagerConfig,
    probe: VersionProbe,
    version: u64,
}

// === impl LocalManager ===

impl LocalManager {
    /// Prepares the configuration directory. NGINX is not started until [`Manager::start`].
    pub fn new(config: ManagerConfig) -> Result<Self> {
        let version = config_version_conf(&config.config_version_socket.to_string_lossy(), 0);
        config.layout.init(version.as_bytes())?;
        let plus = config
            .nginx_plus
            .then(|| PlusClient::new(config.plus_api_socket.clone()));
        Ok(Self {
            config,
            nginx: None,
            reloads: None,
            plus,
        })
    }

    /// Runs `nginx -v`.
    pub async fn version(&self) -> Result<NginxVersion> {
        let output = Command::new(&self.config.binary)
            .arg("-v")
            .output()
            .await
            .map_err(|e| Error::Process(format!("failed to run nginx -v: {e}")))?;
        // NGINX prints its version to stderr.
        let out = if output.stderr.is_empty() {
            output.stdout
        } else {
            output.stderr
        };
        Ok(NginxVersion::parse(&String::from_utf8_lossy(&out)))
    }

    fn plus(&self) -> Result<&PlusClient> {
        self.plus
            .as_ref()
            .ok_or_else(|| Error::Api("NGINX Plus is not enabled".to_string()))
    }
}

#[async_trait::async_trait]
impl Manager for LocalManager {
    fn write_main(&mut self, content: &[u8]) -> Result<()> {
        files::write_atomic(&self.config.layout.main(), content, CONFIG_FILE_MODE)
    }

    fn write_config(&mut self, name: &str, content: &[u8]) -> Result<()> {
        files::write_atomic(&self.config.layout.config(name), content, CONFIG_FILE_MODE)
    }

    fn delete_config(&mut self, name: &str) -> Result<()> {
        files::remove(&self.config.layout.config(name))
    }

    fn write_stream_config(&mut self, name: &str, content: &[u8]) -> Result<()> {
        files::write_atomic(
            &self.config.layout.stream_config(name),
            content,
            CONFIG_FILE_MODE,
        )
    }

    fn delete_stream_config(&mut self, name: &str) -> Result<()> {
        files::remove(&self.config.layout.stream_config(name))
    }

    fn write_secret(&mut self, name: &str, content: &[u8], mode: u32) -> Result<String> {
        let path = self.config.layout.secret(name);
        files::write_atomic(&path, content, mode)?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn delete_secret(&mut self, name: &str) -> Result<()> {
        files::remove(&self.config.layout.secret(name))
    }

    fn secret_path(&self, name: &str) -> String {
        self.config.layout.secret(name).to_string_lossy().into_owned()
    }

    fn write_passthrough_hosts(&mut self, content: &[u8]) -> Result<()> {
        files::write_atomic(
            &self.config.layout.passthrough_hosts(),
            content,
            CONFIG_FILE_MODE,
        )
    }

    fn write_dhparam(&mut self, content: &[u8]) -> Result<String> {
        self.write_secret("dhparam.pem", content, crate::SECRET_FILE_MODE)
    }

    async fn start(&mut self) -> Result<Done> {
        if let Some(nginx) = &self.nginx {
            return Ok(nginx.done.clone());
        }

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(nginx_args(&self.config, &[]));
        let mut nginx = Spawned::spawn("nginx", cmd)?;

        let probe = VersionProbe::new(&self.config.config_version_socket);
        if let Err(error) = probe.wait_for(0, self.config.reload_timeout).await {
            let exit = nginx.wait_or_kill(Duration::ZERO).await;
            return Err(Error::Process(format!(
                "NGINX did not become ready: {error} ({exit})"
            )));
        }
        tracing::info!(pid = ?nginx.pid, "NGINX is ready");

        let done = nginx.done.clone();
        self.reloads = Some(Coalescer::spawn(NginxReloader {
            config: self.config.clone(),
            probe,
            version: 0,
        }));
        self.nginx = Some(nginx);
        Ok(done)
    }

    async fn reload(&mut self, kind: ReloadKind) -> Result<()> {
        match &self.reloads {
            Some(reloads) => reloads.reload(kind).await,
            None => Err(Error::Reload("NGINX is not running".to_string())),
        }
    }

    async fn quit(&mut self) -> Result<()> {
        let Some(mut nginx) = self.nginx.take() else {
            return Ok(());
        };
        self.reloads = None;

        let args = nginx_args(&self.config, &["-s", "quit"]);
        if let Err(error) = process::run(self.config.binary.as_os_str(), args).await {
            tracing::warn!(%error, "Failed to signal NGINX to quit");
        }
        let exit = nginx.wait_or_kill(self.config.quit_timeout).await;
        if exit.success() {
            tracing::info!("NGINX exited");
            Ok(())
        } else {
            Err(Error::Process(exit.to_string()))
        }
    }

    async fn update_servers(
        &mut self,
        upstream: &str,
        servers: &[UpstreamServer],
    ) -> Result<()> {
        plus::update_servers(self.plus()?, Plane::Http, upstream, servers)
            .await
            .map(|_| ())
    }

    async fn update_stream_servers(
        &mut self,
        upstream: &str,
        servers: &[UpstreamServer],
    ) -> Result<()> {
        plus::update_servers(self.plus()?, Plane::Stream, upstream, servers)
            .await
            .map(|_| ())
    }

    async fn upsert_key_val(&mut self, zone: &str, key: &str, value: &str) -> Result<()> {
        plus::upsert_key_val(self.plus()?, zone, key, value).await
    }
}

// === impl NginxReloader ===

#[async_trait::async_trait]
impl Reload for NginxReloader {
    async fn reload(&mut self, kind: ReloadKind) -> Result<()> {
        let version = self.version + 1;
        let socket = self.config.config_version_socket.to_string_lossy();
        let conf = config_version_conf(&socket, version);
        files::write_atomic(
            &self.config.layout.config_version(),
            conf.as_bytes(),
            CONFIG_FILE_MODE,
        )?;
        self.version = version;

        let start = Instant::now();
        process::run(
            self.config.binary.as_os_str(),
            nginx_args(&self.config, &["-s", "reload"]),
        )
        .await
        .map_err(|e| Error::Reload(e.to_string()))?;

        let timeout = match kind {
            ReloadKind::Config => self.config.reload_timeout,
            ReloadKind::Endpoints => self.config.endpoints_reload_timeout,
        };
        self.probe.wait_for(version, timeout).await?;
        tracing::info!(version, elapsed = ?start.elapsed(), "Reloaded NGINX");
        Ok(())
    }
}

fn nginx_args(config: &ManagerConfig, extra: &[&str]) -> Vec<OsString> {
    let mut args = extra.iter().map(OsString::from).collect::<Vec<_>>();
    args.push("-e".into());
    args.push("stderr".into());
    args.push("-c".into());
    args.push(config.layout.main().into_os_string());
    args
}
