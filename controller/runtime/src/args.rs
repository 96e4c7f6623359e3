use crate::{
    configurator::{Configurator, DEFAULT_SERVER_SECRET_FILE},
    core::{ResourceKey, StaticParams, CONFIG_VERSION_SOCKET, PLUS_API_SOCKET},
    events,
    index::{metrics::IndexMetrics, ClusterInfo, Index},
    k8s::{
        ConfigMap, EndpointSlice, GlobalConfiguration, Ingress, Pod, Policy, Secret, Service,
        TransportServer, VirtualServer, VirtualServerRoute,
    },
    nginx::{
        supervisor::{Children, SupervisedChild},
        Layout, LocalManager, ManagerConfig,
    },
    Controller, UpstreamServerMetrics,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::{events::Reporter, watcher};
use nginx_ingress_templates::{Engine, TemplatePaths};
use prometheus_client::registry::Registry;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "nginx-ingress", about = "Configures NGINX from Kubernetes routing resources")]
pub struct Args {
    #[clap(long, default_value = "nginx_ingress=info,warn", env = "NGINX_INGRESS_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Configures NGINX Plus.
    #[clap(long)]
    nginx_plus: bool,

    #[clap(long, default_value = "nginx")]
    nginx_binary: PathBuf,

    #[clap(long, default_value = "/etc/nginx")]
    nginx_conf_path: PathBuf,

    #[clap(long, default_value = "/etc/nginx/secrets")]
    secrets_path: PathBuf,

    /// The ConfigMap with global NGINX settings, as `namespace/name`.
    #[clap(long)]
    nginx_configmaps: Option<String>,

    /// The GlobalConfiguration defining TransportServer listeners, as `namespace/name`.
    #[clap(long)]
    global_configuration: Option<String>,

    #[clap(long, default_value = "nginx")]
    ingress_class: String,

    /// Limits the controller to a namespace. May be repeated; all namespaces by default.
    #[clap(long = "watch-namespace")]
    watch_namespaces: Vec<String>,

    #[clap(long, default_value = "true", action = clap::ArgAction::Set)]
    enable_custom_resources: bool,

    #[clap(long)]
    enable_tls_passthrough: bool,

    #[clap(long, default_value = "443")]
    tls_passthrough_port: u16,

    #[clap(long, default_value = "80")]
    default_http_listener_port: u16,

    #[clap(long, default_value = "443")]
    default_https_listener_port: u16,

    #[clap(long)]
    disable_ipv6: bool,

    /// A TLS secret, as `namespace/name`, used by TLS servers that name no secret.
    #[clap(long)]
    wildcard_tls_secret: Option<String>,

    /// The TLS secret, as `namespace/name`, of the default server.
    #[clap(long)]
    default_server_tls_secret: Option<String>,

    /// Milliseconds to wait for NGINX to load a changed configuration.
    #[clap(long, default_value = "60000")]
    nginx_reload_timeout: u64,

    /// Milliseconds to wait for NGINX to load an endpoints-only change.
    #[clap(long, default_value = "15000")]
    nginx_endpoints_reload_timeout: u64,

    /// Milliseconds NGINX and the supervised processes are given to quit.
    #[clap(long, default_value = "10000")]
    quit_timeout: u64,

    #[clap(long)]
    enable_dynamic_ssl_reload: bool,

    #[clap(long)]
    enable_snippets: bool,

    #[clap(long)]
    main_template_path: Option<PathBuf>,

    #[clap(long)]
    ingress_template_path: Option<PathBuf>,

    #[clap(long)]
    virtualserver_template_path: Option<PathBuf>,

    #[clap(long)]
    transportserver_template_path: Option<PathBuf>,

    /// Command line of the WAF enforcer plugin.
    #[clap(long)]
    waf_plugin: Option<String>,

    /// Command line of the WAF agent.
    #[clap(long)]
    waf_agent: Option<String>,

    /// Command line of the DoS protection agent.
    #[clap(long)]
    dos_agent: Option<String>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            nginx_plus,
            nginx_binary,
            nginx_conf_path,
            secrets_path,
            nginx_configmaps,
            global_configuration,
            ingress_class,
            watch_namespaces,
            enable_custom_resources,
            enable_tls_passthrough,
            tls_passthrough_port,
            default_http_listener_port,
            default_https_listener_port,
            disable_ipv6,
            wildcard_tls_secret,
            default_server_tls_secret,
            nginx_reload_timeout,
            nginx_endpoints_reload_timeout,
            quit_timeout,
            enable_dynamic_ssl_reload,
            enable_snippets,
            main_template_path,
            ingress_template_path,
            virtualserver_template_path,
            transportserver_template_path,
            waf_plugin,
            waf_agent,
            dos_agent,
        } = self;

        let cluster_info = ClusterInfo {
            ingress_class,
            watch_namespaces,
            config_map: parse_key("--nginx-configmaps", nginx_configmaps)?,
            global_configuration: parse_key("--global-configuration", global_configuration)?,
            tls_passthrough: enable_tls_passthrough,
            tls_passthrough_port,
            wildcard_tls_secret: parse_key("--wildcard-tls-secret", wildcard_tls_secret)?,
            default_server_tls_secret: parse_key(
                "--default-server-tls-secret",
                default_server_tls_secret,
            )?,
        };
        if cluster_info.global_configuration.is_some() && !enable_custom_resources {
            bail!("--global-configuration requires --enable-custom-resources");
        }

        let static_params = StaticParams {
            nginx_plus,
            conf_dir: nginx_conf_path.to_string_lossy().into_owned(),
            secrets_dir: secrets_path.to_string_lossy().into_owned(),
            tls_passthrough: enable_tls_passthrough,
            tls_passthrough_port,
            default_http_listener_port,
            default_https_listener_port,
            disable_ipv6,
            dynamic_ssl_reload: enable_dynamic_ssl_reload,
            enable_snippets,
            waf_module: waf_plugin.is_some(),
            dos_module: dos_agent.is_some(),
            default_tls_secret: match cluster_info.default_server_tls_secret {
                Some(_) => None,
                None => mounted_default_certificate(&secrets_path),
            },
            ..Default::default()
        };
        if let Some(path) = &static_params.default_tls_secret {
            info!(%path, "Using the mounted default server certificate");
        }

        // Template files named by flags must load; a broken file is a startup failure.
        let engine = Engine::new(&TemplatePaths {
            main: main_template_path,
            ingress: ingress_template_path,
            virtual_server: virtualserver_template_path,
            transport_server: transportserver_template_path,
        })
        .context("failed to load templates")?;

        let quit_timeout = Duration::from_millis(quit_timeout);
        let manager = LocalManager::new(ManagerConfig {
            binary: nginx_binary,
            layout: Layout::new(&nginx_conf_path, &secrets_path),
            nginx_plus,
            reload_timeout: Duration::from_millis(nginx_reload_timeout),
            endpoints_reload_timeout: Duration::from_millis(nginx_endpoints_reload_timeout),
            quit_timeout,
            config_version_socket: CONFIG_VERSION_SOCKET.into(),
            plus_api_socket: PLUS_API_SOCKET.into(),
        })
        .context("failed to prepare the NGINX configuration directory")?;
        let version = manager.version().await.context("failed to run NGINX")?;
        if nginx_plus != version.is_plus() {
            bail!("--nginx-plus is {nginx_plus} but the NGINX binary is {version}");
        }
        info!(%version, "NGINX");

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let index = Index::shared(cluster_info.clone(), updates_tx);

        let mut prom = <Registry>::default();
        let index_metrics = IndexMetrics::register(
            index.clone(),
            prom.sub_registry_with_prefix("index"),
        )
        .shared();
        let upstream_metrics = UpstreamServerMetrics::register(&mut prom);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Spawn resource watches.

        {
            let mut idx = index.write();
            idx.track_sync::<Ingress>();
            idx.track_sync::<Service>();
            idx.track_sync::<EndpointSlice>();
            idx.track_sync::<Secret>();
            idx.track_sync::<Pod>();
            if cluster_info.config_map.is_some() {
                idx.track_sync::<ConfigMap>();
            }
            if enable_custom_resources {
                idx.track_sync::<VirtualServer>();
                idx.track_sync::<VirtualServerRoute>();
                idx.track_sync::<TransportServer>();
                idx.track_sync::<Policy>();
                if cluster_info.global_configuration.is_some() {
                    idx.track_sync::<GlobalConfiguration>();
                }
            }
        }

        let ingresses = runtime.watch_all::<Ingress>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index_metrics.clone(), ingresses)
                .instrument(info_span!("ingresses")),
        );

        let services = runtime.watch_all::<Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index_metrics.clone(), services)
                .instrument(info_span!("services")),
        );

        let slices = runtime.watch_all::<EndpointSlice>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index_metrics.clone(), slices)
                .instrument(info_span!("endpointslices")),
        );

        let secrets = runtime.watch_all::<Secret>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index_metrics.clone(), secrets)
                .instrument(info_span!("secrets")),
        );

        let pods = runtime.watch_all::<Pod>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index_metrics.clone(), pods).instrument(info_span!("pods")),
        );

        if let Some(key) = &cluster_info.config_map {
            let config_maps = runtime.watch_all::<ConfigMap>(by_name(key));
            tokio::spawn(
                kubert::index::namespaced(index_metrics.clone(), config_maps)
                    .instrument(info_span!("configmaps")),
            );
        }

        if enable_custom_resources {
            let virtual_servers = runtime.watch_all::<VirtualServer>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(index_metrics.clone(), virtual_servers)
                    .instrument(info_span!("virtualservers")),
            );

            let routes = runtime.watch_all::<VirtualServerRoute>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(index_metrics.clone(), routes)
                    .instrument(info_span!("virtualserverroutes")),
            );

            let transport_servers =
                runtime.watch_all::<TransportServer>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(index_metrics.clone(), transport_servers)
                    .instrument(info_span!("transportservers")),
            );

            let policies = runtime.watch_all::<Policy>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(index_metrics.clone(), policies)
                    .instrument(info_span!("policies")),
            );

            if let Some(key) = &cluster_info.global_configuration {
                let global_configurations =
                    runtime.watch_all::<GlobalConfiguration>(by_name(key));
                tokio::spawn(
                    kubert::index::namespaced(index_metrics.clone(), global_configurations)
                        .instrument(info_span!("globalconfigurations")),
                );
            }
        }

        // Supervised processes start before NGINX so that NGINX can connect to them.
        let mut children = Children::default();
        for (name, command) in [
            ("waf-plugin", waf_plugin),
            ("waf-agent", waf_agent),
            ("dos-agent", dos_agent),
        ] {
            if let Some(command) = command {
                children.push(SupervisedChild::from_command_line(name, &command));
            }
        }
        let children_done = children.start().context("failed to start supervised processes")?;

        let (warnings_tx, warnings_rx) = mpsc::unbounded_channel();
        let reporter = Reporter {
            controller: "nginx-ingress-controller".to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        tokio::spawn(
            events::publish(runtime.client(), reporter, warnings_rx)
                .instrument(info_span!("events")),
        );

        let configurator = Configurator::new(
            manager,
            engine,
            static_params,
            Box::new(upstream_metrics),
        );
        let controller = Controller::new(index, configurator, warnings_tx);
        let mut controller = tokio::spawn(
            controller
                .run(
                    updates_rx,
                    children,
                    children_done,
                    quit_timeout,
                    runtime.shutdown_handle(),
                )
                .instrument(info_span!("controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background
        // tasks to complete before exiting. The controller only stops on its own when NGINX or
        // a supervised process exits unexpectedly.
        let run = runtime.run();
        tokio::pin!(run);
        tokio::select! {
            res = &mut run => {
                if res.is_err() {
                    bail!("Aborted");
                }
            }
            res = &mut controller => {
                match res {
                    Ok(Ok(())) => {
                        if run.await.is_err() {
                            bail!("Aborted");
                        }
                    }
                    Ok(Err(error)) => return Err(error.context("controller failed")),
                    Err(error) => bail!("controller panicked: {error}"),
                }
            }
        }

        Ok(())
    }
}

fn parse_key(flag: &str, value: Option<String>) -> Result<Option<ResourceKey>> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(Some(ResourceKey::new(ns, name)))
        }
        _ => bail!("{flag} must be namespace/name, got {value:?}"),
    }
}

/// Returns the path of a default server certificate already present in the secrets directory.
fn mounted_default_certificate(secrets_path: &Path) -> Option<String> {
    let path = secrets_path.join(DEFAULT_SERVER_SECRET_FILE);
    path.is_file().then(|| path.to_string_lossy().into_owned())
}

/// Watches the single object named by `key`.
fn by_name(key: &ResourceKey) -> watcher::Config {
    watcher::Config::default().fields(&format!(
        "metadata.namespace={},metadata.name={}",
        key.namespace, key.name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespaced_keys() {
        assert_eq!(
            parse_key("--nginx-configmaps", Some("nginx-ingress/nginx-config".to_string()))
                .expect("key must parse"),
            Some(ResourceKey::new("nginx-ingress", "nginx-config"))
        );
        assert_eq!(parse_key("--nginx-configmaps", None).expect("absent key"), None);
        for invalid in ["nginx-config", "/nginx-config", "a/b/c", "ns/"] {
            assert!(
                parse_key("--nginx-configmaps", Some(invalid.to_string())).is_err(),
                "{invalid}"
            );
        }
    }

    #[test]
    fn finds_a_mounted_default_certificate() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(mounted_default_certificate(dir.path()), None);

        let path = dir.path().join("default");
        std::fs::write(&path, "cert\nkey\n").expect("write certificate");
        assert_eq!(
            mounted_default_certificate(dir.path()),
            Some(path.to_string_lossy().into_owned())
        );
    }

    #[test]
    fn flags_have_documented_defaults() {
        let args = Args::try_parse_from(["nginx-ingress"]).expect("defaults must parse");
        assert_eq!(args.ingress_class, "nginx");
        assert!(args.enable_custom_resources);
        assert_eq!(args.nginx_reload_timeout, 60_000);
        assert_eq!(args.nginx_endpoints_reload_timeout, 15_000);
        assert_eq!(args.nginx_conf_path, PathBuf::from("/etc/nginx"));

        let args = Args::try_parse_from([
            "nginx-ingress",
            "--enable-custom-resources=false",
            "--watch-namespace=a",
            "--watch-namespace=b",
        ])
        .expect("flags must parse");
        assert!(!args.enable_custom_resources);
        assert_eq!(args.watch_namespaces, ["a", "b"]);
    }
}
