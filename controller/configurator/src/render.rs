use crate::{
    labels::{ServerMetric, UpstreamMetric},
    Error,
};
use nginx_ingress_configs as configs;
use nginx_ingress_core::{
    model::{
        v1::IngressNginxConfig,
        v2::{TransportServerConfig, VirtualServerConfig},
        UpstreamLabels,
    },
    ConfigParams, PodInfo, Resource, ResourceKey, SecretReference, StaticParams, Warnings,
};
use nginx_ingress_nginx::{Plane, UpstreamServer};
use nginx_ingress_templates::Engine;
use std::collections::BTreeMap;

/// What a resource is rendered with.
pub(crate) struct Context<'a> {
    pub engine: &'a Engine,
    pub params: &'a ConfigParams,
    pub static_params: &'a StaticParams,
    /// Maps a secret file name to the path the manager writes it to.
    pub secret_path: &'a dyn Fn(&str) -> String,
}

/// The model a file was rendered from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Model {
    Ingress(IngressNginxConfig),
    VirtualServer(VirtualServerConfig),
    TransportServer(TransportServerConfig),
}

/// An upstream and the servers the Plus API should hold for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LiveUpstream {
    pub name: String,
    pub plane: Plane,
    pub servers: Vec<UpstreamServer>,
}

/// A key-value entry that selects the weights of a two-way split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct KeyVal {
    pub zone: String,
    pub key: String,
    pub value: String,
}

/// One resource, rendered.
#[derive(Clone, Debug)]
pub(crate) struct Rendered {
    /// The enriched resource, kept to re-render it when global parameters change.
    pub resource: Resource,
    /// The file stem under `conf.d` or `stream-conf.d`.
    pub file: String,
    pub plane: Plane,
    pub bytes: Vec<u8>,
    pub model: Model,
    /// Secret files the configuration refers to, keyed by file name.
    pub secrets: BTreeMap<String, Vec<u8>>,
    /// The SNI host routed to this server by the TLS passthrough listener.
    pub passthrough_host: Option<String>,
    pub metrics: Vec<UpstreamMetric>,
}

/// Builds and renders a resource. Nothing is written.
///
/// Secrets are assigned the paths they will be written to, so the rendered file and the
/// secrets can be written together once rendering succeeded.
pub(crate) fn render(
    mut resource: Resource,
    ctx: &Context<'_>,
) -> Result<(Rendered, Warnings), Error> {
    let mut secrets = BTreeMap::new();
    match &mut resource {
        Resource::Ingress(ex) => attach_secrets(&mut ex.secret_refs, ctx, &mut secrets),
        Resource::MergeableIngresses(m) => {
            attach_secrets(&mut m.master.secret_refs, ctx, &mut secrets);
            for minion in &mut m.minions {
                attach_secrets(&mut minion.secret_refs, ctx, &mut secrets);
            }
        }
        Resource::VirtualServer(ex) => attach_secrets(&mut ex.secret_refs, ctx, &mut secrets),
        Resource::TransportServer(_) => {}
    }

    let r = resource.resource_ref();
    let template_error = |source| Error::Template {
        resource: r.clone(),
        source,
    };
    let (model, bytes, warnings) = match &resource {
        Resource::Ingress(ex) => {
            let (config, warnings) =
                configs::generate_ingress_config(ex, ctx.params, ctx.static_params);
            let bytes = ctx.engine.execute_ingress(&config).map_err(template_error)?;
            (Model::Ingress(config), bytes, warnings)
        }
        Resource::MergeableIngresses(m) => {
            let (config, warnings) =
                configs::generate_mergeable_ingress_config(m, ctx.params, ctx.static_params);
            let bytes = ctx.engine.execute_ingress(&config).map_err(template_error)?;
            (Model::Ingress(config), bytes, warnings)
        }
        Resource::VirtualServer(ex) => {
            let (config, warnings) =
                configs::generate_virtual_server_config(ex, ctx.params, ctx.static_params);
            let bytes = ctx
                .engine
                .execute_virtual_server(&config)
                .map_err(template_error)?;
            (Model::VirtualServer(config), bytes, warnings)
        }
        Resource::TransportServer(ex) => {
            let (config, warnings) =
                configs::generate_transport_server_config(ex, ctx.params, ctx.static_params);
            let bytes = ctx
                .engine
                .execute_transport_server(&config)
                .map_err(template_error)?;
            (Model::TransportServer(config), bytes, warnings)
        }
    };

    let passthrough_host = match (&resource, &model) {
        (Resource::TransportServer(ex), Model::TransportServer(config))
            if config.server.tls_passthrough =>
        {
            ex.transport_server.spec.host.clone()
        }
        _ => None,
    };
    let plane = match &model {
        Model::TransportServer(_) => Plane::Stream,
        _ => Plane::Http,
    };
    let metrics = model.metrics(pods_by_ip(&resource));

    let rendered = Rendered {
        file: r.key.file_name(r.kind),
        resource,
        plane,
        bytes,
        model,
        secrets,
        passthrough_host,
        metrics,
    };
    Ok((rendered, warnings))
}

fn attach_secrets(
    refs: &mut BTreeMap<String, SecretReference>,
    ctx: &Context<'_>,
    files: &mut BTreeMap<String, Vec<u8>>,
) {
    for (name, secret) in refs.iter_mut() {
        if !secret.is_valid() || secret.content.is_empty() {
            continue;
        }
        let file = ResourceKey::parse(name, "").secret_file_name();
        secret.path = (ctx.secret_path)(&file);
        files.insert(file, secret.content.clone());
    }
}

fn pods_by_ip(resource: &Resource) -> BTreeMap<String, PodInfo> {
    match resource {
        Resource::Ingress(ex) => ex.pods_by_ip.clone(),
        Resource::MergeableIngresses(m) => {
            let mut pods = m.master.pods_by_ip.clone();
            for minion in &m.minions {
                pods.extend(minion.pods_by_ip.clone());
            }
            pods
        }
        Resource::VirtualServer(ex) => ex.pods_by_ip.clone(),
        Resource::TransportServer(ex) => ex.pods_by_ip.clone(),
    }
}

// === impl Model ===

impl Model {
    /// The model with every upstream emptied. Two renderings whose skeletons are equal differ
    /// at most in upstream servers.
    pub(crate) fn skeleton(&self) -> Self {
        let mut model = self.clone();
        match &mut model {
            Self::Ingress(config) => {
                for upstream in &mut config.upstreams {
                    upstream.servers.clear();
                }
            }
            Self::VirtualServer(config) => {
                for upstream in &mut config.upstreams {
                    upstream.servers.clear();
                    upstream.backup_servers.clear();
                }
            }
            Self::TransportServer(config) => {
                for upstream in &mut config.upstreams {
                    upstream.servers.clear();
                }
            }
        }
        model
    }

    /// The upstreams as the Plus API represents them, or `None` when an upstream cannot be
    /// changed without a reload: re-resolved DNS names and backup servers are only
    /// configured by reloading.
    pub(crate) fn live_upstreams(&self) -> Option<Vec<LiveUpstream>> {
        match self {
            Self::Ingress(config) => config
                .upstreams
                .iter()
                .map(|u| {
                    if u.resolve || u.servers.iter().any(|s| s.resolve) {
                        return None;
                    }
                    let servers = u
                        .servers
                        .iter()
                        .map(|s| UpstreamServer {
                            max_fails: Some(s.max_fails),
                            max_conns: Some(s.max_conns),
                            fail_timeout: s.fail_timeout.clone(),
                            slow_start: s.slow_start.clone(),
                            ..UpstreamServer::new(s.address.clone())
                        })
                        .collect();
                    Some(LiveUpstream {
                        name: u.name.clone(),
                        plane: Plane::Http,
                        servers,
                    })
                })
                .collect(),
            Self::VirtualServer(config) => config
                .upstreams
                .iter()
                .map(|u| {
                    if u.resolve || !u.backup_servers.is_empty() {
                        return None;
                    }
                    let servers = u
                        .servers
                        .iter()
                        .map(|s| UpstreamServer {
                            max_fails: Some(u.max_fails),
                            max_conns: Some(u.max_conns),
                            fail_timeout: u.fail_timeout.clone(),
                            slow_start: u.slow_start.clone(),
                            ..UpstreamServer::new(s.address.clone())
                        })
                        .collect();
                    Some(LiveUpstream {
                        name: u.name.clone(),
                        plane: Plane::Http,
                        servers,
                    })
                })
                .collect(),
            Self::TransportServer(config) => config
                .upstreams
                .iter()
                .map(|u| {
                    if u.resolve {
                        return None;
                    }
                    let servers = u
                        .servers
                        .iter()
                        .map(|s| UpstreamServer {
                            max_fails: Some(s.max_fails),
                            max_conns: Some(s.max_conns),
                            fail_timeout: s.fail_timeout.clone(),
                            ..UpstreamServer::new(s.address.clone())
                        })
                        .collect();
                    Some(LiveUpstream {
                        name: u.name.clone(),
                        plane: Plane::Stream,
                        servers,
                    })
                })
                .collect(),
        }
    }

    /// The key-value entries of two-way splits, set to the configured weights.
    pub(crate) fn key_vals(&self) -> Vec<KeyVal> {
        match self {
            Self::VirtualServer(config) => config
                .two_way_split_clients
                .iter()
                .map(|split| KeyVal {
                    zone: split.zone_name.clone(),
                    key: split.key.clone(),
                    value: split.weight.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn metrics(&self, pods_by_ip: BTreeMap<String, PodInfo>) -> Vec<UpstreamMetric> {
        let metric = |name: &str, labels: UpstreamLabels, addresses: Vec<&str>| UpstreamMetric {
            name: name.to_string(),
            labels,
            servers: addresses
                .into_iter()
                .map(|a| ServerMetric::new(a, &pods_by_ip))
                .collect(),
        };
        match self {
            Self::Ingress(config) => config
                .upstreams
                .iter()
                .map(|u| {
                    let addresses = u.servers.iter().map(|s| s.address.as_str()).collect();
                    metric(&u.name, u.upstream_labels.clone(), addresses)
                })
                .collect(),
            Self::VirtualServer(config) => config
                .upstreams
                .iter()
                .map(|u| {
                    let addresses = u.servers.iter().map(|s| s.address.as_str()).collect();
                    metric(&u.name, u.upstream_labels.clone(), addresses)
                })
                .collect(),
            Self::TransportServer(config) => config
                .upstreams
                .iter()
                .map(|u| {
                    let addresses = u.servers.iter().map(|s| s.address.as_str()).collect();
                    metric(&u.name, u.upstream_labels.clone(), addresses)
                })
                .collect(),
        }
    }
}
