use crate::{
    labels::{self, LabelUpdater, UpstreamMetric},
    render::{self, Context, KeyVal, LiveUpstream, Rendered},
    Error, Result,
};
use nginx_ingress_configs::{self as configs, PassthroughHosts};
use nginx_ingress_core::{
    ConfigParams, Kind, Resource, ResourceKey, ResourceRef, SecretReference, StaticParams,
    Warnings,
};
use nginx_ingress_k8s_api::ConfigMap;
use nginx_ingress_nginx::{Done, Manager, Plane, ReloadKind, SECRET_FILE_MODE};
use nginx_ingress_templates::{Engine, Family};
use std::collections::{BTreeMap, BTreeSet};

/// The secret file the wildcard certificate is written to.
pub const WILDCARD_SECRET_FILE: &str = "wildcard";

/// The secret file the default server certificate is written to, or mounted at.
pub const DEFAULT_SERVER_SECRET_FILE: &str = "default";

/// Owns the NGINX configuration and applies every change to it.
///
/// Operations run one at a time; each returns once NGINX serves the result, or immediately
/// while reloads are disabled.
pub struct Configurator<M> {
    manager: M,
    engine: Engine,
    params: ConfigParams,
    static_params: StaticParams,
    labels: Box<dyn LabelUpdater>,

    entries: BTreeMap<ResourceRef, Entry>,
    secrets: BTreeMap<String, SecretFile>,
    special_secrets: BTreeMap<&'static str, Vec<u8>>,
    main: Option<Vec<u8>>,
    passthrough_hosts: Option<Vec<u8>>,
    /// Label changes of batches whose reload failed, published with the next served batch.
    unserved_labels: Vec<(Vec<UpstreamMetric>, Vec<UpstreamMetric>)>,

    reloads_enabled: bool,
    writes: u64,
}

/// A rendered resource.
#[derive(Debug)]
struct Entry {
    rendered: Rendered,
    /// Unset while the file on disk lags behind servers applied through the Plus API.
    on_disk: bool,
    /// Orders writes; a later server takes a contested passthrough host.
    write: u64,
    /// Set once a reload including this rendering succeeded.
    served: bool,
}

#[derive(Debug, Default)]
struct SecretFile {
    content: Vec<u8>,
    owners: BTreeSet<ResourceRef>,
}

/// Changes staged by one operation, completed by a single reload.
#[derive(Debug, Default)]
struct Batch {
    warnings: Warnings,
    changed: bool,
    /// Resources whose rendering NGINX serves once the batch reloads.
    staged: Vec<ResourceRef>,
    /// Label sets replaced by the batch, applied once NGINX serves the batch.
    labels: Vec<(Vec<UpstreamMetric>, Vec<UpstreamMetric>)>,
    key_vals: Vec<KeyVal>,
}

// === impl Configurator ===

impl<M: Manager> Configurator<M> {
    pub fn new(
        manager: M,
        engine: Engine,
        static_params: StaticParams,
        labels: Box<dyn LabelUpdater>,
    ) -> Self {
        Self {
            manager,
            engine,
            params: ConfigParams::default(),
            static_params,
            labels,
            entries: BTreeMap::new(),
            secrets: BTreeMap::new(),
            special_secrets: BTreeMap::new(),
            main: None,
            passthrough_hosts: None,
            unserved_labels: Vec::new(),
            reloads_enabled: false,
            writes: 0,
        }
    }

    pub fn params(&self) -> &ConfigParams {
        &self.params
    }

    pub fn static_params(&self) -> &StaticParams {
        &self.static_params
    }

    /// Whether a configuration file is currently rendered for `r`.
    pub fn contains(&self, r: &ResourceRef) -> bool {
        self.entries.contains_key(r)
    }

    pub fn reloads_enabled(&self) -> bool {
        self.reloads_enabled
    }

    /// Gates reloads. While disabled, changes are only written to disk.
    pub fn set_reloads_enabled(&mut self, enabled: bool) {
        self.reloads_enabled = enabled;
    }

    /// Starts NGINX with everything written so far and enables reloads.
    pub async fn start(&mut self) -> Result<Done> {
        self.write_main()?;
        self.flush_pending()?;
        let done = self.manager.start().await?;
        self.reloads_enabled = true;

        let key_vals = self
            .entries
            .values()
            .flat_map(|e| e.rendered.model.key_vals())
            .collect::<Vec<_>>();
        self.apply_key_vals(&key_vals).await;
        Ok(done)
    }

    /// Stops NGINX gracefully.
    pub async fn quit(&mut self) -> Result<()> {
        self.reloads_enabled = false;
        self.manager.quit().await?;
        Ok(())
    }

    /// Configures one resource.
    ///
    /// A resource that renders to the bytes already written causes neither a write nor a
    /// reload. A template failure leaves the previous configuration of the resource in place.
    pub async fn add_or_update(&mut self, resource: Resource) -> Result<Warnings> {
        let mut batch = Batch::default();
        {
            let _span = tracing::info_span!("configure", resource = %resource.resource_ref())
                .entered();
            self.stage_upsert(resource, &mut batch)?;
        }
        self.finish(batch, ReloadKind::Config).await
    }

    /// Removes the configuration of a resource. Unknown resources are ignored.
    pub async fn delete(&mut self, r: &ResourceRef) -> Result<Warnings> {
        let mut batch = Batch::default();
        self.stage_delete(r, &mut batch)?;
        self.finish(batch, ReloadKind::Config).await
    }

    /// Applies a set of changes with a single reload.
    ///
    /// Used whenever one event affects many resources: policies, the GlobalConfiguration and
    /// the initial configuration. Resources that fail to render are reported as warnings and
    /// keep their previous configuration.
    pub async fn update_resources(
        &mut self,
        resources: Vec<Resource>,
        deleted: Vec<ResourceRef>,
    ) -> Result<Warnings> {
        let mut batch = Batch::default();
        for r in &deleted {
            self.stage_delete(r, &mut batch)?;
        }
        for resource in resources {
            self.stage_upsert_or_warn(resource, &mut batch)?;
        }
        self.finish(batch, ReloadKind::Config).await
    }

    /// Applies endpoint changes.
    ///
    /// With NGINX Plus, a resource whose configuration differs only in upstream servers is
    /// updated through the Plus API, without a write or a reload. Its file is brought up to
    /// date before the next reload. If the API fails, every remaining change is written and
    /// applied by one reload.
    pub async fn update_endpoints(&mut self, resources: Vec<Resource>) -> Result<Warnings> {
        let mut batch = Batch::default();
        let mut fallback = false;
        for resource in resources {
            let r = resource.resource_ref();
            let (rendered, warnings) = match self.render(resource) {
                Ok(rendered) => rendered,
                Err(error) => {
                    tracing::error!(resource = %r, %error, "Failed to render configuration");
                    batch.warnings.add(r.kind, &r.key, error.to_string());
                    continue;
                }
            };
            batch.warnings.extend(warnings);

            if let Some(entry) = self.entries.get_mut(&r) {
                if entry.rendered.bytes == rendered.bytes {
                    entry.rendered.resource = rendered.resource;
                    if !entry.served {
                        batch.changed = true;
                        batch.staged.push(r);
                    }
                    continue;
                }
            }

            if !fallback {
                if let Some(live) = self.live_update_candidates(&r, &rendered) {
                    match self.apply_live(&live).await {
                        Ok(()) => {
                            tracing::debug!(resource = %r, "Updated upstream servers");
                            self.apply_pending(r, rendered);
                            continue;
                        }
                        Err(error) if error.is_fallback() => {
                            tracing::warn!(resource = %r, %error, "Falling back to a reload");
                            fallback = true;
                        }
                        Err(error) => return Err(error.into()),
                    }
                }
            }

            self.stage_rendered(r, rendered, &mut batch)?;
        }
        self.finish(batch, ReloadKind::Endpoints).await
    }

    /// Applies a new ConfigMap, or the defaults when there is none, and re-renders everything.
    ///
    /// Template overrides that fail to parse are reported as warnings and the previous
    /// template stays active.
    pub async fn update_config_map(&mut self, cm: Option<&ConfigMap>) -> Result<Warnings> {
        let (params, mut warnings) = match cm {
            Some(cm) => configs::parse_config_map(cm, self.static_params.nginx_plus),
            None => (ConfigParams::default(), Warnings::default()),
        };
        let key = cm.map(ResourceKey::of).unwrap_or_default();
        self.update_templates(&params, &key, &mut warnings);

        if !params.ssl_dhparam_file.is_empty()
            && params.ssl_dhparam_file != self.params.ssl_dhparam_file
        {
            self.manager
                .write_dhparam(params.ssl_dhparam_file.as_bytes())?;
        }
        self.params = params;

        let refreshed = self.refresh().await?;
        warnings.extend(refreshed);
        Ok(warnings)
    }

    /// Writes the wildcard and default server certificates and re-renders everything that
    /// may use them. A missing or invalid secret removes the file written for it.
    ///
    /// A default server certificate that was not written here, such as one mounted into the
    /// secrets directory, stays in use while no default server secret is given.
    pub async fn update_special_secrets(
        &mut self,
        wildcard: Option<&SecretReference>,
        default_server: Option<&SecretReference>,
    ) -> Result<Warnings> {
        let wildcard = self.write_special_secret(WILDCARD_SECRET_FILE, wildcard)?;
        let written = self.special_secrets.contains_key(DEFAULT_SERVER_SECRET_FILE);
        let default_server = match self.write_special_secret(DEFAULT_SERVER_SECRET_FILE, default_server)? {
            None if !written => self.static_params.default_tls_secret.take(),
            path => path,
        };
        self.static_params.wildcard_tls_secret = wildcard;
        self.static_params.default_tls_secret = default_server;
        self.refresh().await
    }

    /// Rewrites the main configuration and every resource, then reloads once.
    async fn refresh(&mut self) -> Result<Warnings> {
        let mut batch = Batch::default();
        batch.changed = self.write_main()?;
        let resources = self
            .entries
            .values()
            .map(|e| e.rendered.resource.clone())
            .collect::<Vec<_>>();
        for resource in resources {
            self.stage_upsert_or_warn(resource, &mut batch)?;
        }
        self.finish(batch, ReloadKind::Config).await
    }

    fn render(&self, resource: Resource) -> Result<(Rendered, Warnings)> {
        let secret_path = |name: &str| self.manager.secret_path(name);
        let ctx = Context {
            engine: &self.engine,
            params: &self.params,
            static_params: &self.static_params,
            secret_path: &secret_path,
        };
        render::render(resource, &ctx)
    }

    fn stage_upsert(&mut self, resource: Resource, batch: &mut Batch) -> Result<()> {
        let r = resource.resource_ref();
        let (rendered, warnings) = self.render(resource)?;
        batch.warnings.extend(warnings);

        if let Some(entry) = self.entries.get_mut(&r) {
            if entry.rendered.bytes == rendered.bytes
                && entry.rendered.secrets == rendered.secrets
            {
                tracing::debug!(resource = %r, "Configuration unchanged");
                if !entry.on_disk {
                    write_file(&mut self.manager, &rendered)?;
                    entry.on_disk = true;
                }
                if !entry.served {
                    // A failed reload left this rendering on disk but not in NGINX.
                    batch.changed = true;
                    batch.key_vals.extend(rendered.model.key_vals());
                    batch.staged.push(r);
                }
                entry.rendered.resource = rendered.resource;
                return Ok(());
            }
        }

        self.stage_rendered(r, rendered, batch)
    }

    /// Stages a resource, reporting template failures as warnings on the resource.
    fn stage_upsert_or_warn(&mut self, resource: Resource, batch: &mut Batch) -> Result<()> {
        let r = resource.resource_ref();
        match self.stage_upsert(resource, batch) {
            Err(error @ Error::Template { .. }) => {
                tracing::error!(resource = %r, %error, "Failed to render configuration");
                batch.warnings.add(r.kind, &r.key, error.to_string());
                Ok(())
            }
            result => result,
        }
    }

    /// Writes a rendered resource and its secrets.
    fn stage_rendered(&mut self, r: ResourceRef, rendered: Rendered, batch: &mut Batch) -> Result<()> {
        self.update_secrets(&r, &rendered.secrets)?;
        write_file(&mut self.manager, &rendered)?;
        tracing::debug!(resource = %r, file = %rendered.file, "Wrote configuration");

        self.writes += 1;
        batch.changed = true;
        batch.key_vals.extend(rendered.model.key_vals());
        let new_labels = rendered.metrics.clone();
        let entry = Entry {
            rendered,
            on_disk: true,
            write: self.writes,
            served: false,
        };
        batch.staged.push(r.clone());
        let old_labels = self
            .entries
            .insert(r, entry)
            .map(|e| e.rendered.metrics)
            .unwrap_or_default();
        batch.labels.push((old_labels, new_labels));
        Ok(())
    }

    fn stage_delete(&mut self, r: &ResourceRef, batch: &mut Batch) -> Result<()> {
        let Some(entry) = self.entries.remove(r) else {
            tracing::debug!(resource = %r, "Nothing to delete");
            return Ok(());
        };
        match entry.rendered.plane {
            Plane::Http => self.manager.delete_config(&entry.rendered.file)?,
            Plane::Stream => self.manager.delete_stream_config(&entry.rendered.file)?,
        }
        self.update_secrets(r, &BTreeMap::new())?;
        tracing::debug!(resource = %r, "Deleted configuration");

        batch.changed = true;
        batch.labels.push((entry.rendered.metrics, Vec::new()));
        Ok(())
    }

    /// Completes a batch: rewrites the passthrough map, reloads, and publishes what NGINX
    /// now serves.
    async fn finish(&mut self, mut batch: Batch, kind: ReloadKind) -> Result<Warnings> {
        if !batch.changed {
            return Ok(batch.warnings);
        }
        self.update_passthrough_hosts(&batch.staged, &mut batch.warnings)?;
        if let Err(error) = self.reload(kind).await {
            self.unserved_labels.append(&mut batch.labels);
            return Err(error);
        }

        for r in &batch.staged {
            if let Some(entry) = self.entries.get_mut(r) {
                entry.served = true;
            }
        }
        let unserved = std::mem::take(&mut self.unserved_labels);
        for (old, new) in unserved.iter().chain(&batch.labels) {
            labels::sync(self.labels.as_mut(), old, new);
        }
        self.apply_key_vals(&batch.key_vals).await;
        Ok(batch.warnings)
    }

    async fn reload(&mut self, kind: ReloadKind) -> Result<()> {
        if !self.reloads_enabled {
            tracing::debug!(?kind, "Reloads are disabled; skipping reload");
            return Ok(());
        }
        self.flush_pending()?;
        self.manager.reload(kind).await?;
        Ok(())
    }

    /// Writes files whose servers were last changed through the Plus API.
    fn flush_pending(&mut self) -> Result<()> {
        for entry in self.entries.values_mut().filter(|e| !e.on_disk) {
            write_file(&mut self.manager, &entry.rendered)?;
            entry.on_disk = true;
        }
        Ok(())
    }

    /// Returns the upstreams to update through the Plus API when `rendered` differs from
    /// the current configuration of `r` in upstream servers only.
    fn live_update_candidates(&self, r: &ResourceRef, rendered: &Rendered) -> Option<Vec<LiveUpstream>> {
        if !self.static_params.nginx_plus || !self.reloads_enabled {
            return None;
        }
        let entry = self.entries.get(r).filter(|e| e.served)?;
        if entry.rendered.secrets != rendered.secrets
            || entry.rendered.model.skeleton() != rendered.model.skeleton()
        {
            return None;
        }
        let old = entry.rendered.model.live_upstreams()?;
        let new = rendered.model.live_upstreams()?;
        Some(new.into_iter().filter(|u| !old.contains(u)).collect())
    }

    async fn apply_live(&mut self, upstreams: &[LiveUpstream]) -> nginx_ingress_nginx::Result<()> {
        for upstream in upstreams {
            match upstream.plane {
                Plane::Http => {
                    self.manager
                        .update_servers(&upstream.name, &upstream.servers)
                        .await?
                }
                Plane::Stream => {
                    self.manager
                        .update_stream_servers(&upstream.name, &upstream.servers)
                        .await?
                }
            }
        }
        Ok(())
    }

    /// Records a configuration NGINX already serves through the Plus API; the file is written
    /// before the next reload.
    fn apply_pending(&mut self, r: ResourceRef, rendered: Rendered) {
        let new_labels = rendered.metrics.clone();
        let write = self.entries.get(&r).map(|e| e.write).unwrap_or_default();
        let old = self.entries.insert(
            r,
            Entry {
                rendered,
                on_disk: false,
                write,
                served: true,
            },
        );
        let old_labels = old.map(|e| e.rendered.metrics).unwrap_or_default();
        labels::sync(self.labels.as_mut(), &old_labels, &new_labels);
    }

    async fn apply_key_vals(&mut self, key_vals: &[KeyVal]) {
        if !self.static_params.nginx_plus || !self.reloads_enabled {
            return;
        }
        for kv in key_vals {
            if let Err(error) = self.manager.upsert_key_val(&kv.zone, &kv.key, &kv.value).await {
                tracing::warn!(zone = %kv.zone, key = %kv.key, %error, "Failed to update key-value");
            }
        }
    }

    /// Points `r` at `secrets`, writing changed files and deleting files nothing refers to.
    fn update_secrets(&mut self, r: &ResourceRef, secrets: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        for (name, content) in secrets {
            let file = self.secrets.entry(name.clone()).or_default();
            if file.owners.is_empty() || file.content != *content {
                self.manager.write_secret(name, content, SECRET_FILE_MODE)?;
                file.content = content.clone();
            }
            file.owners.insert(r.clone());
        }

        let released = self
            .secrets
            .iter()
            .filter(|(name, file)| file.owners.contains(r) && !secrets.contains_key(*name))
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        for name in released {
            if let Some(file) = self.secrets.get_mut(&name) {
                file.owners.remove(r);
                if file.owners.is_empty() {
                    self.secrets.remove(&name);
                    self.manager.delete_secret(&name)?;
                }
            }
        }
        Ok(())
    }

    fn write_special_secret(
        &mut self,
        name: &'static str,
        secret: Option<&SecretReference>,
    ) -> Result<Option<String>> {
        match secret {
            Some(secret) if secret.is_valid() && !secret.content.is_empty() => {
                if self.special_secrets.get(name) != Some(&secret.content) {
                    self.manager
                        .write_secret(name, &secret.content, SECRET_FILE_MODE)?;
                    self.special_secrets.insert(name, secret.content.clone());
                }
                Ok(Some(self.manager.secret_path(name)))
            }
            secret => {
                if let Some(error) = secret.and_then(|s| s.error.as_deref()) {
                    tracing::warn!(secret = name, %error, "Ignoring invalid secret");
                }
                if self.special_secrets.remove(name).is_some() {
                    self.manager.delete_secret(name)?;
                }
                Ok(None)
            }
        }
    }

    /// Renders `nginx.conf`, writing it when it changed.
    fn write_main(&mut self) -> Result<bool> {
        let config = configs::generate_main_config(&self.params, &self.static_params);
        let bytes = self
            .engine
            .execute_main(&config)
            .map_err(Error::MainTemplate)?;
        if self.main.as_ref() == Some(&bytes) {
            return Ok(false);
        }
        self.manager.write_main(&bytes)?;
        tracing::debug!("Wrote main configuration");
        self.main = Some(bytes);
        Ok(true)
    }

    fn update_templates(&mut self, params: &ConfigParams, key: &ResourceKey, warnings: &mut Warnings) {
        let families = [
            (Family::Main, &params.main_template, &self.params.main_template),
            (Family::Ingress, &params.ingress_template, &self.params.ingress_template),
            (
                Family::VirtualServer,
                &params.virtual_server_template,
                &self.params.virtual_server_template,
            ),
            (
                Family::TransportServer,
                &params.transport_server_template,
                &self.params.transport_server_template,
            ),
        ];
        for (family, source, current) in families {
            if source == current {
                continue;
            }
            let result = match source {
                Some(source) => self.engine.update(family, source.clone()),
                None => self.engine.revert(family),
            };
            if let Err(error) = result {
                tracing::warn!(%family, %error, "Keeping the current template");
                warnings.add(Kind::ConfigMap, key, error.to_string());
            }
        }
    }

    /// Rebuilds the TLS passthrough host map from every passthrough TransportServer, in the
    /// order their files were written. Only conflicts involving a `staged` server are reported.
    fn update_passthrough_hosts(&mut self, staged: &[ResourceRef], warnings: &mut Warnings) -> Result<()> {
        if !self.static_params.tls_passthrough {
            return Ok(());
        }
        let mut servers = self
            .entries
            .iter()
            .filter_map(|(r, e)| Some((e.write, &r.key, e.rendered.passthrough_host.as_deref()?)))
            .collect::<Vec<_>>();
        servers.sort_by_key(|(write, _, _)| *write);
        let staged = staged
            .iter()
            .filter(|r| r.kind == Kind::TransportServer)
            .map(|r| &r.key)
            .collect::<BTreeSet<_>>();
        let (hosts, conflicts) = PassthroughHosts::build_reporting(
            servers.into_iter().map(|(_, key, host)| (key, host)),
            |key| staged.contains(key),
        );
        warnings.extend(conflicts);

        let bytes = hosts.render();
        if self.passthrough_hosts.as_ref() != Some(&bytes) {
            self.manager.write_passthrough_hosts(&bytes)?;
            tracing::debug!(hosts = hosts.len(), "Wrote TLS passthrough hosts");
            self.passthrough_hosts = Some(bytes);
        }
        Ok(())
    }
}

fn write_file<M: Manager>(manager: &mut M, rendered: &Rendered) -> nginx_ingress_nginx::Result<()> {
    match rendered.plane {
        Plane::Http => manager.write_config(&rendered.file, &rendered.bytes),
        Plane::Stream => manager.write_stream_config(&rendered.file, &rendered.bytes),
    }
}
