use crate::{
    configurator::{self, Configurator},
    core::{Resource, ResourceRef, Warnings},
    index::{SharedIndex, Update},
    nginx::{
        supervisor::{self, Children},
        Done, Exit, Manager,
    },
};
use anyhow::{bail, Context, Result};
use std::{collections::BTreeSet, time::Duration};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Applies index updates to the NGINX configuration, one at a time.
pub struct Controller<M> {
    index: SharedIndex,
    configurator: Configurator<M>,
    warnings: UnboundedSender<Warnings>,
    nginx: Option<Done>,
}

// === impl Controller ===

impl<M: Manager> Controller<M> {
    pub fn new(
        index: SharedIndex,
        configurator: Configurator<M>,
        warnings: UnboundedSender<Warnings>,
    ) -> Self {
        Self {
            index,
            configurator,
            warnings,
            nginx: None,
        }
    }

    /// Processes updates until shutdown.
    ///
    /// NGINX and the `children` are quit when `shutdown` is signaled. An unexpected exit of
    /// NGINX or of a child is fatal.
    pub async fn run(
        mut self,
        mut updates: UnboundedReceiver<Update>,
        mut children: Children,
        children_done: Vec<Done>,
        quit_timeout: Duration,
        shutdown: drain::Watch,
    ) -> Result<()> {
        let child_exit = supervisor::first_exit(children_done);
        tokio::pin!(child_exit);
        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                handle = &mut shutdown => {
                    tracing::info!("Shutting down");
                    handle
                        .release_after(self.quit(&mut children, quit_timeout))
                        .await;
                    return Ok(());
                }

                exit = &mut child_exit => bail!("{exit}"),

                exit = nginx_exit(self.nginx.clone()) => bail!("{exit}"),

                update = updates.recv() => match update {
                    Some(update) => {
                        let mut batch = vec![update];
                        while let Ok(update) = updates.try_recv() {
                            batch.push(update);
                        }
                        self.process(batch).await?;
                    }
                    None => {
                        tracing::debug!("Index updates closed");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Applies a batch of updates, in order. Consecutive endpoint updates are applied
    /// together.
    ///
    /// Until the index is synced only [`Update::Synced`] is acted on; the initial
    /// configuration covers every earlier update.
    pub(crate) async fn process(&mut self, batch: Vec<Update>) -> Result<()> {
        let mut endpoints = BTreeSet::new();
        for update in batch {
            if self.nginx.is_none() {
                if update == Update::Synced {
                    self.initialize().await?;
                }
                continue;
            }

            if let Update::Endpoints(r) = update {
                endpoints.insert(r);
                continue;
            }
            if !endpoints.is_empty() {
                self.update_endpoints(std::mem::take(&mut endpoints)).await;
            }

            match update {
                Update::Reconcile(r) => self.reconcile(r).await,
                Update::ConfigMap => self.update_config_map().await,
                Update::GlobalConfiguration => self.update_transport_servers().await,
                Update::SpecialSecrets => self.update_special_secrets().await,
                Update::Synced | Update::Endpoints(_) => {}
            }
        }
        if !endpoints.is_empty() {
            self.update_endpoints(endpoints).await;
        }
        Ok(())
    }

    /// Writes the configuration of everything indexed so far and starts NGINX with it.
    async fn initialize(&mut self) -> Result<()> {
        tracing::info!("Writing the initial configuration");

        let config_map = self.index.read().config_map().cloned();
        if config_map.is_none() {
            if let Some(key) = &self.index.read().cluster_info().config_map {
                tracing::warn!(config_map = %key, "ConfigMap not found; using defaults");
            }
        }
        let warnings = self
            .configurator
            .update_config_map(config_map.as_ref())
            .await
            .context("failed to apply the ConfigMap")?;
        self.publish(warnings);

        let special = self.index.read().special_secrets();
        let warnings = self
            .configurator
            .update_special_secrets(special.wildcard.as_ref(), special.default_server.as_ref())
            .await
            .context("failed to write the default secrets")?;
        self.publish(warnings);

        let refs = self.index.read().resources();
        let (resources, _, warnings) = self.resolve_all(refs);
        self.publish(warnings);
        let count = resources.len();
        let warnings = self
            .configurator
            .update_resources(resources, Vec::new())
            .await
            .context("failed to write the initial configuration")?;
        self.publish(warnings);

        let done = self.configurator.start().await.context("failed to start NGINX")?;
        tracing::info!(resources = count, "NGINX started");
        self.nginx = Some(done);
        Ok(())
    }

    async fn reconcile(&mut self, r: ResourceRef) {
        let (resource, warnings) = self.index.read().resolve(&r);
        self.publish(warnings);
        let result = match resource {
            Some(resource) => self.configurator.add_or_update(resource).await,
            None => self.configurator.delete(&r).await,
        };
        self.complete(result);
    }

    async fn update_endpoints(&mut self, refs: BTreeSet<ResourceRef>) {
        let (resources, deleted, warnings) = self.resolve_all(refs);
        self.publish(warnings);
        for r in deleted {
            let result = self.configurator.delete(&r).await;
            self.complete(result);
        }
        let result = self.configurator.update_endpoints(resources).await;
        self.complete(result);
    }

    async fn update_config_map(&mut self) {
        let config_map = self.index.read().config_map().cloned();
        let result = self.configurator.update_config_map(config_map.as_ref()).await;
        self.complete(result);
    }

    /// Re-renders every TransportServer: the GlobalConfiguration defines their listeners.
    async fn update_transport_servers(&mut self) {
        let refs = self.index.read().transport_servers().collect::<Vec<_>>();
        let (resources, deleted, warnings) = self.resolve_all(refs);
        self.publish(warnings);
        let result = self.configurator.update_resources(resources, deleted).await;
        self.complete(result);
    }

    async fn update_special_secrets(&mut self) {
        let special = self.index.read().special_secrets();
        let result = self
            .configurator
            .update_special_secrets(special.wildcard.as_ref(), special.default_server.as_ref())
            .await;
        self.complete(result);
    }

    async fn quit(&mut self, children: &mut Children, timeout: Duration) {
        if let Err(error) = self.configurator.quit().await {
            tracing::warn!(%error, "Failed to quit NGINX");
        }
        for exit in children.quit(timeout).await {
            tracing::debug!(%exit, "Child stopped");
        }
    }

    fn resolve_all(
        &self,
        refs: impl IntoIterator<Item = ResourceRef>,
    ) -> (Vec<Resource>, Vec<ResourceRef>, Warnings) {
        let index = self.index.read();
        let mut resources = Vec::new();
        let mut deleted = Vec::new();
        let mut warnings = Warnings::default();
        for r in refs {
            let (resource, w) = index.resolve(&r);
            warnings.extend(w);
            match resource {
                Some(resource) => resources.push(resource),
                None => deleted.push(r),
            }
        }
        (resources, deleted, warnings)
    }

    fn complete(&self, result: configurator::Result<Warnings>) {
        match result {
            Ok(warnings) => self.publish(warnings),
            Err(error) => match &error {
                configurator::Error::Template { resource, .. } => {
                    let mut warnings = Warnings::default();
                    warnings.add(resource.kind, &resource.key, error.to_string());
                    self.publish(warnings);
                }
                _ => tracing::error!(%error, "Failed to apply configuration"),
            },
        }
    }

    fn publish(&self, warnings: Warnings) {
        if warnings.is_empty() {
            return;
        }
        for (r, msgs) in warnings.iter() {
            for msg in msgs {
                tracing::warn!(kind = %r.kind, resource = %r.key, "{msg}");
            }
        }
        let _ = self.warnings.send(warnings);
    }
}

async fn nginx_exit(done: Option<Done>) -> Exit {
    let Some(mut done) = done else {
        return futures::future::pending().await;
    };
    let exit = done.wait_for(Option::is_some).await.ok().and_then(|e| e.clone());
    exit.unwrap_or_else(|| Exit {
        name: "nginx".to_string(),
        code: None,
        error: Some("exit status lost".to_string()),
    })
}

#[cfg(test)]
mod tests;
