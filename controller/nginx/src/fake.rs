//! In-memory stand-ins for NGINX, used by tests.

use crate::{
    plus::{self, Plane, PlusApi, UpstreamServer},
    Done, Error, Manager, ReloadKind, Result,
};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::watch;

/// Records Plus API calls against an in-memory set of upstreams.
#[derive(Clone, Debug, Default)]
pub struct FakePlusApi(Arc<Mutex<PlusState>>);

#[derive(Debug, Default)]
struct PlusState {
    upstreams: BTreeMap<(String, String), Vec<UpstreamServer>>,
    key_vals: BTreeMap<String, BTreeMap<String, String>>,
    calls: Vec<String>,
    next_id: u64,
    fail_with: Option<u16>,
}

/// A [`Manager`] that keeps the configuration tree in memory.
///
/// Clones share state, so a test can keep a handle while the configurator owns the manager.
#[derive(Clone, Debug, Default)]
pub struct FakeManager {
    state: Arc<Mutex<ManagerState>>,
    plus: FakePlusApi,
}

/// The files a [`FakeManager`] holds, keyed by path relative to the configuration directory.
pub type Files = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Default)]
struct ManagerState {
    files: Files,
    writes: Vec<String>,
    reloads: Vec<ReloadKind>,
    running: Option<watch::Sender<Option<crate::Exit>>>,
    fail_reloads: bool,
}

// === impl FakePlusApi ===

impl FakePlusApi {
    pub fn set_servers(&self, plane: Plane, upstream: &str, servers: Vec<UpstreamServer>) {
        let mut state = self.0.lock();
        let servers = servers
            .into_iter()
            .map(|mut s| {
                state.next_id += 1;
                s.id = state.next_id;
                s
            })
            .collect();
        state
            .upstreams
            .insert((plane.to_string(), upstream.to_string()), servers);
    }

    pub fn server_addresses(&self, plane: Plane, upstream: &str) -> Vec<String> {
        let state = self.0.lock();
        let mut addrs = state
            .upstreams
            .get(&(plane.to_string(), upstream.to_string()))
            .into_iter()
            .flatten()
            .map(|s| s.server.clone())
            .collect::<Vec<_>>();
        addrs.sort();
        addrs
    }

    pub fn key_val(&self, zone: &str, key: &str) -> Option<String> {
        self.0.lock().key_vals.get(zone)?.get(key).cloned()
    }

    /// Makes every subsequent call fail with `status`.
    pub fn fail_with(&self, status: u16) {
        self.0.lock().fail_with = Some(status);
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().calls.clone()
    }

    fn record(&self, call: String) -> Result<parking_lot::MutexGuard<'_, PlusState>> {
        let mut state = self.0.lock();
        state.calls.push(call.clone());
        if let Some(status) = state.fail_with {
            return Err(Error::FallbackToReload(format!("{call} returned {status}")));
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl PlusApi for FakePlusApi {
    async fn servers(&self, plane: Plane, upstream: &str) -> Result<Vec<UpstreamServer>> {
        let state = self.record(format!("GET {plane} {upstream}"))?;
        Ok(state
            .upstreams
            .get(&(plane.to_string(), upstream.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn add_server(
        &self,
        plane: Plane,
        upstream: &str,
        server: &UpstreamServer,
    ) -> Result<()> {
        let mut state = self.record(format!("POST {plane} {upstream} {}", server.server))?;
        state.next_id += 1;
        let server = UpstreamServer {
            id: state.next_id,
            ..server.clone()
        };
        state
            .upstreams
            .entry((plane.to_string(), upstream.to_string()))
            .or_default()
            .push(server);
        Ok(())
    }

    async fn update_server(
        &self,
        plane: Plane,
        upstream: &str,
        id: u64,
        server: &UpstreamServer,
    ) -> Result<()> {
        let mut state = self.record(format!("PATCH {plane} {upstream} {}", server.server))?;
        if let Some(s) = state
            .upstreams
            .get_mut(&(plane.to_string(), upstream.to_string()))
            .and_then(|servers| servers.iter_mut().find(|s| s.id == id))
        {
            *s = UpstreamServer {
                id,
                ..server.clone()
            };
        }
        Ok(())
    }

    async fn delete_server(&self, plane: Plane, upstream: &str, id: u64) -> Result<()> {
        let key = (plane.to_string(), upstream.to_string());
        let address = {
            let state = self.0.lock();
            state
                .upstreams
                .get(&key)
                .and_then(|servers| servers.iter().find(|s| s.id == id))
                .map(|s| s.server.clone())
                .unwrap_or_default()
        };
        let mut state = self.record(format!("DELETE {plane} {upstream} {address}"))?;
        if let Some(servers) = state.upstreams.get_mut(&key) {
            servers.retain(|s| s.id != id);
        }
        Ok(())
    }

    async fn key_vals(&self, zone: &str) -> Result<BTreeMap<String, String>> {
        let state = self.record(format!("GET keyvals {zone}"))?;
        Ok(state.key_vals.get(zone).cloned().unwrap_or_default())
    }

    async fn add_key_val(&self, zone: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.record(format!("POST keyvals {zone}"))?;
        state
            .key_vals
            .entry(zone.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn modify_key_val(&self, zone: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.record(format!("PATCH keyvals {zone}"))?;
        state
            .key_vals
            .entry(zone.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// === impl FakeManager ===

impl FakeManager {
    pub fn plus(&self) -> &FakePlusApi {
        &self.plus
    }

    /// A snapshot of the configuration tree.
    pub fn files(&self) -> Files {
        self.state.lock().files.clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        let state = self.state.lock();
        let content = state.files.get(path)?;
        Some(String::from_utf8_lossy(content).into_owned())
    }

    /// Paths written (or deleted, prefixed with `-`) since the last call.
    pub fn take_writes(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().writes)
    }

    /// Deadline classes of reloads performed since the last call.
    pub fn take_reloads(&self) -> Vec<ReloadKind> {
        std::mem::take(&mut self.state.lock().reloads)
    }

    pub fn fail_reloads(&self, fail: bool) {
        self.state.lock().fail_reloads = fail;
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running.is_some()
    }

    fn put(&self, path: String, content: &[u8]) {
        let mut state = self.state.lock();
        state.writes.push(path.clone());
        state.files.insert(path, content.to_vec());
    }

    fn remove(&self, path: String) {
        let mut state = self.state.lock();
        if state.files.remove(&path).is_some() {
            state.writes.push(format!("-{path}"));
        }
    }
}

#[async_trait::async_trait]
impl Manager for FakeManager {
    fn write_main(&mut self, content: &[u8]) -> Result<()> {
        self.put("nginx.conf".to_string(), content);
        Ok(())
    }

    fn write_config(&mut self, name: &str, content: &[u8]) -> Result<()> {
        self.put(format!("conf.d/{name}.conf"), content);
        Ok(())
    }

    fn delete_config(&mut self, name: &str) -> Result<()> {
        self.remove(format!("conf.d/{name}.conf"));
        Ok(())
    }

    fn write_stream_config(&mut self, name: &str, content: &[u8]) -> Result<()> {
        self.put(format!("stream-conf.d/{name}.conf"), content);
        Ok(())
    }

    fn delete_stream_config(&mut self, name: &str) -> Result<()> {
        self.remove(format!("stream-conf.d/{name}.conf"));
        Ok(())
    }

    fn write_secret(&mut self, name: &str, content: &[u8], _mode: u32) -> Result<String> {
        self.put(format!("secrets/{name}"), content);
        Ok(self.secret_path(name))
    }

    fn delete_secret(&mut self, name: &str) -> Result<()> {
        self.remove(format!("secrets/{name}"));
        Ok(())
    }

    fn secret_path(&self, name: &str) -> String {
        format!("/etc/nginx/secrets/{name}")
    }

    fn write_passthrough_hosts(&mut self, content: &[u8]) -> Result<()> {
        self.put("tls-passthrough-hosts.conf".to_string(), content);
        Ok(())
    }

    fn write_dhparam(&mut self, content: &[u8]) -> Result<String> {
        self.write_secret("dhparam.pem", content, crate::SECRET_FILE_MODE)
    }

    async fn start(&mut self) -> Result<Done> {
        let (tx, rx) = watch::channel(None);
        self.state.lock().running = Some(tx);
        Ok(rx)
    }

    async fn reload(&mut self, kind: ReloadKind) -> Result<()> {
        let mut state = self.state.lock();
        state.reloads.push(kind);
        if state.fail_reloads {
            return Err(Error::Reload("nginx: [emerg] invalid configuration".to_string()));
        }
        Ok(())
    }

    async fn quit(&mut self) -> Result<()> {
        if let Some(tx) = self.state.lock().running.take() {
            let _ = tx.send(Some(crate::Exit {
                name: "nginx".to_string(),
                code: Some(0),
                error: None,
            }));
        }
        Ok(())
    }

    async fn update_servers(
        &mut self,
        upstream: &str,
        servers: &[UpstreamServer],
    ) -> Result<()> {
        plus::update_servers(&self.plus, Plane::Http, upstream, servers)
            .await
            .map(|_| ())
    }

    async fn update_stream_servers(
        &mut self,
        upstream: &str,
        servers: &[UpstreamServer],
    ) -> Result<()> {
        plus::update_servers(&self.plus, Plane::Stream, upstream, servers)
            .await
            .map(|_| ())
    }

    async fn upsert_key_val(&mut self, zone: &str, key: &str, value: &str) -> Result<()> {
        plus::upsert_key_val(&self.plus, zone, key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_state() {
        let handle = FakeManager::default();
        let mut manager = handle.clone();

        manager
            .write_config("vs_default_cafe", b"server {}")
            .expect("write");
        manager.reload(ReloadKind::Config).await.expect("reload");
        manager.delete_config("vs_default_cafe").expect("delete");

        assert_eq!(
            handle.take_writes(),
            ["conf.d/vs_default_cafe.conf", "-conf.d/vs_default_cafe.conf"]
        );
        assert_eq!(handle.take_reloads(), [ReloadKind::Config]);
        assert!(handle.files().is_empty());
    }

    #[tokio::test]
    async fn quit_resolves_done() {
        let mut manager = FakeManager::default();
        let mut done = manager.start().await.expect("start");
        assert!(manager.is_running());
        manager.quit().await.expect("quit");
        let exit = done
            .wait_for(Option::is_some)
            .await
            .expect("exit")
            .clone()
            .expect("exit");
        assert!(exit.success());
    }
}
