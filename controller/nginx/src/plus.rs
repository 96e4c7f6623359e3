//! The NGINX Plus API: live reconfiguration of upstream servers and key-value zones.
//!
//! Only three endpoint families are used: `/http/upstreams/{name}/servers`,
//! `/stream/upstreams/{name}/servers` and `/http/keyvals/{zone}`. Any non-success response
//! yields [`Error::FallbackToReload`], since the configuration on disk already carries the
//! desired state.

use crate::{client, Error, Result};
use bytes::Bytes;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::PathBuf,
};

pub const API_VERSION: u32 = 9;

const DEFAULT_MAX_FAILS: u32 = 1;
const DEFAULT_FAIL_TIMEOUT: &str = "10s";
const DEFAULT_SLOW_START: &str = "0s";

/// An upstream server as the Plus API represents it.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UpstreamServer {
    /// Assigned by NGINX; never sent.
    #[serde(default, skip_serializing)]
    pub id: u64,
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fails: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_conns: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fail_timeout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub slow_start: String,
}

/// The module an upstream belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Plane {
    Http,
    Stream,
}

/// The Plus API operations the manager needs.
#[async_trait::async_trait]
pub trait PlusApi: Send + Sync {
    async fn servers(&self, plane: Plane, upstream: &str) -> Result<Vec<UpstreamServer>>;

    async fn add_server(&self, plane: Plane, upstream: &str, server: &UpstreamServer)
        -> Result<()>;

    async fn update_server(
        &self,
        plane: Plane,
        upstream: &str,
        id: u64,
        server: &UpstreamServer,
    ) -> Result<()>;

    async fn delete_server(&self, plane: Plane, upstream: &str, id: u64) -> Result<()>;

    async fn key_vals(&self, zone: &str) -> Result<BTreeMap<String, String>>;

    async fn add_key_val(&self, zone: &str, key: &str, value: &str) -> Result<()>;

    async fn modify_key_val(&self, zone: &str, key: &str, value: &str) -> Result<()>;
}

/// What a server reconciliation changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
}

/// A [`PlusApi`] client speaking HTTP over the API's unix socket.
#[derive(Clone, Debug)]
pub struct PlusClient {
    socket: PathBuf,
}

// === impl UpstreamServer ===

impl UpstreamServer {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    fn same_parameters(&self, other: &Self) -> bool {
        fn or<'a>(v: &'a str, default: &'a str) -> &'a str {
            if v.is_empty() {
                default
            } else {
                v
            }
        }
        self.max_fails.unwrap_or(DEFAULT_MAX_FAILS)
            == other.max_fails.unwrap_or(DEFAULT_MAX_FAILS)
            && self.max_conns.unwrap_or_default() == other.max_conns.unwrap_or_default()
            && or(&self.fail_timeout, DEFAULT_FAIL_TIMEOUT)
                == or(&other.fail_timeout, DEFAULT_FAIL_TIMEOUT)
            && or(&self.slow_start, DEFAULT_SLOW_START)
                == or(&other.slow_start, DEFAULT_SLOW_START)
    }
}

// === impl Plane ===

impl Plane {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

// === impl ServerChanges ===

impl ServerChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Makes the servers of an upstream match `desired`.
///
/// Servers are matched by address. Missing servers are added, extra servers removed, and
/// servers whose parameters differ are updated in place. The first failing call aborts the
/// reconciliation.
pub async fn update_servers<A: PlusApi + ?Sized>(
    api: &A,
    plane: Plane,
    upstream: &str,
    desired: &[UpstreamServer],
) -> Result<ServerChanges> {
    let current = api.servers(plane, upstream).await?;
    let mut changes = ServerChanges::default();

    let wanted = desired
        .iter()
        .map(|s| (s.server.as_str(), s))
        .collect::<BTreeMap<_, _>>();
    let existing = current
        .iter()
        .map(|s| s.server.as_str())
        .collect::<BTreeSet<_>>();

    for server in &current {
        match wanted.get(server.server.as_str()) {
            None => {
                api.delete_server(plane, upstream, server.id).await?;
                changes.removed.push(server.server.clone());
            }
            Some(want) if !want.same_parameters(server) => {
                api.update_server(plane, upstream, server.id, want).await?;
                changes.updated.push(server.server.clone());
            }
            Some(_) => {}
        }
    }
    for (address, server) in wanted {
        if !existing.contains(address) {
            api.add_server(plane, upstream, server).await?;
            changes.added.push(address.to_string());
        }
    }

    if !changes.is_empty() {
        tracing::debug!(
            %plane,
            %upstream,
            added = ?changes.added,
            removed = ?changes.removed,
            updated = ?changes.updated,
            "Updated upstream servers"
        );
    }
    Ok(changes)
}

/// Sets `key` in a key-value zone, adding it when absent.
pub async fn upsert_key_val<A: PlusApi + ?Sized>(
    api: &A,
    zone: &str,
    key: &str,
    value: &str,
) -> Result<()> {
    let current = api.key_vals(zone).await?;
    match current.get(key) {
        Some(v) if v == value => Ok(()),
        Some(_) => api.modify_key_val(zone, key, value).await,
        None => api.add_key_val(zone, key, value).await,
    }
}

// === impl PlusClient ===

impl PlusClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    async fn call(
        &self,
        method: http::Method,
        path: String,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes> {
        let uri = format!("/api/{API_VERSION}/{path}");
        let mut req = http::Request::builder().method(method.clone()).uri(&uri);
        if body.is_some() {
            req = req.header(http::header::CONTENT_TYPE, "application/json");
        }
        let body = body.map(Bytes::from).unwrap_or_default();
        let (status, rsp) = client::send(&self.socket, req, body)
            .await
            .map_err(|e| Error::Api(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::FallbackToReload(format!(
                "{method} {uri} returned {status}: {}",
                String::from_utf8_lossy(&rsp)
            )));
        }
        Ok(rsp)
    }

    fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Api(e.to_string()))
    }

    fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
        serde_json::from_slice(body).map_err(|e| Error::Api(format!("invalid response: {e}")))
    }
}

#[async_trait::async_trait]
impl PlusApi for PlusClient {
    async fn servers(&self, plane: Plane, upstream: &str) -> Result<Vec<UpstreamServer>> {
        let body = self
            .call(
                http::Method::GET,
                format!("{plane}/upstreams/{upstream}/servers"),
                None,
            )
            .await?;
        Self::decode(&body)
    }

    async fn add_server(
        &self,
        plane: Plane,
        upstream: &str,
        server: &UpstreamServer,
    ) -> Result<()> {
        self.call(
            http::Method::POST,
            format!("{plane}/upstreams/{upstream}/servers"),
            Some(Self::encode(server)?),
        )
        .await
        .map(|_| ())
    }

    async fn update_server(
        &self,
        plane: Plane,
        upstream: &str,
        id: u64,
        server: &UpstreamServer,
    ) -> Result<()> {
        self.call(
            http::Method::PATCH,
            format!("{plane}/upstreams/{upstream}/servers/{id}"),
            Some(Self::encode(server)?),
        )
        .await
        .map(|_| ())
    }

    async fn delete_server(&self, plane: Plane, upstream: &str, id: u64) -> Result<()> {
        self.call(
            http::Method::DELETE,
            format!("{plane}/upstreams/{upstream}/servers/{id}"),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn key_vals(&self, zone: &str) -> Result<BTreeMap<String, String>> {
        let body = self
            .call(http::Method::GET, format!("http/keyvals/{zone}"), None)
            .await?;
        Self::decode(&body)
    }

    async fn add_key_val(&self, zone: &str, key: &str, value: &str) -> Result<()> {
        let body = Self::encode(&BTreeMap::from([(key, value)]))?;
        self.call(http::Method::POST, format!("http/keyvals/{zone}"), Some(body))
            .await
            .map(|_| ())
    }

    async fn modify_key_val(&self, zone: &str, key: &str, value: &str) -> Result<()> {
        let body = Self::encode(&BTreeMap::from([(key, value)]))?;
        self.call(http::Method::PATCH, format!("http/keyvals/{zone}"), Some(body))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakePlusApi;
    use pretty_assertions::assert_eq;

    fn mk_server(addr: &str) -> UpstreamServer {
        UpstreamServer {
            max_fails: Some(1),
            fail_timeout: "10s".to_string(),
            ..UpstreamServer::new(addr)
        }
    }

    #[tokio::test]
    async fn reconciles_servers_by_address() {
        let api = FakePlusApi::default();
        api.set_servers(
            Plane::Http,
            "vs_default_cafe_tea",
            vec![mk_server("10.0.0.1:8080"), mk_server("10.0.0.2:8080")],
        );

        let changes = update_servers(
            &api,
            Plane::Http,
            "vs_default_cafe_tea",
            &[mk_server("10.0.0.2:8080"), mk_server("10.0.0.3:8080")],
        )
        .await
        .expect("update");

        assert_eq!(
            changes,
            ServerChanges {
                added: vec!["10.0.0.3:8080".to_string()],
                removed: vec!["10.0.0.1:8080".to_string()],
                updated: vec![],
            }
        );
        assert_eq!(
            api.server_addresses(Plane::Http, "vs_default_cafe_tea"),
            ["10.0.0.2:8080", "10.0.0.3:8080"]
        );
        assert_eq!(
            api.calls(),
            [
                "GET http vs_default_cafe_tea",
                "DELETE http vs_default_cafe_tea 10.0.0.1:8080",
                "POST http vs_default_cafe_tea 10.0.0.3:8080",
            ]
        );
    }

    #[tokio::test]
    async fn updates_changed_parameters() {
        let api = FakePlusApi::default();
        api.set_servers(Plane::Stream, "ts_default_dns", vec![mk_server("10.0.0.1:53")]);

        let mut server = mk_server("10.0.0.1:53");
        server.max_conns = Some(10);
        let changes = update_servers(&api, Plane::Stream, "ts_default_dns", &[server])
            .await
            .expect("update");
        assert_eq!(changes.updated, ["10.0.0.1:53"]);
    }

    #[tokio::test]
    async fn defaults_compare_equal() {
        let api = FakePlusApi::default();
        api.set_servers(
            Plane::Http,
            "up",
            vec![UpstreamServer {
                max_fails: Some(1),
                max_conns: Some(0),
                fail_timeout: "10s".to_string(),
                slow_start: "0s".to_string(),
                ..UpstreamServer::new("10.0.0.1:80")
            }],
        );
        let desired = [UpstreamServer::new("10.0.0.1:80")];
        let changes = update_servers(&api, Plane::Http, "up", &desired)
            .await
            .expect("update");
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn failures_fall_back_to_reload() {
        let api = FakePlusApi::default();
        api.set_servers(Plane::Http, "up", vec![mk_server("10.0.0.1:80")]);
        api.fail_with(500);

        let err = update_servers(&api, Plane::Http, "up", &[mk_server("10.0.0.2:80")])
            .await
            .expect_err("the API fails");
        assert!(err.is_fallback());
        assert_eq!(api.calls(), ["GET http up"]);
    }

    #[tokio::test]
    async fn upserts_key_vals() {
        let api = FakePlusApi::default();
        let zone = "vs_default_cafe_keyval_zone_split_0";
        let key = "vs_default_cafe_keyval_split_0";
        upsert_key_val(&api, zone, key, "90").await.expect("add");
        upsert_key_val(&api, zone, key, "50").await.expect("modify");
        upsert_key_val(&api, zone, key, "50").await.expect("unchanged");

        assert_eq!(api.key_val(zone, key), Some("50".to_string()));
        let writes = api
            .calls()
            .into_iter()
            .filter(|c| !c.starts_with("GET"))
            .collect::<Vec<_>>();
        assert_eq!(
            writes,
            [
                "POST keyvals vs_default_cafe_keyval_zone_split_0",
                "PATCH keyvals vs_default_cafe_keyval_zone_split_0",
            ]
        );
    }

    #[test]
    fn serializes_without_id() {
        let server = UpstreamServer {
            id: 4,
            ..mk_server("10.0.0.1:80")
        };
        let json = serde_json::to_string(&server).expect("serialize");
        assert_eq!(
            json,
            r#"{"server":"10.0.0.1:80","max_fails":1,"fail_timeout":"10s"}"#
        );
        let parsed: UpstreamServer = serde_json::from_str(
            r#"{"id":4,"server":"10.0.0.1:80","max_fails":1,"fail_timeout":"10s","backup":false}"#,
        )
        .expect("deserialize");
        assert_eq!(parsed, server);
    }
}
