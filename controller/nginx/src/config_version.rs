use crate::{client, Error, Result};
use bytes::Bytes;
use std::{path::PathBuf, time::Duration};

const PROBE_INTERVAL: Duration = Duration::from_millis(25);

/// Renders `config-version.conf`.
///
/// NGINX can only report values that are part of its loaded configuration, so the version is
/// embedded in the server that reports it and in the map that flags mismatched requests.
pub fn config_version_conf(socket: &str, version: u64) -> String {
    format!(
        r#"server {{
    listen unix:{socket};
    access_log off;

    location /configVersion {{
        return 200 {version};
    }}
}}

map $http_x_expected_config_version $config_version_mismatch {{
    "{version}" "";
    default "mismatch";
}}
"#
    )
}

/// Asks NGINX which configuration version it serves.
#[derive(Clone, Debug)]
pub struct VersionProbe {
    socket: PathBuf,
}

// === impl VersionProbe ===

impl VersionProbe {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Polls NGINX until it reports `version`.
    pub async fn wait_for(&self, version: u64, timeout: Duration) -> Result<()> {
        let poll = async {
            loop {
                match self.version(version).await {
                    Ok(v) if v == version => return,
                    Ok(v) => tracing::trace!(expected = version, actual = v, "Stale version"),
                    Err(error) => tracing::trace!(%error, "Version probe failed"),
                }
                tokio::time::sleep(PROBE_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| Error::ReloadTimeout { version, timeout })
    }

    async fn version(&self, expected: u64) -> Result<u64> {
        let req = http::Request::get("/configVersion")
            .header("x-expected-config-version", expected.to_string());
        let (status, body) = client::send(&self.socket, req, Bytes::new())
            .await
            .map_err(|e| Error::Process(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Process(format!("version probe returned {status}")));
        }
        parse_version(&body)
    }
}

fn parse_version(body: &[u8]) -> Result<u64> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| {
            Error::Process(format!(
                "invalid configuration version {:?}",
                String::from_utf8_lossy(body)
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_version_server_and_map() {
        let conf = config_version_conf("/var/lib/nginx/nginx-config-version.sock", 7);
        assert!(conf.contains("listen unix:/var/lib/nginx/nginx-config-version.sock;"));
        assert!(conf.contains("return 200 7;"));
        assert!(conf.contains(r#""7" "";"#));
        assert!(conf.contains(r#"default "mismatch";"#));
    }

    #[test]
    fn parses_config_version_bodies() {
        assert_eq!(parse_version(b"12").expect("valid"), 12);
        assert_eq!(parse_version(b"12\n").expect("valid"), 12);
        assert!(parse_version(b"mismatch").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_nginx() {
        let dir = tempfile::tempdir().expect("tempdir");
        let probe = VersionProbe::new(dir.path().join("missing.sock"));
        let err = probe
            .wait_for(3, Duration::from_secs(1))
            .await
            .expect_err("nothing listens on the socket");
        assert!(matches!(
            err,
            Error::ReloadTimeout { version: 3, timeout } if timeout == Duration::from_secs(1)
        ));
    }
}
