use nginx_ingress_core::{passthrough_socket, Kind, ResourceKey, Warnings};
use std::collections::BTreeMap;

/// The SNI routing table of the TLS passthrough listener: host to the unix socket of the
/// TransportServer that serves it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassthroughHosts {
    hosts: BTreeMap<String, ResourceKey>,
}

// === impl PassthroughHosts ===

impl PassthroughHosts {
    /// Builds the table from `(server, host)` pairs in the order the servers were written.
    ///
    /// A host claimed twice goes to the later server. The server that loses the host gets
    /// one warning per lost host.
    pub fn build<'a>(servers: impl IntoIterator<Item = (&'a ResourceKey, &'a str)>) -> (Self, Warnings) {
        Self::build_reporting(servers, |_| true)
    }

    /// Builds the table like [`PassthroughHosts::build`], warning only about conflicts in
    /// which `report` holds for the winning or the losing server.
    pub fn build_reporting<'a>(
        servers: impl IntoIterator<Item = (&'a ResourceKey, &'a str)>,
        report: impl Fn(&ResourceKey) -> bool,
    ) -> (Self, Warnings) {
        let mut hosts = BTreeMap::<String, ResourceKey>::new();
        let mut warnings = Warnings::default();
        for (key, host) in servers {
            if let Some(previous) = hosts.insert(host.to_string(), key.clone()) {
                if previous != *key && (report(key) || report(&previous)) {
                    warnings.add(
                        Kind::TransportServer,
                        &previous,
                        format!("host {host} is taken by TransportServer {key}"),
                    );
                }
            }
        }
        (Self { hosts }, warnings)
    }

    pub fn get(&self, host: &str) -> Option<&ResourceKey> {
        self.hosts.get(host)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Renders the entries of the `map` block, one `host socket;` line per host.
    pub fn render(&self) -> Vec<u8> {
        let mut out = String::new();
        for (host, key) in &self.hosts {
            out.push_str(host);
            out.push(' ');
            out.push_str(&passthrough_socket(key));
            out.push_str(";\n");
        }
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_writer_wins() {
        let first = ResourceKey::new("default", "first");
        let second = ResourceKey::new("default", "second");
        let other = ResourceKey::new("default", "other");
        let (hosts, warnings) = PassthroughHosts::build([
            (&first, "app.example.com"),
            (&other, "other.example.com"),
            (&second, "app.example.com"),
        ]);

        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts.get("app.example.com"), Some(&second));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings.get(Kind::TransportServer, &first).len(), 1);
        assert_eq!(
            String::from_utf8(hosts.render()).unwrap(),
            "app.example.com unix:/var/lib/nginx/passthrough-default_second.sock;\n\
             other.example.com unix:/var/lib/nginx/passthrough-default_other.sock;\n"
        );
    }

    #[test]
    fn conflicts_are_reported_for_selected_servers() {
        let first = ResourceKey::new("default", "first");
        let second = ResourceKey::new("default", "second");
        let servers = [(&first, "app.example.com"), (&second, "app.example.com")];

        let (hosts, warnings) = PassthroughHosts::build_reporting(servers, |_| false);
        assert_eq!(hosts.get("app.example.com"), Some(&second));
        assert!(warnings.is_empty());

        let (_, warnings) = PassthroughHosts::build_reporting(servers, |k| *k == second);
        assert_eq!(warnings.get(Kind::TransportServer, &first).len(), 1);
    }
}
