use nginx_ingress_core::{StaticParams, PASSTHROUGH_HTTPS_SOCKET};

/// The `listen` arguments of a plain HTTP server.
pub(crate) fn http(ports: &[u16], proxy_protocol: bool, static_params: &StaticParams) -> Vec<String> {
    let mut listens = Vec::with_capacity(ports.len() * 2);
    for port in ports {
        listens.push(with_proxy_protocol(port.to_string(), proxy_protocol));
        if !static_params.disable_ipv6 {
            listens.push(with_proxy_protocol(format!("[::]:{port}"), proxy_protocol));
        }
    }
    listens
}

/// The `listen` arguments of a TLS server.
///
/// With TLS passthrough enabled, the passthrough port is owned by the stream listener, which
/// hands unmatched connections to the shared HTTPS socket with the PROXY protocol.
pub(crate) fn https(ports: &[u16], proxy_protocol: bool, static_params: &StaticParams) -> Vec<String> {
    let mut listens = Vec::with_capacity(ports.len() * 2);
    for port in ports {
        if static_params.tls_passthrough && *port == static_params.tls_passthrough_port {
            listens.push(format!("{PASSTHROUGH_HTTPS_SOCKET} ssl proxy_protocol"));
            continue;
        }
        listens.push(with_proxy_protocol(format!("{port} ssl"), proxy_protocol));
        if !static_params.disable_ipv6 {
            listens.push(with_proxy_protocol(format!("[::]:{port} ssl"), proxy_protocol));
        }
    }
    listens
}

/// Real IP sources of a TLS server: the passthrough socket, when in use, is trusted so the
/// client address from the PROXY protocol header is kept.
pub(crate) fn set_real_ip_from(
    configured: &[String],
    ssl: bool,
    static_params: &StaticParams,
) -> Vec<String> {
    let mut from = configured.to_vec();
    if ssl && static_params.tls_passthrough && !from.iter().any(|f| f == "unix:") {
        from.push("unix:".to_string());
    }
    from
}

fn with_proxy_protocol(listen: String, proxy_protocol: bool) -> String {
    if proxy_protocol {
        format!("{listen} proxy_protocol")
    } else {
        listen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_listens_follow_ipv4() {
        let static_params = StaticParams::default();
        assert_eq!(http(&[80, 8080], false, &static_params), ["80", "[::]:80", "8080", "[::]:8080"]);
        assert_eq!(
            https(&[443], true, &static_params),
            ["443 ssl proxy_protocol", "[::]:443 ssl proxy_protocol"]
        );

        let static_params = StaticParams {
            disable_ipv6: true,
            ..Default::default()
        };
        assert_eq!(http(&[80], false, &static_params), ["80"]);
    }

    #[test]
    fn passthrough_moves_https_to_socket() {
        let static_params = StaticParams {
            tls_passthrough: true,
            ..Default::default()
        };
        assert_eq!(
            https(&[443, 8443], false, &static_params),
            [
                "unix:/var/lib/nginx/passthrough-https.sock ssl proxy_protocol",
                "8443 ssl",
                "[::]:8443 ssl",
            ]
        );
        assert_eq!(set_real_ip_from(&[], true, &static_params), ["unix:"]);
        assert!(set_real_ip_from(&[], false, &static_params).is_empty());
    }
}
