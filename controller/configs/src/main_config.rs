use nginx_ingress_core::{
    model::MainConfig, ConfigParams, StaticParams, CONFIG_VERSION_SOCKET, PASSTHROUGH_HTTPS_SOCKET,
    PLUS_API_SOCKET,
};

/// The file, under the secrets directory, the `ssl-dhparam-file` contents are written to.
pub const DHPARAM_FILE: &str = "dhparam.pem";

pub fn generate_main_config(params: &ConfigParams, static_params: &StaticParams) -> MainConfig {
    let ssl_dhparam = if params.ssl_dhparam_file.is_empty() {
        String::new()
    } else {
        format!("{}/{DHPARAM_FILE}", static_params.secrets_dir)
    };

    let mut resolver = params.resolver_addresses.join(" ");
    if !resolver.is_empty() {
        if !params.resolver_valid.is_empty() {
            resolver.push_str(&format!(" valid={}", params.resolver_valid));
        }
        if !params.resolver_ipv6 {
            resolver.push_str(" ipv6=off");
        }
    }

    let http_port = static_params.default_http_listener_port;
    let https_port = static_params.default_https_listener_port;
    let with_ipv6 = |listen: String, v6: String| {
        if static_params.disable_ipv6 {
            vec![listen]
        } else {
            vec![listen, v6]
        }
    };
    let proxy_protocol = if params.proxy_protocol { " proxy_protocol" } else { "" };
    let default_http_listens = with_ipv6(
        format!("{http_port}{proxy_protocol}"),
        format!("[::]:{http_port}{proxy_protocol}"),
    );
    let (default_https_listens, tls_passthrough_listens) = if static_params.tls_passthrough {
        let port = static_params.tls_passthrough_port;
        (
            vec![format!("{PASSTHROUGH_HTTPS_SOCKET} proxy_protocol")],
            with_ipv6(port.to_string(), format!("[::]:{port}")),
        )
    } else {
        (
            with_ipv6(
                format!("{https_port}{proxy_protocol}"),
                format!("[::]:{https_port}{proxy_protocol}"),
            ),
            Vec::new(),
        )
    };

    MainConfig {
        conf_dir: static_params.conf_dir.clone(),
        nginx_plus: static_params.nginx_plus,

        worker_processes: params.worker_processes.clone(),
        worker_cpu_affinity: params.worker_cpu_affinity.clone(),
        worker_shutdown_timeout: params.worker_shutdown_timeout.clone(),
        worker_connections: params.worker_connections.clone(),
        worker_rlimit_nofile: params.worker_rlimit_nofile.clone(),
        error_log_level: params.error_log_level.clone(),
        main_snippets: params.main_snippets.clone(),

        access_log_off: params.access_log_off,
        log_format: params.log_format.clone(),
        stream_log_format: params.stream_log_format.clone(),
        http_snippets: params.http_snippets.clone(),
        stream_snippets: params.stream_snippets.clone(),

        server_tokens: params.server_tokens.clone(),
        server_names_hash_bucket_size: params.server_names_hash_bucket_size,
        server_names_hash_max_size: params.server_names_hash_max_size,
        map_hash_bucket_size: params.map_hash_bucket_size,
        map_hash_max_size: params.map_hash_max_size,
        variables_hash_bucket_size: params.variables_hash_bucket_size,
        variables_hash_max_size: params.variables_hash_max_size,
        keepalive_timeout: params.keepalive_timeout.clone(),
        keepalive_requests: params.keepalive_requests,

        ssl_protocols: params.ssl_protocols.clone(),
        ssl_prefer_server_ciphers: params.ssl_prefer_server_ciphers,
        ssl_ciphers: params.ssl_ciphers.clone(),
        ssl_dhparam,
        http2: params.http2,

        proxy_protocol: params.proxy_protocol,
        real_ip_header: params.real_ip_header.clone(),
        set_real_ip_from: params.set_real_ip_from.clone(),
        real_ip_recursive: params.real_ip_recursive,

        resolver,
        resolver_timeout: params.resolver_timeout.clone(),

        default_http_listens,
        default_https_listens,
        default_ssl_certificate: static_params.default_tls_secret.clone().unwrap_or_default(),

        tls_passthrough: static_params.tls_passthrough,
        tls_passthrough_listens,
        passthrough_https_socket: PASSTHROUGH_HTTPS_SOCKET.to_string(),

        config_version_socket: CONFIG_VERSION_SOCKET.to_string(),
        plus_api_socket: PLUS_API_SOCKET.to_string(),

        waf_module: static_params.waf_module,
        dos_module: static_params.dos_module,
        dynamic_ssl_reload: static_params.dynamic_ssl_reload,
        static_ssl_path: static_params.secrets_dir.clone(),
    }
}
