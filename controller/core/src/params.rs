/// Cluster-wide parameters parsed from the controller's ConfigMap. Rebuilt whenever the
/// ConfigMap changes; Ingress annotations override a copy of these per resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigParams {
    pub server_tokens: String,
    pub lb_method: String,

    pub proxy_connect_timeout: String,
    pub proxy_read_timeout: String,
    pub proxy_send_timeout: String,
    pub proxy_hide_headers: Vec<String>,
    pub proxy_pass_headers: Vec<String>,
    pub client_max_body_size: String,
    pub proxy_buffering: bool,
    pub proxy_buffers: String,
    pub proxy_buffer_size: String,
    pub proxy_max_temp_file_size: String,

    pub server_names_hash_bucket_size: u64,
    pub server_names_hash_max_size: u64,
    pub map_hash_bucket_size: u64,
    pub map_hash_max_size: u64,
    pub variables_hash_bucket_size: u64,
    pub variables_hash_max_size: u64,

    pub http2: bool,
    pub redirect_to_https: bool,
    pub ssl_redirect: bool,
    pub hsts: bool,
    pub hsts_max_age: i64,
    pub hsts_include_subdomains: bool,
    pub hsts_behind_proxy: bool,

    pub proxy_protocol: bool,
    pub real_ip_header: String,
    pub set_real_ip_from: Vec<String>,
    pub real_ip_recursive: bool,

    pub ssl_protocols: String,
    pub ssl_prefer_server_ciphers: bool,
    pub ssl_ciphers: String,
    /// Contents of the `ssl-dhparam-file` key; written to disk by the manager.
    pub ssl_dhparam_file: String,

    pub error_log_level: String,
    pub access_log_off: bool,
    pub log_format: Vec<String>,
    pub stream_log_format: Vec<String>,

    pub main_snippets: Vec<String>,
    pub http_snippets: Vec<String>,
    pub stream_snippets: Vec<String>,
    pub server_snippets: Vec<String>,
    pub location_snippets: Vec<String>,

    pub worker_processes: String,
    pub worker_cpu_affinity: String,
    pub worker_shutdown_timeout: String,
    pub worker_connections: String,
    pub worker_rlimit_nofile: String,

    pub keepalive: u32,
    pub keepalive_timeout: String,
    pub keepalive_requests: u64,

    pub max_fails: u32,
    pub max_conns: u32,
    pub fail_timeout: String,
    pub upstream_zone_size: String,

    pub resolver_addresses: Vec<String>,
    pub resolver_ipv6: bool,
    pub resolver_valid: String,
    pub resolver_timeout: String,

    pub main_template: Option<String>,
    pub ingress_template: Option<String>,
    pub virtual_server_template: Option<String>,
    pub transport_server_template: Option<String>,
}

/// Parameters fixed at startup from process flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticParams {
    pub nginx_plus: bool,

    /// The NGINX configuration directory, e.g. `/etc/nginx`.
    pub conf_dir: String,
    pub secrets_dir: String,

    pub tls_passthrough: bool,
    pub tls_passthrough_port: u16,
    pub default_http_listener_port: u16,
    pub default_https_listener_port: u16,
    pub disable_ipv6: bool,

    /// Path of the wildcard certificate, once written.
    pub wildcard_tls_secret: Option<String>,
    /// Path of the default server certificate, when present on disk.
    pub default_tls_secret: Option<String>,

    pub dynamic_ssl_reload: bool,
    pub enable_snippets: bool,
    pub waf_module: bool,
    pub dos_module: bool,
}

// === impl ConfigParams ===

impl Default for ConfigParams {
    fn default() -> Self {
        Self {
            server_tokens: "on".to_string(),
            lb_method: "random two least_conn".to_string(),

            proxy_connect_timeout: "60s".to_string(),
            proxy_read_timeout: "60s".to_string(),
            proxy_send_timeout: "60s".to_string(),
            proxy_hide_headers: Vec::new(),
            proxy_pass_headers: Vec::new(),
            client_max_body_size: "1m".to_string(),
            proxy_buffering: true,
            proxy_buffers: String::new(),
            proxy_buffer_size: String::new(),
            proxy_max_temp_file_size: String::new(),

            server_names_hash_bucket_size: 256,
            server_names_hash_max_size: 1024,
            map_hash_bucket_size: 256,
            map_hash_max_size: 2048,
            variables_hash_bucket_size: 256,
            variables_hash_max_size: 1024,

            http2: false,
            redirect_to_https: false,
            ssl_redirect: true,
            hsts: false,
            hsts_max_age: 2592000,
            hsts_include_subdomains: false,
            hsts_behind_proxy: false,

            proxy_protocol: false,
            real_ip_header: String::new(),
            set_real_ip_from: Vec::new(),
            real_ip_recursive: false,

            ssl_protocols: String::new(),
            ssl_prefer_server_ciphers: false,
            ssl_ciphers: String::new(),
            ssl_dhparam_file: String::new(),

            error_log_level: "notice".to_string(),
            access_log_off: false,
            log_format: Vec::new(),
            stream_log_format: Vec::new(),

            main_snippets: Vec::new(),
            http_snippets: Vec::new(),
            stream_snippets: Vec::new(),
            server_snippets: Vec::new(),
            location_snippets: Vec::new(),

            worker_processes: "auto".to_string(),
            worker_cpu_affinity: String::new(),
            worker_shutdown_timeout: String::new(),
            worker_connections: "1024".to_string(),
            worker_rlimit_nofile: String::new(),

            keepalive: 0,
            keepalive_timeout: "65s".to_string(),
            keepalive_requests: 100,

            max_fails: 1,
            max_conns: 0,
            fail_timeout: "10s".to_string(),
            upstream_zone_size: "256k".to_string(),

            resolver_addresses: Vec::new(),
            resolver_ipv6: true,
            resolver_valid: String::new(),
            resolver_timeout: String::new(),

            main_template: None,
            ingress_template: None,
            virtual_server_template: None,
            transport_server_template: None,
        }
    }
}

// === impl StaticParams ===

impl Default for StaticParams {
    fn default() -> Self {
        Self {
            nginx_plus: false,
            conf_dir: "/etc/nginx".to_string(),
            secrets_dir: "/etc/nginx/secrets".to_string(),
            tls_passthrough: false,
            tls_passthrough_port: 443,
            default_http_listener_port: 80,
            default_https_listener_port: 443,
            disable_ipv6: false,
            wildcard_tls_secret: None,
            default_tls_secret: None,
            dynamic_ssl_reload: false,
            enable_snippets: false,
            waf_module: false,
            dos_module: false,
        }
    }
}
