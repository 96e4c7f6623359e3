/// Everything `nginx.conf` is rendered from.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MainConfig {
    pub conf_dir: String,
    pub nginx_plus: bool,

    pub worker_processes: String,
    pub worker_cpu_affinity: String,
    pub worker_shutdown_timeout: String,
    pub worker_connections: String,
    pub worker_rlimit_nofile: String,
    pub error_log_level: String,
    pub main_snippets: Vec<String>,

    pub access_log_off: bool,
    pub log_format: Vec<String>,
    pub stream_log_format: Vec<String>,
    pub http_snippets: Vec<String>,
    pub stream_snippets: Vec<String>,

    pub server_tokens: String,
    pub server_names_hash_bucket_size: u64,
    pub server_names_hash_max_size: u64,
    pub map_hash_bucket_size: u64,
    pub map_hash_max_size: u64,
    pub variables_hash_bucket_size: u64,
    pub variables_hash_max_size: u64,
    pub keepalive_timeout: String,
    pub keepalive_requests: u64,

    pub ssl_protocols: String,
    pub ssl_prefer_server_ciphers: bool,
    pub ssl_ciphers: String,
    /// Path of the written dhparam file, empty when not configured.
    pub ssl_dhparam: String,
    pub http2: bool,

    pub proxy_protocol: bool,
    pub real_ip_header: String,
    pub set_real_ip_from: Vec<String>,
    pub real_ip_recursive: bool,

    /// The `resolver` directive arguments, empty when no resolver is configured.
    pub resolver: String,
    pub resolver_timeout: String,

    /// Arguments of the default servers' `listen` directives.
    pub default_http_listens: Vec<String>,
    pub default_https_listens: Vec<String>,
    /// Certificate of the default HTTPS server. Empty rejects the TLS handshake.
    pub default_ssl_certificate: String,

    pub tls_passthrough: bool,
    pub tls_passthrough_listens: Vec<String>,
    pub passthrough_https_socket: String,

    pub config_version_socket: String,
    pub plus_api_socket: String,

    pub waf_module: bool,
    pub dos_module: bool,
    pub dynamic_ssl_reload: bool,
    pub static_ssl_path: String,
}
