use crate::{
    annotations::{is_valid_size, is_valid_time, parse_bool, split_list},
    upstream::is_valid_lb_method,
};
use nginx_ingress_core::{ConfigParams, Kind, ResourceKey, Warnings};
use nginx_ingress_k8s_api::ConfigMap;
use std::{collections::BTreeMap, str::FromStr};

/// Parses the controller's ConfigMap into the cluster-wide parameters.
///
/// Keys that are absent keep their defaults. A key with an invalid value is reported against
/// the ConfigMap and also keeps its default.
pub fn parse_config_map(cm: &ConfigMap, nginx_plus: bool) -> (ConfigParams, Warnings) {
    let empty = BTreeMap::new();
    let data = cm.data.as_ref().unwrap_or(&empty);
    let mut p = Parser {
        data,
        errors: Vec::new(),
    };
    let mut params = ConfigParams::default();

    p.string("server-tokens", &mut params.server_tokens, |v| {
        Some(match parse_bool(v) {
            Some(true) => "on".to_string(),
            Some(false) => "off".to_string(),
            // NGINX Plus accepts an arbitrary version string.
            None if nginx_plus => v.to_string(),
            None => return None,
        })
    });
    p.string("lb-method", &mut params.lb_method, |v| {
        is_valid_lb_method(v, nginx_plus).then(|| v.to_string())
    });

    p.time("proxy-connect-timeout", &mut params.proxy_connect_timeout);
    p.time("proxy-read-timeout", &mut params.proxy_read_timeout);
    p.time("proxy-send-timeout", &mut params.proxy_send_timeout);
    p.list("proxy-hide-headers", ',', &mut params.proxy_hide_headers);
    p.list("proxy-pass-headers", ',', &mut params.proxy_pass_headers);
    p.size("client-max-body-size", &mut params.client_max_body_size);
    p.bool("proxy-buffering", &mut params.proxy_buffering);
    p.raw("proxy-buffers", &mut params.proxy_buffers);
    p.size("proxy-buffer-size", &mut params.proxy_buffer_size);
    p.size("proxy-max-temp-file-size", &mut params.proxy_max_temp_file_size);

    p.number("server-names-hash-bucket-size", &mut params.server_names_hash_bucket_size);
    p.number("server-names-hash-max-size", &mut params.server_names_hash_max_size);
    p.number("map-hash-bucket-size", &mut params.map_hash_bucket_size);
    p.number("map-hash-max-size", &mut params.map_hash_max_size);
    p.number("variables-hash-bucket-size", &mut params.variables_hash_bucket_size);
    p.number("variables-hash-max-size", &mut params.variables_hash_max_size);

    p.bool("http2", &mut params.http2);
    p.bool("redirect-to-https", &mut params.redirect_to_https);
    p.bool("ssl-redirect", &mut params.ssl_redirect);
    p.bool("hsts", &mut params.hsts);
    p.number("hsts-max-age", &mut params.hsts_max_age);
    p.bool("hsts-include-subdomains", &mut params.hsts_include_subdomains);
    p.bool("hsts-behind-proxy", &mut params.hsts_behind_proxy);

    p.bool("proxy-protocol", &mut params.proxy_protocol);
    p.raw("real-ip-header", &mut params.real_ip_header);
    p.list("set-real-ip-from", ',', &mut params.set_real_ip_from);
    p.bool("real-ip-recursive", &mut params.real_ip_recursive);

    p.raw("ssl-protocols", &mut params.ssl_protocols);
    p.bool("ssl-prefer-server-ciphers", &mut params.ssl_prefer_server_ciphers);
    p.raw("ssl-ciphers", &mut params.ssl_ciphers);
    p.raw("ssl-dhparam-file", &mut params.ssl_dhparam_file);

    p.string("error-log-level", &mut params.error_log_level, |v| {
        matches!(
            v,
            "debug" | "info" | "notice" | "warn" | "error" | "crit" | "alert" | "emerg"
        )
        .then(|| v.to_string())
    });
    p.bool("access-log-off", &mut params.access_log_off);
    p.list("log-format", '\n', &mut params.log_format);
    p.list("stream-log-format", '\n', &mut params.stream_log_format);

    p.list("main-snippets", '\n', &mut params.main_snippets);
    p.list("http-snippets", '\n', &mut params.http_snippets);
    p.list("stream-snippets", '\n', &mut params.stream_snippets);
    p.list("server-snippets", '\n', &mut params.server_snippets);
    p.list("location-snippets", '\n', &mut params.location_snippets);

    p.raw("worker-processes", &mut params.worker_processes);
    p.raw("worker-cpu-affinity", &mut params.worker_cpu_affinity);
    p.time("worker-shutdown-timeout", &mut params.worker_shutdown_timeout);
    p.raw("worker-connections", &mut params.worker_connections);
    p.raw("worker-rlimit-nofile", &mut params.worker_rlimit_nofile);

    p.number("keepalive", &mut params.keepalive);
    p.time("keepalive-timeout", &mut params.keepalive_timeout);
    p.number("keepalive-requests", &mut params.keepalive_requests);

    p.number("max-fails", &mut params.max_fails);
    p.number("max-conns", &mut params.max_conns);
    p.time("fail-timeout", &mut params.fail_timeout);
    p.size("upstream-zone-size", &mut params.upstream_zone_size);

    p.list("resolver-addresses", ',', &mut params.resolver_addresses);
    p.bool("resolver-ipv6", &mut params.resolver_ipv6);
    p.time("resolver-valid", &mut params.resolver_valid);
    p.time("resolver-timeout", &mut params.resolver_timeout);

    params.main_template = data.get("main-template").cloned();
    params.ingress_template = data.get("ingress-template").cloned();
    params.virtual_server_template = data.get("virtualserver-template").cloned();
    params.transport_server_template = data.get("transportserver-template").cloned();

    let mut warnings = Warnings::default();
    warnings.add_all(Kind::ConfigMap, &ResourceKey::of(cm), p.errors);
    (params, warnings)
}

struct Parser<'a> {
    data: &'a BTreeMap<String, String>,
    errors: Vec<String>,
}

// === impl Parser ===

impl Parser<'_> {
    fn string(&mut self, key: &str, field: &mut String, parse: impl FnOnce(&str) -> Option<String>) {
        let Some(value) = self.data.get(key) else {
            return;
        };
        match parse(value.trim()) {
            Some(v) => *field = v,
            None => self.errors.push(format!("invalid value for {key}: {value:?}")),
        }
    }

    fn raw(&mut self, key: &str, field: &mut String) {
        self.string(key, field, |v| Some(v.to_string()));
    }

    fn time(&mut self, key: &str, field: &mut String) {
        self.string(key, field, |v| is_valid_time(v).then(|| v.to_string()));
    }

    fn size(&mut self, key: &str, field: &mut String) {
        self.string(key, field, |v| is_valid_size(v).then(|| v.to_string()));
    }

    fn bool(&mut self, key: &str, field: &mut bool) {
        let Some(value) = self.data.get(key) else {
            return;
        };
        match parse_bool(value.trim()) {
            Some(v) => *field = v,
            None => self.errors.push(format!("invalid boolean for {key}: {value:?}")),
        }
    }

    fn number<N: FromStr>(&mut self, key: &str, field: &mut N) {
        let Some(value) = self.data.get(key) else {
            return;
        };
        match value.trim().parse() {
            Ok(v) => *field = v,
            Err(_) => self.errors.push(format!("invalid number for {key}: {value:?}")),
        }
    }

    fn list(&mut self, key: &str, sep: char, field: &mut Vec<String>) {
        if let Some(value) = self.data.get(key) {
            *field = split_list(value, sep);
        }
    }
}
