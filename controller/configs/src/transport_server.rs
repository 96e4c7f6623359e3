use crate::upstream;
use nginx_ingress_core::{
    endpoints_key,
    model::v2::{
        StreamHealthCheck, StreamServer, StreamUpstream, StreamUpstreamServer,
        TransportServerConfig,
    },
    passthrough_socket, ConfigParams, Kind, ResourceKey, StaticParams, TransportServerEx,
    Warnings, EMPTY_UPSTREAM_SERVER,
};
use nginx_ingress_k8s_api::transport_server::{TransportServerSpec, TransportServerUpstream};

const DEFAULT_LB_METHOD: &str = "random two least_conn";
const DEFAULT_CONNECT_TIMEOUT: &str = "60s";
const DEFAULT_TIMEOUT: &str = "10m";
const DEFAULT_NEXT_UPSTREAM_TIMEOUT: &str = "0";
const DEFAULT_MAX_FAILS: u32 = 1;
const DEFAULT_FAIL_TIMEOUT: &str = "10s";
const UPSTREAM_ZONE_SIZE: &str = "512k";

/// Builds the stream configuration of a TransportServer.
///
/// A TLS passthrough server listens on its own unix socket; the shared passthrough listener
/// routes connections to it by SNI. Other servers listen on the port of their
/// GlobalConfiguration listener.
pub fn generate_transport_server_config(
    ex: &TransportServerEx,
    params: &ConfigParams,
    static_params: &StaticParams,
) -> (TransportServerConfig, Warnings) {
    let key = ResourceKey::of(&ex.transport_server);
    let spec = &ex.transport_server.spec;
    let plus = static_params.nginx_plus;
    let mut msgs = Vec::new();

    let upstreams = spec
        .upstreams
        .iter()
        .map(|u| stream_upstream(ex, &key, u, params, plus, &mut msgs))
        .collect::<Vec<_>>();

    let pass = spec.action.as_ref().map(|a| a.pass.as_str()).unwrap_or_default();
    let passed = spec.upstreams.iter().find(|u| u.name == pass);
    let proxy_pass = match passed {
        Some(u) => upstream_name(&key, &u.name),
        None => {
            msgs.push(format!(
                "action passes to undefined upstream {pass:?}; connections are refused"
            ));
            EMPTY_UPSTREAM_SERVER.to_string()
        }
    };

    let health_check = passed.and_then(|u| {
        let hc = u.health_check.as_ref().filter(|hc| hc.enable)?;
        if !plus {
            msgs.push(format!(
                "upstream {}: healthCheck requires NGINX Plus and is ignored",
                u.name
            ));
            return None;
        }
        Some(StreamHealthCheck {
            timeout: hc.timeout.clone().unwrap_or_else(|| "5s".to_string()),
            jitter: hc.jitter.clone().unwrap_or_else(|| "0s".to_string()),
            port: hc.port.unwrap_or(u.port),
            interval: hc.interval.clone().unwrap_or_else(|| "5s".to_string()),
            passes: hc.passes.unwrap_or(1),
            fails: hc.fails.unwrap_or(1),
        })
    });

    let udp = spec.is_udp();
    let upstream_parameters = spec.upstream_parameters.clone().unwrap_or_default();
    let server = StreamServer {
        name: key.name.clone(),
        namespace: key.namespace.clone(),
        status_zone: status_zone(spec),
        listens: listens(ex, &key, static_params),
        tls_passthrough: spec.is_tls_passthrough(),
        proxy_pass,
        proxy_requests: upstream_parameters.udp_requests.filter(|_| udp).unwrap_or(0),
        proxy_responses: upstream_parameters.udp_responses.filter(|_| udp).unwrap_or(0),
        proxy_connect_timeout: upstream_parameters
            .connect_timeout
            .unwrap_or_else(|| DEFAULT_CONNECT_TIMEOUT.to_string()),
        proxy_timeout: spec
            .session_parameters
            .as_ref()
            .and_then(|s| s.timeout.clone())
            .unwrap_or_else(|| DEFAULT_TIMEOUT.to_string()),
        proxy_next_upstream: upstream_parameters.next_upstream,
        proxy_next_upstream_timeout: upstream_parameters
            .next_upstream_timeout
            .unwrap_or_else(|| DEFAULT_NEXT_UPSTREAM_TIMEOUT.to_string()),
        proxy_next_upstream_tries: upstream_parameters.next_upstream_tries.unwrap_or(0),
        health_check,
        server_snippets: snippets(spec.server_snippets.as_deref(), "server-snippets", static_params, &mut msgs),
    };

    let config = TransportServerConfig {
        server,
        upstreams,
        stream_snippets: snippets(spec.stream_snippets.as_deref(), "stream-snippets", static_params, &mut msgs),
    };
    let mut warnings = Warnings::default();
    warnings.add_all(Kind::TransportServer, &key, msgs);
    (config, warnings)
}

fn upstream_name(key: &ResourceKey, upstream: &str) -> String {
    format!("ts_{}_{}_{upstream}", key.namespace, key.name)
}

fn stream_upstream(
    ex: &TransportServerEx,
    key: &ResourceKey,
    u: &TransportServerUpstream,
    params: &ConfigParams,
    plus: bool,
    msgs: &mut Vec<String>,
) -> StreamUpstream {
    let servers = upstream::servers(
        &ex.endpoints,
        &endpoints_key(&key.namespace, &u.service, None, u.port),
        ex.external_name_services
            .contains(&format!("{}/{}", key.namespace, u.service)),
        plus,
        params,
        msgs,
    );

    let method = match u.load_balancing_method.as_deref() {
        Some(method) if upstream::is_valid_stream_lb_method(method, plus) => method,
        Some(method) => {
            msgs.push(format!(
                "upstream {}: invalid load balancing method {method:?}; {DEFAULT_LB_METHOD:?} is used",
                u.name
            ));
            DEFAULT_LB_METHOD
        }
        None => DEFAULT_LB_METHOD,
    };

    let fail_timeout = u
        .fail_timeout
        .clone()
        .unwrap_or_else(|| DEFAULT_FAIL_TIMEOUT.to_string());
    StreamUpstream {
        name: upstream_name(key, &u.name),
        servers: servers
            .addresses
            .into_iter()
            .map(|address| StreamUpstreamServer {
                address,
                max_fails: u.max_fails.unwrap_or(DEFAULT_MAX_FAILS),
                max_conns: u.max_conns.unwrap_or(0),
                fail_timeout: fail_timeout.clone(),
            })
            .collect(),
        load_balancing_method: upstream::lb_method_directive(method),
        resolve: servers.resolve,
        upstream_zone_size: UPSTREAM_ZONE_SIZE.to_string(),
        upstream_labels: upstream::labels(&u.service, "transportserver", &key.name, &key.namespace),
    }
}

fn listens(ex: &TransportServerEx, key: &ResourceKey, static_params: &StaticParams) -> Vec<String> {
    let spec = &ex.transport_server.spec;
    if spec.is_tls_passthrough() {
        return vec![format!("{} proxy_protocol", passthrough_socket(key))];
    }
    let suffix = if spec.is_udp() { " udp" } else { "" };
    let mut listens = vec![format!("{}{suffix}", ex.listener_port)];
    if !static_params.disable_ipv6 {
        listens.push(format!("[::]:{}{suffix}", ex.listener_port));
    }
    listens
}

fn status_zone(spec: &TransportServerSpec) -> String {
    if spec.is_tls_passthrough() {
        spec.host.clone().unwrap_or_default()
    } else {
        spec.listener.name.clone()
    }
}

fn snippets(
    snippet: Option<&str>,
    what: &str,
    static_params: &StaticParams,
    msgs: &mut Vec<String>,
) -> Vec<String> {
    match snippet.filter(|s| !s.trim().is_empty()) {
        Some(snippet) if static_params.enable_snippets => vec![snippet.to_string()],
        Some(_) => {
            msgs.push(format!("{what} are ignored because snippets are disabled"));
            Vec::new()
        }
        None => Vec::new(),
    }
}
