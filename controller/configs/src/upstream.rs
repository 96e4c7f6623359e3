use nginx_ingress_core::{
    ex::Endpoints, model::UpstreamLabels, ConfigParams, EMPTY_UPSTREAM_SERVER,
};

const OSS_LB_METHODS: &[&str] = &[
    "round_robin",
    "least_conn",
    "ip_hash",
    "random",
    "random two",
    "random two least_conn",
];

const PLUS_LB_METHODS: &[&str] = &[
    "least_time header",
    "least_time last_byte",
    "least_time header inflight",
    "least_time last_byte inflight",
    "random two least_time=header",
    "random two least_time=last_byte",
];

const STREAM_OSS_LB_METHODS: &[&str] = &[
    "round_robin",
    "least_conn",
    "random",
    "random two",
    "random two least_conn",
];

const STREAM_PLUS_LB_METHODS: &[&str] = &[
    "least_time connect",
    "least_time first_byte",
    "least_time last_byte",
    "least_time connect inflight",
    "least_time first_byte inflight",
    "least_time last_byte inflight",
    "random two least_time=connect",
    "random two least_time=first_byte",
    "random two least_time=last_byte",
];

/// The servers of one upstream, as rendered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Servers {
    pub addresses: Vec<String>,
    /// Set when the addresses are DNS names NGINX re-resolves at runtime.
    pub resolve: bool,
}

pub(crate) fn is_valid_lb_method(method: &str, nginx_plus: bool) -> bool {
    OSS_LB_METHODS.contains(&method)
        || (nginx_plus && PLUS_LB_METHODS.contains(&method))
        || is_hash(method)
}

/// `hash <key>` with an optional `consistent` flag.
fn is_hash(method: &str) -> bool {
    match method.strip_prefix("hash ") {
        Some(key) => {
            let key = key.strip_suffix(" consistent").unwrap_or(key);
            !key.trim().is_empty() && !key.contains(char::is_whitespace)
        }
        None => false,
    }
}

pub(crate) fn is_valid_stream_lb_method(method: &str, nginx_plus: bool) -> bool {
    STREAM_OSS_LB_METHODS.contains(&method)
        || (nginx_plus && STREAM_PLUS_LB_METHODS.contains(&method))
        || is_hash(method)
}

/// The load balancing directive for a method. Round robin is NGINX's default and renders
/// nothing.
pub(crate) fn lb_method_directive(method: &str) -> String {
    match method {
        "" | "round_robin" => String::new(),
        method => method.to_string(),
    }
}

/// Looks up the addresses of an upstream.
///
/// ExternalName services need a resolver to be re-resolved by NGINX Plus; without one the
/// upstream is emptied. An upstream without addresses always gets the placeholder server.
pub(crate) fn servers(
    endpoints: &Endpoints,
    key: &str,
    external_name: bool,
    nginx_plus: bool,
    params: &ConfigParams,
    warnings: &mut Vec<String>,
) -> Servers {
    let mut addresses = endpoints.get(key).cloned().unwrap_or_default();
    let mut resolve = false;
    if external_name && nginx_plus {
        if params.resolver_addresses.is_empty() {
            warnings.push(format!(
                "service {} is of type ExternalName, which requires a resolver; configure resolver-addresses",
                service_of(key)
            ));
            addresses.clear();
        } else {
            resolve = true;
        }
    }
    if addresses.is_empty() {
        addresses.push(EMPTY_UPSTREAM_SERVER.to_string());
        resolve = false;
    }
    Servers { addresses, resolve }
}

pub(crate) fn labels(
    service: &str,
    resource_type: &str,
    name: &str,
    namespace: &str,
) -> UpstreamLabels {
    UpstreamLabels {
        service: service.to_string(),
        resource_type: resource_type.to_string(),
        resource_name: name.to_string(),
        resource_namespace: namespace.to_string(),
    }
}

fn service_of(endpoints_key: &str) -> &str {
    let mut parts = endpoints_key.split('|');
    parts.next();
    parts.next().unwrap_or(endpoints_key)
}
