use crate::{
    annotations::{
        filter_master_annotations, merge_minion_annotations, parse_ingress_annotations,
        IngressSettings, PathRegex,
    },
    listen, secrets, upstream,
};
use nginx_ingress_core::{
    backend_port, endpoints_key,
    model::v1::{
        BasicAuth, HealthCheck, IngressMeta, IngressNginxConfig, JwtAuth, JwtRedirectLocation,
        LimitReq, LimitReqZone, Location, Server, Upstream, UpstreamServer,
    },
    ConfigParams, IngressEx, Kind, MergeableIngresses, ResourceKey, StaticParams, Warnings,
};
use nginx_ingress_k8s_api::{
    secret_type, HTTPIngressPath, IngressRule, IngressServiceBackend, ResourceExt,
};
use std::collections::{BTreeMap, BTreeSet};

/// Builds the configuration of a standalone Ingress.
pub fn generate_ingress_config(
    ex: &IngressEx,
    params: &ConfigParams,
    static_params: &StaticParams,
) -> (IngressNginxConfig, Warnings) {
    let key = ResourceKey::of(&ex.ingress);
    let annotations = ex.ingress.annotations().clone();
    let (settings, mut msgs) = parse_ingress_annotations(&annotations, params, static_params);
    let mut b = Builder::new(params, static_params);

    let spec = ex.ingress.spec.clone().unwrap_or_default();
    let default_backend = spec.default_backend.as_ref().and_then(|b| b.service.as_ref());
    let rules = spec.rules.unwrap_or_default();

    let mut servers = Vec::with_capacity(rules.len().max(1));
    for rule in &rules {
        let host = rule.host.as_deref().unwrap_or_default();
        let mut server = b.server(ex, &key, host, &settings, &mut msgs);
        server.locations = b.rule_locations(ex, &key, rule, &settings, None, &mut msgs);

        if let Some(backend) = default_backend {
            if !server.locations.iter().any(|l| l.path == "/") {
                let location = b.location(ex, &key, "", "/", backend, &settings, None, &mut msgs);
                server.locations.push(location);
            }
        }
        servers.push(server);
    }
    if rules.is_empty() {
        if let Some(backend) = default_backend {
            let mut server = b.server(ex, &key, "", &settings, &mut msgs);
            let location = b.location(ex, &key, "", "/", backend, &settings, None, &mut msgs);
            server.locations.push(location);
            servers.push(server);
        }
    }

    for server in &mut servers {
        server.health_checks = b.health_checks(&server.locations, &settings);
    }

    let limit_req_zones = limit_req_zone(&key, &settings).into_iter().collect();
    let config = IngressNginxConfig {
        upstreams: b.upstreams,
        servers,
        keepalive: settings.keepalive,
        ingress: IngressMeta {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            annotations,
        },
        limit_req_zones,
        dynamic_ssl_reload_enabled: static_params.dynamic_ssl_reload,
        static_ssl_path: static_params.secrets_dir.clone(),
    };

    let mut warnings = Warnings::default();
    warnings.add_all(Kind::Ingress, &key, msgs);
    (config, warnings)
}

/// Builds the configuration of a master Ingress merged with its minions.
///
/// The master contributes the server: its host, TLS and server-level annotations. Each minion
/// contributes locations for the master's host. When two minions define the same path, the
/// first keeps it.
pub fn generate_mergeable_ingress_config(
    mergeable: &MergeableIngresses,
    params: &ConfigParams,
    static_params: &StaticParams,
) -> (IngressNginxConfig, Warnings) {
    let master = &mergeable.master;
    let master_key = ResourceKey::of(&master.ingress);
    let mut warnings = Warnings::default();
    let mut b = Builder::new(params, static_params);

    let mut master_annotations = master.ingress.annotations().clone();
    let mut msgs: Vec<String> = filter_master_annotations(&mut master_annotations)
        .into_iter()
        .map(|a| format!("annotation {a} is ignored on a master"))
        .collect();
    let (settings, parse_msgs) =
        parse_ingress_annotations(&master_annotations, params, static_params);
    msgs.extend(parse_msgs);

    let spec = master.ingress.spec.clone().unwrap_or_default();
    let master_rule = spec.rules.unwrap_or_default().into_iter().next().unwrap_or_default();
    let host = master_rule.host.clone().unwrap_or_default();
    if master_rule.http.is_some_and(|http| !http.paths.is_empty()) {
        msgs.push("paths of a master Ingress are ignored".to_string());
    }

    let mut server = b.server(master, &master_key, &host, &settings, &mut msgs);
    let mut limit_req_zones = Vec::new();
    let mut paths = BTreeSet::new();
    let mut health_checks = Vec::new();

    for minion in &mergeable.minions {
        let minion_key = ResourceKey::of(&minion.ingress);
        let mut annotations = minion.ingress.annotations().clone();
        let mut minion_msgs: Vec<String> =
            merge_minion_annotations(&mut annotations, &master_annotations)
                .into_iter()
                .map(|a| format!("annotation {a} is ignored on a minion"))
                .collect();
        let (minion_settings, parse_msgs) =
            parse_ingress_annotations(&annotations, params, static_params);
        minion_msgs.extend(parse_msgs);

        let meta = IngressMeta {
            name: minion_key.name.clone(),
            namespace: minion_key.namespace.clone(),
            annotations,
        };
        let jwt = b.location_jwt(minion, master, &minion_key, &minion_settings, &mut minion_msgs);
        let basic = b.location_basic_auth(minion, master, &minion_key, &minion_settings, &mut minion_msgs);

        let rules = minion
            .ingress
            .spec
            .as_ref()
            .and_then(|s| s.rules.clone())
            .unwrap_or_default();
        let mut locations = Vec::new();
        for rule in rules.iter().filter(|r| r.host.as_deref().unwrap_or_default() == host) {
            for mut location in
                b.rule_locations(minion, &minion_key, rule, &minion_settings, Some(&meta), &mut minion_msgs)
            {
                if !paths.insert(location.path.clone()) {
                    minion_msgs.push(format!(
                        "path {} is already defined by another minion and is ignored",
                        location.path
                    ));
                    continue;
                }
                match &jwt {
                    Ok(jwt) => location.jwt_auth = jwt.clone(),
                    Err(code) => location.auth_error_return = Some(*code),
                }
                match &basic {
                    Ok(basic) => location.basic_auth = basic.clone(),
                    Err(code) => location.auth_error_return = Some(*code),
                }
                locations.push(location);
            }
        }

        if !locations.is_empty() {
            limit_req_zones.extend(limit_req_zone(&minion_key, &minion_settings));
        }
        health_checks.extend(b.health_checks(&locations, &minion_settings));
        server.locations.extend(locations);
        warnings.add_all(Kind::Ingress, &minion_key, minion_msgs);
    }
    server.health_checks = health_checks;

    let config = IngressNginxConfig {
        upstreams: b.upstreams,
        servers: vec![server],
        keepalive: settings.keepalive,
        ingress: IngressMeta {
            name: master_key.name.clone(),
            namespace: master_key.namespace.clone(),
            annotations: master_annotations,
        },
        limit_req_zones,
        dynamic_ssl_reload_enabled: static_params.dynamic_ssl_reload,
        static_ssl_path: static_params.secrets_dir.clone(),
    };
    warnings.add_all(Kind::Ingress, &master_key, msgs);
    (config, warnings)
}

/// The status a location answers with when its authentication secret is unusable.
const AUTH_ERROR_STATUS: u16 = 503;

fn limit_req_zone(key: &ResourceKey, settings: &IngressSettings) -> Option<LimitReqZone> {
    settings.limit_req.as_ref().map(|l| LimitReqZone {
        name: key.to_string(),
        key: l.key.clone(),
        size: l.zone_size.clone(),
        rate: l.rate.clone(),
    })
}

struct Builder<'a> {
    params: &'a ConfigParams,
    static_params: &'a StaticParams,
    upstreams: Vec<Upstream>,
    upstream_names: BTreeSet<String>,
}

// === impl Builder ===

impl<'a> Builder<'a> {
    fn new(params: &'a ConfigParams, static_params: &'a StaticParams) -> Self {
        Self {
            params,
            static_params,
            upstreams: Vec::new(),
            upstream_names: BTreeSet::new(),
        }
    }

    fn server(
        &self,
        ex: &IngressEx,
        key: &ResourceKey,
        host: &str,
        settings: &IngressSettings,
        msgs: &mut Vec<String>,
    ) -> Server {
        let name = if host.is_empty() { "_" } else { host };
        let mut server = Server {
            name: name.to_string(),
            server_tokens: settings.server_tokens.clone(),
            http2: settings.http2,
            status_zone: if self.static_params.nginx_plus {
                name.to_string()
            } else {
                String::new()
            },
            listens: listen::http(&settings.listen_ports, settings.proxy_protocol, self.static_params),
            ssl_ciphers: settings.ssl_ciphers.clone(),
            ssl_prefer_server_ciphers: settings.ssl_prefer_server_ciphers,
            redirect_to_https: settings.redirect_to_https,
            ssl_redirect: settings.ssl_redirect,
            hsts_max_age: settings.hsts_max_age,
            hsts_include_subdomains: settings.hsts_include_subdomains,
            hsts_behind_proxy: settings.hsts_behind_proxy,
            real_ip_header: settings.real_ip_header.clone(),
            real_ip_recursive: settings.real_ip_recursive,
            server_snippets: settings.server_snippets.clone(),
            ..Default::default()
        };

        let tls = ex
            .ingress
            .spec
            .as_ref()
            .and_then(|s| s.tls.as_ref())
            .and_then(|tls| {
                tls.iter().find(|t| {
                    t.hosts
                        .as_ref()
                        .is_some_and(|hosts| hosts.iter().any(|h| h == host))
                })
            });
        if let Some(tls) = tls {
            server.ssl = true;
            server.listens.extend(listen::https(
                &settings.listen_ports_ssl,
                settings.proxy_protocol,
                self.static_params,
            ));
            match self.certificate(ex, key, tls.secret_name.as_deref()) {
                Ok(path) => {
                    server.ssl_certificate = path.clone();
                    server.ssl_certificate_key = path;
                }
                Err(msg) => {
                    if let Some(msg) = msg {
                        msgs.push(msg);
                    }
                    server.ssl_reject_handshake = true;
                }
            }
        }
        server.hsts = settings.hsts && (server.ssl || settings.hsts_behind_proxy);
        server.set_real_ip_from =
            listen::set_real_ip_from(&settings.set_real_ip_from, server.ssl, self.static_params);

        match self.jwt(ex, None, key, settings) {
            Ok(Some((jwt, redirect))) => {
                server.jwt_auth = Some(jwt);
                server.jwt_redirect_locations.extend(redirect);
            }
            Ok(None) => {}
            Err(msg) => {
                msgs.push(msg);
                server.auth_error_return = Some(AUTH_ERROR_STATUS);
            }
        }
        match self.basic_auth(ex, None, key, settings) {
            Ok(basic) => server.basic_auth = basic,
            Err(msg) => {
                msgs.push(msg);
                server.auth_error_return = Some(AUTH_ERROR_STATUS);
            }
        }
        server
    }

    /// Selects the certificate of a TLS server. `Err(None)` rejects the handshake without a
    /// warning: no secret was named and no fallback certificate exists.
    fn certificate(
        &self,
        ex: &IngressEx,
        key: &ResourceKey,
        secret: Option<&str>,
    ) -> Result<String, Option<String>> {
        match secret {
            Some(name) => secrets::path(
                &ex.secret_refs,
                &key.namespace,
                name,
                secret_type::TLS,
                self.static_params,
            )
            .map_err(|e| Some(format!("{e}; TLS handshakes are rejected"))),
            None => self
                .static_params
                .wildcard_tls_secret
                .clone()
                .or_else(|| self.static_params.default_tls_secret.clone())
                .ok_or(None),
        }
    }

    fn jwt(
        &self,
        ex: &IngressEx,
        fallback: Option<&IngressEx>,
        key: &ResourceKey,
        settings: &IngressSettings,
    ) -> Result<Option<(JwtAuth, Option<JwtRedirectLocation>)>, String> {
        let Some(jwt) = &settings.jwt else {
            return Ok(None);
        };
        let path = lookup(ex, fallback, key, &jwt.key, secret_type::JWK, self.static_params)
            .map_err(|e| format!("{e}; JWT authentication fails with {AUTH_ERROR_STATUS}"))?;
        let redirect = (!jwt.login_url.is_empty()).then(|| JwtRedirectLocation {
            name: format!("@login_url_{}-{}", key.namespace, key.name),
            login_url: jwt.login_url.clone(),
        });
        let auth = JwtAuth {
            key: path,
            realm: jwt.realm.clone(),
            token: jwt.token.clone(),
            redirect_location_name: redirect.as_ref().map(|r| r.name.clone()).unwrap_or_default(),
        };
        Ok(Some((auth, redirect)))
    }

    fn basic_auth(
        &self,
        ex: &IngressEx,
        fallback: Option<&IngressEx>,
        key: &ResourceKey,
        settings: &IngressSettings,
    ) -> Result<Option<BasicAuth>, String> {
        let Some(basic) = &settings.basic_auth else {
            return Ok(None);
        };
        let path = lookup(ex, fallback, key, &basic.secret, secret_type::HTPASSWD, self.static_params)
            .map_err(|e| format!("{e}; basic authentication fails with {AUTH_ERROR_STATUS}"))?;
        Ok(Some(BasicAuth {
            secret: path,
            realm: basic.realm.clone(),
        }))
    }

    /// JWT authentication of a minion's locations. Minions inherit the master's annotations,
    /// so the secret may have been resolved for the master.
    fn location_jwt(
        &self,
        minion: &IngressEx,
        master: &IngressEx,
        key: &ResourceKey,
        settings: &IngressSettings,
        msgs: &mut Vec<String>,
    ) -> Result<Option<JwtAuth>, u16> {
        self.jwt(minion, Some(master), key, settings)
            .map(|jwt| jwt.map(|(jwt, _)| jwt))
            .map_err(|msg| {
                msgs.push(msg);
                AUTH_ERROR_STATUS
            })
    }

    fn location_basic_auth(
        &self,
        minion: &IngressEx,
        master: &IngressEx,
        key: &ResourceKey,
        settings: &IngressSettings,
        msgs: &mut Vec<String>,
    ) -> Result<Option<BasicAuth>, u16> {
        self.basic_auth(minion, Some(master), key, settings)
            .map_err(|msg| {
                msgs.push(msg);
                AUTH_ERROR_STATUS
            })
    }

    fn rule_locations(
        &mut self,
        ex: &IngressEx,
        key: &ResourceKey,
        rule: &IngressRule,
        settings: &IngressSettings,
        minion: Option<&IngressMeta>,
        msgs: &mut Vec<String>,
    ) -> Vec<Location> {
        let host = rule.host.as_deref().unwrap_or_default();
        let paths = rule.http.as_ref().map(|h| h.paths.as_slice()).unwrap_or_default();
        let mut locations = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(backend) = path.backend.service.as_ref() else {
                msgs.push(format!(
                    "path {} has no service backend and is ignored",
                    path.path.as_deref().unwrap_or("/")
                ));
                continue;
            };
            let location_path = location_path(path, settings.path_regex);
            let location =
                self.location(ex, key, host, &location_path, backend, settings, minion, msgs);
            locations.push(location);
        }
        locations
    }

    #[allow(clippy::too_many_arguments)]
    fn location(
        &mut self,
        ex: &IngressEx,
        key: &ResourceKey,
        host: &str,
        path: &str,
        backend: &IngressServiceBackend,
        settings: &IngressSettings,
        minion: Option<&IngressMeta>,
        msgs: &mut Vec<String>,
    ) -> Location {
        let service = backend.name.as_str();
        let upstream_name = self.upstream(ex, key, host, backend, settings, msgs);

        let grpc = settings.grpc_services.contains(service);
        let ssl = settings.ssl_services.contains(service);
        let scheme = match (grpc, ssl) {
            (true, true) => "grpcs",
            (true, false) => "grpc",
            (false, true) => "https",
            (false, false) => "http",
        };
        let rewrite = settings
            .rewrites
            .get(service)
            .or(settings.rewrite_target.as_ref())
            .cloned()
            .unwrap_or_default();

        Location {
            path: path.to_string(),
            proxy_pass: format!("{scheme}://{upstream_name}"),
            upstream_name,
            service_name: service.to_string(),
            grpc,
            websocket: settings.websocket_services.contains(service),
            rewrite,
            proxy_connect_timeout: settings.proxy_connect_timeout.clone(),
            proxy_read_timeout: settings.proxy_read_timeout.clone(),
            proxy_send_timeout: settings.proxy_send_timeout.clone(),
            client_max_body_size: settings.client_max_body_size.clone(),
            proxy_buffering: settings.proxy_buffering,
            proxy_buffers: settings.proxy_buffers.clone(),
            proxy_buffer_size: settings.proxy_buffer_size.clone(),
            proxy_max_temp_file_size: settings.proxy_max_temp_file_size.clone(),
            proxy_set_headers: settings.proxy_set_headers.clone(),
            proxy_hide_headers: settings.proxy_hide_headers.clone(),
            proxy_pass_headers: settings.proxy_pass_headers.clone(),
            location_snippets: settings.location_snippets.clone(),
            minion: minion.cloned(),
            limit_req: settings.limit_req.as_ref().map(|l| LimitReq {
                zone: key.to_string(),
                burst: l.burst,
                delay: l.delay,
                no_delay: l.no_delay,
                reject_code: l.reject_code,
                dry_run: l.dry_run,
                log_level: l.log_level.clone(),
            }),
            jwt_auth: None,
            basic_auth: None,
            auth_error_return: None,
        }
    }

    /// Adds the upstream of a backend once and returns its name.
    fn upstream(
        &mut self,
        ex: &IngressEx,
        key: &ResourceKey,
        host: &str,
        backend: &IngressServiceBackend,
        settings: &IngressSettings,
        msgs: &mut Vec<String>,
    ) -> String {
        let service = backend.name.as_str();
        let port = backend_port(backend.port.as_ref());
        let name = format!("{}-{}-{host}-{service}-{port}", key.namespace, key.name);
        if !self.upstream_names.insert(name.clone()) {
            return name;
        }

        let plus = self.static_params.nginx_plus;
        let servers = upstream::servers(
            &ex.endpoints,
            &endpoints_key(&key.namespace, service, None, &port),
            ex.external_name_services.contains(service),
            plus,
            self.params,
            msgs,
        );
        self.upstreams.push(Upstream {
            name: name.clone(),
            servers: servers
                .addresses
                .into_iter()
                .map(|address| UpstreamServer {
                    address,
                    max_fails: settings.max_fails,
                    max_conns: settings.max_conns,
                    fail_timeout: settings.fail_timeout.clone(),
                    slow_start: if plus { settings.slow_start.clone() } else { String::new() },
                    resolve: servers.resolve,
                })
                .collect(),
            lb_method: upstream::lb_method_directive(&settings.lb_method),
            upstream_zone_size: settings.upstream_zone_size.clone(),
            sticky_cookie: settings.sticky_cookies.get(service).cloned().unwrap_or_default(),
            resolve: servers.resolve,
            upstream_labels: upstream::labels(service, "ingress", &key.name, &key.namespace),
        });
        name
    }

    fn health_checks(&self, locations: &[Location], settings: &IngressSettings) -> Vec<HealthCheck> {
        if !self.static_params.nginx_plus || !settings.health_checks {
            return Vec::new();
        }
        let mut seen = BTreeSet::new();
        locations
            .iter()
            .filter(|l| seen.insert(l.upstream_name.clone()))
            .map(|l| HealthCheck {
                upstream_name: l.upstream_name.clone(),
                uri: "/".to_string(),
                scheme: l
                    .proxy_pass
                    .split_once("://")
                    .map(|(scheme, _)| scheme.to_string())
                    .unwrap_or_else(|| "http".to_string()),
                interval: "5s".to_string(),
                fails: 1,
                passes: 1,
                mandatory: settings.health_checks_mandatory,
                mandatory_queue: settings.health_checks_mandatory_queue,
            })
            .collect()
    }
}

/// Looks a secret up in the resource's own references, then in the fallback's.
fn lookup(
    ex: &IngressEx,
    fallback: Option<&IngressEx>,
    key: &ResourceKey,
    name: &str,
    expected_type: &str,
    static_params: &StaticParams,
) -> Result<String, String> {
    let refs = match fallback {
        Some(fallback) => {
            let mut refs: BTreeMap<_, _> = fallback.secret_refs.clone();
            refs.extend(ex.secret_refs.clone());
            refs
        }
        None => ex.secret_refs.clone(),
    };
    secrets::path(&refs, &key.namespace, name, expected_type, static_params)
}

fn location_path(path: &HTTPIngressPath, regex: Option<PathRegex>) -> String {
    let p = match path.path.as_deref() {
        None | Some("") => "/",
        Some(p) => p,
    };
    match regex {
        Some(PathRegex::CaseSensitive) => format!("~ \"^{p}\""),
        Some(PathRegex::CaseInsensitive) => format!("~* \"^{p}\""),
        Some(PathRegex::Exact) => format!("= \"{p}\""),
        None if path.path_type == "Exact" => format!("= {p}"),
        None => p.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_path(path: &str, path_type: &str) -> HTTPIngressPath {
        HTTPIngressPath {
            path: Some(path.to_string()),
            path_type: path_type.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn location_modifiers() {
        let prefix = mk_path("/coffee", "Prefix");
        assert_eq!(location_path(&prefix, None), "/coffee");
        assert_eq!(location_path(&prefix, Some(PathRegex::CaseSensitive)), "~ \"^/coffee\"");
        assert_eq!(location_path(&prefix, Some(PathRegex::CaseInsensitive)), "~* \"^/coffee\"");
        assert_eq!(location_path(&prefix, Some(PathRegex::Exact)), "= \"/coffee\"");
        assert_eq!(location_path(&mk_path("/tea", "Exact"), None), "= /tea");
        assert_eq!(location_path(&mk_path("", "Prefix"), None), "/");
    }

    #[test]
    fn unknown_annotations_are_ignored() {
        let (settings, msgs) = parse_ingress_annotations(
            &maplit::btreemap! {
                "nginx.org/unknown".to_string() => "value".to_string(),
                crate::annotations::PROXY_READ_TIMEOUT.to_string() => "5s".to_string(),
            },
            &ConfigParams::default(),
            &StaticParams::default(),
        );
        assert!(msgs.is_empty());
        assert_eq!(settings.proxy_read_timeout, "5s");
    }
}
