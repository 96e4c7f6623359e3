//! Builds the configuration of a VirtualServer together with the VirtualServerRoutes its
//! routes delegate to. Both render into the VirtualServer's file.
//!
//! Routes become locations. Splits and matches need a level of indirection: the route's own
//! location redirects to a variable that `split_clients` or `map` blocks resolve to one of
//! several internal locations:
//!
//! ```text
//!   location /tea ──rewrite──> $vs_default_cafe_splits_0 ─┬─> /internal_location_splits_0_split_0
//!                                                         └─> /internal_location_splits_0_split_1
//! ```
//!
//! Every variable, zone and internal location name is derived from the VirtualServer's key
//! and the position of the route in the spec, so the same spec always renders the same file.

use crate::{
    listen,
    policies::{self, Context, Policies, Scope},
    secrets, upstream,
};
use nginx_ingress_core::{
    endpoints_key,
    model::{
        v2::{
            AddHeader, Distribution, ErrorPage, ErrorPageLocation, HealthCheck,
            InternalRedirectLocation, KeyVal, KeyValZone, Location, Map, Parameter, Return,
            Server, SessionCookie, SplitClient, Ssl, StatusMatch, TlsRedirect,
            TwoWaySplitClients, Upstream, UpstreamServer, Queue, VirtualServerConfig,
        },
        Header,
    },
    ConfigParams, Kind, ResourceKey, StaticParams, VirtualServerEx, Warnings,
};
use nginx_ingress_k8s_api::{
    secret_type,
    virtual_server::{self as spec, Action, ActionProxy, Condition, PolicyReference, Route, Split},
    VirtualServerRoute,
};

const KEYVAL_ZONE_SIZE: &str = "100k";
const DEFAULT_NEXT_UPSTREAM: &str = "error timeout";
const DEFAULT_NEXT_UPSTREAM_TIMEOUT: &str = "0s";
const DEFAULT_QUEUE_TIMEOUT: &str = "60s";
const DEFAULT_REDIRECT_CODE: u16 = 301;
const BAD_GATEWAY: u16 = 502;

/// Builds the configuration of a VirtualServer.
///
/// Warnings are attributed to the resource they concern: problems within a delegated
/// subroute are reported against its VirtualServerRoute.
pub fn generate_virtual_server_config(
    ex: &VirtualServerEx,
    params: &ConfigParams,
    static_params: &StaticParams,
) -> (VirtualServerConfig, Warnings) {
    let vs = ResourceKey::of(&ex.virtual_server);
    let mut b = Builder {
        ex,
        variable_prefix: format!("vs_{}_{}", vs.namespace, vs.name).replace('-', "_"),
        vs,
        params,
        static_params,
        config: VirtualServerConfig::default(),
        warnings: Warnings::default(),
        splits: 0,
        matches: 0,
        routes: 0,
    };
    b.build();
    tracing::trace!(config = %b.config, warnings = b.warnings.len(), "Built VirtualServer");
    (b.config, b.warnings)
}

struct Builder<'a> {
    ex: &'a VirtualServerEx,
    vs: ResourceKey,
    /// `vs_<ns>_<name>`, usable in NGINX variable names.
    variable_prefix: String,
    params: &'a ConfigParams,
    static_params: &'a StaticParams,
    config: VirtualServerConfig,
    warnings: Warnings,

    // Counters naming splits, matches and error pages.
    splits: usize,
    matches: usize,
    routes: usize,
}

/// The resource that declares a route or an upstream.
struct Owner<'a> {
    kind: Kind,
    key: ResourceKey,
    upstreams: &'a [spec::Upstream],
}

/// What every location generated for one route shares.
struct RouteContext<'r> {
    owner: &'r Owner<'r>,
    path: &'r str,
    policies: Policies,
    error_pages: Vec<ErrorPage>,
    snippets: Vec<String>,
}

// === impl Builder ===

impl<'a> Builder<'a> {
    fn build(&mut self) {
        let ex = self.ex;
        let spec = &ex.virtual_server.spec;
        let owner = Owner {
            kind: Kind::VirtualServer,
            key: self.vs.clone(),
            upstreams: &spec.upstreams,
        };
        let routes = ex
            .virtual_server_routes
            .iter()
            .map(|vsr| {
                let owner = Owner {
                    kind: Kind::VirtualServerRoute,
                    key: ResourceKey::of(vsr),
                    upstreams: &vsr.spec.upstreams,
                };
                (owner, vsr)
            })
            .collect::<Vec<_>>();

        self.server(&owner);

        for u in owner.upstreams {
            self.upstream(&owner, u);
        }
        for (owner, _) in &routes {
            for u in owner.upstreams {
                self.upstream(owner, u);
            }
        }

        let namespace = self.vs.namespace.clone();
        for route in &spec.routes {
            match route.route_ref(&namespace) {
                Some((ns, name)) => self.delegate(route, ResourceKey::new(ns, name), &routes),
                None => self.route(&owner, route, None),
            }
        }

        let mut msgs = Vec::new();
        self.config.http_snippets =
            self.snippets(spec.http_snippets.as_deref(), &[], "http-snippets", &mut msgs);
        self.warnings.add_all(Kind::VirtualServer, &self.vs, msgs);
        self.config.dynamic_ssl_reload_enabled = self.static_params.dynamic_ssl_reload;
        self.config.static_ssl_path = self.static_params.secrets_dir.clone();
    }

    fn server(&mut self, owner: &Owner<'_>) {
        let ex = self.ex;
        let spec = &ex.virtual_server.spec;
        let (params, static_params) = (self.params, self.static_params);
        let mut msgs = Vec::new();

        let mut server = Server {
            server_name: spec.host.clone(),
            status_zone: if static_params.nginx_plus {
                spec.host.clone()
            } else {
                String::new()
            },
            listens: listen::http(
                &[static_params.default_http_listener_port],
                params.proxy_protocol,
                static_params,
            ),
            server_tokens: params.server_tokens.clone(),
            real_ip_header: params.real_ip_header.clone(),
            real_ip_recursive: params.real_ip_recursive,
            gunzip: spec.gunzip.unwrap_or(false),
            snippets: self.snippets(
                spec.server_snippets.as_deref(),
                &params.server_snippets,
                "server-snippets",
                &mut msgs,
            ),
            vs_namespace: self.vs.namespace.clone(),
            vs_name: self.vs.name.clone(),
            ..Default::default()
        };

        if let Some(tls) = &spec.tls {
            server.listens.extend(listen::https(
                &[static_params.default_https_listener_port],
                params.proxy_protocol,
                static_params,
            ));
            server.ssl = Some(self.ssl(tls, &mut msgs));
            server.tls_redirect = tls
                .redirect
                .as_ref()
                .filter(|r| r.enable)
                .map(|r| TlsRedirect {
                    code: r.code.unwrap_or(DEFAULT_REDIRECT_CODE),
                    based_on: match r.based_on.as_deref() {
                        Some("x-forwarded-proto") => "$http_x_forwarded_proto",
                        _ => "$scheme",
                    }
                    .to_string(),
                });
        }
        server.set_real_ip_from =
            listen::set_real_ip_from(&params.set_real_ip_from, server.ssl.is_some(), static_params);
        self.config.server = server;
        self.warnings.add_all(owner.kind, &owner.key, msgs);

        let p = self.policies(&spec.policies, owner.kind, &owner.key, Scope::Server);
        let server = &mut self.config.server;
        server.allow = p.allow;
        server.deny = p.deny;
        server.limit_req_options = p.limit_req_options;
        server.limit_reqs = p.limit_reqs;
        server.jwt_auth = p.jwt_auth;
        server.basic_auth = p.basic_auth;
        server.ingress_mtls = p.ingress_mtls;
        server.egress_mtls = p.egress_mtls;
        server.waf = p.waf;
        server.policies_error_return = p.error_return;
    }

    fn ssl(&self, tls: &spec::Tls, msgs: &mut Vec<String>) -> Ssl {
        let certificate = match tls.secret.as_deref() {
            Some(name) => match secrets::path(
                &self.ex.secret_refs,
                &self.vs.namespace,
                name,
                secret_type::TLS,
                self.static_params,
            ) {
                Ok(path) => Some(path),
                Err(error) => {
                    msgs.push(format!("{error}; TLS handshakes are rejected"));
                    None
                }
            },
            None => self
                .static_params
                .wildcard_tls_secret
                .clone()
                .or_else(|| self.static_params.default_tls_secret.clone()),
        };
        match certificate {
            Some(path) => Ssl {
                http2: self.params.http2,
                certificate: path.clone(),
                certificate_key: path,
                reject_handshake: false,
            },
            None => Ssl {
                http2: self.params.http2,
                reject_handshake: true,
                ..Default::default()
            },
        }
    }

    /// Resolves a list of policies and lifts what they declare outside of the server or
    /// location into the configuration.
    fn policies(
        &mut self,
        refs: &[PolicyReference],
        kind: Kind,
        key: &ResourceKey,
        scope: Scope,
    ) -> Policies {
        if refs.is_empty() {
            return Policies::default();
        }
        let ctx = Context {
            ex: self.ex,
            vs: &self.vs,
            static_params: self.static_params,
            tls: self.config.server.ssl.is_some(),
        };
        let mut msgs = Vec::new();
        let mut p = policies::generate(refs, &key.namespace, scope, &ctx, &mut msgs);
        self.warnings.add_all(kind, key, msgs);

        let config = &mut self.config;
        for zone in p.limit_req_zones.drain(..) {
            if !config.limit_req_zones.contains(&zone) {
                config.limit_req_zones.push(zone);
            }
        }
        for map in p.maps.drain(..) {
            if !config.maps.contains(&map) {
                config.maps.push(map);
            }
        }
        for claim in p.auth_jwt_claim_sets.drain(..) {
            if !config.auth_jwt_claim_sets.contains(&claim) {
                config.auth_jwt_claim_sets.push(claim);
            }
        }
        for jwks in p.jwks_locations.drain(..) {
            if !config.server.jwks_locations.contains(&jwks) {
                config.server.jwks_locations.push(jwks);
            }
        }
        p
    }

    fn upstream(&mut self, owner: &Owner<'_>, u: &spec::Upstream) {
        let name = owner.upstream_name(&self.vs, &u.name);
        let (params, plus) = (self.params, self.static_params.nginx_plus);
        let ns = owner.key.namespace.as_str();
        let mut msgs = Vec::new();

        let servers = upstream::servers(
            &self.ex.endpoints,
            &endpoints_key(ns, &u.service, u.subselector.as_ref(), u.port),
            self.ex
                .external_name_services
                .contains(&format!("{ns}/{}", u.service)),
            plus,
            params,
            &mut msgs,
        );

        let lb_method = match u.lb_method.as_deref() {
            Some(method) if upstream::is_valid_lb_method(method, plus) => method,
            Some(method) => {
                msgs.push(format!(
                    "upstream {}: invalid load balancing method {method:?}; {:?} is used",
                    u.name, params.lb_method
                ));
                params.lb_method.as_str()
            }
            None => params.lb_method.as_str(),
        };

        let health_check = u.health_check.as_ref().filter(|hc| hc.enable);
        if !plus {
            let plus_only = [
                ("slow-start", u.slow_start.is_some()),
                ("queue", u.queue.is_some()),
                ("sessionCookie", u.session_cookie.as_ref().is_some_and(|c| c.enable)),
                ("healthCheck", health_check.is_some()),
                ("backup", u.backup.is_some()),
            ];
            for (field, _) in plus_only.iter().filter(|(_, set)| *set) {
                msgs.push(format!(
                    "upstream {}: {field} requires NGINX Plus and is ignored",
                    u.name
                ));
            }
        }

        let backup_servers = match (&u.backup, u.backup_port) {
            (Some(backup), Some(port)) if plus => self
                .ex
                .endpoints
                .get(&endpoints_key(ns, backup, None, port))
                .into_iter()
                .flatten()
                .map(|address| UpstreamServer {
                    address: address.clone(),
                })
                .collect(),
            _ => Vec::new(),
        };

        self.config.upstreams.push(Upstream {
            name: name.clone(),
            servers: servers
                .addresses
                .into_iter()
                .map(|address| UpstreamServer { address })
                .collect(),
            backup_servers,
            lb_method: upstream::lb_method_directive(lb_method),
            resolve: servers.resolve,
            keepalive: u.keepalive.unwrap_or(params.keepalive),
            max_fails: u.max_fails.unwrap_or(params.max_fails),
            max_conns: u.max_conns.unwrap_or(params.max_conns),
            slow_start: u.slow_start.clone().filter(|_| plus).unwrap_or_default(),
            fail_timeout: u
                .fail_timeout
                .clone()
                .unwrap_or_else(|| params.fail_timeout.clone()),
            upstream_zone_size: params.upstream_zone_size.clone(),
            queue: u.queue.as_ref().filter(|_| plus).map(|q| Queue {
                size: q.size,
                timeout: q
                    .timeout
                    .clone()
                    .unwrap_or_else(|| DEFAULT_QUEUE_TIMEOUT.to_string()),
            }),
            session_cookie: u
                .session_cookie
                .as_ref()
                .filter(|c| plus && c.enable)
                .map(|c| SessionCookie {
                    name: c.name.clone(),
                    path: c.path.clone().unwrap_or_default(),
                    expires: c.expires.clone().unwrap_or_default(),
                    domain: c.domain.clone().unwrap_or_default(),
                    http_only: c.http_only,
                    secure: c.secure,
                    same_site: c.same_site.clone().unwrap_or_default(),
                }),
            upstream_labels: upstream::labels(&u.service, owner.resource_type(), &owner.key.name, ns),
        });

        if let Some(hc) = health_check.filter(|_| plus) {
            let check = self.health_check(&name, u, hc);
            self.config.server.health_checks.push(check);
        }
        self.warnings.add_all(owner.kind, &owner.key, msgs);
    }

    fn health_check(
        &mut self,
        upstream: &str,
        u: &spec::Upstream,
        hc: &spec::HealthCheck,
    ) -> HealthCheck {
        let params = self.params;
        let match_ = match &hc.status_match {
            Some(code) => {
                let name = format!("{upstream}_match");
                self.config.status_matches.push(StatusMatch {
                    name: name.clone(),
                    code: code.clone(),
                });
                name
            }
            None => String::new(),
        };
        let timeout = |own: &Option<String>, of_upstream: &Option<String>, default: &String| {
            own.clone()
                .or_else(|| of_upstream.clone())
                .unwrap_or_else(|| default.clone())
        };
        HealthCheck {
            name: upstream.to_string(),
            uri: hc.path.clone().unwrap_or_else(|| "/".to_string()),
            interval: hc.interval.clone().unwrap_or_else(|| "5s".to_string()),
            jitter: hc.jitter.clone().unwrap_or_else(|| "0s".to_string()),
            fails: hc.fails.unwrap_or(1),
            passes: hc.passes.unwrap_or(1),
            port: hc.port.unwrap_or(0),
            proxy_pass: format!("{}://{upstream}", scheme(u)),
            grpc: u.is_grpc(),
            proxy_connect_timeout: timeout(
                &hc.connect_timeout,
                &u.connect_timeout,
                &params.proxy_connect_timeout,
            ),
            proxy_read_timeout: timeout(&hc.read_timeout, &u.read_timeout, &params.proxy_read_timeout),
            proxy_send_timeout: timeout(&hc.send_timeout, &u.send_timeout, &params.proxy_send_timeout),
            headers: hc
                .headers
                .iter()
                .map(|h| Header {
                    name: h.name.clone(),
                    value: h.value.clone(),
                })
                .collect(),
            match_,
            mandatory: hc.mandatory,
            persistent: hc.persistent,
            keepalive_time: hc.keepalive_time.clone().unwrap_or_default(),
        }
    }

    /// Renders the subroutes of the VirtualServerRoute a route delegates to.
    fn delegate(&mut self, route: &Route, key: ResourceKey, routes: &[(Owner<'a>, &'a VirtualServerRoute)]) {
        let Some((owner, vsr)) = routes.iter().find(|(owner, _)| owner.key == key) else {
            self.warnings.add(
                Kind::VirtualServer,
                &self.vs,
                format!("VirtualServerRoute {key} is not found; route {} is ignored", route.path),
            );
            return;
        };
        let ex = self.ex;
        let host = &ex.virtual_server.spec.host;
        if vsr.spec.host != *host {
            self.warnings.add(
                Kind::VirtualServerRoute,
                &key,
                format!(
                    "host {} does not match host {host} of VirtualServer {}",
                    vsr.spec.host, self.vs
                ),
            );
            return;
        }
        for subroute in &vsr.spec.subroutes {
            if !subroute.path.starts_with(&route.path) {
                self.warnings.add(
                    Kind::VirtualServerRoute,
                    &key,
                    format!(
                        "subroute {} must start with {}, the path of the delegating route; it is ignored",
                        subroute.path, route.path
                    ),
                );
                continue;
            }
            self.route(owner, subroute, Some(route));
        }
    }

    /// Renders a route. Subroutes without policies of their own inherit the policies of the
    /// VirtualServer route that delegates to them.
    fn route(&mut self, owner: &Owner<'_>, route: &Route, parent: Option<&Route>) {
        let policies = match parent {
            Some(parent) if route.policies.is_empty() => {
                let vs = self.vs.clone();
                self.policies(&parent.policies, Kind::VirtualServer, &vs, Scope::Location)
            }
            _ => self.policies(&route.policies, owner.kind, &owner.key, Scope::Location),
        };

        let mut msgs = Vec::new();
        let snippets = self.snippets(
            route.location_snippets.as_deref(),
            &self.params.location_snippets,
            "location-snippets",
            &mut msgs,
        );
        self.warnings.add_all(owner.kind, &owner.key, msgs);

        let r = RouteContext {
            owner,
            path: &route.path,
            policies,
            error_pages: self.error_pages(route),
            snippets,
        };

        if !route.matches.is_empty() {
            self.matches(&r, route);
        } else if !route.splits.is_empty() {
            let destination = self.splits(&r, &route.splits);
            self.config
                .server
                .internal_redirect_locations
                .push(InternalRedirectLocation {
                    path: route.path.clone(),
                    destination,
                });
        } else if let Some(action) = &route.action {
            let location = self.action_location(&r, route.path.clone(), action, false);
            self.config.server.locations.push(location);
        } else {
            self.warnings.add(
                owner.kind,
                &owner.key,
                format!("route {} has no action; it is ignored", route.path),
            );
        }
    }

    /// Emits a `split_clients` block choosing among one internal location per split and
    /// returns the variable holding the chosen location.
    fn splits(&mut self, r: &RouteContext<'_>, splits: &[Split]) -> String {
        let n = self.splits;
        self.splits += 1;
        let variable = format!("${}_splits_{n}", self.variable_prefix);
        let path = |i: usize| format!("/internal_location_splits_{n}_split_{i}");

        if self.static_params.nginx_plus && splits.len() == 2 {
            self.two_way_splits(n, &variable, [path(0), path(1)], splits[0].weight);
            for (i, split) in splits.iter().enumerate() {
                self.split_location(r, path(i), split);
            }
            return variable;
        }

        let mut distributions = Vec::with_capacity(splits.len());
        for (i, split) in splits.iter().enumerate() {
            if split.weight == 0 {
                continue;
            }
            distributions.push(Distribution {
                weight: format!("{}%", split.weight),
                value: path(i),
            });
            self.split_location(r, path(i), split);
        }
        self.config.split_clients.push(SplitClient {
            source: "$request_id".to_string(),
            variable: variable.clone(),
            distributions,
        });
        variable
    }

    /// Backs a two-way split with a keyval zone so its weights can be changed through the
    /// NGINX Plus API. One `split_clients` block exists per possible weight of the first
    /// split; the keyval entry selects among them and the configured weight is the default.
    fn two_way_splits(&mut self, n: usize, variable: &str, paths: [String; 2], weight: u32) {
        let zone_name = format!("vs_{}_{}_keyval_zone", self.vs.namespace, self.vs.name);
        if !self.config.key_val_zones.iter().any(|z| z.name == zone_name) {
            self.config.key_val_zones.push(KeyValZone {
                name: zone_name.clone(),
                size: KEYVAL_ZONE_SIZE.to_string(),
                state: format!(
                    "/var/lib/nginx/state/{}_{}_keyval_zone.json",
                    self.vs.namespace, self.vs.name
                ),
            });
        }

        let key = format!("vs_{}_{}_keyval_key_{n}", self.vs.namespace, self.vs.name);
        let keyval_variable = format!("${}_keyval_{n}", self.variable_prefix);
        self.config.key_vals.push(KeyVal {
            key: key.clone(),
            variable: keyval_variable.clone(),
            zone_name: zone_name.clone(),
        });

        let weight_variable =
            |w: u32| format!("${}_split_clients_{n}_{w}", self.variable_prefix);
        let mut parameters = Vec::with_capacity(102);
        for w in 0..=100 {
            let distributions = match w {
                0 => vec![Distribution {
                    weight: "*".to_string(),
                    value: paths[1].clone(),
                }],
                100 => vec![Distribution {
                    weight: "*".to_string(),
                    value: paths[0].clone(),
                }],
                w => vec![
                    Distribution {
                        weight: format!("{w}%"),
                        value: paths[0].clone(),
                    },
                    Distribution {
                        weight: "*".to_string(),
                        value: paths[1].clone(),
                    },
                ],
            };
            self.config.split_clients.push(SplitClient {
                source: "$request_id".to_string(),
                variable: weight_variable(w),
                distributions,
            });
            parameters.push(Parameter {
                value: w.to_string(),
                result: weight_variable(w),
            });
        }
        parameters.push(Parameter {
            value: "default".to_string(),
            result: weight_variable(weight.min(100)),
        });
        self.config.maps.push(Map {
            source: keyval_variable,
            variable: variable.to_string(),
            parameters,
        });
        self.config.two_way_split_clients.push(TwoWaySplitClients {
            key,
            zone_name,
            weight,
        });
    }

    fn split_location(&mut self, r: &RouteContext<'_>, path: String, split: &Split) {
        match &split.action {
            Some(action) => {
                let location = self.action_location(r, path, action, true);
                self.config.server.locations.push(location);
            }
            None => self.warnings.add(
                r.owner.kind,
                &r.owner.key,
                format!("a split of route {} has no action", r.path),
            ),
        }
    }

    /// Emits one `map` per condition, chained so that a match's first condition evaluates to
    /// `1` only when all of its conditions hold, and a final `map` over the concatenated
    /// results: the first match whose result is `1` selects its internal location.
    fn matches(&mut self, r: &RouteContext<'_>, route: &Route) {
        let n = self.matches;
        self.matches += 1;
        let variable = format!("${}_matches_{n}", self.variable_prefix);

        let mut source = String::new();
        let mut parameters = Vec::new();
        let mut index = 0;
        for m in &route.matches {
            let sources = m.conditions.iter().map(condition_source).collect::<Option<Vec<_>>>();
            let sources = match sources {
                Some(sources) if !sources.is_empty() && (m.action.is_some() || !m.splits.is_empty()) => sources,
                _ => {
                    self.warnings.add(
                        r.owner.kind,
                        &r.owner.key,
                        format!(
                            "a match of route {} needs conditions on a header, cookie, argument or variable, and an action or splits; it is ignored",
                            route.path
                        ),
                    );
                    continue;
                }
            };

            let i = index;
            index += 1;
            let condition_variable = |j: usize| format!("{variable}_match_{i}_cond_{j}");
            for (j, (condition, condition_source)) in m.conditions.iter().zip(sources).enumerate() {
                let next = if j + 1 < m.conditions.len() {
                    condition_variable(j + 1)
                } else {
                    "1".to_string()
                };
                let (value, negated) = match condition.value.strip_prefix('!') {
                    Some(value) => (value, true),
                    None => (condition.value.as_str(), false),
                };
                let (on_match, otherwise) = if negated {
                    ("0".to_string(), next)
                } else {
                    (next, "0".to_string())
                };
                self.config.maps.push(Map {
                    source: condition_source,
                    variable: condition_variable(j),
                    parameters: vec![
                        Parameter {
                            value: map_value(value),
                            result: on_match,
                        },
                        Parameter {
                            value: "default".to_string(),
                            result: otherwise,
                        },
                    ],
                });
            }
            source.push_str(&condition_variable(0));

            let destination = if m.splits.is_empty() {
                let path = format!("/internal_location_matches_{n}_match_{i}");
                if let Some(action) = &m.action {
                    let location = self.action_location(r, path.clone(), action, true);
                    self.config.server.locations.push(location);
                }
                path
            } else {
                self.splits(r, &m.splits)
            };
            parameters.push(Parameter {
                value: format!("~^{}1", "0".repeat(i)),
                result: destination,
            });
        }

        let default = if !route.splits.is_empty() {
            self.splits(r, &route.splits)
        } else if let Some(action) = &route.action {
            let path = format!("/internal_location_matches_{n}_default");
            let location = self.action_location(r, path.clone(), action, true);
            self.config.server.locations.push(location);
            path
        } else {
            self.warnings.add(
                r.owner.kind,
                &r.owner.key,
                format!("route {} has matches but no default action; it is ignored", route.path),
            );
            return;
        };
        parameters.push(Parameter {
            value: "default".to_string(),
            result: default,
        });

        if index > 0 {
            self.config.maps.push(Map {
                source,
                variable: variable.clone(),
                parameters,
            });
            self.config
                .server
                .internal_redirect_locations
                .push(InternalRedirectLocation {
                    path: route.path.clone(),
                    destination: variable,
                });
        } else if let Some(default) = parameters.pop() {
            self.config
                .server
                .internal_redirect_locations
                .push(InternalRedirectLocation {
                    path: route.path.clone(),
                    destination: default.result,
                });
        }
    }

    /// Declares the named locations of a route's error pages and returns the `error_page`
    /// directives pointing at them.
    fn error_pages(&mut self, route: &Route) -> Vec<ErrorPage> {
        let r = self.routes;
        self.routes += 1;

        let mut pages = Vec::with_capacity(route.error_pages.len());
        for (i, page) in route.error_pages.iter().enumerate() {
            let codes = page
                .codes
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            if let Some(ret) = &page.return_ {
                let name = format!("@error_page_{r}_{i}");
                self.config.server.error_page_locations.push(ErrorPageLocation {
                    name: name.clone(),
                    default_type: ret.type_.clone().unwrap_or_else(|| "text/html".to_string()),
                    return_: Return {
                        code: ret.code.unwrap_or(200),
                        default_type: String::new(),
                        text: escape_quotes(&ret.body),
                    },
                    headers: ret
                        .headers
                        .iter()
                        .map(|h| Header {
                            name: h.name.clone(),
                            value: h.value.clone(),
                        })
                        .collect(),
                });
                pages.push(ErrorPage {
                    codes,
                    name,
                    response_code: ret.code.unwrap_or(0),
                });
            } else if let Some(redirect) = &page.redirect {
                pages.push(ErrorPage {
                    codes,
                    name: redirect.url.clone(),
                    response_code: redirect.code.unwrap_or(DEFAULT_REDIRECT_CODE),
                });
            }
        }
        pages
    }

    /// Builds the location executing an action. Internal locations are reached through a
    /// rewrite, so they proxy the original request URI.
    fn action_location(
        &mut self,
        r: &RouteContext<'_>,
        path: String,
        action: &Action,
        internal: bool,
    ) -> Location {
        let owner = r.owner;
        let mut location = Location {
            path,
            internal,
            snippets: r.snippets.clone(),
            error_pages: r.error_pages.clone(),
            proxy_intercept_errors: !r.error_pages.is_empty(),
            proxy_pass_request_headers: true,
            is_vsr: owner.kind == Kind::VirtualServerRoute,
            ..Default::default()
        };
        if location.is_vsr {
            location.vsr_name = owner.key.name.clone();
            location.vsr_namespace = owner.key.namespace.clone();
        }
        apply_policies(&mut location, &r.policies);

        if let Some(redirect) = &action.redirect {
            location.return_ = Some(Return {
                code: redirect.code.unwrap_or(DEFAULT_REDIRECT_CODE),
                default_type: String::new(),
                text: redirect.url.clone(),
            });
            return location;
        }
        if let Some(ret) = &action.return_ {
            location.return_ = Some(Return {
                code: ret.code.unwrap_or(200),
                default_type: ret.type_.clone().unwrap_or_else(|| "text/plain".to_string()),
                text: escape_quotes(&ret.body),
            });
            return location;
        }

        let proxy = action.proxy.as_ref();
        let Some(name) = action.pass.as_deref().or(proxy.map(|p| p.upstream.as_str())) else {
            self.warnings.add(
                owner.kind,
                &owner.key,
                format!("an action of route {} is empty", r.path),
            );
            location.return_ = Some(bad_gateway());
            return location;
        };
        match owner.upstreams.iter().find(|u| u.name == name) {
            Some(u) => self.proxy(&mut location, r, u, proxy),
            None => {
                self.warnings.add(
                    owner.kind,
                    &owner.key,
                    format!("upstream {name} of route {} is not defined", r.path),
                );
                location.return_ = Some(bad_gateway());
            }
        }
        location
    }

    fn proxy(
        &self,
        location: &mut Location,
        r: &RouteContext<'_>,
        u: &spec::Upstream,
        proxy: Option<&ActionProxy>,
    ) {
        let params = self.params;
        let rewrite_path = proxy.and_then(|p| p.rewrite_path.as_deref());
        let tls = u.tls.as_ref().is_some_and(|t| t.enable);

        location.proxy_pass = format!(
            "{}://{}",
            scheme(u),
            r.owner.upstream_name(&self.vs, &u.name)
        );
        if location.internal && rewrite_path.is_none() {
            location.proxy_pass.push_str("$request_uri");
        }
        if let Some(rewrite) = rewrite_path {
            location.rewrites = rewrites(r.path, rewrite, location.internal);
        }

        location.grpc = u.is_grpc();
        location.service_name = u.service.clone();
        location.has_keepalive = u.keepalive.unwrap_or(params.keepalive) > 0;
        location.proxy_connect_timeout = or_param(&u.connect_timeout, &params.proxy_connect_timeout);
        location.proxy_read_timeout = or_param(&u.read_timeout, &params.proxy_read_timeout);
        location.proxy_send_timeout = or_param(&u.send_timeout, &params.proxy_send_timeout);
        location.client_max_body_size = or_param(&u.client_max_body_size, &params.client_max_body_size);
        location.proxy_buffering = u.buffering.unwrap_or(params.proxy_buffering);
        location.proxy_buffers = u
            .buffers
            .as_ref()
            .map(|b| format!("{} {}", b.number, b.size))
            .unwrap_or_else(|| params.proxy_buffers.clone());
        location.proxy_buffer_size = or_param(&u.buffer_size, &params.proxy_buffer_size);
        location.proxy_next_upstream = u
            .next_upstream
            .clone()
            .unwrap_or_else(|| DEFAULT_NEXT_UPSTREAM.to_string());
        location.proxy_next_upstream_timeout = u
            .next_upstream_timeout
            .clone()
            .unwrap_or_else(|| DEFAULT_NEXT_UPSTREAM_TIMEOUT.to_string());
        location.proxy_next_upstream_tries = u.next_upstream_tries.unwrap_or(0);
        if tls {
            location.proxy_ssl_name = format!("{}.{}.svc", u.service, r.owner.key.namespace);
        }

        if let Some(request) = proxy.and_then(|p| p.request_headers.as_ref()) {
            location.proxy_pass_request_headers = request.pass.unwrap_or(true);
            location.proxy_set_headers = request
                .set
                .iter()
                .map(|h| Header {
                    name: h.name.clone(),
                    value: h.value.clone(),
                })
                .collect();
        }
        if let Some(response) = proxy.and_then(|p| p.response_headers.as_ref()) {
            location.proxy_hide_headers = response.hide.clone();
            location.proxy_pass_headers = response.pass.clone();
            location.proxy_ignore_headers = response.ignore.join(" ");
            location.add_headers = response
                .add
                .iter()
                .map(|h| AddHeader {
                    name: h.name.clone(),
                    value: h.value.clone(),
                    always: h.always,
                })
                .collect();
        }
    }

    /// A resource's own snippet when snippets are enabled, else the ConfigMap's.
    fn snippets(
        &self,
        own: Option<&str>,
        fallback: &[String],
        what: &str,
        msgs: &mut Vec<String>,
    ) -> Vec<String> {
        match own.filter(|s| !s.trim().is_empty()) {
            Some(snippet) if self.static_params.enable_snippets => vec![snippet.to_string()],
            Some(_) => {
                msgs.push(format!("{what} are ignored because snippets are disabled"));
                fallback.to_vec()
            }
            None => fallback.to_vec(),
        }
    }
}

// === impl Owner ===

impl Owner<'_> {
    fn upstream_name(&self, vs: &ResourceKey, upstream: &str) -> String {
        match self.kind {
            Kind::VirtualServerRoute => format!(
                "vs_{}_{}_vsr_{}_{}_{upstream}",
                vs.namespace, vs.name, self.key.namespace, self.key.name
            ),
            _ => format!("vs_{}_{}_{upstream}", vs.namespace, vs.name),
        }
    }

    fn resource_type(&self) -> &'static str {
        match self.kind {
            Kind::VirtualServerRoute => "virtualserverroute",
            _ => "virtualserver",
        }
    }
}

fn apply_policies(location: &mut Location, p: &Policies) {
    location.allow = p.allow.clone();
    location.deny = p.deny.clone();
    location.limit_req_options = p.limit_req_options.clone();
    location.limit_reqs = p.limit_reqs.clone();
    location.jwt_auth = p.jwt_auth.clone();
    location.basic_auth = p.basic_auth.clone();
    location.egress_mtls = p.egress_mtls.clone();
    location.waf = p.waf.clone();
    location.policies_error_return = p.error_return.clone();
}

fn scheme(u: &spec::Upstream) -> &'static str {
    let tls = u.tls.as_ref().is_some_and(|t| t.enable);
    match (u.is_grpc(), tls) {
        (true, true) => "grpcs",
        (true, false) => "grpc",
        (false, true) => "https",
        (false, false) => "http",
    }
}

fn rewrites(route_path: &str, rewrite: &str, internal: bool) -> Vec<String> {
    let mut rewrites = Vec::with_capacity(2);
    if internal {
        rewrites.push("^ $request_uri".to_string());
    }
    let rule = if let Some(exact) = route_path.strip_prefix('=') {
        format!("\"^{}$\" \"{rewrite}\" break", exact.trim())
    } else if let Some(regex) = route_path.strip_prefix('~') {
        let regex = regex.strip_prefix('*').unwrap_or(regex).trim();
        format!("\"{regex}\" \"{rewrite}\" break")
    } else {
        format!("\"^{route_path}(.*)$\" \"{rewrite}$1\" break")
    };
    rewrites.push(rule);
    rewrites
}

/// The NGINX variable a condition tests.
fn condition_source(condition: &Condition) -> Option<String> {
    if let Some(header) = &condition.header {
        return Some(format!(
            "$http_{}",
            header.to_ascii_lowercase().replace('-', "_")
        ));
    }
    if let Some(cookie) = &condition.cookie {
        return Some(format!("$cookie_{cookie}"));
    }
    if let Some(argument) = &condition.argument {
        return Some(format!("$arg_{argument}"));
    }
    condition.variable.clone()
}

/// Regex values are kept as written; anything else is matched literally.
fn map_value(value: &str) -> String {
    if value.starts_with('~') {
        value.to_string()
    } else {
        format!("\"{}\"", escape_quotes(value))
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('"', "\\\"")
}

fn or_param(own: &Option<String>, param: &str) -> String {
    own.clone().unwrap_or_else(|| param.to_string())
}

fn bad_gateway() -> Return {
    Return {
        code: BAD_GATEWAY,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests;
