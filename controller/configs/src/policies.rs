//! Policies referenced by VirtualServers and VirtualServerRoutes.
//!
//! A reference list is resolved into the directives of one server or one location. Every
//! problem is a warning: a policy that cannot be applied either makes the location answer
//! with an error (authentication and TLS kinds) or is skipped.

use crate::secrets;
use nginx_ingress_core::{
    model::v2::{
        AuthJwtClaimSet, BasicAuth, EgressMtls, IngressMtls, JwksLocation, JwtAuth, LimitReq,
        LimitReqOptions, LimitReqZone, Map, Parameter, Return, Waf,
    },
    ResourceKey, StaticParams, VirtualServerEx,
};
use nginx_ingress_k8s_api::{
    policy::{self, PolicyKind},
    secret_type,
    virtual_server::PolicyReference,
    Policy,
};
use std::collections::{BTreeMap, BTreeSet};

const DEFAULT_RATE_LIMIT_REJECT_CODE: u16 = 503;
const DEFAULT_WAF_LOG_DEST: &str = "syslog:server=localhost:514";
const POLICY_ERROR_STATUS: u16 = 500;

/// Where a list of policies is applied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Scope {
    Server,
    Location,
}

/// The directives generated from a list of policies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Policies {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub limit_req_options: LimitReqOptions,
    pub limit_reqs: Vec<LimitReq>,
    pub jwt_auth: Option<JwtAuth>,
    pub basic_auth: Option<BasicAuth>,
    pub ingress_mtls: Option<IngressMtls>,
    pub egress_mtls: Option<EgressMtls>,
    pub waf: Option<Waf>,
    pub error_return: Option<Return>,

    // Emitted at the http level or in the server, whatever the scope.
    pub limit_req_zones: Vec<LimitReqZone>,
    pub maps: Vec<Map>,
    pub auth_jwt_claim_sets: Vec<AuthJwtClaimSet>,
    pub jwks_locations: Vec<JwksLocation>,
}

/// Everything policies are resolved against.
pub(crate) struct Context<'a> {
    pub ex: &'a VirtualServerEx,
    pub vs: &'a ResourceKey,
    pub static_params: &'a StaticParams,
    pub tls: bool,
}

/// A rate limit tier: the zone it limits and the value of the condition selecting it.
struct Tier {
    /// The selector variable, unset for a default-only tier.
    selector: Option<String>,
    zone_name: String,
    key: String,
    match_: Option<String>,
    default: bool,
}

/// Resolves `refs`, declared by a resource in `namespace`, into directives.
pub(crate) fn generate(
    refs: &[PolicyReference],
    namespace: &str,
    scope: Scope,
    ctx: &Context<'_>,
    msgs: &mut Vec<String>,
) -> Policies {
    let mut out = Policies::default();
    let mut seen = BTreeSet::new();
    let mut tiers = Vec::new();
    let mut tier_sources = BTreeMap::new();

    for r in refs {
        let pkey = ResourceKey::new(
            r.namespace.clone().unwrap_or_else(|| namespace.to_string()),
            r.name.clone(),
        );
        let Some((policy, kind)) = ctx
            .ex
            .policies
            .get(&pkey.to_string())
            .and_then(|p| p.spec.kind().map(|k| (p, k)))
        else {
            msgs.push(format!("policy {pkey} is missing or invalid"));
            out.error_return = Some(error_return());
            continue;
        };

        // Rate limits accumulate: each one is a zone of its own.
        if kind != PolicyKind::RateLimit && !seen.insert(kind) {
            msgs.push(format!(
                "multiple {kind} policies are referenced; policy {pkey} is ignored"
            ));
            continue;
        }

        let result = match kind {
            PolicyKind::AccessControl => {
                access_control(policy, &mut out);
                Ok(())
            }
            PolicyKind::RateLimit => {
                rate_limit(policy, &pkey, ctx, &mut out, &mut tiers, &mut tier_sources)
            }
            PolicyKind::Jwt => jwt(policy, &pkey, ctx, &mut out),
            PolicyKind::BasicAuth => basic_auth(policy, &pkey, ctx, &mut out),
            PolicyKind::IngressMtls => ingress_mtls(policy, &pkey, scope, ctx, &mut out),
            PolicyKind::EgressMtls => egress_mtls(policy, &pkey, ctx, &mut out),
            PolicyKind::Waf => waf(policy, &pkey, ctx, &mut out),
        };
        match result {
            Ok(()) => {}
            Err(Failure::Skip(msg)) => msgs.push(msg),
            Err(Failure::Reject(msg)) => {
                msgs.push(msg);
                out.error_return = Some(error_return());
            }
        }
    }

    tier_maps(tiers, tier_sources, &mut out);
    out
}

enum Failure {
    /// The policy is skipped; traffic flows as if it were not referenced.
    Skip(String),
    /// Requests are answered with an error.
    Reject(String),
}

fn error_return() -> Return {
    Return {
        code: POLICY_ERROR_STATUS,
        ..Default::default()
    }
}

fn access_control(policy: &Policy, out: &mut Policies) {
    if let Some(ac) = &policy.spec.access_control {
        out.allow = ac.allow.clone();
        out.deny = ac.deny.clone();
    }
}

fn rate_limit(
    policy: &Policy,
    pkey: &ResourceKey,
    ctx: &Context<'_>,
    out: &mut Policies,
    tiers: &mut Vec<Tier>,
    tier_sources: &mut BTreeMap<String, String>,
) -> Result<(), Failure> {
    let Some(rl) = &policy.spec.rate_limit else {
        return Ok(());
    };
    let zone_name = format!(
        "pol_rl_{}_{}_{}_{}",
        pkey.namespace, pkey.name, ctx.vs.namespace, ctx.vs.name
    );

    let mut key = rl.key.clone();
    if let Some(condition) = &rl.condition {
        let (source, match_) = match (&condition.jwt, condition.variables.first()) {
            (Some(jwt), _) => {
                if !ctx.static_params.nginx_plus {
                    return Err(Failure::Skip(format!(
                        "policy {pkey}: JWT claim conditions require NGINX Plus"
                    )));
                }
                let variable = format!("$jwt_claim_{}", jwt.claim.replace('.', "_"));
                let claim = AuthJwtClaimSet {
                    variable: variable.clone(),
                    claim: jwt.claim.replace('.', " "),
                };
                if !out.auth_jwt_claim_sets.contains(&claim) {
                    out.auth_jwt_claim_sets.push(claim);
                }
                (variable, jwt.match_.clone())
            }
            (None, Some(variable)) => {
                let name = variable.name.trim_start_matches('$');
                (format!("${name}"), variable.match_.clone())
            }
            (None, None) if condition.default => (String::new(), String::new()),
            (None, None) => {
                return Err(Failure::Skip(format!(
                    "policy {pkey}: a rate limit condition needs a JWT claim or a variable"
                )))
            }
        };

        let selector = (!source.is_empty()).then(|| {
            let selector = selector_variable(ctx.vs, &source);
            tier_sources.insert(selector.clone(), source);
            selector
        });
        tiers.push(Tier {
            selector,
            zone_name: zone_name.clone(),
            key: key.clone(),
            match_: (!match_.is_empty()).then_some(match_),
            default: condition.default,
        });
        key = zone_variable(&zone_name);
    }

    if out.limit_reqs.is_empty() {
        out.limit_req_options = LimitReqOptions {
            dry_run: rl.dry_run.unwrap_or(false),
            log_level: rl.log_level.clone().unwrap_or_else(|| "error".to_string()),
            reject_code: rl.reject_code.unwrap_or(DEFAULT_RATE_LIMIT_REJECT_CODE),
        };
    }
    out.limit_req_zones.push(LimitReqZone {
        key,
        zone_name: zone_name.clone(),
        zone_size: rl.zone_size.clone(),
        rate: rl.rate.clone(),
    });
    out.limit_reqs.push(LimitReq {
        zone_name,
        burst: rl.burst.unwrap_or(0),
        no_delay: rl.no_delay.unwrap_or(false),
        delay: rl.delay.unwrap_or(0),
    });
    Ok(())
}

/// `$rl_<ns>_<name>_match_<source>`, with the source reduced to identifier characters.
fn selector_variable(vs: &ResourceKey, source: &str) -> String {
    let source: String = source
        .trim_start_matches('$')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("$rl_{}_{}_match_{source}", vs.namespace, vs.name)
        .replace('-', "_")
}

fn zone_variable(zone_name: &str) -> String {
    format!("${}", zone_name.replace('-', "_"))
}

/// Emits, per selector, a map from the condition's source to the zone of the matching tier,
/// and per zone a map from the selected zone to the zone's key. Requests with an empty key
/// are not counted by a zone.
///
/// Default-only tiers join the first selector. Without any selector they limit every request
/// with their own key.
fn tier_maps(mut tiers: Vec<Tier>, sources: BTreeMap<String, String>, out: &mut Policies) {
    let fallback = tiers.iter().find_map(|t| t.selector.clone());
    for tier in &mut tiers {
        if tier.selector.is_none() {
            tier.selector = fallback.clone();
        }
        if tier.selector.is_none() {
            if let Some(zone) = out
                .limit_req_zones
                .iter_mut()
                .find(|z| z.zone_name == tier.zone_name)
            {
                zone.key = tier.key.clone();
            }
        }
    }

    let mut by_selector = BTreeMap::<String, Vec<&Tier>>::new();
    for tier in &tiers {
        if let Some(selector) = &tier.selector {
            by_selector.entry(selector.clone()).or_default().push(tier);
        }
    }

    for (selector, tiers) in by_selector {
        let Some(source) = sources.get(&selector) else {
            continue;
        };
        let mut parameters: Vec<Parameter> = tiers
            .iter()
            .filter_map(|t| {
                t.match_.as_ref().map(|m| Parameter {
                    value: format!("\"{m}\""),
                    result: t.zone_name.clone(),
                })
            })
            .collect();
        parameters.push(Parameter {
            value: "default".to_string(),
            result: tiers
                .iter()
                .find(|t| t.default)
                .map(|t| t.zone_name.clone())
                .unwrap_or_else(|| "\"\"".to_string()),
        });
        out.maps.push(Map {
            source: source.clone(),
            variable: selector.clone(),
            parameters,
        });

        for tier in tiers {
            out.maps.push(Map {
                source: selector.clone(),
                variable: zone_variable(&tier.zone_name),
                parameters: vec![
                    Parameter {
                        value: tier.zone_name.clone(),
                        result: tier.key.clone(),
                    },
                    Parameter {
                        value: "default".to_string(),
                        result: "\"\"".to_string(),
                    },
                ],
            });
        }
    }
}

fn jwt(
    policy: &Policy,
    pkey: &ResourceKey,
    ctx: &Context<'_>,
    out: &mut Policies,
) -> Result<(), Failure> {
    let Some(jwt) = &policy.spec.jwt_auth else {
        return Ok(());
    };
    if !ctx.static_params.nginx_plus {
        return Err(Failure::Reject(format!(
            "policy {pkey}: JWT authentication requires NGINX Plus"
        )));
    }

    let mut auth = JwtAuth {
        realm: jwt.realm.clone(),
        token: jwt.token.clone().unwrap_or_default(),
        ..Default::default()
    };
    match (&jwt.secret, &jwt.jwks_uri) {
        (Some(secret), _) => {
            auth.secret = secret_path(ctx, pkey, secret, secret_type::JWK)?;
        }
        (None, Some(uri)) => {
            let path = format!("/_jwks_uri_server_{}_{}", pkey.namespace, pkey.name);
            out.jwks_locations.push(JwksLocation {
                path: path.clone(),
                uri: uri.clone(),
                key_cache: jwt.key_cache.clone().unwrap_or_default(),
            });
            auth.key_request = path;
        }
        (None, None) => {
            return Err(Failure::Reject(format!(
                "policy {pkey}: JWT authentication needs a secret or a JWKS URI"
            )))
        }
    }
    out.jwt_auth = Some(auth);
    Ok(())
}

fn basic_auth(
    policy: &Policy,
    pkey: &ResourceKey,
    ctx: &Context<'_>,
    out: &mut Policies,
) -> Result<(), Failure> {
    let Some(basic) = &policy.spec.basic_auth else {
        return Ok(());
    };
    out.basic_auth = Some(BasicAuth {
        secret: secret_path(ctx, pkey, &basic.secret, secret_type::HTPASSWD)?,
        realm: basic.realm.clone().unwrap_or_else(|| "default".to_string()),
    });
    Ok(())
}

fn ingress_mtls(
    policy: &Policy,
    pkey: &ResourceKey,
    scope: Scope,
    ctx: &Context<'_>,
    out: &mut Policies,
) -> Result<(), Failure> {
    let Some(mtls) = &policy.spec.ingress_mtls else {
        return Ok(());
    };
    if scope == Scope::Location {
        return Err(Failure::Skip(format!(
            "policy {pkey}: ingressMTLS can only be applied to a VirtualServer, not a route"
        )));
    }
    if !ctx.tls {
        return Err(Failure::Reject(format!(
            "policy {pkey}: ingressMTLS requires TLS termination"
        )));
    }
    out.ingress_mtls = Some(IngressMtls {
        client_cert: secret_path(ctx, pkey, &mtls.client_cert_secret, secret_type::CA)?,
        verify_client: mtls.verify_client.clone().unwrap_or_else(|| "on".to_string()),
        verify_depth: mtls.verify_depth.unwrap_or(1),
    });
    Ok(())
}

fn egress_mtls(
    policy: &Policy,
    pkey: &ResourceKey,
    ctx: &Context<'_>,
    out: &mut Policies,
) -> Result<(), Failure> {
    let Some(mtls) = &policy.spec.egress_mtls else {
        return Ok(());
    };
    let certificate = mtls
        .tls_secret
        .as_deref()
        .map(|s| secret_path(ctx, pkey, s, secret_type::TLS))
        .transpose()?
        .unwrap_or_default();
    let trusted_cert = mtls
        .trusted_cert_secret
        .as_deref()
        .map(|s| secret_path(ctx, pkey, s, secret_type::CA))
        .transpose()?
        .unwrap_or_default();
    out.egress_mtls = Some(EgressMtls {
        certificate_key: certificate.clone(),
        certificate,
        verify_server: mtls.verify_server,
        verify_depth: mtls.verify_depth.unwrap_or(1),
        protocols: mtls
            .protocols
            .clone()
            .unwrap_or_else(|| "TLSv1 TLSv1.1 TLSv1.2".to_string()),
        ciphers: mtls.ciphers.clone().unwrap_or_else(|| "DEFAULT".to_string()),
        session_reuse: mtls.session_reuse.unwrap_or(true),
        server_name: mtls.server_name,
        trusted_cert,
        ssl_name: mtls.ssl_name.clone().unwrap_or_default(),
    });
    Ok(())
}

fn waf(
    policy: &Policy,
    pkey: &ResourceKey,
    ctx: &Context<'_>,
    out: &mut Policies,
) -> Result<(), Failure> {
    let Some(waf) = &policy.spec.waf else {
        return Ok(());
    };
    if !ctx.static_params.waf_module {
        return Err(Failure::Skip(format!(
            "policy {pkey}: the WAF module is not enabled"
        )));
    }

    let ap_policy = match (&waf.ap_bundle, &waf.ap_policy) {
        (Some(bundle), _) => format!("/etc/app_protect/bundles/{bundle}"),
        (None, Some(name)) => {
            let key = ResourceKey::parse(name, &pkey.namespace);
            format!("/etc/nginx/waf/nac-policies/{}_{}", key.namespace, key.name)
        }
        (None, None) => String::new(),
    };
    let ap_log_conf = waf
        .security_logs
        .iter()
        .filter(|log| log.enable)
        .filter_map(|log| security_log(log, &pkey.namespace))
        .collect::<Vec<_>>();

    out.waf = Some(Waf {
        enable: if waf.enable { "on" } else { "off" }.to_string(),
        ap_policy,
        ap_security_log_enable: !ap_log_conf.is_empty(),
        ap_log_conf,
    });
    Ok(())
}

fn security_log(log: &policy::SecurityLog, namespace: &str) -> Option<String> {
    let conf = match (&log.ap_log_bundle, &log.ap_log_conf) {
        (Some(bundle), _) => format!("/etc/app_protect/bundles/{bundle}"),
        (None, Some(name)) => {
            let key = ResourceKey::parse(name, namespace);
            format!("/etc/nginx/waf/nac-logconfs/{}_{}", key.namespace, key.name)
        }
        (None, None) => return None,
    };
    let dest = log.log_dest.as_deref().unwrap_or(DEFAULT_WAF_LOG_DEST);
    Some(format!("{conf} {dest}"))
}

fn secret_path(
    ctx: &Context<'_>,
    pkey: &ResourceKey,
    name: &str,
    expected_type: &str,
) -> Result<String, Failure> {
    secrets::path(
        &ctx.ex.secret_refs,
        &pkey.namespace,
        name,
        expected_type,
        ctx.static_params,
    )
    .map_err(|e| Failure::Reject(format!("policy {pkey}: {e}")))
}

#[cfg(test)]
mod tests;
