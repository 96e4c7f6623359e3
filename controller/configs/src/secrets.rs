use nginx_ingress_core::{ResourceKey, SecretReference, StaticParams};
use std::collections::BTreeMap;

/// Finds the file of a secret a resource refers to.
///
/// `name` may be qualified as `namespace/name`; a bare name is looked up in `namespace`.
/// Returns a warning message when the secret is missing, invalid or of another type.
pub(crate) fn path(
    refs: &BTreeMap<String, SecretReference>,
    namespace: &str,
    name: &str,
    expected_type: &str,
    static_params: &StaticParams,
) -> Result<String, String> {
    let key = ResourceKey::parse(name, namespace);
    let secret = refs
        .get(&key.to_string())
        .ok_or_else(|| format!("secret {key} is not found"))?;
    if let Some(error) = &secret.error {
        return Err(format!("secret {key} is invalid: {error}"));
    }
    if secret.secret_type != expected_type {
        return Err(format!(
            "secret {key} is of type {}, expected {expected_type}",
            secret.secret_type
        ));
    }
    if secret.path.is_empty() {
        Ok(format!(
            "{}/{}",
            static_params.secrets_dir,
            key.secret_file_name()
        ))
    } else {
        Ok(secret.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use nginx_ingress_k8s_api::secret_type;

    #[test]
    fn checks_type_and_validity() {
        let refs = btreemap! {
            "default/cafe-secret".to_string() => SecretReference::valid(secret_type::TLS, b"pem".to_vec()),
            "default/broken".to_string() => SecretReference::invalid(secret_type::TLS, "no key"),
        };
        let static_params = StaticParams::default();

        assert_eq!(
            path(&refs, "default", "cafe-secret", secret_type::TLS, &static_params).unwrap(),
            "/etc/nginx/secrets/default_cafe-secret"
        );
        path(&refs, "default", "cafe-secret", secret_type::JWK, &static_params)
            .expect_err("type must match");
        path(&refs, "default", "broken", secret_type::TLS, &static_params)
            .expect_err("invalid secret");
        path(&refs, "other", "cafe-secret", secret_type::TLS, &static_params)
            .expect_err("namespace must match");
    }
}
