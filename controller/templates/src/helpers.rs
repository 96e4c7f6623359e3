use minijinja::{Environment, Value};
use std::collections::BTreeMap;

/// Registers the helpers templates may call. No other functions or filters are available.
pub(crate) fn register(env: &mut Environment<'static>) {
    env.add_function("split", split);
    env.add_function("trim", trim);
    env.add_function("contains", contains);
    env.add_function("hasPrefix", has_prefix);
    env.add_function("hasSuffix", has_suffix);
    env.add_function("toLower", to_lower);
    env.add_function("toUpper", to_upper);
    env.add_function("headerListToCIMap", header_list_to_ci_map);
    env.add_function("hasCIKey", has_ci_key);
    env.add_function("makeSecretPath", make_secret_path);
}

fn split(s: String, delim: String) -> Vec<String> {
    s.split(delim.as_str()).map(str::to_string).collect()
}

fn trim(s: String) -> String {
    s.trim().to_string()
}

fn contains(s: String, substr: String) -> bool {
    s.contains(substr.as_str())
}

fn has_prefix(s: String, prefix: String) -> bool {
    s.starts_with(prefix.as_str())
}

fn has_suffix(s: String, suffix: String) -> bool {
    s.ends_with(suffix.as_str())
}

fn to_lower(s: String) -> String {
    s.to_lowercase()
}

fn to_upper(s: String) -> String {
    s.to_uppercase()
}

/// Maps a list of `{name, value}` headers by lower-cased name.
fn header_list_to_ci_map(headers: Vec<Value>) -> Result<Value, minijinja::Error> {
    let mut map = BTreeMap::new();
    for header in headers {
        let name = header.get_attr("name")?;
        let value = header.get_attr("value")?;
        map.insert(name.to_string().to_lowercase(), value.to_string());
    }
    Ok(Value::from_serialize(&map))
}

fn has_ci_key(key: String, map: Value) -> Result<bool, minijinja::Error> {
    let item = map.get_item(&Value::from(key.to_lowercase()))?;
    Ok(!item.is_undefined())
}

/// Selects the runtime variable path when dynamic certificate reloading is enabled, so that
/// NGINX reads the file per handshake instead of once at reload.
pub(crate) fn make_secret_path(
    path: String,
    default_path: String,
    variable: String,
    use_variable: bool,
) -> String {
    if use_variable {
        path.replacen(&default_path, &variable, 1)
    } else {
        path
    }
}
