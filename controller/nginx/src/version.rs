use std::{fmt, sync::LazyLock};

static OSS: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^nginx version: nginx/(?P<version>\S+)").expect("valid regex")
});
static PLUS: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^nginx version: nginx/(?P<version>\S+) \((?P<plus>nginx-plus[^)]*)\)")
        .expect("valid regex")
});

/// The version NGINX reports with `nginx -v`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NginxVersion {
    pub raw: String,
    pub oss: String,
    /// The Plus release, e.g. `nginx-plus-r31`, for NGINX Plus binaries.
    pub plus: Option<String>,
}

// === impl NginxVersion ===

impl NginxVersion {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let mut version = Self {
            raw: line.to_string(),
            ..Self::default()
        };
        if let Some(caps) = PLUS.captures(line) {
            version.oss = caps["version"].to_string();
            version.plus = Some(caps["plus"].to_string());
        } else if let Some(caps) = OSS.captures(line) {
            version.oss = caps["version"].to_string();
        }
        version
    }

    pub fn is_plus(&self) -> bool {
        self.plus.is_some()
    }
}

impl fmt::Display for NginxVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plus {
            Some(plus) => write!(f, "{}-{plus}", self.oss),
            None => f.write_str(&self.oss),
        }
    }
}
