use crate::{Error, Result};
use std::{
    fs,
    io::{self, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

/// The paths of the managed configuration tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    conf_dir: PathBuf,
    secrets_dir: PathBuf,
}

// === impl Layout ===

impl Layout {
    pub fn new(conf_dir: impl Into<PathBuf>, secrets_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
            secrets_dir: secrets_dir.into(),
        }
    }

    /// Creates the directories NGINX includes from, along with the files the main
    /// configuration includes unconditionally.
    pub fn init(&self, config_version: &[u8]) -> Result<()> {
        for dir in [
            self.conf_dir.clone(),
            self.http_dir(),
            self.stream_dir(),
            self.secrets_dir.clone(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| Error::write(&dir, e))?;
        }
        if !self.passthrough_hosts().exists() {
            write_atomic(&self.passthrough_hosts(), b"", crate::CONFIG_FILE_MODE)?;
        }
        write_atomic(&self.config_version(), config_version, crate::CONFIG_FILE_MODE)
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    pub fn main(&self) -> PathBuf {
        self.conf_dir.join("nginx.conf")
    }

    pub fn http_dir(&self) -> PathBuf {
        self.conf_dir.join("conf.d")
    }

    pub fn stream_dir(&self) -> PathBuf {
        self.conf_dir.join("stream-conf.d")
    }

    pub fn config(&self, name: &str) -> PathBuf {
        self.http_dir().join(format!("{name}.conf"))
    }

    pub fn stream_config(&self, name: &str) -> PathBuf {
        self.stream_dir().join(format!("{name}.conf"))
    }

    pub fn passthrough_hosts(&self) -> PathBuf {
        self.conf_dir.join("tls-passthrough-hosts.conf")
    }

    pub fn config_version(&self) -> PathBuf {
        self.conf_dir.join("config-version.conf")
    }

    pub fn secret(&self, name: &str) -> PathBuf {
        self.secrets_dir.join(name)
    }
}

/// Replaces `path` with `content` so that readers see either the old or the new file.
///
/// The content is written to a temporary file in the target's directory, given its mode, and
/// renamed over the target.
pub(crate) fn write_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::write(path, e))?;
    tmp.write_all(content)
        .and_then(|()| tmp.as_file().sync_all())
        .and_then(|()| fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode)))
        .map_err(|e| Error::write(path, e))?;
    tmp.persist(path).map_err(|e| Error::write(path, e.error))?;
    tracing::debug!(path = %path.display(), bytes = content.len(), "Wrote file");
    Ok(())
}

/// Removes `path`. A file that is already gone is not an error.
pub(crate) fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Deleted file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::delete(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let layout = Layout::new("/etc/nginx", "/etc/nginx/secrets");
        assert_eq!(layout.main(), Path::new("/etc/nginx/nginx.conf"));
        assert_eq!(
            layout.config("vs_default_cafe"),
            Path::new("/etc/nginx/conf.d/vs_default_cafe.conf")
        );
        assert_eq!(
            layout.stream_config("ts_default_dns"),
            Path::new("/etc/nginx/stream-conf.d/ts_default_dns.conf")
        );
        assert_eq!(
            layout.secret("default_cafe-secret"),
            Path::new("/etc/nginx/secrets/default_cafe-secret")
        );
    }

    #[test]
    fn writes_replace_content_and_set_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("default_cafe-secret");

        write_atomic(&path, b"first", 0o644).expect("first write");
        write_atomic(&path, b"second", 0o600).expect("second write");

        assert_eq!(fs::read(&path).expect("read"), b"second");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // Only the target remains; temporary files were renamed away.
        let entries = fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn init_creates_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(dir.path(), dir.path().join("secrets"));
        layout.init(b"version").expect("init");

        assert!(layout.http_dir().is_dir());
        assert!(layout.stream_dir().is_dir());
        assert!(dir.path().join("secrets").is_dir());
        assert_eq!(fs::read(layout.passthrough_hosts()).expect("read"), b"");
        assert_eq!(fs::read(layout.config_version()).expect("read"), b"version");
    }

    #[test]
    fn remove_ignores_missing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ingress_default_cafe.conf");
        remove(&path).expect("missing file");

        write_atomic(&path, b"server {}", 0o644).expect("write");
        remove(&path).expect("remove");
        assert!(!path.exists());
    }
}
