//! On-disk layout of the Haven data directory.

use std::path::{Path, PathBuf};

use haven_common::{Capabilities, Error, Result};

use crate::atomic::{harden_permissions, MODE_DIR};

/// File name of the secret store.
pub const SECRETS_FILENAME: &str = "secrets.json";

/// File name of the vault configuration.
pub const CONFIG_FILENAME: &str = "config.json";

/// File name of the private key PEM.
pub const PRIVATE_KEY_FILENAME: &str = "private.pem";

/// File name of the public key PEM.
pub const PUBLIC_KEY_FILENAME: &str = "public.pem";

/// Directory name for rotation backups.
pub const BACKUPS_DIRNAME: &str = "backups";

/// Resolved locations of every file Haven persists.
#[derive(Debug, Clone)]
pub struct StorePaths {
    base: PathBuf,
}

impl StorePaths {
    /// Create paths rooted at an explicit base directory.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Create paths rooted at the default location, `~/.haven`.
    ///
    /// # Errors
    /// - `Storage` if the home directory cannot be determined
    pub fn default_base() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Storage("home directory could not be determined".to_string()))?;
        Ok(Self::new(home.join(".haven")))
    }

    /// The base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Path of the secret store file.
    pub fn secrets_file(&self) -> PathBuf {
        self.base.join(SECRETS_FILENAME)
    }

    /// Path of the configuration file.
    pub fn config_file(&self) -> PathBuf {
        self.base.join(CONFIG_FILENAME)
    }

    /// Path of the private key file.
    pub fn private_key_file(&self) -> PathBuf {
        self.base.join(PRIVATE_KEY_FILENAME)
    }

    /// Path of the public key file.
    pub fn public_key_file(&self) -> PathBuf {
        self.base.join(PUBLIC_KEY_FILENAME)
    }

    /// Path of the backups directory.
    pub fn backups_dir(&self) -> PathBuf {
        self.base.join(BACKUPS_DIRNAME)
    }

    /// Create the base directory (owner-only) if it does not exist.
    pub fn ensure_base(&self, caps: &Capabilities) -> Result<()> {
        if !self.base.exists() {
            std::fs::create_dir_all(&self.base)?;
        }
        harden_permissions(&self.base, MODE_DIR, caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_layout() {
        let paths = StorePaths::new("/tmp/haven-test");
        assert_eq!(paths.secrets_file(), Path::new("/tmp/haven-test/secrets.json"));
        assert_eq!(paths.config_file(), Path::new("/tmp/haven-test/config.json"));
        assert_eq!(
            paths.private_key_file(),
            Path::new("/tmp/haven-test/private.pem")
        );
        assert_eq!(
            paths.public_key_file(),
            Path::new("/tmp/haven-test/public.pem")
        );
        assert_eq!(paths.backups_dir(), Path::new("/tmp/haven-test/backups"));
    }

    #[test]
    fn test_ensure_base_creates_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = StorePaths::new(temp.path().join("nested/.haven"));
        paths.ensure_base(&Capabilities::detect()).unwrap();
        assert!(paths.base().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_base_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let paths = StorePaths::new(temp.path().join(".haven"));
        paths.ensure_base(&Capabilities::detect()).unwrap();

        let mode = std::fs::metadata(paths.base()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }
}
