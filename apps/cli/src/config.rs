//! CLI configuration file.
//!
//! Lives at `$XDG_CONFIG_HOME/filmup/config.json` (or
//! `~/.config/filmup/config.json`) unless `--config` points elsewhere.

use std::path::{Path, PathBuf};
use std::time::Duration;

use filmup_transfer::{DEFAULT_CHUNK_SIZE, TusConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// API base URL; content kinds resolve their routes under it.
    pub api_url: String,

    /// Sent as `Authorization: Bearer <token>` when set.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub auth_token: String,

    pub chunk_size: usize,

    /// 0 streams every upload at once.
    pub max_concurrent_uploads: usize,

    pub request_timeout_secs: u64,

    /// Send a sha256 checksum with every chunk.
    pub checksum: bool,

    /// Journal of unfinished uploads. Defaults to `uploads.json` next to
    /// the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_path: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            auth_token: String::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_uploads: 0,
            request_timeout_secs: 60,
            checksum: false,
            journal_path: None,
        }
    }
}

impl CliConfig {
    /// Loads the config at `path`. A missing or unparsable file yields
    /// defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        set_permissions_0600(path);
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Sets one field by its file key, e.g. `("api_url", "https://...")`.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "api_url" => self.api_url = value.to_string(),
            "auth_token" => self.auth_token = value.to_string(),
            "chunk_size" => self.chunk_size = value.parse()?,
            "max_concurrent_uploads" => self.max_concurrent_uploads = value.parse()?,
            "request_timeout_secs" => self.request_timeout_secs = value.parse()?,
            "checksum" => self.checksum = value.parse()?,
            "journal_path" => {
                self.journal_path = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            other => anyhow::bail!("unknown config key: {other}"),
        }
        Ok(())
    }

    pub fn tus_config(&self) -> TusConfig {
        TusConfig {
            chunk_size: self.chunk_size,
            max_concurrent: self.max_concurrent_uploads,
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            checksum: self.checksum,
        }
    }

    pub fn journal_path(&self, config_path: &Path) -> PathBuf {
        self.journal_path.clone().unwrap_or_else(|| {
            config_path
                .parent()
                .map_or_else(|| PathBuf::from("uploads.json"), |d| d.join("uploads.json"))
        })
    }
}

// The file holds the auth token.
fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

pub fn default_config_path() -> PathBuf {
    config_base_dir().join("filmup").join("config.json")
}

fn config_base_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CliConfig::load(&tmp.path().join("config.json")).unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("filmup").join("config.json");
        let config = CliConfig {
            api_url: "https://api.filmup.test/".into(),
            auth_token: "secret".into(),
            max_concurrent_uploads: 3,
            ..Default::default()
        };
        config.save(&path).unwrap();

        assert_eq!(CliConfig::load(&path).unwrap(), config);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn partial_and_corrupt_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");

        std::fs::write(&path, r#"{"api_url": "https://x.test"}"#).unwrap();
        let config = CliConfig::load(&path).unwrap();
        assert_eq!(config.api_url, "https://x.test");
        assert_eq!(config.request_timeout_secs, 60);

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(CliConfig::load(&path).unwrap(), CliConfig::default());
    }

    #[test]
    fn set_parses_typed_values() {
        let mut config = CliConfig::default();
        config.set("api_url", "https://api.filmup.test").unwrap();
        config.set("max_concurrent_uploads", "2").unwrap();
        config.set("checksum", "true").unwrap();
        config.set("journal_path", "/var/lib/filmup/uploads.json").unwrap();
        assert_eq!(config.api_url, "https://api.filmup.test");
        assert_eq!(config.max_concurrent_uploads, 2);
        assert!(config.checksum);
        assert!(config.journal_path.is_some());

        config.set("journal_path", "").unwrap();
        assert!(config.journal_path.is_none());
        assert!(config.set("chunk_size", "big").is_err());
        assert!(config.set("colour", "blue").is_err());
    }

    #[test]
    fn journal_defaults_next_to_config() {
        let config = CliConfig::default();
        assert_eq!(
            config.journal_path(Path::new("/etc/filmup/config.json")),
            PathBuf::from("/etc/filmup/uploads.json")
        );
        let tus = config.tus_config();
        assert_eq!(tus.request_timeout, Duration::from_secs(60));
        assert_eq!(tus.max_concurrent, 0);
    }
}
