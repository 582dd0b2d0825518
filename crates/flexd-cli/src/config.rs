//! Layered configuration: built-in defaults, an optional TOML file, then
//! environment variables, each overriding the last.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_ROOT_DIR: &str = "/aks-flex";
const DEFAULT_ETC_ROOT: &str = "/";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct Config {
    pub root_dir: PathBuf,
    pub etc_root: PathBuf,
    pub fetch_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            etc_root: PathBuf::from(DEFAULT_ETC_ROOT),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FileConfig {
    root_dir: Option<PathBuf>,
    etc_root: Option<PathBuf>,
    fetch_timeout_secs: Option<u64>,
}

impl Config {
    /// Apply `<file_path>` (if it exists) over the defaults, then apply
    /// `FLEXD_ROOT_DIR`, `FLEXD_ETC_ROOT`, `FLEXD_FETCH_TIMEOUT_SECS` over
    /// that.
    pub fn load(file_path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(path) = file_path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                let file_config: FileConfig = toml::from_str(&text)?;
                if let Some(root_dir) = file_config.root_dir {
                    config.root_dir = root_dir;
                }
                if let Some(etc_root) = file_config.etc_root {
                    config.etc_root = etc_root;
                }
                if let Some(secs) = file_config.fetch_timeout_secs {
                    config.fetch_timeout = Duration::from_secs(secs);
                }
            }
        }

        if let Ok(root_dir) = std::env::var("FLEXD_ROOT_DIR") {
            config.root_dir = PathBuf::from(root_dir);
        }
        if let Ok(etc_root) = std::env::var("FLEXD_ETC_ROOT") {
            config.etc_root = PathBuf::from(etc_root);
        }
        if let Ok(secs) = std::env::var("FLEXD_FETCH_TIMEOUT_SECS") {
            config.fetch_timeout = Duration::from_secs(secs.parse()?);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_no_file_and_no_env() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.root_dir, PathBuf::from(DEFAULT_ROOT_DIR));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flexd.toml");
        std::fs::write(&path, "rootDir = \"/opt/flexd\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/opt/flexd"));
    }
}
