use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::worker::ControllerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub offline: OfflineConfig,
  #[serde(default)]
  pub ledger: LedgerConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfflineConfig {
  /// Origin the controller serves, e.g. "https://example.org"
  pub origin: String,
  /// Generation tag; change it whenever the shell or the policy changes
  pub version: String,
  /// Resources cached at install time, resolved against the origin
  #[serde(default)]
  pub shell: Vec<String>,
  /// Cache database (defaults to $XDG_DATA_HOME/cassa/cache.db)
  pub cache_path: Option<PathBuf>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
  /// Ledger database (defaults to $XDG_DATA_HOME/cassa/ledger.db)
  pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Also write logs to daily files under the data directory
  #[serde(default)]
  pub file: bool,
}

impl OfflineConfig {
  pub fn controller_config(&self) -> Result<ControllerConfig> {
    ControllerConfig::new(&self.origin, &self.version, &self.shell)
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cassa.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cassa/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/cassa/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cassa.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cassa").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document. The version is stored trimmed, the
  /// same tag the controller uses for its generation.
  pub fn parse(contents: &str) -> Result<Self> {
    let mut config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    let controller = config.offline.controller_config()?;
    config.offline.version = controller.version().to_string();
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
offline:
  origin: "https://example.org"
  version: "v2"
  shell:
    - /cassa/
    - /cassa/index.html
"#;

  #[test]
  fn test_parse_with_defaults() {
    let config = Config::parse(SAMPLE).unwrap();
    assert_eq!(config.offline.version, "v2");
    assert_eq!(config.offline.timeout(), Duration::from_secs(30));
    assert!(config.offline.cache_path.is_none());
    assert!(config.ledger.db_path.is_none());
    assert!(!config.log.file);

    let controller = config.offline.controller_config().unwrap();
    assert_eq!(controller.shell().len(), 2);
    assert_eq!(controller.shell()[0].as_str(), "https://example.org/cassa/");
  }

  #[test]
  fn test_parse_rejects_foreign_shell_entry() {
    let yaml = r#"
offline:
  origin: "https://example.org"
  version: "v1"
  shell: ["https://elsewhere.net/app.js"]
"#;
    assert!(Config::parse(yaml).is_err());
  }

  #[test]
  fn test_version_matches_generation_tag() {
    let yaml = r#"
offline:
  origin: "https://example.org"
  version: " v2 "
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.offline.version, "v2");
    assert_eq!(config.offline.controller_config().unwrap().version(), "v2");
  }

  #[test]
  fn test_load_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cassa.yaml");
    std::fs::write(
      &path,
      format!("{}\nledger:\n  db_path: /tmp/ledger.db\nlog:\n  file: true\n", SAMPLE),
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.ledger.db_path, Some(PathBuf::from("/tmp/ledger.db")));
    assert!(config.log.file);

    assert!(Config::load(Some(&dir.path().join("missing.yaml"))).is_err());
  }
}
