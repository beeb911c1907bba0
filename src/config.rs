// src/config.rs

//! Configuration loading utilities.
//!
//! Loads `config.toml`, overlays credentials and overrides from the
//! environment, and validates the result.

use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::{Config, SourceKind};

/// Environment variable names recognised by [`apply_env`].
pub mod env {
    pub const EBAY_CLIENT_ID: &str = "EBAY_CLIENT_ID";
    pub const EBAY_CLIENT_SECRET: &str = "EBAY_CLIENT_SECRET";
    pub const STORE_PATH: &str = "PARTSFINDER_STORE";
    pub const DEADLINE_SECS: &str = "PARTSFINDER_DEADLINE_SECS";
}

/// Overlay values from the environment onto a loaded configuration.
///
/// `lookup` is injected so tests do not depend on the process environment.
pub fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let ebay_id = lookup(env::EBAY_CLIENT_ID);
    let ebay_secret = lookup(env::EBAY_CLIENT_SECRET);

    for source in &mut config.sources {
        if let SourceKind::Ebay {
            client_id,
            client_secret,
            ..
        } = &mut source.kind
        {
            if client_id.is_empty() {
                if let Some(id) = &ebay_id {
                    *client_id = id.clone();
                }
            }
            if client_secret.is_empty() {
                if let Some(secret) = &ebay_secret {
                    *client_secret = secret.clone();
                }
            }
        }
    }

    if let Some(path) = lookup(env::STORE_PATH) {
        config.store_path = path;
    }

    if let Some(deadline) = lookup(env::DEADLINE_SECS) {
        match deadline.parse() {
            Ok(secs) => config.scheduler.deadline_secs = secs,
            Err(e) => log::warn!("Ignoring {}={:?}: {}", env::DEADLINE_SECS, deadline, e),
        }
    }
}

/// Resolve the store path relative to the config directory.
pub fn store_path(config: &Config, base_dir: &Path) -> PathBuf {
    let path = PathBuf::from(&config.store_path);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

/// Load, overlay and validate configuration from `{base_dir}/config.toml`.
///
/// A missing or unreadable file falls back to defaults; an invalid result is
/// an error.
pub fn load_all(base_dir: &Path) -> Result<Config> {
    let mut config = Config::load_or_default(base_dir.join("config.toml"));
    apply_env(&mut config, |key| std::env::var(key).ok());

    config
        .validate()
        .map_err(|e| AppError::config(format!("Invalid configuration: {e}")))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::models::{SourceConfig, SourceId};

    fn with_ebay() -> Config {
        let mut config = Config::default();
        config.sources.push(SourceConfig {
            id: SourceId(3),
            name: "Ebay".into(),
            kind: SourceKind::Ebay {
                base_url: String::new(),
                client_id: String::new(),
                client_secret: "configured".into(),
                sandbox: false,
                marketplace: "EBAY_DE".into(),
                category_ids: None,
                page_size: 50,
            },
        });
        config
    }

    #[test]
    fn env_fills_only_missing_credentials() {
        let vars: HashMap<&str, &str> = [
            (env::EBAY_CLIENT_ID, "from-env"),
            (env::EBAY_CLIENT_SECRET, "env-secret"),
            (env::DEADLINE_SECS, "90"),
        ]
        .into_iter()
        .collect();

        let mut config = with_ebay();
        apply_env(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        let SourceKind::Ebay {
            client_id,
            client_secret,
            ..
        } = &config.sources[1].kind
        else {
            panic!("expected eBay source");
        };
        assert_eq!(client_id, "from-env");
        assert_eq!(client_secret, "configured");
        assert_eq!(config.scheduler.deadline_secs, 90);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_deadline_override_is_ignored() {
        let mut config = Config::default();
        apply_env(&mut config, |k| {
            (k == env::DEADLINE_SECS).then(|| "soon".to_string())
        });
        assert_eq!(config.scheduler.deadline_secs, 30 * 60);
    }

    #[test]
    fn store_path_is_relative_to_base_dir() {
        let config = Config::default();
        assert_eq!(
            store_path(&config, Path::new("/srv/parts")),
            PathBuf::from("/srv/parts/parts.json")
        );
    }

    #[test]
    fn load_all_falls_back_to_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_all(tmp.path()).unwrap();
        assert_eq!(config.sources.len(), 1);
    }
}
