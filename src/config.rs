//! argo-forge configuration
//!
//! Defaults for rendering and for the catalog workflows, read from TOML.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI flags
//! 2. Environment variables (`ARGO_FORGE_NAMESPACE`, `ARGO_FORGE_FORMAT`)
//! 3. Config file: `--config <path>`, else `./argo-forge.toml`, else
//!    `~/.config/argo-forge/config.toml`
//! 4. Defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::catalog::CatalogOptions;
use crate::error::{ForgeError, Result};
use crate::render::{OutputFormat, RenderOptions};

/// Project-local config file name
pub const LOCAL_FILE: &str = "argo-forge.toml";

pub const ENV_NAMESPACE: &str = "ARGO_FORGE_NAMESPACE";
pub const ENV_FORMAT: &str = "ARGO_FORGE_FORMAT";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ForgeConfig {
    #[serde(default)]
    pub render: RenderDefaults,

    #[serde(default)]
    pub images: ImageDefaults,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RenderDefaults {
    pub format: Option<OutputFormat>,

    /// `metadata.namespace` of rendered templates
    pub namespace: Option<String>,

    pub service_account: Option<String>,

    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ImageDefaults {
    /// ConfigMap the workflows read image locations from
    pub config_map: Option<String>,
}

impl ForgeConfig {
    /// `~/.config/argo-forge/` on Unix, `%APPDATA%/argo-forge/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("argo-forge")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from `explicit`, or the first config file found
    ///
    /// A missing explicit path is an error; missing default files are not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ForgeError::ConfigError {
                    reason: format!("config file '{}' not found", path.display()),
                });
            }
            return Self::from_file(path);
        }
        for path in [PathBuf::from(LOCAL_FILE), Self::config_path()] {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| ForgeError::ConfigError {
            reason: format!("Failed to read config file: {}", e),
        })?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ForgeError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Merge with environment variables
    pub fn with_env(self) -> Result<Self> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Environment overrides from an arbitrary lookup
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(ns) = lookup(ENV_NAMESPACE).filter(|v| !v.is_empty()) {
            self.render.namespace = Some(ns);
        }
        if let Some(format) = lookup(ENV_FORMAT).filter(|v| !v.is_empty()) {
            self.render.format = Some(format.parse()?);
        }
        Ok(self)
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            namespace: self.render.namespace.clone(),
            format: self.render.format.unwrap_or_default(),
        }
    }

    pub fn catalog_options(&self) -> CatalogOptions {
        let defaults = CatalogOptions::default();
        CatalogOptions {
            image_config_map: self
                .images
                .config_map
                .clone()
                .unwrap_or(defaults.image_config_map),
            service_account: self
                .render
                .service_account
                .clone()
                .unwrap_or(defaults.service_account),
            parallelism: self.render.parallelism.unwrap_or(defaults.parallelism),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_config_path_contains_argo_forge() {
        let path = ForgeConfig::config_path();
        assert!(path.to_string_lossy().contains("argo-forge"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_parse_full_config() {
        let config = ForgeConfig::parse(
            r#"
            [render]
            format = "json"
            namespace = "migrations"
            service_account = "runner"
            parallelism = 8

            [images]
            config_map = "images"
            "#,
        )
        .unwrap();
        assert_eq!(config.render.format, Some(OutputFormat::Json));
        let options = config.catalog_options();
        assert_eq!(options.image_config_map, "images");
        assert_eq!(options.service_account, "runner");
        assert_eq!(options.parallelism, 8);
        assert_eq!(
            config.render_options().namespace.as_deref(),
            Some("migrations")
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ForgeConfig::parse("").unwrap();
        assert_eq!(config, ForgeConfig::default());
        assert_eq!(config.catalog_options(), CatalogOptions::default());
        assert_eq!(config.render_options(), RenderOptions::default());
    }

    #[test]
    fn test_malformed_config_is_config_error() {
        let err = ForgeConfig::parse("[render\nformat = ").unwrap_err();
        assert_eq!(err.code(), "FORGE-096");
        let err = ForgeConfig::parse("[render]\nformat = \"xml\"").unwrap_err();
        assert_eq!(err.code(), "FORGE-096");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(ForgeConfig::parse("[render]\ncolour = true").is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forge.toml");
        fs::write(&path, "[images]\nconfig_map = \"from-file\"\n").unwrap();
        let config = ForgeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.images.config_map.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let err = ForgeConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert_eq!(err.code(), "FORGE-096");
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_NAMESPACE, "from-env"), (ENV_FORMAT, "json")]);
        let config = ForgeConfig::parse("[render]\nnamespace = \"from-file\"")
            .unwrap()
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.render.namespace.as_deref(), Some("from-env"));
        assert_eq!(config.render.format, Some(OutputFormat::Json));
    }

    #[test]
    fn test_bad_env_format() {
        let err = ForgeConfig::default()
            .apply_env(|k| (k == ENV_FORMAT).then(|| "xml".to_string()))
            .unwrap_err();
        assert_eq!(err.code(), "FORGE-096");
    }
}
