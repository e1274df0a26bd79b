// File: src/config.rs
// Purpose: Router configuration, runtime form and trailhead.toml form

use crate::path::TrailingSlash;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Where a pathname that matches no route is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotFoundMode {
    /// Nearest matched route declaring a not-found boundary
    #[default]
    Fuzzy,
    /// Always the root route
    Root,
}

/// Runtime router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Prefix every public href carries (default: "/")
    pub basepath: String,
    pub case_sensitive: bool,
    pub trailing_slash: TrailingSlash,
    pub not_found_mode: NotFoundMode,

    /// Loader data younger than this is fresh on navigation
    pub default_stale_time: Duration,
    /// Loader data younger than this is fresh on preload
    pub default_preload_stale_time: Duration,
    /// Cached matches older than this are evicted
    pub default_gc_time: Duration,
    /// Cached preloaded matches older than this are evicted
    pub default_preload_gc_time: Duration,

    /// Redirect chain length before a navigation fails
    pub max_redirects: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            basepath: "/".to_string(),
            case_sensitive: false,
            trailing_slash: TrailingSlash::Never,
            not_found_mode: NotFoundMode::Fuzzy,
            default_stale_time: Duration::ZERO,
            default_preload_stale_time: Duration::from_secs(30),
            default_gc_time: Duration::from_secs(5 * 60),
            default_preload_gc_time: Duration::from_secs(5 * 60),
            max_redirects: 8,
        }
    }
}

/// TOML configuration for trailhead.toml
///
/// Durations are milliseconds. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterTomlConfig {
    #[serde(default = "default_basepath")]
    pub basepath: String,

    #[serde(default)]
    pub case_sensitive: bool,

    #[serde(default)]
    pub trailing_slash: TrailingSlash,

    #[serde(default)]
    pub not_found_mode: NotFoundMode,

    #[serde(default)]
    pub default_stale_time: u64,

    #[serde(default = "default_preload_stale_time")]
    pub default_preload_stale_time: u64,

    #[serde(default = "default_gc_time")]
    pub default_gc_time: u64,

    #[serde(default = "default_gc_time")]
    pub default_preload_gc_time: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

fn default_basepath() -> String {
    "/".to_string()
}

fn default_preload_stale_time() -> u64 {
    30_000
}

fn default_gc_time() -> u64 {
    300_000
}

fn default_max_redirects() -> usize {
    8
}

impl Default for RouterTomlConfig {
    fn default() -> Self {
        Self {
            basepath: default_basepath(),
            case_sensitive: false,
            trailing_slash: TrailingSlash::Never,
            not_found_mode: NotFoundMode::Fuzzy,
            default_stale_time: 0,
            default_preload_stale_time: default_preload_stale_time(),
            default_gc_time: default_gc_time(),
            default_preload_gc_time: default_gc_time(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl RouterTomlConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // If file doesn't exist or is empty, return default config
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: RouterTomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Load configuration from default path (./trailhead.toml)
    pub fn load_default() -> Result<Self> {
        Self::load("trailhead.toml")
    }

    /// Convert TOML config to runtime config
    pub fn to_runtime_config(&self) -> Result<RouterConfig> {
        if !self.basepath.starts_with('/') {
            anyhow::bail!("basepath must start with `/`, got {:?}", self.basepath);
        }

        Ok(RouterConfig {
            basepath: self.basepath.clone(),
            case_sensitive: self.case_sensitive,
            trailing_slash: self.trailing_slash,
            not_found_mode: self.not_found_mode,
            default_stale_time: Duration::from_millis(self.default_stale_time),
            default_preload_stale_time: Duration::from_millis(self.default_preload_stale_time),
            default_gc_time: Duration::from_millis(self.default_gc_time),
            default_preload_gc_time: Duration::from_millis(self.default_preload_gc_time),
            max_redirects: self.max_redirects,
        })
    }
}
