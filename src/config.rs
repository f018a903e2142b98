use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::graph::{AssemblyOptions, ExpansionPolicy};
use crate::model::properties::{ElementKind, PropertiesRegistry};
use crate::render::{Direction, RenderOptions};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub metaview: MetaviewConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Snapshot location and logging
#[derive(Debug, Clone, Deserialize)]
pub struct MetaviewConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Directory of numbered `.sql` files; the bundled migrations are used when absent
    #[serde(default)]
    pub migrations_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for MetaviewConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            migrations_dir: None,
            log_level: default_log_level(),
        }
    }
}

/// Traversal limits and defaults
#[derive(Debug, Clone, Deserialize)]
pub struct AssemblyConfig {
    #[serde(default = "default_max_depth")]
    pub default_max_depth: usize,
    #[serde(default = "default_max_depth_limit")]
    pub max_depth_limit: usize,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// 0 disables the per-fetch timeout
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default)]
    pub default_policy: ExpansionPolicy,
    #[serde(default = "default_probe_frontier")]
    pub probe_frontier: bool,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            default_max_depth: default_max_depth(),
            max_depth_limit: default_max_depth_limit(),
            concurrency_limit: default_concurrency_limit(),
            page_size: default_page_size(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            default_policy: ExpansionPolicy::default(),
            probe_frontier: default_probe_frontier(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub show_guids: bool,
}

/// Extra repository type names mapped onto element kinds
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub aliases: BTreeMap<String, ElementKind>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("metaview.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_depth() -> usize {
    4
}

fn default_max_depth_limit() -> usize {
    16
}

fn default_concurrency_limit() -> usize {
    8
}

fn default_page_size() -> usize {
    100
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_probe_frontier() -> bool {
    true
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in METAVIEW_CONFIG environment variable
    /// 2. ./metaview.toml in current directory
    ///
    /// A missing `./metaview.toml` yields the defaults; a missing file named by
    /// METAVIEW_CONFIG is an error.
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let config = match std::env::var("METAVIEW_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                let path = PathBuf::from("metaview.toml");
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    log::debug!("No metaview.toml found, using defaults");
                    Config::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&config_str).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let assembly = &self.assembly;
        if assembly.max_depth_limit == 0 {
            anyhow::bail!("assembly.max_depth_limit must be greater than 0");
        }
        if assembly.default_max_depth == 0 || assembly.default_max_depth > assembly.max_depth_limit {
            anyhow::bail!(
                "assembly.default_max_depth must be between 1 and max_depth_limit ({})",
                assembly.max_depth_limit
            );
        }
        if assembly.concurrency_limit == 0 {
            anyhow::bail!("assembly.concurrency_limit must be greater than 0");
        }
        if assembly.page_size < 2 {
            anyhow::bail!("assembly.page_size must be at least 2");
        }
        if let Some((name, _)) = self
            .registry
            .aliases
            .iter()
            .find(|(name, kind)| name.trim().is_empty() || **kind == ElementKind::Unrecognized)
        {
            anyhow::bail!("registry.aliases entry {:?} must name a type and a known kind", name);
        }
        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.metaview.db_path
    }

    pub fn migrations_dir(&self) -> Option<PathBuf> {
        self.metaview.migrations_dir.clone()
    }

    pub fn assembly_options(&self) -> AssemblyOptions {
        let assembly = &self.assembly;
        AssemblyOptions {
            concurrency_limit: assembly.concurrency_limit,
            page_size: assembly.page_size,
            fetch_timeout: (assembly.fetch_timeout_ms > 0)
                .then(|| Duration::from_millis(assembly.fetch_timeout_ms)),
            max_depth_limit: assembly.max_depth_limit,
            probe_frontier: assembly.probe_frontier,
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            direction: self.render.direction,
            show_guids: self.render.show_guids,
        }
    }

    pub fn registry(&self) -> PropertiesRegistry {
        PropertiesRegistry::with_aliases(&self.registry.aliases)
    }
}
