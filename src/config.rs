//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/grabtree/grabtree.toml`
//! 3. Local config: file given with `--config`
//! 4. Environment variables: `GRABTREE_*` prefix, `__` between sections
//!    (e.g. `GRABTREE_TREE__SEED=7`, `GRABTREE_SIMULATION__CLIENTS=1,100`)

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::application::ApplicationError;
use crate::domain::{NodeShape, TreeOptions};

/// Shape and durability of the scheduling tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TreeSettings {
    /// Root node variant: `branch` sectors by client, `leaf` is one flat bag
    pub root: NodeShape,
    /// Whether the tree is backed by the persistent store
    pub durable: bool,
    /// Fixed RNG seed for reproducible selection
    pub seed: Option<u64>,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            root: NodeShape::Branch,
            durable: false,
            seed: None,
        }
    }
}

impl From<&TreeSettings> for TreeOptions {
    fn from(settings: &TreeSettings) -> Self {
        TreeOptions {
            root: settings.root,
            durable: settings.durable,
            seed: settings.seed,
        }
    }
}

/// Parameters of the `fairness` and `drain` simulations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimulationSettings {
    /// Queue depth per client
    pub clients: Vec<usize>,
    /// Selections per fairness run
    pub trials: usize,
    /// Concurrent drainers
    pub workers: usize,
    /// Cancel every n-th request before draining
    pub cancel_every: Option<usize>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            clients: vec![1, 100],
            trials: 10_000,
            workers: 4,
            cancel_every: None,
        }
    }
}

/// Raw tree settings for intermediate parsing (`None` = not specified).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawTreeSettings {
    pub root: Option<NodeShape>,
    pub durable: Option<bool>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSimulationSettings {
    pub clients: Option<Vec<usize>>,
    pub trials: Option<usize>,
    pub workers: Option<usize>,
    pub cancel_every: Option<usize>,
}

/// Raw settings for intermediate parsing.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub tree: RawTreeSettings,
    pub simulation: RawSimulationSettings,
}

/// Unified configuration for grabtree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Settings {
    pub tree: TreeSettings,
    pub simulation: SimulationSettings,
}

/// Get the XDG config directory for grabtree.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "grabtree").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("grabtree.toml"))
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    /// Overlay wins wherever it specifies a value.
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        let tree = &overlay.tree;
        let sim = &overlay.simulation;
        Self {
            tree: TreeSettings {
                root: tree.root.unwrap_or(self.tree.root),
                durable: tree.durable.unwrap_or(self.tree.durable),
                seed: tree.seed.or(self.tree.seed),
            },
            simulation: SimulationSettings {
                clients: sim
                    .clients
                    .clone()
                    .unwrap_or_else(|| self.simulation.clients.clone()),
                trials: sim.trials.unwrap_or(self.simulation.trials),
                workers: sim.workers.unwrap_or(self.simulation.workers),
                cancel_every: sim.cancel_every.or(self.simulation.cancel_every),
            },
        }
    }

    /// Load settings with layered precedence.
    ///
    /// # Arguments
    /// * `local` - Optional explicit config file; it must exist when given
    pub fn load(local: Option<&Path>) -> Result<Self, ApplicationError> {
        // 1. Start with defaults
        let mut current = Self::default();

        // 2. Global config
        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                let raw = load_raw_settings(&global_path)?;
                current = current.merge_with(&raw);
            }
        }

        // 3. Explicit local config
        if let Some(path) = local {
            let raw = load_raw_settings(path)?;
            current = current.merge_with(&raw);
        }

        // 4. Environment overrides
        current = Self::apply_env_overrides(current)?;

        current.validate()?;
        Ok(current)
    }

    /// Apply GRABTREE_* environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, ApplicationError> {
        let builder = Config::builder().add_source(
            Environment::with_prefix("GRABTREE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("simulation.clients")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_err)?;

        if let Some(val) = env_value::<NodeShape>(&config, "tree.root")? {
            settings.tree.root = val;
        }
        if let Some(val) = env_value::<bool>(&config, "tree.durable")? {
            settings.tree.durable = val;
        }
        if let Some(val) = env_value::<u64>(&config, "tree.seed")? {
            settings.tree.seed = Some(val);
        }
        if let Some(val) = env_value::<Vec<usize>>(&config, "simulation.clients")? {
            settings.simulation.clients = val;
        }
        if let Some(val) = env_value::<usize>(&config, "simulation.trials")? {
            settings.simulation.trials = val;
        }
        if let Some(val) = env_value::<usize>(&config, "simulation.workers")? {
            settings.simulation.workers = val;
        }
        if let Some(val) = env_value::<usize>(&config, "simulation.cancel_every")? {
            settings.simulation.cancel_every = Some(val);
        }

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ApplicationError> {
        if self.simulation.workers == 0 {
            return Err(ApplicationError::Config {
                message: "simulation.workers must be at least 1".to_string(),
            });
        }
        if self.simulation.cancel_every == Some(0) {
            return Err(ApplicationError::Config {
                message: "simulation.cancel_every must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn tree_options(&self) -> TreeOptions {
        TreeOptions::from(&self.tree)
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# grabtree configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/grabtree/grabtree.toml
#   Local:  file passed with --config
#   Env:    GRABTREE_* environment variables, e.g. GRABTREE_TREE__SEED=7

[tree]
# Root variant: "branch" (one sector per client) or "leaf" (one flat bag)
# root = "branch"

# Tree is backed by the persistent store; items must agree
# durable = false

# Fixed RNG seed for reproducible runs (unset = random)
# seed = 42

[simulation]
# Queue depth per client
# clients = [1, 100]

# Selections per fairness run
# trials = 10000

# Concurrent drainers
# workers = 4

# Cancel every n-th request before draining
# cancel_every = 10
"#
        .to_string()
    }
}

/// Typed lookup of one override; unset is `None`, a malformed value is an error.
fn env_value<T: DeserializeOwned>(config: &Config, key: &str) -> Result<Option<T>, ApplicationError> {
    match config.get::<T>(key) {
        Ok(val) => Ok(Some(val)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(ApplicationError::Config {
            message: format!("GRABTREE env override {key}: {e}"),
        }),
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}
