use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::CustosConfig;
use custos_core::{CustosError, Result};

/// Loads the Custos configuration from disk and the environment.
#[derive(Debug)]
pub struct ConfigLoader {
    config: CustosConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > CUSTOS_CONFIG env > ~/.custos/custos.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CUSTOS_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".custos")
            .join("custos.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            CustosConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(CustosError::Config(e)),
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Parse a TOML document without touching the environment.
    pub fn parse(raw: &str, origin: &Path) -> Result<CustosConfig> {
        toml::from_str::<CustosConfig>(raw).map_err(|e| {
            CustosError::Config(format!("failed to parse {}: {}", origin.display(), e))
        })
    }

    /// A snapshot of the loaded config.
    pub fn get(&self) -> CustosConfig {
        self.config.clone()
    }

    /// Path the config was (or would have been) read from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (CUSTOS_DB_PATH, CUSTOS_SERVER_LISTEN, etc.)
    fn apply_env_overrides(mut config: CustosConfig) -> CustosConfig {
        if let Ok(v) = std::env::var("CUSTOS_DB_PATH") {
            config.store.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CUSTOS_SERVER_LISTEN") {
            config.server.listen = v;
        }
        if let Ok(v) = std::env::var("CUSTOS_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("CUSTOS_COPILOT_CEILING_USD") {
            match v.parse::<f64>() {
                Ok(ceiling) => config.policy.copilot_ceiling_usd = ceiling,
                Err(_) => warn!(value = %v, "ignoring unparseable CUSTOS_COPILOT_CEILING_USD"),
            }
        }
        if let Ok(v) = std::env::var("CUSTOS_RENEWAL_TICK_SECS") {
            match v.parse::<u64>() {
                Ok(secs) => config.renewal.tick_interval_secs = secs,
                Err(_) => warn!(value = %v, "ignoring unparseable CUSTOS_RENEWAL_TICK_SECS"),
            }
        }
        // Config file wins; env fills in a missing key.
        if config.server.api_key.is_none() {
            if let Ok(v) = std::env::var("CUSTOS_API_KEY") {
                config.server.api_key = Some(v);
            }
        }
        config
    }
}
