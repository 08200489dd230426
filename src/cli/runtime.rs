use std::path::{Path, PathBuf};

use ac_access_control::AccessControlConfig;
use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default location checked when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/access_control.yaml";

pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

pub struct LoadedConfig {
    pub config: AccessControlConfig,
    pub path: Option<PathBuf>,
}

pub fn load_config(config_path: Option<&Path>) -> Result<LoadedConfig> {
    let path = match config_path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("configuration file {} does not exist", path.display());
            }
            Some(path.to_path_buf())
        }
        None => {
            let local = PathBuf::from(DEFAULT_CONFIG_PATH);
            local.exists().then_some(local)
        }
    };

    let config = AccessControlConfig::load(path.as_deref()).with_context(|| match &path {
        Some(path) => format!("failed to load configuration from {}", path.display()),
        None => "failed to load configuration from environment".to_string(),
    })?;
    match &path {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => debug!("no configuration file; using defaults and environment"),
    }
    Ok(LoadedConfig { config, path })
}
