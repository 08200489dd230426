use std::path::{Path, PathBuf};

use ac_access_control::{AccessControl, AccessControlConfig};
use anyhow::{Context, Result};

use super::output::OutputFormat;

pub struct CliContext {
    config: AccessControlConfig,
    config_path: Option<PathBuf>,
    engine: AccessControl,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(
        config: AccessControlConfig,
        config_path: Option<PathBuf>,
        output: OutputFormat,
    ) -> Result<Self> {
        let engine =
            AccessControl::from_config(&config).context("failed to initialise access control")?;
        Ok(Self {
            config,
            config_path,
            engine,
            output,
        })
    }

    pub fn config(&self) -> &AccessControlConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn engine(&self) -> &AccessControl {
        &self.engine
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }
}
