use std::path::PathBuf;

use ac_access_control::AccessControlConfig;
use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {}

/// Configuration the engine was built from, after env overlays.
#[derive(Debug, Serialize)]
pub struct EffectiveConfig<'a> {
    pub source: Option<PathBuf>,
    pub config: &'a AccessControlConfig,
}

pub fn effective(ctx: &CliContext) -> EffectiveConfig<'_> {
    EffectiveConfig {
        source: ctx.config_path().map(PathBuf::from),
        config: ctx.config(),
    }
}

pub async fn cmd_config(_args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let shown = effective(ctx);
    let body = serde_yaml::to_string(shown.config)?;
    ctx.output().emit(&shown, || {
        match &shown.source {
            Some(path) => println!("Current configuration ({}):", path.display()),
            None => println!("Current configuration (built-in defaults):"),
        }
        print!("{body}");
    })
}
