use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct SweepArgs {}

pub async fn cmd_sweep(_args: SweepArgs, ctx: &CliContext) -> Result<()> {
    let purged = ctx
        .engine()
        .tokens()
        .purge_expired_tokens()
        .await
        .context("token sweep failed")?;
    info!(purged, "manual sweep finished");
    ctx.output().emit(&purged, || {
        println!("purged {purged} expired tokens");
    })
}
