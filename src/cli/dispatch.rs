use super::check::cmd_check;
use super::commands::Commands;
use super::config::cmd_config;
use super::context::CliContext;
use super::limit::cmd_limit;
use super::permission::cmd_permission;
use super::service::cmd_service;
use super::sweep::cmd_sweep;
use anyhow::Result;

pub async fn dispatch(command: Commands, ctx: &CliContext) -> Result<()> {
    match command {
        Commands::Permission(args) => cmd_permission(args, ctx).await,
        Commands::Limit(args) => cmd_limit(args, ctx).await,
        Commands::Service(args) => cmd_service(args, ctx).await,
        Commands::Sweep(args) => cmd_sweep(args, ctx).await,
        Commands::Check(args) => cmd_check(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx).await,
    }
}
