use ac_access_control::Permission;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct PermissionArgs {
    #[command(subcommand)]
    pub command: PermissionCommand,
}

#[derive(Subcommand, Clone, Debug)]
pub enum PermissionCommand {
    /// Grant `subject` access to a service and its descendants
    Allow(GrantArgs),
    /// Explicitly deny `subject` on a service and its descendants
    Deny(GrantArgs),
    /// Remove the grant held exactly at a service
    Rm(GrantArgs),
    /// List grants
    Ls(PermissionLsArgs),
}

#[derive(Args, Clone, Debug)]
pub struct GrantArgs {
    /// Qualified service name, e.g. weather.forecast
    pub service: String,
    /// Subject, e.g. qq:12345, qq:g1001, qq or all
    pub subject: String,
}

#[derive(Args, Clone, Debug)]
pub struct PermissionLsArgs {
    /// Service to list; every service when omitted
    pub service: Option<String>,
    /// Only show grants for this subject
    #[arg(long)]
    pub subject: Option<String>,
    /// Include grants inherited from ancestors
    #[arg(long)]
    pub trace: bool,
}

pub async fn cmd_permission(args: PermissionArgs, ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine();
    match args.command {
        PermissionCommand::Allow(grant) => set(ctx, grant, true).await,
        PermissionCommand::Deny(grant) => set(ctx, grant, false).await,
        PermissionCommand::Rm(grant) => {
            let service = engine.service(&grant.service)?;
            let removed = engine
                .permissions()
                .remove_permission(service, &grant.subject)
                .await
                .context("failed to remove permission")?;
            ctx.output().emit(&removed, || {
                if removed {
                    println!("removed {} on {}", grant.subject, grant.service);
                } else {
                    println!("no grant for {} on {}", grant.subject, grant.service);
                }
            })
        }
        PermissionCommand::Ls(ls) => {
            let permissions = list(ctx, &ls).await?;
            ctx.output().emit(&permissions, || {
                if permissions.is_empty() {
                    println!("no permissions");
                }
                for permission in &permissions {
                    println!(
                        "{:<32} {:<24} {}",
                        permission.service_name,
                        permission.subject,
                        if permission.allow { "allow" } else { "deny" }
                    );
                }
            })
        }
    }
}

async fn set(ctx: &CliContext, grant: GrantArgs, allow: bool) -> Result<()> {
    let engine = ctx.engine();
    let service = engine.service(&grant.service)?;
    engine
        .permissions()
        .set_permission(service, &grant.subject, allow)
        .await
        .context("failed to store permission")?;
    ctx.output().emit(&allow, || {
        let verb = if allow { "allowed" } else { "denied" };
        println!("{} {} on {}", verb, grant.subject, grant.service);
    })
}

pub async fn list(ctx: &CliContext, args: &PermissionLsArgs) -> Result<Vec<Permission>> {
    let engine = ctx.engine();
    let mut permissions = match &args.service {
        Some(name) => {
            let service = engine.service(name)?;
            engine
                .permissions()
                .get_all_permissions(service, args.trace)
                .await?
        }
        None => {
            let tree = engine.tree();
            let mut all = Vec::new();
            for node in tree.travel(tree.root()) {
                all.extend(
                    engine
                        .permissions()
                        .get_all_permissions(node.id(), false)
                        .await?,
                );
            }
            all
        }
    };
    if let Some(subject) = &args.subject {
        permissions.retain(|permission| &permission.subject == subject);
    }
    Ok(permissions)
}
