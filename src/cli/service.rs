use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ServiceArgs {
    #[command(subcommand)]
    pub command: ServiceCommand,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ServiceCommand {
    /// Print the service tree
    Ls(ServiceLsArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServiceLsArgs {
    /// Subtree to print; the whole tree when omitted
    pub service: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServiceEntry {
    pub name: String,
    pub qualified_name: String,
    pub depth: usize,
}

pub async fn cmd_service(args: ServiceArgs, ctx: &CliContext) -> Result<()> {
    match args.command {
        ServiceCommand::Ls(ls) => {
            let entries = entries(ctx, ls.service.as_deref())?;
            ctx.output().emit(&entries, || {
                for entry in &entries {
                    println!("{}{}", "  ".repeat(entry.depth), entry.name);
                }
            })
        }
    }
}

/// Pre-order listing of the subtree at `service`, depth relative to it.
pub fn entries(ctx: &CliContext, service: Option<&str>) -> Result<Vec<ServiceEntry>> {
    let engine = ctx.engine();
    let tree = engine.tree();
    let start = match service {
        Some(name) => engine.service(name)?,
        None => tree.root(),
    };
    let base = tree.trace(start).count();
    Ok(tree
        .travel(start)
        .map(|node| ServiceEntry {
            name: node.name().to_string(),
            qualified_name: node.qualified_name().to_string(),
            depth: tree.trace(node.id()).count() - base,
        })
        .collect())
}
