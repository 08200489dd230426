use ac_access_control::{parse_time_span, RateLimitRule};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct LimitArgs {
    #[command(subcommand)]
    pub command: LimitCommand,
}

#[derive(Subcommand, Clone, Debug)]
pub enum LimitCommand {
    /// Add a rule: at most LIMIT invocations per SPAN for each user
    Add(LimitAddArgs),
    /// Delete a rule and its tokens
    Rm(LimitRmArgs),
    /// List rules
    Ls(LimitLsArgs),
}

#[derive(Args, Clone, Debug)]
pub struct LimitAddArgs {
    /// Qualified service name
    pub service: String,
    /// Subject the rule applies to
    pub subject: String,
    /// Window length, e.g. 30s, 10m, 1h, 1d or plain seconds
    pub span: String,
    /// Tokens allowed per window
    pub limit: u32,
}

#[derive(Args, Clone, Debug)]
pub struct LimitRmArgs {
    pub id: i64,
}

#[derive(Args, Clone, Debug)]
pub struct LimitLsArgs {
    /// Service to list; every service when omitted
    pub service: Option<String>,
    /// Only show rules for this subject
    #[arg(long)]
    pub subject: Option<String>,
    /// Include rules inherited from ancestors
    #[arg(long)]
    pub trace: bool,
}

pub async fn cmd_limit(args: LimitArgs, ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine();
    match args.command {
        LimitCommand::Add(add) => {
            let service = engine.service(&add.service)?;
            let span = parse_time_span(&add.span)?;
            let rule = engine
                .rate_limits()
                .add_rate_limit_rule(service, &add.subject, span, add.limit)
                .await
                .context("failed to add rate limit rule")?;
            ctx.output().emit(&rule, || {
                println!("added rule {}", describe(&rule));
            })
        }
        LimitCommand::Rm(rm) => {
            let removed = engine
                .rate_limits()
                .remove_rate_limit_rule(rm.id)
                .await
                .context("failed to remove rate limit rule")?;
            ctx.output().emit(&removed, || {
                if removed {
                    println!("removed rule {}", rm.id);
                } else {
                    println!("no rule {}", rm.id);
                }
            })
        }
        LimitCommand::Ls(ls) => {
            let rules = list(ctx, &ls).await?;
            ctx.output().emit(&rules, || {
                if rules.is_empty() {
                    println!("no rate limit rules");
                }
                for rule in &rules {
                    println!("{}", describe(rule));
                }
            })
        }
    }
}

pub async fn list(ctx: &CliContext, args: &LimitLsArgs) -> Result<Vec<RateLimitRule>> {
    let limits = ctx.engine().rate_limits();
    let rules = match (&args.service, &args.subject) {
        (Some(name), Some(subject)) => {
            let service = ctx.engine().service(name)?;
            limits
                .get_rate_limit_rules(service, &[subject.as_str()], args.trace)
                .await?
        }
        (Some(name), None) => {
            let service = ctx.engine().service(name)?;
            limits.get_all_rate_limit_rules(service, args.trace).await?
        }
        (None, Some(subject)) => {
            limits
                .get_all_rate_limit_rules_by_subject(&[subject.as_str()])
                .await?
        }
        (None, None) => limits.all_rate_limit_rules().await?,
    };
    Ok(rules)
}

fn describe(rule: &RateLimitRule) -> String {
    format!(
        "#{:<5} {:<32} {:<24} {} per {}",
        rule.id,
        rule.service_name,
        rule.subject,
        rule.limit,
        humantime::format_duration(rule.time_span)
    )
}
