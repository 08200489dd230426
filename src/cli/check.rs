use ac_access_control::{AccessError, InvocationContext};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct CheckArgs {
    /// Qualified service name
    pub service: String,
    /// Acting user id
    #[arg(long)]
    pub user: String,
    /// Platform the invocation arrives from
    #[arg(long, default_value = "qq")]
    pub platform: String,
    /// Group chat id, for group invocations
    #[arg(long)]
    pub group: Option<String>,
    /// Only check permissions; do not consume rate-limit tokens
    #[arg(long)]
    pub no_token: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    PermissionDenied,
    RateLimited,
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub service: String,
    pub subjects: Vec<String>,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
}

pub async fn cmd_check(args: CheckArgs, ctx: &CliContext) -> Result<()> {
    let report = evaluate(&args, ctx).await?;
    ctx.output().emit(&report, || {
        println!("subjects: {}", report.subjects.join(", "));
        match (&report.verdict, report.retry_at) {
            (Verdict::Allowed, _) => println!("{}: allowed", report.service),
            (Verdict::PermissionDenied, _) => println!("{}: permission denied", report.service),
            (Verdict::RateLimited, Some(at)) => {
                println!("{}: rate limited until {}", report.service, at.to_rfc3339())
            }
            (Verdict::RateLimited, None) => println!("{}: rate limited", report.service),
        }
    })
}

pub async fn evaluate(args: &CheckArgs, ctx: &CliContext) -> Result<CheckReport> {
    let engine = ctx.engine();
    let service = engine.service(&args.service)?;
    let invocation = match &args.group {
        Some(group) => InvocationContext::group(&args.platform, &args.user, group),
        None => InvocationContext::private(&args.platform, &args.user),
    };

    let verdict = match engine
        .check_or_throw(service, &invocation, !args.no_token)
        .await
    {
        Ok(()) => Verdict::Allowed,
        Err(AccessError::PermissionDenied) => Verdict::PermissionDenied,
        Err(AccessError::RateLimited) => Verdict::RateLimited,
        Err(err) => return Err(err.into()),
    };
    let retry_at = if verdict == Verdict::RateLimited {
        engine.next_available(service, &invocation).await?
    } else {
        None
    };

    Ok(CheckReport {
        service: args.service.clone(),
        subjects: engine.subjects(&invocation),
        verdict,
        retry_at,
    })
}
