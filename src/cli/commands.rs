use clap::Subcommand;

use super::check::CheckArgs;
use super::config::ConfigArgs;
use super::limit::LimitArgs;
use super::permission::PermissionArgs;
use super::service::ServiceArgs;
use super::sweep::SweepArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Grant, revoke or list permissions
    Permission(PermissionArgs),

    /// Manage rate-limit rules
    Limit(LimitArgs),

    /// Inspect the service tree
    Service(ServiceArgs),

    /// Purge expired rate-limit tokens
    Sweep(SweepArgs),

    /// Simulate an invocation against a service
    Check(CheckArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}
