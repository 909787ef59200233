//! Command-line interface definitions for the `clash` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Default number of seconds `--attach` and `attach` wait for a status.
pub(crate) const DEFAULT_WAIT_SECS: u64 = 3600;

/// Top-level CLI for the `clash` binary.
#[derive(Debug, Parser)]
#[command(
    name = "clash",
    about = "Run scripts on ephemeral Compute Engine VMs and collect their exit status",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Launch a script on a fresh instance.
    #[command(name = "run", about = "Launch a script on a fresh instance")]
    Run(RunCommand),
    /// Wait for a previously launched job to finish.
    #[command(name = "attach", about = "Wait for a previously launched job to finish")]
    Attach(AttachCommand),
}

/// Arguments for the `clash run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Read the job configuration from this file instead of discovering
    /// `clash.toml`.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<String>,
    /// Prefix prepended to the generated job name.
    #[arg(long, value_name = "PREFIX")]
    pub(crate) name_prefix: Option<String>,
    /// Environment variable exported to the job container.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_pair)]
    pub(crate) env_vars: Vec<(String, String)>,
    /// Upload the contents of a container directory to a bucket when the
    /// script exits.
    #[arg(long = "gcs-target", value_name = "DIR=BUCKET", value_parser = parse_pair)]
    pub(crate) gcs_targets: Vec<(String, String)>,
    /// Mount a bucket inside the container (forces privileged mode).
    #[arg(long = "gcs-mount", value_name = "BUCKET=PATH", value_parser = parse_pair)]
    pub(crate) gcs_mounts: Vec<(String, String)>,
    /// Treat SCRIPT as the path of a script file.
    #[arg(long)]
    pub(crate) file: bool,
    /// Wait for the job and exit with its status.
    #[arg(long)]
    pub(crate) attach: bool,
    /// Relay the container's logs while waiting.
    #[arg(long, requires = "attach")]
    pub(crate) logs: bool,
    /// Seconds to wait for the status when attaching.
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_WAIT_SECS)]
    pub(crate) timeout: u64,
    /// Script text, or a path when `--file` is given.
    #[arg(value_name = "SCRIPT")]
    pub(crate) script: String,
}

/// Arguments for the `clash attach` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct AttachCommand {
    /// Read the job configuration from this file instead of discovering
    /// `clash.toml`.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<String>,
    /// Relay the container's logs while waiting.
    #[arg(long)]
    pub(crate) logs: bool,
    /// Seconds to wait for the status.
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_WAIT_SECS)]
    pub(crate) timeout: u64,
    /// Name printed by `clash run`.
    #[arg(value_name = "JOB")]
    pub(crate) job: String,
}

/// Splits `KEY=VALUE` at the first `=`.
pub(crate) fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}
