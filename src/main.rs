//! Binary entry point for the `clash` CLI.

use std::io::{self, Write};
use std::process;
use std::time::Duration;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clash::{
    CloudError, CloudSdk, ConfigError, GcpClient, Job, JobConfig, JobError, JobName,
    LogStreamSession, RunOptions,
};

mod cli;

use cli::{AttachCommand, Cli, RunCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("cloud client error: {0}")]
    Cloud(#[from] CloudError),
    #[error("job failed: {0}")]
    Job(#[from] JobError),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Run(command) => run_command(command).await,
        Cli::Attach(command) => attach_command(command).await,
    }
}

async fn run_command(args: RunCommand) -> Result<i32, CliError> {
    let config = load_config(args.config.as_deref())?;
    let cloud = cloud_sdk()?;
    let options = run_options(&args);

    let mut job = match args.name_prefix.as_deref() {
        Some(prefix) => Job::with_prefix(prefix, config, cloud),
        None => Job::new(config, cloud),
    };

    if args.file {
        job.run_file(Utf8Path::new(&args.script), &options).await?;
    } else {
        job.run_with(&args.script, &options).await?;
    }
    info!(job = %job.name(), "job started");
    print_line(job.name().as_str())?;

    if !args.attach {
        return Ok(0);
    }
    wait_for_status(job, args.logs, args.timeout).await
}

async fn attach_command(args: AttachCommand) -> Result<i32, CliError> {
    let config = load_config(args.config.as_deref())?;
    let cloud = cloud_sdk()?;
    let job = Job::from_name(JobName::existing(args.job), config, cloud);
    wait_for_status(job, args.logs, args.timeout).await
}

async fn wait_for_status(mut job: Job, logs: bool, timeout_secs: u64) -> Result<i32, CliError> {
    let max_wait = Duration::from_secs(timeout_secs);
    let status = if logs {
        let session = LogStreamSession::for_job(&job);
        let waiting = &mut job;
        session.run(move || waiting.wait(max_wait)).await?
    } else {
        job.wait(max_wait).await?
    };
    info!(job = %job.name(), status = status.status, "job finished");
    Ok(status.status)
}

fn run_options(args: &RunCommand) -> RunOptions {
    let with_env = args
        .env_vars
        .iter()
        .fold(RunOptions::new(), |options, (key, value)| options.env_var(key, value));
    let with_targets = args
        .gcs_targets
        .iter()
        .fold(with_env, |options, (dir, bucket)| options.gcs_target(dir, bucket));
    args.gcs_mounts
        .iter()
        .fold(with_targets, |options, (bucket, path)| options.gcs_mount(bucket, path))
}

fn load_config(path: Option<&str>) -> Result<JobConfig, CliError> {
    let config = match path {
        Some(file) => JobConfig::load_from_path(Utf8Path::new(file))?,
        None => JobConfig::load_without_cli_args()?,
    };
    Ok(config)
}

fn cloud_sdk() -> Result<CloudSdk, CliError> {
    let client = GcpClient::from_env()?;
    Ok(CloudSdk::from_shared(std::sync::Arc::new(client)))
}

fn print_line(line: &str) -> Result<(), CliError> {
    writeln!(io::stdout(), "{line}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
