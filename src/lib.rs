//! Core library for the Clash job runner.
//!
//! A job runs a shell script inside a container on a single-use Compute
//! Engine instance. The instance reports the script's exit code on a per-job
//! Pub/Sub topic and deletes itself. The crate provides the orchestration
//! around that protocol: naming and launching jobs, waiting for the status,
//! relaying logs, and tearing down every topic, subscription, and sink it
//! creates.

pub mod cloud;
pub mod config;
pub mod gcp;
pub mod job;
pub mod logs;
pub mod manifest;
pub mod session;
pub mod test_support;

pub use cloud::{CloudError, CloudSdk, Compute, Logging, Messaging};
pub use config::{ConfigError, JobConfig, JobConfigBuilder};
pub use gcp::GcpClient;
pub use job::{Job, JobError, JobName, JobState, RunOptions, StatusMessage};
pub use logs::{LogOutput, LogStreamSession, StdoutLogOutput};
pub use manifest::{CloudInitConfig, InstanceManifest, MachineConfig};
pub use session::scoped;
