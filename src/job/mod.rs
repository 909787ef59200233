//! Job lifecycle: naming, launching, and collecting the terminal status.
//!
//! A [`Job`] owns a unique [`JobName`] that doubles as the instance name, the
//! status topic name, and the prefix of every log resource. `run` submits the
//! instance and creates the status topic; `attach` blocks on the status
//! subscription until the runner publishes the script's exit code.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cloud::{CloudError, CloudSdk, Messaging};
use crate::config::JobConfig;
use crate::manifest::{CloudInitConfig, MachineConfig};

mod options;
mod status;

pub use options::RunOptions;
pub use status::StatusMessage;

use status::{StatusWaiter, WaitPolicy, await_status};

/// Default bound on a single status pull.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(30);

const NAME_STEM: &str = "clash-job";

/// Errors surfaced by the job lifecycle.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum JobError {
    /// Raised when an operation is called in the wrong lifecycle state.
    #[error("job {job} cannot {operation} while {state}")]
    InvalidState {
        /// Job name.
        job: String,
        /// Operation that was attempted.
        operation: &'static str,
        /// Current lifecycle state.
        state: &'static str,
    },
    /// Raised when the compute service rejects the instance.
    #[error("failed to provision instance: {0}")]
    Provision(#[source] CloudError),
    /// Raised when a topic, subscription, pull, or acknowledge call fails.
    #[error("messaging request failed: {0}")]
    Messaging(#[source] CloudError),
    /// Raised when a log sink cannot be created or deleted.
    #[error("log routing request failed: {0}")]
    Logging(#[source] CloudError),
    /// Raised when the status payload cannot be decoded.
    #[error("malformed status message: {message}")]
    MalformedStatus {
        /// Decoder error message.
        message: String,
    },
    /// Raised when no status arrived before the wait elapsed.
    #[error("no status received for job {job} within {waited_secs}s")]
    NoStatus {
        /// Job name.
        job: String,
        /// How long the caller waited.
        waited_secs: u64,
    },
    /// Raised when run options cannot be rendered safely.
    #[error("invalid run options: {0}")]
    InvalidRunOptions(String),
    /// Raised when a script file cannot be read.
    #[error("failed to read script {path}: {message}")]
    Script {
        /// Script path.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Unique name correlating every resource of one job.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct JobName(String);

impl JobName {
    /// Builds `[prefix-]clash-job-<id>`.
    #[must_use]
    pub fn generate(prefix: Option<&str>, id: impl fmt::Display) -> Self {
        prefix.filter(|value| !value.is_empty()).map_or_else(
            || Self(format!("{NAME_STEM}-{id}")),
            |label| Self(format!("{label}-{NAME_STEM}-{id}")),
        )
    }

    /// Builds a name with a fresh random identifier.
    #[must_use]
    pub fn random(prefix: Option<&str>) -> Self {
        Self::generate(prefix, Uuid::new_v4())
    }

    /// Wraps an existing name, for example one printed by an earlier `run`.
    #[must_use]
    pub fn existing(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a [`Job`].
#[derive(Clone, Debug, PartialEq)]
pub enum JobState {
    /// Named, with no remote resources.
    Constructed,
    /// Instance submitted and status topic created.
    Running {
        /// Fully qualified status topic path.
        status_topic: String,
    },
    /// Terminal status received.
    Finished(StatusMessage),
}

impl JobState {
    const fn label(&self) -> &'static str {
        match self {
            Self::Constructed => "constructed",
            Self::Running { .. } => "running",
            Self::Finished(_) => "finished",
        }
    }
}

/// One script execution on a dedicated instance.
#[derive(Debug)]
pub struct Job {
    name: JobName,
    config: JobConfig,
    cloud: CloudSdk,
    pull_timeout: Duration,
    state: JobState,
}

impl Job {
    /// Creates a job with a fresh name.
    #[must_use]
    pub fn new(config: JobConfig, cloud: CloudSdk) -> Self {
        Self::with_name(JobName::random(None), config, cloud)
    }

    /// Creates a job whose name starts with `prefix`.
    #[must_use]
    pub fn with_prefix(prefix: &str, config: JobConfig, cloud: CloudSdk) -> Self {
        Self::with_name(JobName::random(Some(prefix)), config, cloud)
    }

    /// Creates a job with an explicit name and no remote resources.
    #[must_use]
    pub const fn with_name(name: JobName, config: JobConfig, cloud: CloudSdk) -> Self {
        Self {
            name,
            config,
            cloud,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            state: JobState::Constructed,
        }
    }

    /// Rebuilds a handle to a job launched earlier, in the running state.
    #[must_use]
    pub fn from_name(name: JobName, config: JobConfig, cloud: CloudSdk) -> Self {
        let status_topic = cloud
            .messaging()
            .topic_path(&config.project_id, name.as_str());
        Self {
            state: JobState::Running { status_topic },
            ..Self::with_name(name, config, cloud)
        }
    }

    /// Overrides how long a single status pull may block.
    #[must_use]
    pub const fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    /// Returns the job name.
    #[must_use]
    pub const fn name(&self) -> &JobName {
        &self.name
    }

    /// Returns the configuration the job was built with.
    #[must_use]
    pub const fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Returns the facades used by the job.
    #[must_use]
    pub const fn cloud(&self) -> &CloudSdk {
        &self.cloud
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> &JobState {
        &self.state
    }

    /// Returns the terminal status once [`Job::attach`] has succeeded.
    #[must_use]
    pub const fn status(&self) -> Option<&StatusMessage> {
        match &self.state {
            JobState::Finished(status) => Some(status),
            _ => None,
        }
    }

    /// Launches `script` with no extra options.
    ///
    /// # Errors
    ///
    /// See [`Job::run_with`].
    pub async fn run(&mut self, script: &str) -> Result<(), JobError> {
        self.run_with(script, &RunOptions::default()).await
    }

    /// Launches the script stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Script`] when the file cannot be read, otherwise
    /// see [`Job::run_with`].
    pub async fn run_file(&mut self, path: &Utf8Path, options: &RunOptions) -> Result<(), JobError> {
        let script = read_script(path)?;
        self.run_with(&script, options).await
    }

    /// Submits the instance for `script`, then creates the status topic.
    ///
    /// When the topic cannot be created the submitted instance is deleted
    /// again before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidState`] unless the job is freshly
    /// constructed, [`JobError::InvalidRunOptions`] for unusable options,
    /// [`JobError::Provision`] when the instance is rejected, and
    /// [`JobError::Messaging`] when the status topic cannot be created.
    pub async fn run_with(&mut self, script: &str, options: &RunOptions) -> Result<(), JobError> {
        if !matches!(self.state, JobState::Constructed) {
            return Err(self.invalid_state("run"));
        }
        options.validate()?;

        let name = self.name.as_str();
        let project = self.config.project_id.as_str();
        let zone = self.config.zone.as_str();

        let cloud_init = CloudInitConfig::new(name, script, &self.config).with_options(options.clone());
        let manifest = MachineConfig::new(name, &cloud_init, &self.config).to_manifest();

        let compute = self.cloud.compute();
        compute
            .insert_instance(project, zone, &manifest)
            .await
            .map_err(JobError::Provision)?;
        info!(job = name, zone, "submitted instance");

        let messaging = self.cloud.messaging();
        let status_topic = messaging.topic_path(project, name);
        if let Err(err) = messaging.create_topic(&status_topic).await {
            if let Err(cleanup) = compute.delete_instance(project, zone, name).await {
                warn!(job = name, error = %cleanup, "failed to delete instance after topic error");
            }
            return Err(JobError::Messaging(err));
        }
        info!(job = name, topic = %status_topic, "created status topic");

        self.state = JobState::Running { status_topic };
        Ok(())
    }

    /// Waits for the job's status with a single bounded pull.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidState`] before `run` (no remote calls are
    /// made), [`JobError::NoStatus`] when the pull times out empty,
    /// [`JobError::MalformedStatus`] for undecodable payloads, and
    /// [`JobError::Messaging`] for facade failures. The status subscription
    /// is deleted on every path.
    pub async fn attach(&mut self) -> Result<StatusMessage, JobError> {
        self.await_terminal("attach", WaitPolicy::SinglePull).await
    }

    /// Like [`Job::attach`] but keeps pulling until `max_wait` elapses.
    ///
    /// # Errors
    ///
    /// See [`Job::attach`].
    pub async fn wait(&mut self, max_wait: Duration) -> Result<StatusMessage, JobError> {
        self.await_terminal("wait", WaitPolicy::Until(max_wait)).await
    }

    async fn await_terminal(
        &mut self,
        operation: &'static str,
        policy: WaitPolicy,
    ) -> Result<StatusMessage, JobError> {
        let topic = match &self.state {
            JobState::Running { status_topic } => status_topic.clone(),
            JobState::Finished(status) => return Ok(status.clone()),
            JobState::Constructed => return Err(self.invalid_state(operation)),
        };

        let messaging: Arc<dyn Messaging> = self.cloud.messaging();
        let subscription = messaging.subscription_path(&self.config.project_id, self.name.as_str());
        let waiter = StatusWaiter {
            messaging,
            job: self.name.to_string(),
            topic,
            subscription,
            pull_timeout: self.pull_timeout,
        };

        let status = await_status(waiter, policy).await?;
        self.state = JobState::Finished(status.clone());
        Ok(status)
    }

    fn invalid_state(&self, operation: &'static str) -> JobError {
        JobError::InvalidState {
            job: self.name.to_string(),
            operation,
            state: self.state.label(),
        }
    }
}

fn read_script(path: &Utf8Path) -> Result<String, JobError> {
    let to_error = |err: std::io::Error| JobError::Script {
        path: path.to_string(),
        message: err.to_string(),
    };
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| JobError::Script {
        path: path.to_string(),
        message: String::from("script path is missing a filename"),
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(to_error)?;
    dir.read_to_string(file_name).map_err(to_error)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_support::FakeCloud;

    #[rstest]
    #[case(Some("foo"), "foo-clash-job-1234")]
    #[case(None, "clash-job-1234")]
    #[case(Some(""), "clash-job-1234")]
    fn names_follow_prefix_convention(#[case] prefix: Option<&str>, #[case] expected: &str) {
        assert_eq!(JobName::generate(prefix, 1234).as_str(), expected);
    }

    #[rstest]
    fn random_names_are_unique() {
        let first = JobName::random(Some("foo"));
        let second = JobName::random(Some("foo"));
        assert_ne!(first, second);
        assert!(first.as_str().starts_with("foo-clash-job-"));
    }

    #[rstest]
    fn from_name_starts_running() {
        let cloud = FakeCloud::new();
        let job = Job::from_name(
            JobName::existing("clash-job-1"),
            JobConfig::default(),
            cloud.sdk(),
        );
        assert_eq!(
            job.state(),
            &JobState::Running {
                status_topic: String::from("projects/yourproject-foobar/topics/clash-job-1"),
            }
        );
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let cloud = FakeCloud::new();
        let mut job = Job::new(JobConfig::default(), cloud.sdk());
        job.run("true")
            .await
            .unwrap_or_else(|err| panic!("first run should succeed: {err}"));

        let err = job.run("true").await.expect_err("second run should fail");
        assert!(matches!(err, JobError::InvalidState { operation: "run", .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn invalid_options_make_no_calls() {
        let cloud = FakeCloud::new();
        let mut job = Job::new(JobConfig::default(), cloud.sdk());
        let options = RunOptions::new().env_var("BAD NAME", "x");

        let err = job.run_with("true", &options).await.expect_err("options should be rejected");
        assert!(matches!(err, JobError::InvalidRunOptions(_)));
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn run_file_reports_missing_script() {
        let cloud = FakeCloud::new();
        let mut job = Job::new(JobConfig::default(), cloud.sdk());

        let err = job
            .run_file(Utf8Path::new("/nonexistent/clash/script.sh"), &RunOptions::default())
            .await
            .expect_err("missing file should fail");
        assert!(matches!(err, JobError::Script { .. }), "got {err:?}");
    }
}
