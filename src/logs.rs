//! Live log relay for a running job.
//!
//! The instance's container writes through the `gcplogs` docker driver. A
//! [`LogStreamSession`] routes those entries into a per-job topic with a log
//! sink, subscribes to the topic, and forwards every line to a [`LogOutput`]
//! while the caller's body runs. The topic, sink, and subscription are each
//! held by their own resource scope and are deleted in reverse order of
//! creation when the session ends.

use std::future::Future;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::cloud::{
    Delivery, Logging, MessageHandler, Messaging, PubsubMessage, SinkSpec, pubsub_destination,
};
use crate::job::{Job, JobError};
use crate::session::scoped;

/// Suffix appended to the job name for the log topic and subscription.
pub const LOG_SUFFIX: &str = "-logs";

/// Destination for relayed log lines.
///
/// Implementations are invoked from the messaging facade's delivery task and
/// must tolerate calls concurrent with the caller.
pub trait LogOutput: Send + Sync {
    /// Emits one log line.
    fn write_line(&self, line: &str);
}

/// Writes each line to standard output.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutLogOutput;

impl LogOutput for StdoutLogOutput {
    fn write_line(&self, line: &str) {
        let mut stdout = io::stdout().lock();
        if let Err(err) = writeln!(stdout, "{line}") {
            warn!(error = %err, "failed to write log line");
        }
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct CollectingLogOutput {
    lines: Mutex<Vec<String>>,
}

impl CollectingLogOutput {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lines received so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl LogOutput for CollectingLogOutput {
    fn write_line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_owned());
        }
    }
}

/// Builds the logging filter matching the container logs of `job`.
#[must_use]
pub fn log_filter(project: &str, job: &str) -> String {
    format!(
        "resource.type=\"global\"\nlogName=\"projects/{project}/logs/gcplogs-docker-driver\"\njsonPayload.instance.name=\"{job}\""
    )
}

/// Extracts the printable line from a routed log entry.
///
/// Entries exported to a topic are JSON `LogEntry` documents; the docker
/// driver stores the container output under `jsonPayload.data`. Anything
/// else is forwarded verbatim.
#[must_use]
pub fn log_line(message: &PubsubMessage) -> String {
    let text = message.text();
    let payload = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|entry| {
            entry
                .pointer("/jsonPayload/data")
                .or_else(|| entry.pointer("/textPayload"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
        });
    let line = payload.unwrap_or(text);
    line.trim_end_matches(['\r', '\n']).to_owned()
}

fn relay(output: Arc<dyn LogOutput>) -> MessageHandler {
    Arc::new(move |message: &PubsubMessage| {
        output.write_line(&log_line(message));
        Delivery::Ack
    })
}

/// Scoped log relay for one job.
#[derive(Clone)]
pub struct LogStreamSession {
    job: String,
    project: String,
    messaging: Arc<dyn Messaging>,
    logging: Arc<dyn Logging>,
    output: Arc<dyn LogOutput>,
}

impl LogStreamSession {
    /// Prepares a session for `job` that prints to standard output.
    #[must_use]
    pub fn for_job(job: &Job) -> Self {
        Self {
            job: job.name().to_string(),
            project: job.config().project_id.clone(),
            messaging: job.cloud().messaging(),
            logging: job.cloud().logging(),
            output: Arc::new(StdoutLogOutput),
        }
    }

    /// Sends relayed lines to `output` instead of standard output.
    #[must_use]
    pub fn with_output(mut self, output: Arc<dyn LogOutput>) -> Self {
        self.output = output;
        self
    }

    /// Fully qualified log topic path.
    #[must_use]
    pub fn log_topic(&self) -> String {
        self.messaging
            .topic_path(&self.project, &format!("{}{LOG_SUFFIX}", self.job))
    }

    /// Fully qualified log subscription path.
    #[must_use]
    pub fn log_subscription(&self) -> String {
        self.messaging
            .subscription_path(&self.project, &format!("{}{LOG_SUFFIX}", self.job))
    }

    /// Sink routing the job's container logs into `topic`.
    #[must_use]
    pub fn sink_spec(&self, topic: &str) -> SinkSpec {
        SinkSpec {
            name: self.job.clone(),
            filter: log_filter(&self.project, &self.job),
            destination: pubsub_destination(topic),
        }
    }

    /// Relays logs while `body` runs.
    ///
    /// Creates the topic, then the sink, then the subscription, starts the
    /// streaming pull, and awaits `body`. The stream is stopped before the
    /// subscription, sink, and topic are deleted in that order, whatever
    /// `body` returned.
    ///
    /// # Errors
    ///
    /// Returns the first error among resource creation, `body`, and
    /// teardown; a teardown error that follows an earlier one is logged.
    pub async fn run<T, F, Fut>(&self, body: F) -> Result<T, JobError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let messaging = Arc::clone(&self.messaging);
        let topic_path = self.log_topic();

        let create_topic = {
            let facade = Arc::clone(&messaging);
            let path = topic_path.clone();
            async move {
                facade.create_topic(&path).await.map_err(JobError::Messaging)?;
                Ok::<_, JobError>(path)
            }
        };
        let delete_topic = {
            let facade = Arc::clone(&messaging);
            move |path: String| async move {
                facade.delete_topic(&path).await.map_err(JobError::Messaging)
            }
        };

        scoped("log topic", create_topic, delete_topic, |topic| {
            self.with_sink(topic, body)
        })
        .await
    }

    async fn with_sink<T, F, Fut>(&self, topic: String, body: F) -> Result<T, JobError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let spec = self.sink_spec(&topic);

        let create_sink = {
            let facade = Arc::clone(&self.logging);
            let project = self.project.clone();
            async move {
                facade
                    .create_sink(&project, &spec)
                    .await
                    .map_err(JobError::Logging)?;
                Ok::<_, JobError>(spec.name)
            }
        };
        let delete_sink = {
            let facade = Arc::clone(&self.logging);
            let project = self.project.clone();
            move |name: String| async move {
                facade
                    .delete_sink(&project, &name)
                    .await
                    .map_err(JobError::Logging)
            }
        };

        scoped("log sink", create_sink, delete_sink, |_sink| {
            self.with_subscription(topic, body)
        })
        .await
    }

    async fn with_subscription<T, F, Fut>(&self, topic: String, body: F) -> Result<T, JobError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let create_subscription = {
            let facade = Arc::clone(&self.messaging);
            let path = self.log_subscription();
            async move {
                facade
                    .create_subscription(&path, &topic)
                    .await
                    .map_err(JobError::Messaging)?;
                Ok::<_, JobError>(path)
            }
        };
        let delete_subscription = {
            let facade = Arc::clone(&self.messaging);
            move |path: String| async move {
                facade
                    .delete_subscription(&path)
                    .await
                    .map_err(JobError::Messaging)
            }
        };

        scoped(
            "log subscription",
            create_subscription,
            delete_subscription,
            |subscription| async move {
                let stream = self
                    .messaging
                    .subscribe(&subscription, relay(Arc::clone(&self.output)))
                    .map_err(JobError::Messaging)?;
                debug!(job = %self.job, subscription = %subscription, "relaying logs");
                let outcome = body().await;
                stream.cancel();
                outcome
            },
        )
        .await
    }
}

impl std::fmt::Debug for LogStreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStreamSession")
            .field("job", &self.job)
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn filter_quotes_the_job_name() {
        let filter = log_filter("yourproject-foobar", "clash-job-1");
        assert_eq!(
            filter,
            "resource.type=\"global\"\n\
             logName=\"projects/yourproject-foobar/logs/gcplogs-docker-driver\"\n\
             jsonPayload.instance.name=\"clash-job-1\""
        );
    }

    #[rstest]
    #[case(r#"{"jsonPayload": {"data": "hello\n"}}"#, "hello")]
    #[case(r#"{"textPayload": "plain"}"#, "plain")]
    #[case("raw line\n", "raw line")]
    #[case(r#"{"other": 1}"#, r#"{"other": 1}"#)]
    fn extracts_printable_lines(#[case] body: &str, #[case] expected: &str) {
        assert_eq!(log_line(&PubsubMessage::from_data(body)), expected);
    }

    #[rstest]
    fn relay_acks_and_forwards() {
        let output = Arc::new(CollectingLogOutput::new());
        let handler = relay(Arc::clone(&output) as Arc<dyn LogOutput>);

        let delivery = handler(&PubsubMessage::from_data("line one"));

        assert_eq!(delivery, Delivery::Ack);
        assert_eq!(output.lines(), ["line one"]);
    }
}
