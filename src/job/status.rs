//! Terminal status delivery for a job.
//!
//! The runner on the instance publishes one JSON message to the job's status
//! topic. [`await_status`] creates a subscription on that topic, pulls the
//! message, decodes it, acknowledges it, and deletes the subscription on
//! every exit path.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use super::JobError;
use crate::cloud::{Messaging, PullRequest};
use crate::session::scoped;

/// Decoded status payload published by the job runner.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct StatusMessage {
    /// Exit code of the job script; `0` means success.
    pub status: i32,
    /// Any additional fields carried by the payload.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl StatusMessage {
    /// Builds a payload holding only `status`.
    #[must_use]
    pub const fn new(status: i32) -> Self {
        Self {
            status,
            extra: BTreeMap::new(),
        }
    }

    /// Decodes a message body.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::MalformedStatus`] when `data` is not a JSON object
    /// with an integer `status` field.
    pub fn decode(data: &[u8]) -> Result<Self, JobError> {
        serde_json::from_slice(data).map_err(|err| JobError::MalformedStatus {
            message: err.to_string(),
        })
    }

    /// Returns `true` when the job script exited with status `0`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// How long [`await_status`] keeps pulling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum WaitPolicy {
    /// A single pull bounded by the pull timeout.
    SinglePull,
    /// Repeated pulls until the overall deadline elapses.
    Until(Duration),
}

/// Where and how long to wait for a status.
pub(crate) struct StatusWaiter {
    pub(crate) messaging: Arc<dyn Messaging>,
    pub(crate) job: String,
    pub(crate) topic: String,
    pub(crate) subscription: String,
    pub(crate) pull_timeout: Duration,
}

/// Waits for the job's terminal status inside a subscription scope.
pub(crate) async fn await_status(
    waiter: StatusWaiter,
    policy: WaitPolicy,
) -> Result<StatusMessage, JobError> {
    let StatusWaiter {
        messaging,
        job,
        topic,
        subscription,
        pull_timeout,
    } = waiter;

    let create = {
        let facade = Arc::clone(&messaging);
        let path = subscription.clone();
        async move {
            facade
                .create_subscription(&path, &topic)
                .await
                .map_err(JobError::Messaging)?;
            Ok::<_, JobError>(path)
        }
    };
    let delete = {
        let facade = Arc::clone(&messaging);
        move |path: String| async move {
            facade
                .delete_subscription(&path)
                .await
                .map_err(JobError::Messaging)
        }
    };

    scoped("subscription", create, delete, |path| async move {
        match policy {
            WaitPolicy::SinglePull => pull_status(messaging.as_ref(), &path, pull_timeout)
                .await?
                .ok_or(JobError::NoStatus {
                    job,
                    waited_secs: whole_seconds(pull_timeout),
                }),
            WaitPolicy::Until(max_wait) => {
                poll_status(messaging.as_ref(), &path, pull_timeout, max_wait, job).await
            }
        }
    })
    .await
}

/// Rounds up so sub-second waits never report `0s`.
fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

async fn poll_status(
    messaging: &dyn Messaging,
    subscription: &str,
    pull_timeout: Duration,
    max_wait: Duration,
    job: String,
) -> Result<StatusMessage, JobError> {
    let deadline = Instant::now() + max_wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(JobError::NoStatus {
                job,
                waited_secs: whole_seconds(max_wait),
            });
        }
        if let Some(status) = pull_status(messaging, subscription, pull_timeout.min(remaining)).await? {
            return Ok(status);
        }
        debug!(job = %job, "no status yet; pulling again");
    }
}

/// Pulls at most one message, decoding before acknowledging so a malformed
/// payload is left for redelivery.
async fn pull_status(
    messaging: &dyn Messaging,
    subscription: &str,
    timeout: Duration,
) -> Result<Option<StatusMessage>, JobError> {
    let response = messaging
        .pull(subscription, PullRequest::blocking(1, timeout))
        .await
        .map_err(JobError::Messaging)?;

    let Some(received) = response.received_messages.into_iter().next() else {
        return Ok(None);
    };

    let status = StatusMessage::decode(&received.message.data)?;
    messaging
        .acknowledge(subscription, std::slice::from_ref(&received.ack_id))
        .await
        .map_err(JobError::Messaging)?;

    info!(subscription, status = status.status, "received job status");
    Ok(Some(status))
}
