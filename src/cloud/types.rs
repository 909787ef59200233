//! Provider-neutral request and response types used by the facades.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Options for a single pull against a subscription.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PullRequest {
    /// Upper bound on the number of messages returned.
    pub max_messages: u32,
    /// When `false` the call blocks until a message arrives or `timeout`
    /// elapses.
    pub return_immediately: bool,
    /// Longest time the call may block.
    pub timeout: Duration,
}

impl PullRequest {
    /// Builds a request that blocks for up to `timeout` waiting for at most
    /// `max_messages` messages.
    #[must_use]
    pub const fn blocking(max_messages: u32, timeout: Duration) -> Self {
        Self {
            max_messages,
            return_immediately: false,
            timeout,
        }
    }
}

/// Message payload as delivered by the messaging service.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PubsubMessage {
    /// Raw message body.
    pub data: Vec<u8>,
    /// Provider-assigned message identifier, when known.
    pub message_id: Option<String>,
}

impl PubsubMessage {
    /// Wraps raw bytes in a message without an identifier.
    #[must_use]
    pub fn from_data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            message_id: None,
        }
    }

    /// Returns the body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// A message paired with the delivery identifier needed to acknowledge it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReceivedMessage {
    /// Delivery identifier passed back to `acknowledge`.
    pub ack_id: String,
    /// Delivered message.
    pub message: PubsubMessage,
}

/// Result of a pull call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PullResponse {
    /// Messages delivered by the call; empty when the timeout elapsed first.
    pub received_messages: Vec<ReceivedMessage>,
}

/// Log-routing rule that forwards matching entries to a destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SinkSpec {
    /// Sink name, unique within the project.
    pub name: String,
    /// Logging filter expression evaluated by the provider.
    pub filter: String,
    /// Destination URI (for example `pubsub.googleapis.com/projects/p/topics/t`).
    pub destination: String,
}

/// Outcome reported by a [`MessageHandler`] for one delivered message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Delivery {
    /// The message was handled and should be acknowledged.
    Ack,
    /// The message should be left for redelivery.
    Nack,
}

/// Callback invoked by a streaming pull for every delivered message.
///
/// The callback runs on a task owned by the messaging facade, so it must not
/// assume any ordering relative to the caller.
pub type MessageHandler = Arc<dyn Fn(&PubsubMessage) -> Delivery + Send + Sync>;

/// Handle for a running streaming pull.
///
/// Dropping the handle stops delivery; [`StreamingPull::cancel`] does the
/// same explicitly.
pub struct StreamingPull {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl StreamingPull {
    /// Wraps the provider-specific shutdown action.
    #[must_use]
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// Stops delivering messages to the handler.
    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for StreamingPull {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for StreamingPull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingPull")
            .field("active", &self.stop.is_some())
            .finish()
    }
}
