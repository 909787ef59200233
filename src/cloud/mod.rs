//! Facade abstraction over the cloud services a job depends on.
//!
//! A job touches three provider surfaces: a publish/subscribe service for
//! status and log delivery, a compute API for instance provisioning, and a
//! logging API for routing instance logs into a topic. Each surface is a
//! trait so the orchestrator can run against the Google Cloud REST
//! implementation in [`crate::gcp`] or an in-memory double in tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

mod error;
mod types;

pub use error::CloudError;
pub use types::{
    Delivery, MessageHandler, PubsubMessage, PullRequest, PullResponse, ReceivedMessage, SinkSpec,
    StreamingPull,
};

use crate::manifest::InstanceManifest;

/// Future returned by facade operations.
pub type CloudFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CloudError>> + Send + 'a>>;

/// Publish/subscribe operations used by the job lifecycle.
pub trait Messaging: Send + Sync {
    /// Returns the fully qualified topic path for `name` in `project`.
    fn topic_path(&self, project: &str, name: &str) -> String {
        format!("projects/{project}/topics/{name}")
    }

    /// Returns the fully qualified subscription path for `name` in `project`.
    fn subscription_path(&self, project: &str, name: &str) -> String {
        format!("projects/{project}/subscriptions/{name}")
    }

    /// Creates a topic.
    fn create_topic<'a>(&'a self, topic: &'a str) -> CloudFuture<'a, ()>;

    /// Deletes a topic.
    fn delete_topic<'a>(&'a self, topic: &'a str) -> CloudFuture<'a, ()>;

    /// Publishes `data` to `topic` and returns the provider message id.
    fn publish<'a>(&'a self, topic: &'a str, data: &'a [u8]) -> CloudFuture<'a, String>;

    /// Creates `subscription` bound to `topic`.
    fn create_subscription<'a>(
        &'a self,
        subscription: &'a str,
        topic: &'a str,
    ) -> CloudFuture<'a, ()>;

    /// Deletes a subscription.
    fn delete_subscription<'a>(&'a self, subscription: &'a str) -> CloudFuture<'a, ()>;

    /// Pulls messages, blocking up to `request.timeout` unless the request
    /// asks to return immediately.
    fn pull<'a>(&'a self, subscription: &'a str, request: PullRequest)
    -> CloudFuture<'a, PullResponse>;

    /// Acknowledges delivered messages by their delivery identifiers.
    fn acknowledge<'a>(&'a self, subscription: &'a str, ack_ids: &'a [String])
    -> CloudFuture<'a, ()>;

    /// Starts delivering messages from `subscription` to `handler` on a
    /// facade-managed task until the returned handle is cancelled or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the streaming pull cannot be started.
    fn subscribe(
        &self,
        subscription: &str,
        handler: MessageHandler,
    ) -> Result<StreamingPull, CloudError>;
}

/// Instance provisioning operations.
pub trait Compute: Send + Sync {
    /// Submits an instance creation request and returns once the provider
    /// has accepted it (not once the instance has booted).
    fn insert_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        manifest: &'a InstanceManifest,
    ) -> CloudFuture<'a, ()>;

    /// Requests deletion of an instance.
    fn delete_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
    ) -> CloudFuture<'a, ()>;
}

/// Log-routing operations.
pub trait Logging: Send + Sync {
    /// Creates a sink in `project`.
    fn create_sink<'a>(&'a self, project: &'a str, sink: &'a SinkSpec) -> CloudFuture<'a, ()>;

    /// Deletes the sink called `name` in `project`.
    fn delete_sink<'a>(&'a self, project: &'a str, name: &'a str) -> CloudFuture<'a, ()>;
}

/// Shared handles to the three facades used by a job.
#[derive(Clone)]
pub struct CloudSdk {
    messaging: Arc<dyn Messaging>,
    compute: Arc<dyn Compute>,
    logging: Arc<dyn Logging>,
}

impl CloudSdk {
    /// Bundles facade implementations.
    #[must_use]
    pub fn new(
        messaging: Arc<dyn Messaging>,
        compute: Arc<dyn Compute>,
        logging: Arc<dyn Logging>,
    ) -> Self {
        Self {
            messaging,
            compute,
            logging,
        }
    }

    /// Builds an SDK whose three facades are served by one implementation.
    #[must_use]
    pub fn from_shared<T>(facade: Arc<T>) -> Self
    where
        T: Messaging + Compute + Logging + 'static,
    {
        Self {
            messaging: Arc::clone(&facade) as Arc<dyn Messaging>,
            compute: Arc::clone(&facade) as Arc<dyn Compute>,
            logging: facade as Arc<dyn Logging>,
        }
    }

    /// Returns the messaging facade.
    #[must_use]
    pub fn messaging(&self) -> Arc<dyn Messaging> {
        Arc::clone(&self.messaging)
    }

    /// Returns the compute facade.
    #[must_use]
    pub fn compute(&self) -> Arc<dyn Compute> {
        Arc::clone(&self.compute)
    }

    /// Returns the logging facade.
    #[must_use]
    pub fn logging(&self) -> Arc<dyn Logging> {
        Arc::clone(&self.logging)
    }
}

impl std::fmt::Debug for CloudSdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSdk").finish_non_exhaustive()
    }
}

/// Destination URI the logging service uses for a Pub/Sub topic.
#[must_use]
pub fn pubsub_destination(topic_path: &str) -> String {
    format!("pubsub.googleapis.com/{topic_path}")
}
