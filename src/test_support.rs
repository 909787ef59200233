//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::cloud::{
    CloudError, CloudFuture, CloudSdk, Compute, Logging, MessageHandler, Messaging, PubsubMessage,
    PullRequest, PullResponse, ReceivedMessage, SinkSpec, StreamingPull,
};
use crate::manifest::InstanceManifest;

/// Upper bound on how long an empty blocking pull sleeps.
const EMPTY_PULL_DELAY: Duration = Duration::from_millis(5);

/// Facade operation that can be made to fail.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    /// `Messaging::create_topic`.
    CreateTopic,
    /// `Messaging::delete_topic`.
    DeleteTopic,
    /// `Messaging::publish`.
    Publish,
    /// `Messaging::create_subscription`.
    CreateSubscription,
    /// `Messaging::delete_subscription`.
    DeleteSubscription,
    /// `Messaging::pull`.
    Pull,
    /// `Messaging::acknowledge`.
    Acknowledge,
    /// `Messaging::subscribe`.
    Subscribe,
    /// `Compute::insert_instance`.
    InsertInstance,
    /// `Compute::delete_instance`.
    DeleteInstance,
    /// `Logging::create_sink`.
    CreateSink,
    /// `Logging::delete_sink`.
    DeleteSink,
}

/// Call recorded by [`FakeCloud`], in the order it was issued.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CloudCall {
    /// Topic creation.
    CreateTopic(String),
    /// Topic deletion.
    DeleteTopic(String),
    /// Message publication.
    Publish {
        /// Topic path.
        topic: String,
        /// Message body as text.
        data: String,
    },
    /// Subscription creation.
    CreateSubscription {
        /// Subscription path.
        subscription: String,
        /// Topic path.
        topic: String,
    },
    /// Subscription deletion.
    DeleteSubscription(String),
    /// Pull request.
    Pull {
        /// Subscription path.
        subscription: String,
        /// Requested message limit.
        max_messages: u32,
        /// Whether the pull asked to return immediately.
        return_immediately: bool,
    },
    /// Acknowledgement.
    Acknowledge {
        /// Subscription path.
        subscription: String,
        /// Acknowledged delivery identifiers.
        ack_ids: Vec<String>,
    },
    /// Streaming pull start.
    Subscribe(String),
    /// Streaming pull stop.
    Unsubscribe(String),
    /// Instance insertion.
    InsertInstance {
        /// Project.
        project: String,
        /// Zone.
        zone: String,
        /// Instance name.
        name: String,
    },
    /// Instance deletion.
    DeleteInstance {
        /// Project.
        project: String,
        /// Zone.
        zone: String,
        /// Instance name.
        name: String,
    },
    /// Sink creation.
    CreateSink {
        /// Project.
        project: String,
        /// Sink definition.
        sink: SinkSpec,
    },
    /// Sink deletion.
    DeleteSink {
        /// Project.
        project: String,
        /// Sink name.
        name: String,
    },
}

#[derive(Default)]
struct FakeState {
    calls: Vec<CloudCall>,
    failures: HashMap<Operation, CloudError>,
    topics: BTreeSet<String>,
    subscriptions: BTreeMap<String, String>,
    pending: BTreeMap<String, VecDeque<PubsubMessage>>,
    handlers: BTreeMap<String, MessageHandler>,
    instances: Vec<InstanceManifest>,
    next_ack: u64,
}

/// In-memory implementation of every cloud facade.
///
/// Calls are recorded when their future is first polled. Published messages
/// are routed to the subscriptions bound to the topic; subscriptions with an
/// active streaming pull hand them straight to the handler. Clones share
/// state.
#[derive(Clone, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<FakeState>>,
}

impl std::fmt::Debug for FakeCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeCloud")
            .field("calls", &self.calls().len())
            .finish_non_exhaustive()
    }
}

impl FakeCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an SDK whose facades are all served by this cloud.
    #[must_use]
    pub fn sdk(&self) -> CloudSdk {
        CloudSdk::from_shared(Arc::new(self.clone()))
    }

    /// Returns every call issued so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CloudCall> {
        self.with_state(|state| state.calls.clone())
    }

    /// Returns the number of recorded calls matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&CloudCall) -> bool) -> usize {
        self.with_state(|state| state.calls.iter().filter(|call| predicate(call)).count())
    }

    /// Makes every future call to `operation` fail with `error`.
    pub fn fail_on(&self, operation: Operation, error: CloudError) {
        self.with_state(|state| {
            state.failures.insert(operation, error);
        });
    }

    /// Seeds an existing topic, as if created by an earlier process.
    pub fn seed_topic(&self, topic: impl Into<String>) {
        self.with_state(|state| {
            state.topics.insert(topic.into());
        });
    }

    /// Queues `data` for delivery on `subscription`, whether or not the
    /// subscription exists yet.
    pub fn queue_message(&self, subscription: impl Into<String>, data: impl Into<Vec<u8>>) {
        let message = PubsubMessage::from_data(data);
        self.with_state(|state| {
            state
                .pending
                .entry(subscription.into())
                .or_default()
                .push_back(message);
        });
    }

    /// Returns the currently existing topics.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.with_state(|state| state.topics.iter().cloned().collect())
    }

    /// Returns the currently existing subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.with_state(|state| state.subscriptions.keys().cloned().collect())
    }

    /// Returns the manifests submitted to the compute facade.
    #[must_use]
    pub fn instances(&self) -> Vec<InstanceManifest> {
        self.with_state(|state| state.instances.clone())
    }

    fn with_state<T>(&self, action: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        action(&mut state)
    }

    fn begin(&self, call: CloudCall, operation: Operation) -> Result<(), CloudError> {
        self.with_state(|state| {
            state.calls.push(call);
            state.failures.get(&operation).cloned().map_or(Ok(()), Err)
        })
    }

    fn deliver(&self, topic: &str, message: &PubsubMessage) {
        let handlers: Vec<MessageHandler> = self.with_state(|state| {
            let bound: Vec<String> = state
                .subscriptions
                .iter()
                .filter(|(_, bound_topic)| bound_topic.as_str() == topic)
                .map(|(subscription, _)| subscription.clone())
                .collect();
            let mut handlers = Vec::new();
            for subscription in bound {
                match state.handlers.get(&subscription) {
                    Some(handler) => handlers.push(Arc::clone(handler)),
                    None => state
                        .pending
                        .entry(subscription)
                        .or_default()
                        .push_back(message.clone()),
                }
            }
            handlers
        });
        for handler in handlers {
            handler(message);
        }
    }
}

fn not_found(kind: &str, name: &str) -> CloudError {
    CloudError::NotFound {
        kind: kind.to_owned(),
        name: name.to_owned(),
    }
}

fn already_exists(kind: &str, name: &str) -> CloudError {
    CloudError::AlreadyExists {
        kind: kind.to_owned(),
        name: name.to_owned(),
    }
}

impl Messaging for FakeCloud {
    fn create_topic<'a>(&'a self, topic: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.begin(CloudCall::CreateTopic(topic.to_owned()), Operation::CreateTopic)?;
            self.with_state(|state| {
                if state.topics.insert(topic.to_owned()) {
                    Ok(())
                } else {
                    Err(already_exists("topic", topic))
                }
            })
        })
    }

    fn delete_topic<'a>(&'a self, topic: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.begin(CloudCall::DeleteTopic(topic.to_owned()), Operation::DeleteTopic)?;
            self.with_state(|state| {
                if state.topics.remove(topic) {
                    Ok(())
                } else {
                    Err(not_found("topic", topic))
                }
            })
        })
    }

    fn publish<'a>(&'a self, topic: &'a str, data: &'a [u8]) -> CloudFuture<'a, String> {
        Box::pin(async move {
            let message = PubsubMessage::from_data(data);
            self.begin(
                CloudCall::Publish {
                    topic: topic.to_owned(),
                    data: message.text(),
                },
                Operation::Publish,
            )?;
            let id = self.with_state(|state| {
                if !state.topics.contains(topic) {
                    return Err(not_found("topic", topic));
                }
                state.next_ack += 1;
                Ok(format!("message-{}", state.next_ack))
            })?;
            self.deliver(topic, &message);
            Ok(id)
        })
    }

    fn create_subscription<'a>(
        &'a self,
        subscription: &'a str,
        topic: &'a str,
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.begin(
                CloudCall::CreateSubscription {
                    subscription: subscription.to_owned(),
                    topic: topic.to_owned(),
                },
                Operation::CreateSubscription,
            )?;
            self.with_state(|state| {
                if !state.topics.contains(topic) {
                    return Err(not_found("topic", topic));
                }
                if state.subscriptions.contains_key(subscription) {
                    return Err(already_exists("subscription", subscription));
                }
                state
                    .subscriptions
                    .insert(subscription.to_owned(), topic.to_owned());
                Ok(())
            })
        })
    }

    fn delete_subscription<'a>(&'a self, subscription: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.begin(
                CloudCall::DeleteSubscription(subscription.to_owned()),
                Operation::DeleteSubscription,
            )?;
            self.with_state(|state| {
                state.handlers.remove(subscription);
                state
                    .subscriptions
                    .remove(subscription)
                    .map(drop)
                    .ok_or_else(|| not_found("subscription", subscription))
            })
        })
    }

    fn pull<'a>(
        &'a self,
        subscription: &'a str,
        request: PullRequest,
    ) -> CloudFuture<'a, PullResponse> {
        Box::pin(async move {
            self.begin(
                CloudCall::Pull {
                    subscription: subscription.to_owned(),
                    max_messages: request.max_messages,
                    return_immediately: request.return_immediately,
                },
                Operation::Pull,
            )?;
            let response = self.with_state(|state| {
                if !state.subscriptions.contains_key(subscription) {
                    return Err(not_found("subscription", subscription));
                }
                let limit = usize::try_from(request.max_messages).unwrap_or(usize::MAX);
                let queue = state.pending.entry(subscription.to_owned()).or_default();
                let mut popped = Vec::new();
                while popped.len() < limit {
                    let Some(message) = queue.pop_front() else {
                        break;
                    };
                    popped.push(message);
                }
                let received_messages = popped
                    .into_iter()
                    .map(|message| {
                        state.next_ack += 1;
                        ReceivedMessage {
                            ack_id: format!("ack-{}", state.next_ack),
                            message,
                        }
                    })
                    .collect();
                Ok(PullResponse { received_messages })
            })?;
            if response.received_messages.is_empty() && !request.return_immediately {
                tokio::time::sleep(request.timeout.min(EMPTY_PULL_DELAY)).await;
            }
            Ok(response)
        })
    }

    fn acknowledge<'a>(
        &'a self,
        subscription: &'a str,
        ack_ids: &'a [String],
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.begin(
                CloudCall::Acknowledge {
                    subscription: subscription.to_owned(),
                    ack_ids: ack_ids.to_vec(),
                },
                Operation::Acknowledge,
            )
        })
    }

    fn subscribe(
        &self,
        subscription: &str,
        handler: MessageHandler,
    ) -> Result<StreamingPull, CloudError> {
        self.begin(CloudCall::Subscribe(subscription.to_owned()), Operation::Subscribe)?;
        let backlog: Vec<PubsubMessage> = self.with_state(|state| {
            if !state.subscriptions.contains_key(subscription) {
                return Err(not_found("subscription", subscription));
            }
            state
                .handlers
                .insert(subscription.to_owned(), Arc::clone(&handler));
            Ok(state
                .pending
                .remove(subscription)
                .map(Vec::from)
                .unwrap_or_default())
        })?;
        for message in &backlog {
            handler(message);
        }

        let cloud = self.clone();
        let name = subscription.to_owned();
        Ok(StreamingPull::new(move || {
            cloud.with_state(|state| {
                state.handlers.remove(&name);
                state.calls.push(CloudCall::Unsubscribe(name));
            });
        }))
    }
}

impl Compute for FakeCloud {
    fn insert_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        manifest: &'a InstanceManifest,
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.begin(
                CloudCall::InsertInstance {
                    project: project.to_owned(),
                    zone: zone.to_owned(),
                    name: manifest.name.clone(),
                },
                Operation::InsertInstance,
            )?;
            self.with_state(|state| state.instances.push(manifest.clone()));
            Ok(())
        })
    }

    fn delete_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.begin(
                CloudCall::DeleteInstance {
                    project: project.to_owned(),
                    zone: zone.to_owned(),
                    name: name.to_owned(),
                },
                Operation::DeleteInstance,
            )?;
            self.with_state(|state| state.instances.retain(|instance| instance.name != name));
            Ok(())
        })
    }
}

impl Logging for FakeCloud {
    fn create_sink<'a>(&'a self, project: &'a str, sink: &'a SinkSpec) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.begin(
                CloudCall::CreateSink {
                    project: project.to_owned(),
                    sink: sink.clone(),
                },
                Operation::CreateSink,
            )
        })
    }

    fn delete_sink<'a>(&'a self, project: &'a str, name: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            self.begin(
                CloudCall::DeleteSink {
                    project: project.to_owned(),
                    name: name.to_owned(),
                },
                Operation::DeleteSink,
            )
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets (`Some`) or removes (`None`) environment variables while holding
    /// a global mutex.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cloud::Delivery;

    #[tokio::test]
    async fn publish_routes_to_bound_subscriptions() {
        let cloud = FakeCloud::new();
        cloud
            .create_topic("projects/p/topics/t")
            .await
            .unwrap_or_else(|err| panic!("topic: {err}"));
        cloud
            .create_subscription("projects/p/subscriptions/s", "projects/p/topics/t")
            .await
            .unwrap_or_else(|err| panic!("subscription: {err}"));
        cloud
            .publish("projects/p/topics/t", b"hello")
            .await
            .unwrap_or_else(|err| panic!("publish: {err}"));

        let response = cloud
            .pull(
                "projects/p/subscriptions/s",
                PullRequest::blocking(5, std::time::Duration::from_secs(1)),
            )
            .await
            .unwrap_or_else(|err| panic!("pull: {err}"));
        assert_eq!(response.received_messages.len(), 1);
    }

    #[tokio::test]
    async fn streaming_handlers_receive_backlog_and_new_messages() {
        let cloud = FakeCloud::new();
        cloud.seed_topic("projects/p/topics/t");
        cloud
            .create_subscription("projects/p/subscriptions/s", "projects/p/topics/t")
            .await
            .unwrap_or_else(|err| panic!("subscription: {err}"));
        cloud.queue_message("projects/p/subscriptions/s", "early");

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handler: MessageHandler = Arc::new(move |_: &PubsubMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
            Delivery::Ack
        });
        let stream = cloud
            .subscribe("projects/p/subscriptions/s", handler)
            .unwrap_or_else(|err| panic!("subscribe: {err}"));
        cloud
            .publish("projects/p/topics/t", b"late")
            .await
            .unwrap_or_else(|err| panic!("publish: {err}"));
        stream.cancel();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(
            cloud.calls().last(),
            Some(&CloudCall::Unsubscribe(String::from("projects/p/subscriptions/s")))
        );
    }

    #[tokio::test]
    async fn injected_failures_are_recorded_and_returned() {
        let cloud = FakeCloud::new();
        cloud.fail_on(Operation::CreateTopic, CloudError::Config(String::from("boom")));

        let err = cloud
            .create_topic("projects/p/topics/t")
            .await
            .expect_err("create should fail");
        assert_eq!(err, CloudError::Config(String::from("boom")));
        assert_eq!(cloud.calls().len(), 1);
        assert!(cloud.topics().is_empty());
    }
}
