//! Pub/Sub v1 REST calls.

use std::time::Duration;

use reqwest::Method;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::wire::{
    AcknowledgeBody, EmptyBody, PublishBody, PublishReply, PullBody, PullReply, SubscriptionBody,
};
use super::{Call, GcpClient};
use crate::cloud::{
    CloudError, CloudFuture, Delivery, MessageHandler, Messaging, PullRequest, PullResponse,
    StreamingPull,
};

const SERVICE: &str = "pubsub";
const ACK_DEADLINE_SECS: u32 = 60;
const STREAM_BATCH: u32 = 10;
const STREAM_PULL_TIMEOUT: Duration = Duration::from_secs(30);
const STREAM_RETRY_DELAY: Duration = Duration::from_secs(2);

impl GcpClient {
    fn pubsub_url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoints.pubsub)
    }

    async fn pull_once(
        &self,
        subscription: &str,
        request: PullRequest,
    ) -> Result<PullResponse, CloudError> {
        let call = Call::new(SERVICE, "pull", "subscription", subscription);
        let body = PullBody {
            max_messages: request.max_messages,
            return_immediately: request.return_immediately,
        };
        let url = self.pubsub_url(&format!("{subscription}:pull"));
        let outcome: Result<PullReply, CloudError> = self
            .send_json(&call, Method::POST, &url, Some(&body), Some(request.timeout))
            .await;
        match outcome {
            Ok(reply) => reply.into_response(),
            // The server holds a blocking pull open; hitting our own bound
            // means nothing arrived in time.
            Err(CloudError::Timeout { .. }) => {
                debug!(subscription, "pull timed out without messages");
                Ok(PullResponse::default())
            }
            Err(err) => Err(err),
        }
    }

    async fn acknowledge_ids(&self, subscription: &str, ack_ids: &[String]) -> Result<(), CloudError> {
        let call = Call::new(SERVICE, "acknowledge", "subscription", subscription);
        let url = self.pubsub_url(&format!("{subscription}:acknowledge"));
        self.send_empty(&call, Method::POST, &url, Some(&AcknowledgeBody { ack_ids }))
            .await
    }

    async fn stream(self, subscription: String, handler: MessageHandler) {
        loop {
            let request = PullRequest::blocking(STREAM_BATCH, STREAM_PULL_TIMEOUT);
            let response = match self.pull_once(&subscription, request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(subscription = %subscription, error = %err, "streaming pull failed; retrying");
                    tokio::time::sleep(STREAM_RETRY_DELAY).await;
                    continue;
                }
            };

            let acked: Vec<String> = response
                .received_messages
                .into_iter()
                .filter(|received| handler(&received.message) == Delivery::Ack)
                .map(|received| received.ack_id)
                .collect();
            if acked.is_empty() {
                continue;
            }
            if let Err(err) = self.acknowledge_ids(&subscription, &acked).await {
                warn!(subscription = %subscription, error = %err, "failed to acknowledge streamed messages");
            }
        }
    }
}

impl Messaging for GcpClient {
    fn create_topic<'a>(&'a self, topic: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let call = Call::new(SERVICE, "createTopic", "topic", topic);
            self.send_empty(&call, Method::PUT, &self.pubsub_url(topic), Some(&EmptyBody {}))
                .await
        })
    }

    fn delete_topic<'a>(&'a self, topic: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let call = Call::new(SERVICE, "deleteTopic", "topic", topic);
            self.send_empty(&call, Method::DELETE, &self.pubsub_url(topic), None::<&EmptyBody>)
                .await
        })
    }

    fn publish<'a>(&'a self, topic: &'a str, data: &'a [u8]) -> CloudFuture<'a, String> {
        Box::pin(async move {
            let call = Call::new(SERVICE, "publish", "topic", topic);
            let url = self.pubsub_url(&format!("{topic}:publish"));
            let reply: PublishReply = self
                .send_json(&call, Method::POST, &url, Some(&PublishBody::single(data)), None)
                .await?;
            reply
                .message_ids
                .into_iter()
                .next()
                .ok_or_else(|| CloudError::decode(SERVICE, "publish", "response carried no message id"))
        })
    }

    fn create_subscription<'a>(
        &'a self,
        subscription: &'a str,
        topic: &'a str,
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let call = Call::new(SERVICE, "createSubscription", "subscription", subscription);
            let body = SubscriptionBody {
                topic,
                ack_deadline_seconds: ACK_DEADLINE_SECS,
            };
            self.send_empty(&call, Method::PUT, &self.pubsub_url(subscription), Some(&body))
                .await
        })
    }

    fn delete_subscription<'a>(&'a self, subscription: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let call = Call::new(SERVICE, "deleteSubscription", "subscription", subscription);
            self.send_empty(
                &call,
                Method::DELETE,
                &self.pubsub_url(subscription),
                None::<&EmptyBody>,
            )
            .await
        })
    }

    fn pull<'a>(
        &'a self,
        subscription: &'a str,
        request: PullRequest,
    ) -> CloudFuture<'a, PullResponse> {
        Box::pin(self.pull_once(subscription, request))
    }

    fn acknowledge<'a>(
        &'a self,
        subscription: &'a str,
        ack_ids: &'a [String],
    ) -> CloudFuture<'a, ()> {
        Box::pin(self.acknowledge_ids(subscription, ack_ids))
    }

    fn subscribe(
        &self,
        subscription: &str,
        handler: MessageHandler,
    ) -> Result<StreamingPull, CloudError> {
        let runtime = Handle::try_current().map_err(|err| {
            CloudError::Config(format!("streaming pull needs a tokio runtime: {err}"))
        })?;
        let task = runtime.spawn(self.clone().stream(subscription.to_owned(), handler));
        Ok(StreamingPull::new(move || task.abort()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::gcp::Endpoints;

    #[rstest]
    fn urls_are_relative_to_the_endpoint() {
        let client = GcpClient::new("token")
            .unwrap_or_else(|err| panic!("client should build: {err}"))
            .with_endpoints(Endpoints {
                pubsub: String::from("http://localhost:8085/v1"),
                ..Endpoints::default()
            });
        assert_eq!(
            client.pubsub_url("projects/p/subscriptions/s:pull"),
            "http://localhost:8085/v1/projects/p/subscriptions/s:pull"
        );
    }

    #[tokio::test]
    async fn subscribe_returns_a_cancellable_handle() {
        let client = GcpClient::new("token")
            .unwrap_or_else(|err| panic!("client should build: {err}"))
            .with_endpoints(Endpoints {
                pubsub: String::from("http://127.0.0.1:9/v1"),
                ..Endpoints::default()
            });
        let handler: MessageHandler =
            std::sync::Arc::new(|_: &crate::cloud::PubsubMessage| Delivery::Ack);
        let stream = client
            .subscribe("projects/p/subscriptions/s", handler)
            .unwrap_or_else(|err| panic!("subscribe should start: {err}"));
        stream.cancel();
    }
}
