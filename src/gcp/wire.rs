//! JSON bodies exchanged with the Pub/Sub and Logging REST APIs.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::cloud::{CloudError, PubsubMessage, PullResponse, ReceivedMessage, SinkSpec};

#[derive(Debug, Default, Serialize)]
pub(super) struct EmptyBody {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SubscriptionBody<'a> {
    pub(super) topic: &'a str,
    pub(super) ack_deadline_seconds: u32,
}

#[derive(Debug, Serialize)]
pub(super) struct PublishBody {
    pub(super) messages: Vec<OutgoingMessage>,
}

impl PublishBody {
    pub(super) fn single(data: &[u8]) -> Self {
        Self {
            messages: vec![OutgoingMessage {
                data: STANDARD.encode(data),
            }],
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct OutgoingMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PublishReply {
    #[serde(default)]
    pub(super) message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PullBody {
    pub(super) max_messages: u32,
    pub(super) return_immediately: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PullReply {
    #[serde(default)]
    received_messages: Vec<IncomingReceived>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingReceived {
    ack_id: String,
    message: IncomingMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingMessage {
    #[serde(default)]
    data: String,
    message_id: Option<String>,
}

impl PullReply {
    /// Decodes base64 bodies into provider-neutral messages.
    pub(super) fn into_response(self) -> Result<PullResponse, CloudError> {
        let decoded = self
            .received_messages
            .into_iter()
            .map(|received| {
                let data = STANDARD
                    .decode(received.message.data.as_bytes())
                    .map_err(|err| CloudError::decode("pubsub", "pull", err))?;
                Ok(ReceivedMessage {
                    ack_id: received.ack_id,
                    message: PubsubMessage {
                        data,
                        message_id: received.message.message_id,
                    },
                })
            })
            .collect::<Result<Vec<_>, CloudError>>()?;
        Ok(PullResponse {
            received_messages: decoded,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AcknowledgeBody<'a> {
    pub(super) ack_ids: &'a [String],
}

#[derive(Debug, Serialize)]
pub(super) struct SinkBody<'a> {
    name: &'a str,
    filter: &'a str,
    destination: &'a str,
}

impl<'a> From<&'a SinkSpec> for SinkBody<'a> {
    fn from(spec: &'a SinkSpec) -> Self {
        Self {
            name: &spec.name,
            filter: &spec.filter,
            destination: &spec.destination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_body_base64_encodes_data() {
        let body = serde_json::to_value(PublishBody::single(br#"{"status": 0}"#))
            .unwrap_or_else(|err| panic!("body should serialise: {err}"));
        assert_eq!(body["messages"][0]["data"], "eyJzdGF0dXMiOiAwfQ==");
    }

    #[test]
    fn pull_reply_decodes_messages() {
        let reply: PullReply = serde_json::from_str(
            r#"{"receivedMessages": [{"ackId": "a1", "message": {"data": "eyJzdGF0dXMiOiAwfQ==", "messageId": "m1"}}]}"#,
        )
        .unwrap_or_else(|err| panic!("reply should parse: {err}"));
        let response = reply
            .into_response()
            .unwrap_or_else(|err| panic!("reply should decode: {err}"));

        let received = response
            .received_messages
            .first()
            .unwrap_or_else(|| panic!("one message expected"));
        assert_eq!(received.ack_id, "a1");
        assert_eq!(received.message.text(), r#"{"status": 0}"#);
        assert_eq!(received.message.message_id.as_deref(), Some("m1"));
    }

    #[test]
    fn empty_pull_reply_is_empty_response() {
        let reply: PullReply = serde_json::from_str("{}")
            .unwrap_or_else(|err| panic!("reply should parse: {err}"));
        let response = reply
            .into_response()
            .unwrap_or_else(|err| panic!("reply should decode: {err}"));
        assert!(response.received_messages.is_empty());
    }

    #[test]
    fn invalid_base64_is_a_decode_error() {
        let reply: PullReply = serde_json::from_str(
            r#"{"receivedMessages": [{"ackId": "a1", "message": {"data": "%%%"}}]}"#,
        )
        .unwrap_or_else(|err| panic!("reply should parse: {err}"));
        let err = reply.into_response().expect_err("bad base64 should fail");
        assert!(matches!(err, CloudError::Decode { .. }));
    }
}
