//! Error types shared by the cloud facades.

use thiserror::Error;

/// Errors raised by messaging, compute, and logging facades.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// Raised when the provider rejects a request with an HTTP status.
    #[error("{service} request {operation} failed with status {status}: {message}")]
    Api {
        /// Provider service that handled the call (for example `pubsub`).
        service: String,
        /// Operation being attempted (for example `createTopic`).
        operation: String,
        /// HTTP status code returned by the provider.
        status: u16,
        /// Response body or provider error message.
        message: String,
    },
    /// Raised when the request never reached the provider or the response
    /// could not be read.
    #[error("{service} transport error during {operation}: {message}")]
    Transport {
        /// Provider service that was being called.
        service: String,
        /// Operation being attempted.
        operation: String,
        /// Underlying transport error message.
        message: String,
    },
    /// Raised when a request exceeded its deadline.
    #[error("{service} request {operation} timed out")]
    Timeout {
        /// Provider service that was being called.
        service: String,
        /// Operation being attempted.
        operation: String,
    },
    /// Raised when a provider response cannot be decoded.
    #[error("failed to decode {service} response for {operation}: {message}")]
    Decode {
        /// Provider service that produced the response.
        service: String,
        /// Operation whose response was malformed.
        operation: String,
        /// Decoder error message.
        message: String,
    },
    /// Raised when the named resource does not exist.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (topic, subscription, sink, instance).
        kind: String,
        /// Fully qualified resource name.
        name: String,
    },
    /// Raised when a resource with the same name already exists.
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind (topic, subscription, sink, instance).
        kind: String,
        /// Fully qualified resource name.
        name: String,
    },
    /// Raised when the facade cannot be constructed from its configuration.
    #[error("cloud configuration error: {0}")]
    Config(String),
}

impl CloudError {
    /// Builds a transport error from any displayable failure.
    pub(crate) fn transport(service: &str, operation: &str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            service: service.to_owned(),
            operation: operation.to_owned(),
            message: err.to_string(),
        }
    }

    /// Builds a decode error from any displayable failure.
    pub(crate) fn decode(service: &str, operation: &str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            service: service.to_owned(),
            operation: operation.to_owned(),
            message: err.to_string(),
        }
    }
}
