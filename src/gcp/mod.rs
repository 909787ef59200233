//! Google Cloud REST implementation of the cloud facades.
//!
//! Requests go through a shared `reqwest` client and carry an OAuth bearer
//! token supplied by the caller or read from the environment. Acquiring the
//! token is left to external tooling such as
//! `gcloud auth print-access-token`.

use std::env;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cloud::CloudError;

mod compute;
mod logging;
mod pubsub;
mod wire;

/// Environment variable holding the access token.
pub const ACCESS_TOKEN_ENV: &str = "CLASH_ACCESS_TOKEN";
/// Fallback environment variable understood by Google tooling.
pub const FALLBACK_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const PUBSUB_API_BASE: &str = "https://pubsub.googleapis.com/v1";
const LOGGING_API_BASE: &str = "https://logging.googleapis.com/v2";
const COMPUTE_API_BASE: &str = "https://compute.googleapis.com/compute/v1";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Base URLs for the three services.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoints {
    /// Pub/Sub API root.
    pub pubsub: String,
    /// Cloud Logging API root.
    pub logging: String,
    /// Compute Engine API root.
    pub compute: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            pubsub: String::from(PUBSUB_API_BASE),
            logging: String::from(LOGGING_API_BASE),
            compute: String::from(COMPUTE_API_BASE),
        }
    }
}

/// Facade implementation backed by the Google Cloud REST APIs.
#[derive(Clone)]
pub struct GcpClient {
    token: String,
    endpoints: Endpoints,
}

impl GcpClient {
    /// Creates a client authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Config`] when the token is blank.
    pub fn new(token: impl Into<String>) -> Result<Self, CloudError> {
        let trimmed = token.into().trim().to_owned();
        if trimmed.is_empty() {
            return Err(CloudError::Config(format!(
                "access token is empty; set {ACCESS_TOKEN_ENV}"
            )));
        }
        Ok(Self {
            token: trimmed,
            endpoints: Endpoints::default(),
        })
    }

    /// Reads the token from [`ACCESS_TOKEN_ENV`] or [`FALLBACK_TOKEN_ENV`].
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::Config`] when neither variable holds a token.
    pub fn from_env() -> Result<Self, CloudError> {
        let token = env::var(ACCESS_TOKEN_ENV)
            .or_else(|_| env::var(FALLBACK_TOKEN_ENV))
            .map_err(|_| {
                CloudError::Config(format!(
                    "no access token found; set {ACCESS_TOKEN_ENV} (for example from `gcloud auth print-access-token`)"
                ))
            })?;
        Self::new(token)
    }

    /// Points the client at alternative service roots.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Returns the configured service roots.
    #[must_use]
    pub const fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn send<B: Serialize + Sync>(
        &self,
        call: &Call<'_>,
        method: Method,
        url: &str,
        body: Option<&B>,
        timeout: Option<Duration>,
    ) -> Result<Response, CloudError> {
        debug!(service = call.service, operation = call.operation, %method, url, "sending request");
        let mut request = HTTP_CLIENT.request(method, url).bearer_auth(&self.token);
        if let Some(payload) = body {
            request = request.json(payload);
        }
        if let Some(limit) = timeout {
            request = request.timeout(limit);
        }

        let response = request
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CloudError::Timeout {
                        service: call.service.to_owned(),
                        operation: call.operation.to_owned(),
                    }
                } else {
                    CloudError::transport(call.service, call.operation, err)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(call.status_error(status.as_u16(), message))
    }

    async fn send_empty<B: Serialize + Sync>(
        &self,
        call: &Call<'_>,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<(), CloudError> {
        self.send(call, method, url, body, None).await.map(drop)
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        call: &Call<'_>,
        method: Method,
        url: &str,
        body: Option<&B>,
        timeout: Option<Duration>,
    ) -> Result<T, CloudError> {
        let response = self.send(call, method, url, body, timeout).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| CloudError::decode(call.service, call.operation, err))
    }
}

impl std::fmt::Debug for GcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpClient")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

/// Identifies a request for error reporting.
#[derive(Clone, Copy, Debug)]
struct Call<'a> {
    service: &'static str,
    operation: &'static str,
    kind: &'static str,
    name: &'a str,
}

impl<'a> Call<'a> {
    const fn new(
        service: &'static str,
        operation: &'static str,
        kind: &'static str,
        name: &'a str,
    ) -> Self {
        Self {
            service,
            operation,
            kind,
            name,
        }
    }

    fn status_error(&self, status: u16, message: String) -> CloudError {
        match status {
            404 => CloudError::NotFound {
                kind: self.kind.to_owned(),
                name: self.name.to_owned(),
            },
            409 => CloudError::AlreadyExists {
                kind: self.kind.to_owned(),
                name: self.name.to_owned(),
            },
            _ => CloudError::Api {
                service: self.service.to_owned(),
                operation: self.operation.to_owned(),
                status,
                message,
            },
        }
    }
}
