//! Cloud Logging v2 sink calls.

use reqwest::Method;

use super::wire::{EmptyBody, SinkBody};
use super::{Call, GcpClient};
use crate::cloud::{CloudFuture, Logging, SinkSpec};

const SERVICE: &str = "logging";

impl GcpClient {
    fn sinks_url(&self, project: &str) -> String {
        format!("{}/projects/{project}/sinks", self.endpoints.logging)
    }
}

impl Logging for GcpClient {
    fn create_sink<'a>(&'a self, project: &'a str, sink: &'a SinkSpec) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let call = Call::new(SERVICE, "createSink", "sink", &sink.name);
            self.send_empty(
                &call,
                Method::POST,
                &self.sinks_url(project),
                Some(&SinkBody::from(sink)),
            )
            .await
        })
    }

    fn delete_sink<'a>(&'a self, project: &'a str, name: &'a str) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let call = Call::new(SERVICE, "deleteSink", "sink", name);
            let url = format!("{}/{name}", self.sinks_url(project));
            self.send_empty(&call, Method::DELETE, &url, None::<&EmptyBody>)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_urls_are_project_scoped() {
        let client = GcpClient::new("token")
            .unwrap_or_else(|err| panic!("client should build: {err}"));
        assert_eq!(
            client.sinks_url("yourproject-foobar"),
            "https://logging.googleapis.com/v2/projects/yourproject-foobar/sinks"
        );
    }
}
