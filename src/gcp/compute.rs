//! Compute Engine v1 instance calls.
//!
//! Both calls return a zonal operation; the orchestrator only needs the
//! request to be accepted, so the operation body is discarded.

use reqwest::Method;

use super::wire::EmptyBody;
use super::{Call, GcpClient};
use crate::cloud::{CloudFuture, Compute};
use crate::manifest::InstanceManifest;

const SERVICE: &str = "compute";

impl GcpClient {
    fn instances_url(&self, project: &str, zone: &str) -> String {
        format!(
            "{}/projects/{project}/zones/{zone}/instances",
            self.endpoints.compute
        )
    }
}

impl Compute for GcpClient {
    fn insert_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        manifest: &'a InstanceManifest,
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let call = Call::new(SERVICE, "insertInstance", "instance", &manifest.name);
            self.send_empty(
                &call,
                Method::POST,
                &self.instances_url(project, zone),
                Some(manifest),
            )
            .await
        })
    }

    fn delete_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
    ) -> CloudFuture<'a, ()> {
        Box::pin(async move {
            let call = Call::new(SERVICE, "deleteInstance", "instance", name);
            let url = format!("{}/{name}", self.instances_url(project, zone));
            self.send_empty(&call, Method::DELETE, &url, None::<&EmptyBody>)
                .await
        })
    }
}
