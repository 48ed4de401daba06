//! Outbound dispatch wire protocol.
//!
//! Jobs are handed to workers with a form-encoded POST against the
//! service's dispatch endpoint; the same endpoint answers HEAD requests
//! for liveness probing. The organization and user of the job's creator
//! travel as headers so the worker can execute under the right identity.

use std::time::Duration;

use crate::error::Result;
use crate::registry::host::ServiceRegistration;

pub const ORGANIZATION_HEADER: &str = "X-Gridcast-Organization";
pub const USER_HEADER: &str = "X-Gridcast-User";

#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct DispatchClient {
    http: reqwest::Client,
}

impl Default for DispatchClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("default reqwest client");
        Self { http }
    }

    /// POST a serialized job to the service's dispatch endpoint.
    pub async fn dispatch(
        &self,
        service: &ServiceRegistration,
        job_xml: &str,
        organization: &str,
        user: &str,
    ) -> Result<DispatchResponse> {
        let response = self
            .http
            .post(service.dispatch_url())
            .header(ORGANIZATION_HEADER, organization)
            .header(USER_HEADER, user)
            .form(&[("job", job_xml)])
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(DispatchResponse { status, body })
    }

    /// HEAD the service's dispatch endpoint. Returns the response status.
    pub async fn ping(&self, service: &ServiceRegistration) -> Result<u16> {
        let response = self.http.head(service.dispatch_url()).send().await?;
        Ok(response.status().as_u16())
    }
}
