//! Request handling and response delivery
//!
//! [`CustomResourceHandler::handle`] delivers exactly one response per
//! request, whatever happens inside the provisioner. A failure to deliver the
//! response is logged and never retried.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{error, info};

#[cfg(test)]
use mockall::automock;

use crate::error::ProvisionError;
use crate::protocol::{CallbackTarget, CustomResourceRequest, CustomResourceResponse, RequestType};
use crate::provisioner::ApiProvisioner;

/// Delivers a response to the request's callback target
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResponseSender: Send + Sync {
    /// Deliver `response` to `url`
    async fn send(&self, url: &str, response: &CustomResourceResponse)
        -> Result<(), ProvisionError>;
}

/// [`ResponseSender`] that PUTs the JSON body to the pre-signed URL
pub struct HttpResponseSender {
    http: reqwest::Client,
}

impl HttpResponseSender {
    /// Create a sender with its own HTTP client
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpResponseSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseSender for HttpResponseSender {
    async fn send(
        &self,
        url: &str,
        response: &CustomResourceResponse,
    ) -> Result<(), ProvisionError> {
        let body = serde_json::to_vec(response)?;
        // The pre-signed URL is signed for an empty content type
        self.http
            .put(url)
            .header(CONTENT_TYPE, "")
            .body(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProvisionError::delivery(e.to_string()))?;
        Ok(())
    }
}

/// Runs the provisioner for one request and reports the outcome
pub struct CustomResourceHandler {
    provisioner: Arc<ApiProvisioner>,
    sender: Arc<dyn ResponseSender>,
}

impl CustomResourceHandler {
    /// Create a handler
    pub fn new(provisioner: ApiProvisioner, sender: Arc<dyn ResponseSender>) -> Self {
        Self {
            provisioner: Arc::new(provisioner),
            sender,
        }
    }

    /// Service `request` and deliver its single response. Returns the
    /// response that was (or failed to be) delivered.
    pub async fn handle(&self, request: &CustomResourceRequest) -> CustomResourceResponse {
        let response = self.execute(request).await;
        self.deliver(&request.response_url, &response).await;
        response
    }

    /// Answer a request that could not be read in full with a single FAILED
    /// response, so the caller is not left waiting for a timeout.
    pub async fn reject(
        &self,
        target: &CallbackTarget,
        err: &ProvisionError,
    ) -> CustomResourceResponse {
        error!(request_id = %target.request_id, error = %err, "Rejecting request");
        let response = CustomResourceResponse::rejected(target, err.to_string());
        self.deliver(&target.response_url, &response).await;
        response
    }

    async fn deliver(&self, url: &str, response: &CustomResourceResponse) {
        match self.sender.send(url, response).await {
            Ok(()) => info!(
                request_id = %response.request_id,
                status = ?response.status,
                physical_id = %response.physical_resource_id,
                "Response delivered"
            ),
            Err(err) => error!(
                request_id = %response.request_id,
                error = %err,
                "Failed to deliver response"
            ),
        }
    }

    /// Run the provisioner on its own task so even a panic turns into a
    /// FAILED response rather than a missing one.
    async fn execute(&self, request: &CustomResourceRequest) -> CustomResourceResponse {
        let provisioner = Arc::clone(&self.provisioner);
        let owned = request.clone();
        let joined = tokio::spawn(async move { provisioner.apply(&owned).await }).await;

        match (joined, request.request_type) {
            // Teardown never blocks on residual remote state
            (_, RequestType::Delete) => CustomResourceResponse::success(
                request,
                request.fallback_physical_id(),
                Default::default(),
            ),
            (Ok(Ok(outcome)), _) => {
                let physical_id = outcome
                    .rest_api_id
                    .clone()
                    .unwrap_or_else(|| request.fallback_physical_id());
                CustomResourceResponse::success(request, physical_id, outcome.data())
            }
            (Ok(Err(err)), _) => {
                error!(request_id = %request.request_id, error = %err, "Provisioning failed");
                CustomResourceResponse::failed(request, err.to_string())
            }
            (Err(join), _) => {
                error!(request_id = %request.request_id, error = %join, "Provisioner aborted");
                CustomResourceResponse::failed(request, format!("provisioner aborted: {join}"))
            }
        }
    }
}
