//! Function Runtime API loop
//!
//! The API provisioner is deployed as a custom-runtime function whose
//! `bootstrap` polls the Runtime API for invocations. Each invocation carries
//! one provisioning request. The invocation itself is always acknowledged; the
//! provisioning outcome travels only through the callback response.

use serde_json::json;
use tracing::{error, info};

use crate::error::ProvisionError;
use crate::handler::CustomResourceHandler;
use crate::protocol::{CallbackTarget, CustomResourceRequest};

/// Environment variable naming the Runtime API endpoint
pub const RUNTIME_API_ENV: &str = "AWS_LAMBDA_RUNTIME_API";

const API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";

/// One invocation fetched from the Runtime API
#[derive(Clone, Debug)]
pub struct Invocation {
    /// Invocation id, used to acknowledge it
    pub request_id: String,
    /// Raw event body
    pub body: Vec<u8>,
}

/// Client for the Runtime API
pub struct RuntimeApiClient {
    http: reqwest::Client,
    base: String,
}

impl RuntimeApiClient {
    /// Client for `host:port`
    pub fn new(endpoint: impl AsRef<str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("http://{}/{API_VERSION}/runtime", endpoint.as_ref()),
        }
    }

    /// Client for the endpoint in [`RUNTIME_API_ENV`]
    pub fn from_env() -> Result<Self, ProvisionError> {
        std::env::var(RUNTIME_API_ENV)
            .map(Self::new)
            .map_err(|_| ProvisionError::invalid_request(format!("{RUNTIME_API_ENV} is not set")))
    }

    /// Block until the next invocation arrives
    pub async fn next_invocation(&self) -> Result<Invocation, ProvisionError> {
        let response = self
            .http
            .get(format!("{}/invocation/next", self.base))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProvisionError::remote("NextInvocation", e.to_string()))?;

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ProvisionError::remote("NextInvocation", format!("missing {REQUEST_ID_HEADER} header"))
            })?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ProvisionError::remote("NextInvocation", e.to_string()))?;

        Ok(Invocation {
            request_id,
            body: body.to_vec(),
        })
    }

    /// Acknowledge an invocation with a result body
    pub async fn respond(&self, request_id: &str, body: Vec<u8>) -> Result<(), ProvisionError> {
        self.post(&format!("{}/invocation/{request_id}/response", self.base), body)
            .await
    }

    /// Report an invocation that could not be handled
    pub async fn fail(&self, request_id: &str, err: &ProvisionError) -> Result<(), ProvisionError> {
        let body = serde_json::to_vec(&json!({
            "errorMessage": err.to_string(),
            "errorType": "ProvisionError",
        }))?;
        self.post(&format!("{}/invocation/{request_id}/error", self.base), body)
            .await
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<(), ProvisionError> {
        self.http
            .post(url)
            .body(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProvisionError::remote("InvocationResult", e.to_string()))?;
        Ok(())
    }
}

/// Serve invocations until the Runtime API becomes unreachable
pub async fn serve(
    runtime: &RuntimeApiClient,
    handler: &CustomResourceHandler,
) -> Result<(), ProvisionError> {
    info!("Waiting for invocations");
    loop {
        let invocation = runtime.next_invocation().await?;

        let response = match CustomResourceRequest::from_slice(&invocation.body) {
            Ok(request) => handler.handle(&request).await,
            Err(err) => match CallbackTarget::from_slice(&invocation.body) {
                Some(target) => handler.reject(&target, &err).await,
                // No callback to answer
                None => {
                    error!(invocation = %invocation.request_id, error = %err, "Rejecting invocation");
                    if let Err(ack) = runtime.fail(&invocation.request_id, &err).await {
                        error!(invocation = %invocation.request_id, error = %ack, "Failed to report invocation error");
                    }
                    continue;
                }
            },
        };

        let ack = serde_json::to_vec(&response)?;
        if let Err(err) = runtime.respond(&invocation.request_id, ack).await {
            error!(invocation = %invocation.request_id, error = %err, "Failed to acknowledge invocation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_paths() {
        let client = RuntimeApiClient::new("127.0.0.1:9001");
        assert_eq!(client.base, "http://127.0.0.1:9001/2018-06-01/runtime");
    }
}
