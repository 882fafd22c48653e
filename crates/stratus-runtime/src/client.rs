//! Remote control-plane clients
//!
//! Trait-based abstractions over the API gateway and function services so the
//! provisioner can be tested against mocks while production code uses the
//! AWS SDK implementations in [`crate::aws`].

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::error::ProvisionError;

/// Addresses one method on one resource of one API
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodRef {
    /// Owning API
    pub rest_api_id: String,
    /// Resource the method hangs off
    pub resource_id: String,
    /// HTTP verb
    pub http_method: String,
}

/// A deployment of a finished API to a named stage
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeploymentRequest {
    /// API to deploy
    pub rest_api_id: String,
    /// Stage to deploy to
    pub stage_name: String,
    /// Stage description
    pub stage_description: Option<String>,
    /// Stage variables
    pub variables: BTreeMap<String, String>,
    /// Whether to provision a cache cluster
    pub cache_cluster_enabled: Option<bool>,
    /// Cache cluster size
    pub cache_cluster_size: Option<String>,
}

/// An invoke permission on a function
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvokeGrant {
    /// Function name or ARN
    pub function_name: String,
    /// Statement id
    pub statement_id: String,
    /// Principal allowed to invoke
    pub principal: String,
    /// Source the principal must be acting for
    pub source_arn: String,
}

/// REST API control-plane operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApiGatewayClient: Send + Sync {
    /// Find an existing API container by name
    async fn find_rest_api(&self, name: &str) -> Result<Option<String>, ProvisionError>;

    /// Create an API container, returning its id
    async fn create_rest_api(&self, name: &str, description: &str)
        -> Result<String, ProvisionError>;

    /// Delete an API container and everything under it
    async fn delete_rest_api(&self, rest_api_id: &str) -> Result<(), ProvisionError>;

    /// Current path -> resource id index of an API
    async fn get_resources(
        &self,
        rest_api_id: &str,
    ) -> Result<BTreeMap<String, String>, ProvisionError>;

    /// Create a child resource, returning its id
    async fn create_resource(
        &self,
        rest_api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<String, ProvisionError>;

    /// Declare a method on a resource
    async fn put_method(
        &self,
        method: &MethodRef,
        authorization_type: &str,
        api_key_required: bool,
    ) -> Result<(), ProvisionError>;

    /// Declare a method response with an empty response model
    async fn put_method_response(
        &self,
        method: &MethodRef,
        status_code: &str,
    ) -> Result<(), ProvisionError>;

    /// Wire the method to a function invocation endpoint
    async fn put_integration(&self, method: &MethodRef, uri: &str) -> Result<(), ProvisionError>;

    /// Declare a passthrough integration response
    async fn put_integration_response(
        &self,
        method: &MethodRef,
        status_code: &str,
    ) -> Result<(), ProvisionError>;

    /// Deploy the API to a stage, returning the deployment id
    async fn create_deployment(
        &self,
        deployment: &DeploymentRequest,
    ) -> Result<String, ProvisionError>;
}

/// Function-service permission operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LambdaClient: Send + Sync {
    /// Statement ids in the function's resource policy (empty when it has none)
    async fn get_policy_statement_ids(
        &self,
        function_name: &str,
    ) -> Result<BTreeSet<String>, ProvisionError>;

    /// Add an invoke permission
    async fn add_permission(&self, grant: &InvokeGrant) -> Result<(), ProvisionError>;

    /// Remove an invoke permission
    async fn remove_permission(
        &self,
        function_name: &str,
        statement_id: &str,
    ) -> Result<(), ProvisionError>;
}
