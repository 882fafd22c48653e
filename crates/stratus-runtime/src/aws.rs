//! AWS SDK implementations of the remote client traits

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_apigateway::error::DisplayErrorContext;
use aws_sdk_apigateway::types::{CacheClusterSize, IntegrationType};
use serde::Deserialize;
use tracing::debug;

use crate::client::{ApiGatewayClient, DeploymentRequest, InvokeGrant, LambdaClient, MethodRef};
use crate::error::ProvisionError;

/// Page size for list operations
const PAGE_SIZE: i32 = 500;

/// Content type for the empty response model and passthrough template
const JSON_CONTENT_TYPE: &str = "application/json";

/// Invoke action granted to the API
const INVOKE_ACTION: &str = stratus_common::INVOKE_ACTION;

fn remote<E>(operation: &'static str) -> impl FnOnce(E) -> ProvisionError
where
    E: std::error::Error + 'static,
{
    move |err| ProvisionError::remote(operation, DisplayErrorContext(&err).to_string())
}

fn required(operation: &'static str, field: &str, value: Option<&str>) -> Result<String, ProvisionError> {
    value
        .map(str::to_string)
        .ok_or_else(|| ProvisionError::remote(operation, format!("response is missing {field}")))
}

// =============================================================================
// API gateway
// =============================================================================

/// [`ApiGatewayClient`] over `aws-sdk-apigateway`
pub struct AwsApiGateway {
    client: aws_sdk_apigateway::Client,
}

impl AwsApiGateway {
    /// Build from shared SDK configuration
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_apigateway::Client::new(config),
        }
    }
}

#[async_trait]
impl ApiGatewayClient for AwsApiGateway {
    async fn find_rest_api(&self, name: &str) -> Result<Option<String>, ProvisionError> {
        let mut position: Option<String> = None;
        loop {
            let page = self
                .client
                .get_rest_apis()
                .limit(PAGE_SIZE)
                .set_position(position.take())
                .send()
                .await
                .map_err(remote("GetRestApis"))?;

            if let Some(api) = page.items().iter().find(|api| api.name() == Some(name)) {
                return Ok(api.id().map(str::to_string));
            }
            match page.position() {
                Some(next) if !page.items().is_empty() => position = Some(next.to_string()),
                _ => return Ok(None),
            }
        }
    }

    async fn create_rest_api(
        &self,
        name: &str,
        description: &str,
    ) -> Result<String, ProvisionError> {
        let output = self
            .client
            .create_rest_api()
            .name(name)
            .set_description((!description.is_empty()).then(|| description.to_string()))
            .send()
            .await
            .map_err(remote("CreateRestApi"))?;
        required("CreateRestApi", "id", output.id())
    }

    async fn delete_rest_api(&self, rest_api_id: &str) -> Result<(), ProvisionError> {
        self.client
            .delete_rest_api()
            .rest_api_id(rest_api_id)
            .send()
            .await
            .map_err(remote("DeleteRestApi"))?;
        Ok(())
    }

    async fn get_resources(
        &self,
        rest_api_id: &str,
    ) -> Result<BTreeMap<String, String>, ProvisionError> {
        let mut index = BTreeMap::new();
        let mut position: Option<String> = None;
        loop {
            let page = self
                .client
                .get_resources()
                .rest_api_id(rest_api_id)
                .limit(PAGE_SIZE)
                .set_position(position.take())
                .send()
                .await
                .map_err(remote("GetResources"))?;

            for resource in page.items() {
                if let (Some(path), Some(id)) = (resource.path(), resource.id()) {
                    index.insert(path.to_string(), id.to_string());
                }
            }
            match page.position() {
                Some(next) if !page.items().is_empty() => position = Some(next.to_string()),
                _ => break,
            }
        }
        debug!(rest_api_id, resources = index.len(), "Fetched resource index");
        Ok(index)
    }

    async fn create_resource(
        &self,
        rest_api_id: &str,
        parent_id: &str,
        path_part: &str,
    ) -> Result<String, ProvisionError> {
        let output = self
            .client
            .create_resource()
            .rest_api_id(rest_api_id)
            .parent_id(parent_id)
            .path_part(path_part)
            .send()
            .await
            .map_err(remote("CreateResource"))?;
        required("CreateResource", "id", output.id())
    }

    async fn put_method(
        &self,
        method: &MethodRef,
        authorization_type: &str,
        api_key_required: bool,
    ) -> Result<(), ProvisionError> {
        self.client
            .put_method()
            .rest_api_id(&method.rest_api_id)
            .resource_id(&method.resource_id)
            .http_method(&method.http_method)
            .authorization_type(authorization_type)
            .api_key_required(api_key_required)
            .send()
            .await
            .map_err(remote("PutMethod"))?;
        Ok(())
    }

    async fn put_method_response(
        &self,
        method: &MethodRef,
        status_code: &str,
    ) -> Result<(), ProvisionError> {
        self.client
            .put_method_response()
            .rest_api_id(&method.rest_api_id)
            .resource_id(&method.resource_id)
            .http_method(&method.http_method)
            .status_code(status_code)
            .response_models(JSON_CONTENT_TYPE, "Empty")
            .send()
            .await
            .map_err(remote("PutMethodResponse"))?;
        Ok(())
    }

    async fn put_integration(&self, method: &MethodRef, uri: &str) -> Result<(), ProvisionError> {
        self.client
            .put_integration()
            .rest_api_id(&method.rest_api_id)
            .resource_id(&method.resource_id)
            .http_method(&method.http_method)
            .r#type(IntegrationType::Aws)
            .integration_http_method("POST")
            .uri(uri)
            .send()
            .await
            .map_err(remote("PutIntegration"))?;
        Ok(())
    }

    async fn put_integration_response(
        &self,
        method: &MethodRef,
        status_code: &str,
    ) -> Result<(), ProvisionError> {
        self.client
            .put_integration_response()
            .rest_api_id(&method.rest_api_id)
            .resource_id(&method.resource_id)
            .http_method(&method.http_method)
            .status_code(status_code)
            .response_templates(JSON_CONTENT_TYPE, "")
            .send()
            .await
            .map_err(remote("PutIntegrationResponse"))?;
        Ok(())
    }

    async fn create_deployment(
        &self,
        deployment: &DeploymentRequest,
    ) -> Result<String, ProvisionError> {
        let variables: HashMap<String, String> = deployment
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let output = self
            .client
            .create_deployment()
            .rest_api_id(&deployment.rest_api_id)
            .stage_name(&deployment.stage_name)
            .set_stage_description(deployment.stage_description.clone())
            .set_description(deployment.stage_description.clone())
            .set_variables((!variables.is_empty()).then_some(variables))
            .set_cache_cluster_enabled(deployment.cache_cluster_enabled)
            .set_cache_cluster_size(
                deployment
                    .cache_cluster_size
                    .as_deref()
                    .map(CacheClusterSize::from),
            )
            .send()
            .await
            .map_err(remote("CreateDeployment"))?;
        required("CreateDeployment", "id", output.id())
    }
}

// =============================================================================
// Lambda
// =============================================================================

/// [`LambdaClient`] over `aws-sdk-lambda`
pub struct AwsLambda {
    client: aws_sdk_lambda::Client,
}

impl AwsLambda {
    /// Build from shared SDK configuration
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_lambda::Client::new(config),
        }
    }
}

#[derive(Deserialize)]
struct ResourcePolicy {
    #[serde(rename = "Statement", default)]
    statements: Vec<PolicyStatement>,
}

#[derive(Deserialize)]
struct PolicyStatement {
    #[serde(rename = "Sid", default)]
    sid: Option<String>,
}

/// Statement ids in a resource policy document
fn statement_ids(policy: &str) -> Result<BTreeSet<String>, ProvisionError> {
    let policy: ResourcePolicy = serde_json::from_str(policy)?;
    Ok(policy
        .statements
        .into_iter()
        .filter_map(|statement| statement.sid)
        .collect())
}

#[async_trait]
impl LambdaClient for AwsLambda {
    async fn get_policy_statement_ids(
        &self,
        function_name: &str,
    ) -> Result<BTreeSet<String>, ProvisionError> {
        let result = self
            .client
            .get_policy()
            .function_name(function_name)
            .send()
            .await;

        match result {
            Ok(output) => match output.policy() {
                Some(policy) => statement_ids(policy),
                None => Ok(BTreeSet::new()),
            },
            // No resource policy yet
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception()) =>
            {
                Ok(BTreeSet::new())
            }
            Err(err) => Err(remote("GetPolicy")(err)),
        }
    }

    async fn add_permission(&self, grant: &InvokeGrant) -> Result<(), ProvisionError> {
        self.client
            .add_permission()
            .function_name(&grant.function_name)
            .statement_id(&grant.statement_id)
            .action(INVOKE_ACTION)
            .principal(&grant.principal)
            .source_arn(&grant.source_arn)
            .send()
            .await
            .map_err(remote("AddPermission"))?;
        Ok(())
    }

    async fn remove_permission(
        &self,
        function_name: &str,
        statement_id: &str,
    ) -> Result<(), ProvisionError> {
        self.client
            .remove_permission()
            .function_name(function_name)
            .statement_id(statement_id)
            .send()
            .await
            .map_err(remote("RemovePermission"))?;
        Ok(())
    }
}
