//! Wire protocol between the control plane and the runtime
//!
//! The control plane invokes the runtime with a [`CustomResourceRequest`]. The
//! outcome never travels back as a return value: it is delivered as a
//! [`CustomResourceResponse`] to the request's pre-signed `ResponseURL`.
//!
//! The control plane stringifies scalar property values, so booleans in the
//! API properties are accepted both as `true` and `"true"`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ProvisionError;

// =============================================================================
// Request / response envelope
// =============================================================================

/// Lifecycle operation requested by the control plane
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    /// Resource is being created
    Create,
    /// Resource properties changed
    Update,
    /// Resource is being removed
    Delete,
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        };
        f.write_str(s)
    }
}

/// One invocation of the runtime
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceRequest {
    /// Requested operation
    pub request_type: RequestType,
    /// Pre-signed callback URL receiving the response
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    /// Stack the resource belongs to
    pub stack_id: String,
    /// Correlation id of this request
    pub request_id: String,
    /// Custom resource type tag
    #[serde(default)]
    pub resource_type: String,
    /// Logical id of the resource in the document
    pub logical_resource_id: String,
    /// Physical id reported by a previous response (Update/Delete)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    /// Desired properties
    #[serde(default)]
    pub resource_properties: Value,
    /// Previous properties (Update only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Value>,
}

impl CustomResourceRequest {
    /// Parse a request body
    pub fn from_slice(body: &[u8]) -> Result<Self, ProvisionError> {
        serde_json::from_slice(body)
            .map_err(|e| ProvisionError::invalid_request(format!("malformed request: {e}")))
    }

    /// The desired API properties
    pub fn desired_api(&self) -> Result<ApiSpec, ProvisionError> {
        ApiProperties::from_value(&self.resource_properties).map(|p| p.api)
    }

    /// The API properties being torn down: previous properties when present,
    /// otherwise the current ones
    pub fn previous_api(&self) -> Result<ApiSpec, ProvisionError> {
        let properties = self
            .old_resource_properties
            .as_ref()
            .unwrap_or(&self.resource_properties);
        ApiProperties::from_value(properties).map(|p| p.api)
    }

    /// Physical id to report when the operation produced none
    pub fn fallback_physical_id(&self) -> String {
        fallback_physical_id(
            self.physical_resource_id.as_deref(),
            &self.logical_resource_id,
            &self.request_id,
        )
    }
}

/// The callback fields of a request body that is not a complete request.
/// Enough to deliver a FAILED response instead of leaving the caller waiting.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackTarget {
    /// Pre-signed callback URL receiving the response
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    /// Stack the resource belongs to
    pub stack_id: String,
    /// Correlation id of the request
    pub request_id: String,
    /// Logical id of the resource in the document
    pub logical_resource_id: String,
    /// Physical id reported by a previous response
    #[serde(default)]
    pub physical_resource_id: Option<String>,
}

impl CallbackTarget {
    /// Read the callback fields, if the body carries all of them
    pub fn from_slice(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }
}

fn fallback_physical_id(physical: Option<&str>, logical: &str, request: &str) -> String {
    match physical {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("{logical}-{request}"),
    }
}

/// Terminal status of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    /// Operation completed
    Success,
    /// Operation failed; `Reason` says why
    Failed,
}

/// The single response delivered for a request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceResponse {
    /// Terminal status
    pub status: ResponseStatus,
    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Physical id of the provisioned resource
    pub physical_resource_id: String,
    /// Echoed correlation id
    pub stack_id: String,
    /// Echoed correlation id
    pub request_id: String,
    /// Echoed correlation id
    pub logical_resource_id: String,
    /// Result values readable through `Fn::GetAtt`
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl CustomResourceResponse {
    /// Successful response for `request`
    pub fn success(
        request: &CustomResourceRequest,
        physical_resource_id: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            status: ResponseStatus::Success,
            reason: None,
            physical_resource_id: physical_resource_id.into(),
            stack_id: request.stack_id.clone(),
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
            data,
        }
    }

    /// Failed response for `request`
    pub fn failed(request: &CustomResourceRequest, reason: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Failed,
            reason: Some(reason.into()),
            physical_resource_id: request.fallback_physical_id(),
            stack_id: request.stack_id.clone(),
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
            data: Map::new(),
        }
    }

    /// Failed response for a request that could not be read in full
    pub fn rejected(target: &CallbackTarget, reason: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Failed,
            reason: Some(reason.into()),
            physical_resource_id: fallback_physical_id(
                target.physical_resource_id.as_deref(),
                &target.logical_resource_id,
                &target.request_id,
            ),
            stack_id: target.stack_id.clone(),
            request_id: target.request_id.clone(),
            logical_resource_id: target.logical_resource_id.clone(),
            data: Map::new(),
        }
    }
}

// =============================================================================
// API properties
// =============================================================================

/// The `ResourceProperties` of an API custom resource
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ApiProperties {
    /// The API declaration
    #[serde(rename = "API")]
    pub api: ApiSpec,
}

impl ApiProperties {
    /// Interpret raw resource properties
    pub fn from_value(value: &Value) -> Result<Self, ProvisionError> {
        Self::deserialize(value)
            .map_err(|e| ProvisionError::invalid_request(format!("invalid API properties: {e}")))
    }
}

/// A REST API container and its resource tree
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiSpec {
    /// Container name; existing containers are found by it
    pub name: String,
    /// Container description
    #[serde(default)]
    pub description: Option<String>,
    /// Deployment stage; no stage means no deployment
    #[serde(default)]
    pub stage: Option<StageSpec>,
    /// Root of the tree (maps to the container's existing root resource)
    #[serde(default)]
    pub resources: ApiResourceNode,
}

impl ApiSpec {
    /// The stage to deploy, if one is named
    pub fn named_stage(&self) -> Option<&StageSpec> {
        self.stage.as_ref().filter(|s| !s.name.trim().is_empty())
    }

    /// Distinct invocation targets referenced anywhere in the tree
    pub fn lambda_targets(&self) -> BTreeSet<&str> {
        let mut targets = BTreeSet::new();
        self.resources.collect_targets(&mut targets);
        targets
    }
}

/// Deployment stage settings, passed through verbatim
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StageSpec {
    /// Stage name
    #[serde(default)]
    pub name: String,
    /// Stage description
    #[serde(default)]
    pub description: Option<String>,
    /// Stage variables
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Whether to provision a cache cluster
    #[serde(default, deserialize_with = "optional_flexible_bool")]
    pub cache_cluster_enabled: Option<bool>,
    /// Cache cluster size
    #[serde(default, deserialize_with = "optional_flexible_string")]
    pub cache_cluster_size: Option<String>,
}

/// A node of the desired resource tree
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiResourceNode {
    /// Path component; absent on the root
    #[serde(default)]
    pub path_part: Option<String>,
    /// HTTP method -> method settings
    #[serde(default)]
    pub methods: BTreeMap<String, MethodSpec>,
    /// Child nodes, keyed by path component
    #[serde(default)]
    pub children: BTreeMap<String, ApiResourceNode>,
}

impl ApiResourceNode {
    fn collect_targets<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        out.extend(self.methods.values().map(|m| m.lambda_target.as_str()));
        for child in self.children.values() {
            child.collect_targets(out);
        }
    }
}

/// One method bound to a function
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MethodSpec {
    /// HTTP verb; defaults to the key it is stored under
    #[serde(default, rename = "HTTPMethod")]
    pub http_method: Option<String>,
    /// ARN of the function to invoke
    pub lambda_target: String,
    /// Authorization mode
    #[serde(default)]
    pub authorization_type: Option<String>,
    /// Whether callers must present an API key
    #[serde(default, rename = "APIKeyRequired", deserialize_with = "flexible_bool")]
    pub api_key_required: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlexibleScalar {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    optional_flexible_bool(deserializer).map(|value| value.unwrap_or(false))
}

fn optional_flexible_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<FlexibleScalar>::deserialize(deserializer)? {
        None => Ok(None),
        Some(FlexibleScalar::Bool(value)) => Ok(Some(value)),
        Some(FlexibleScalar::String(value)) => match value.to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" | "" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, got {other:?}"
            ))),
        },
        Some(FlexibleScalar::Number(value)) => Err(serde::de::Error::custom(format!(
            "expected a boolean, got {value}"
        ))),
    }
}

fn optional_flexible_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        match Option::<FlexibleScalar>::deserialize(deserializer)? {
            None => None,
            Some(FlexibleScalar::String(value)) => Some(value),
            Some(FlexibleScalar::Number(value)) => Some(value.to_string()),
            Some(FlexibleScalar::Bool(value)) => Some(value.to_string()),
        },
    )
}
