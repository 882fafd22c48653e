//! REST API declaration
//!
//! The template format cannot express the hierarchical resource/method graph
//! directly, so the API becomes one custom resource serviced by the API
//! provisioner helper. Its `API` property is the wire shape the runtime
//! consumes; method targets are rewritten from handler ids to function ARN
//! references.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use stratus_common::document::get_att;
use stratus_common::naming::ContentId;
use stratus_common::{Error, ResourceDocument, ResourceNode, ResourceType, Result};

use crate::assembler::AssemblerConfig;
use crate::definition::Privilege;
use crate::helpers::{ensure_helper, HelperFunction};
use crate::iam::synthesize;

/// Runtime of the API provisioner helper
pub const PROVISIONER_RUNTIME: &str = "provided.al2023";

/// Handler of the API provisioner helper
pub const PROVISIONER_HANDLER: &str = "bootstrap";

/// Default authorization mode for methods
pub const DEFAULT_AUTHORIZATION: &str = "NONE";

/// Deployment stage to create after the resource graph
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDefinition {
    /// Stage name (e.g. `prod`)
    pub name: String,
    /// Stage description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Stage variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    /// Whether to provision a cache cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_cluster_enabled: Option<bool>,
    /// Cache cluster size (e.g. `0.5`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_cluster_size: Option<String>,
}

/// One HTTP method bound to a function
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDefinition {
    /// Handler id of the target function
    pub handler: String,
    /// Authorization mode
    #[serde(default = "default_authorization")]
    pub authorization_type: String,
    /// Whether callers must present an API key
    #[serde(default)]
    pub api_key_required: bool,
}

fn default_authorization() -> String {
    DEFAULT_AUTHORIZATION.to_string()
}

impl MethodDefinition {
    /// Unauthenticated method targeting `handler`
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            authorization_type: default_authorization(),
            api_key_required: false,
        }
    }
}

/// A node in the declared resource tree. Children are keyed by path part.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResourceDefinition {
    /// HTTP method (upper case) -> definition
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub methods: BTreeMap<String, MethodDefinition>,
    /// Path part -> child node
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, ApiResourceDefinition>,
}

impl ApiResourceDefinition {
    /// Bind `method` on this node
    pub fn method(mut self, verb: impl Into<String>, method: MethodDefinition) -> Self {
        self.methods.insert(verb.into().to_uppercase(), method);
        self
    }

    /// Add a child under `path_part`
    pub fn child(mut self, path_part: impl Into<String>, child: ApiResourceDefinition) -> Self {
        self.children.insert(path_part.into(), child);
        self
    }

    fn collect_handlers<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        out.extend(self.methods.values().map(|m| m.handler.as_str()));
        for child in self.children.values() {
            child.collect_handlers(out);
        }
    }
}

/// A REST API whose methods invoke functions of the same service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDefinition {
    /// API container name; the runtime finds existing APIs by this name
    pub name: String,
    /// API description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional deployment stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageDefinition>,
    /// Root of the resource tree (maps to the API's existing root resource)
    #[serde(default)]
    pub resources: ApiResourceDefinition,
}

impl ApiDefinition {
    /// Logical id of the API custom resource
    pub fn logical_id(&self) -> String {
        ContentId::new("ApiGateway").field(&self.name).finish()
    }

    /// Handler ids referenced anywhere in the tree
    pub fn target_handlers(&self) -> BTreeSet<&str> {
        let mut handlers = BTreeSet::new();
        self.resources.collect_handlers(&mut handlers);
        handlers
    }
}

/// Logical id of the API provisioner helper
pub fn provisioner_id() -> String {
    ContentId::new("ApiProvisioner")
        .field(PROVISIONER_HANDLER)
        .finish()
}

fn provisioner_privileges() -> Vec<Privilege> {
    vec![
        Privilege::new(["apigateway:*"], "*"),
        Privilege::new(
            [
                "lambda:AddPermission",
                "lambda:RemovePermission",
                "lambda:GetPolicy",
            ],
            "*",
        ),
    ]
}

/// Emit the API custom resource (and the shared provisioner helper).
///
/// `function_ids` maps handler id to the function's logical id; a method
/// naming an unknown handler is an export error.
pub(crate) fn export_api(
    api: &ApiDefinition,
    function_ids: &BTreeMap<String, String>,
    config: &AssemblerConfig,
    document: &mut ResourceDocument,
) -> Result<String> {
    if api.name.trim().is_empty() {
        return Err(Error::validation_for_field(
            "api",
            "api.name",
            "API name must not be empty",
        ));
    }

    let mut targets = BTreeSet::new();
    for handler in api.target_handlers() {
        let id = function_ids.get(handler).ok_or_else(|| {
            Error::export(
                handler,
                format!("API {} targets unknown function handler", api.name),
            )
        })?;
        targets.insert(id.clone());
    }

    let provisioner = ensure_helper(
        document,
        HelperFunction {
            logical_id: provisioner_id(),
            description: "Provisions REST API resource graphs",
            handler: PROVISIONER_HANDLER,
            runtime: PROVISIONER_RUNTIME,
            code: config.provisioner_code.as_ref().unwrap_or(&config.code),
            policy: synthesize(&provisioner_privileges(), &[]),
        },
    );

    let mut api_props = Map::new();
    api_props.insert("Name".to_string(), json!(api.name));
    if let Some(description) = &api.description {
        api_props.insert("Description".to_string(), json!(description));
    }
    if let Some(stage) = &api.stage {
        api_props.insert("Stage".to_string(), stage_value(stage));
    }
    api_props.insert(
        "Resources".to_string(),
        resource_value(None, &api.resources, function_ids),
    );

    let mut properties = Map::new();
    properties.insert("ServiceToken".to_string(), get_att(&provisioner, "Arn"));
    properties.insert("API".to_string(), Value::Object(api_props));

    let logical_id = api.logical_id();
    debug!(api = %api.name, resource = %logical_id, targets = targets.len(), "Exporting API");
    document.insert(
        logical_id.clone(),
        ResourceNode::new(ResourceType::CustomResource, properties)
            .depends_on(targets)
            .depends_on([provisioner]),
    );
    Ok(logical_id)
}

fn stage_value(stage: &StageDefinition) -> Value {
    let mut value = Map::new();
    value.insert("Name".to_string(), json!(stage.name));
    if let Some(description) = &stage.description {
        value.insert("Description".to_string(), json!(description));
    }
    if !stage.variables.is_empty() {
        value.insert("Variables".to_string(), json!(stage.variables));
    }
    if let Some(enabled) = stage.cache_cluster_enabled {
        value.insert("CacheClusterEnabled".to_string(), json!(enabled));
    }
    if let Some(size) = &stage.cache_cluster_size {
        value.insert("CacheClusterSize".to_string(), json!(size));
    }
    Value::Object(value)
}

fn resource_value(
    path_part: Option<&str>,
    node: &ApiResourceDefinition,
    function_ids: &BTreeMap<String, String>,
) -> Value {
    let methods: Map<String, Value> = node
        .methods
        .iter()
        .map(|(verb, method)| {
            let target = function_ids
                .get(&method.handler)
                .map(|id| get_att(id, "Arn"))
                .unwrap_or(Value::Null);
            (
                verb.clone(),
                json!({
                    "HTTPMethod": verb,
                    "LambdaTarget": target,
                    "AuthorizationType": method.authorization_type,
                    "APIKeyRequired": method.api_key_required,
                }),
            )
        })
        .collect();

    let children: Map<String, Value> = node
        .children
        .iter()
        .map(|(part, child)| (part.clone(), resource_value(Some(part), child, function_ids)))
        .collect();

    let mut value = Map::new();
    if let Some(part) = path_part {
        value.insert("PathPart".to_string(), json!(part));
    }
    value.insert("Methods".to_string(), Value::Object(methods));
    value.insert("Children".to_string(), Value::Object(children));
    Value::Object(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::CodeLocation;

    fn tree() -> ApiResourceDefinition {
        ApiResourceDefinition::default().child(
            "orders",
            ApiResourceDefinition::default()
                .method("get", MethodDefinition::new("orders.List"))
                .child(
                    "{id}",
                    ApiResourceDefinition::default()
                        .method("GET", MethodDefinition::new("orders.Get")),
                ),
        )
    }

    fn function_ids() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("orders.List".to_string(), "LambdaList".to_string()),
            ("orders.Get".to_string(), "LambdaGet".to_string()),
        ])
    }

    fn api() -> ApiDefinition {
        ApiDefinition {
            name: "orders-api".into(),
            description: Some("Orders".into()),
            stage: Some(StageDefinition {
                name: "prod".into(),
                description: None,
                variables: BTreeMap::from([("tier".to_string(), "gold".to_string())]),
                cache_cluster_enabled: Some(true),
                cache_cluster_size: Some("0.5".into()),
            }),
            resources: tree(),
        }
    }

    #[test]
    fn collects_handlers_across_tree() {
        let api = api();
        let handlers: Vec<_> = api.target_handlers().into_iter().collect();
        assert_eq!(handlers, vec!["orders.Get", "orders.List"]);
    }

    #[test]
    fn exports_wire_shape_with_arn_targets() {
        let config = AssemblerConfig::new(CodeLocation::new("b", "k"));
        let mut doc = ResourceDocument::new("");
        let id = export_api(&api(), &function_ids(), &config, &mut doc).unwrap();

        let node = doc.get(&id).unwrap();
        assert_eq!(node.type_, ResourceType::CustomResource);
        assert!(node.depends_on.contains("LambdaList"));
        assert!(node.depends_on.contains("LambdaGet"));
        assert!(node.depends_on.contains(&provisioner_id()));

        let wire = node.property("API").unwrap();
        assert_eq!(wire["Name"], "orders-api");
        assert_eq!(wire["Stage"]["Variables"]["tier"], "gold");
        let orders = &wire["Resources"]["Children"]["orders"];
        assert_eq!(orders["PathPart"], "orders");
        assert_eq!(orders["Methods"]["GET"]["LambdaTarget"], get_att("LambdaList", "Arn"));
        assert_eq!(
            orders["Children"]["{id}"]["Methods"]["GET"]["AuthorizationType"],
            "NONE"
        );
        assert!(wire["Resources"].get("PathPart").is_none());
    }

    #[test]
    fn unknown_handler_is_export_error() {
        let config = AssemblerConfig::new(CodeLocation::new("b", "k"));
        let mut doc = ResourceDocument::new("");
        let mut ids = function_ids();
        ids.remove("orders.Get");
        let err = export_api(&api(), &ids, &config, &mut doc).unwrap_err();
        assert!(matches!(err, Error::Export { .. }));
    }

    #[test]
    fn provisioner_uses_dedicated_code_when_configured() {
        let config = AssemblerConfig::new(CodeLocation::new("b", "k"))
            .with_provisioner_code(CodeLocation::new("b", "provisioner.zip"));
        let mut doc = ResourceDocument::new("");
        export_api(&api(), &function_ids(), &config, &mut doc).unwrap();
        let helper = doc.get(&provisioner_id()).unwrap();
        assert_eq!(helper.property("Code").unwrap()["S3Key"], "provisioner.zip");
        assert_eq!(helper.property("Runtime"), Some(&json!(PROVISIONER_RUNTIME)));
    }
}
