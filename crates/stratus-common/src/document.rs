//! Resource document model
//!
//! The assembler output: a mapping of logical id to resource node, serialized
//! as the provider's template format:
//!
//! ```text
//! { "AWSTemplateFormatVersion": "2010-09-09",
//!   "Description": "...",
//!   "Resources": { <logicalId>: { "Type", "Properties", "DependsOn"? } } }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Template format version emitted on every document
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Fixed vocabulary of resource type tags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// A deployed function
    #[serde(rename = "AWS::Lambda::Function")]
    Function,
    /// An invoke permission on a function
    #[serde(rename = "AWS::Lambda::Permission")]
    Permission,
    /// An execution role with an inline policy
    #[serde(rename = "AWS::IAM::Role")]
    Role,
    /// A pull-based event source wired to a function
    #[serde(rename = "AWS::Lambda::EventSourceMapping")]
    EventSourceMapping,
    /// A helper invocation serviced out-of-band by a function
    #[serde(rename = "AWS::CloudFormation::CustomResource")]
    CustomResource,
}

impl ResourceType {
    /// The provider's type tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "AWS::Lambda::Function",
            Self::Permission => "AWS::Lambda::Permission",
            Self::Role => "AWS::IAM::Role",
            Self::EventSourceMapping => "AWS::Lambda::EventSourceMapping",
            Self::CustomResource => "AWS::CloudFormation::CustomResource",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the `Resources` section
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Type tag
    #[serde(rename = "Type")]
    pub type_: ResourceType,
    /// Type-specific properties
    #[serde(rename = "Properties", default)]
    pub properties: Map<String, Value>,
    /// Logical ids that must exist before this resource
    #[serde(
        rename = "DependsOn",
        default,
        skip_serializing_if = "BTreeSet::is_empty"
    )]
    pub depends_on: BTreeSet<String>,
}

impl ResourceNode {
    /// Create a node with no dependencies
    pub fn new(type_: ResourceType, properties: Map<String, Value>) -> Self {
        Self {
            type_,
            properties,
            depends_on: BTreeSet::new(),
        }
    }

    /// Add dependencies on other logical ids
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Look up a property by name
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// The full assembled document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDocument {
    /// Template format version
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    /// Stack description
    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Logical id -> resource
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, ResourceNode>,
}

impl ResourceDocument {
    /// Create an empty document
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: description.into(),
            resources: BTreeMap::new(),
        }
    }

    /// Whether a resource with this logical id already exists
    pub fn contains(&self, logical_id: &str) -> bool {
        self.resources.contains_key(logical_id)
    }

    /// Look up a resource by logical id
    pub fn get(&self, logical_id: &str) -> Option<&ResourceNode> {
        self.resources.get(logical_id)
    }

    /// Insert or replace a resource
    pub fn insert(&mut self, logical_id: impl Into<String>, node: ResourceNode) {
        self.resources.insert(logical_id.into(), node);
    }

    /// Logical ids of all resources with the given type
    pub fn ids_of_type(&self, type_: ResourceType) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, node)| node.type_ == type_)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the document has no resources
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `{"Fn::GetAtt": [logical_id, attribute]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{"Fn::Sub": template}`
pub fn sub(template: impl Into<String>) -> Value {
    json!({ "Fn::Sub": template.into() })
}
