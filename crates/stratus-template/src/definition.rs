//! Declarative function definitions
//!
//! These are the inputs to [`ResourceGraphAssembler`](crate::ResourceGraphAssembler).
//! They are built once by the caller (in code, or deserialized from a YAML/JSON
//! service file) and consumed read-only.

use serde::{Deserialize, Serialize};

use stratus_common::{Error, Result};

use crate::api::ApiDefinition;
use crate::permission::PermissionGrant;

/// Default function memory limit (MB)
pub const DEFAULT_MEMORY_SIZE: u32 = 128;

/// Default function timeout (seconds)
pub const DEFAULT_TIMEOUT: u32 = 3;

const MEMORY_RANGE: std::ops::RangeInclusive<u32> = 128..=10240;
const TIMEOUT_RANGE: std::ops::RangeInclusive<u32> = 1..=900;
const BATCH_SIZE_RANGE: std::ops::RangeInclusive<u32> = 1..=10000;

/// Opaque code bundle location produced by the packaging step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLocation {
    /// Bucket holding the bundle
    pub bucket: String,
    /// Object key of the bundle
    pub key: String,
}

impl CodeLocation {
    /// Create a new code location
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// A whole service: every function plus an optional API declaration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    /// Service name
    pub name: String,
    /// Stack description
    #[serde(default)]
    pub description: String,
    /// Function definitions, in declaration order
    #[serde(default)]
    pub functions: Vec<FunctionDefinition>,
    /// Optional REST API wired to the functions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiDefinition>,
}

/// Execution limits for a function
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionOptions {
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Memory limit in MB
    #[serde(default = "default_memory_size")]
    pub memory_size: u32,
    /// Timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u32,
}

fn default_memory_size() -> u32 {
    DEFAULT_MEMORY_SIZE
}

fn default_timeout() -> u32 {
    DEFAULT_TIMEOUT
}

impl Default for FunctionOptions {
    fn default() -> Self {
        Self {
            description: String::new(),
            memory_size: DEFAULT_MEMORY_SIZE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// One `Allow` statement in an inline role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Privilege {
    /// Allowed actions (e.g. `s3:GetObject`)
    pub actions: Vec<String>,
    /// Resource pattern the actions apply to
    pub resource: String,
}

impl Privilege {
    /// Create a privilege
    pub fn new<I, S>(actions: I, resource: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            resource: resource.into(),
        }
    }
}

/// Inline role: privileges to allow in addition to the baseline logging
/// privileges and those implied by event-source mappings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDefinition {
    /// Explicit privilege statements
    #[serde(default)]
    pub privileges: Vec<Privilege>,
}

impl RoleDefinition {
    /// Create a role definition from privileges
    pub fn new(privileges: Vec<Privilege>) -> Self {
        Self { privileges }
    }
}

/// Resolved role reference for a function
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleReference<'a> {
    /// An existing role, by name or ARN
    Named(&'a str),
    /// A role synthesized into the document
    Inline(&'a RoleDefinition),
}

/// Where a pull-based event source starts reading
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartingPosition {
    /// Oldest available record
    TrimHorizon,
    /// Only new records
    Latest,
}

impl StartingPosition {
    /// Provider value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrimHorizon => "TRIM_HORIZON",
            Self::Latest => "LATEST",
        }
    }
}

/// Pull-based event source wired to a function
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSourceMapping {
    /// ARN of the stream or table
    pub event_source_arn: String,
    /// Where to start reading
    pub starting_position: StartingPosition,
    /// Records per invocation
    pub batch_size: u32,
    /// Whether the mapping is active; provider default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl EventSourceMapping {
    /// Create an enabled-by-default mapping
    pub fn new(
        event_source_arn: impl Into<String>,
        starting_position: StartingPosition,
        batch_size: u32,
    ) -> Self {
        Self {
            event_source_arn: event_source_arn.into(),
            starting_position,
            batch_size,
            enabled: None,
        }
    }

    /// Set the enabled flag explicitly
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Service namespace: the third `:`-delimited ARN segment
    pub fn service_namespace(&self) -> Option<&str> {
        self.event_source_arn
            .split(':')
            .nth(2)
            .filter(|segment| !segment.is_empty())
    }
}

/// A function to provision, with its privileges and wiring
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    /// Stable handler identity; the function's logical id derives from it
    pub handler: String,
    /// Existing role name or ARN. Exclusive with `role_definition`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    /// Inline role to synthesize. Exclusive with `role_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_definition: Option<RoleDefinition>,
    /// Execution limits
    #[serde(default)]
    pub options: FunctionOptions,
    /// Push-based invoke grants, exported in declaration order
    #[serde(default)]
    pub permissions: Vec<PermissionGrant>,
    /// Pull-based event sources
    #[serde(default)]
    pub event_source_mappings: Vec<EventSourceMapping>,
}

impl FunctionDefinition {
    /// A function executing under an existing role
    pub fn with_role_name(handler: impl Into<String>, role_name: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            role_name: Some(role_name.into()),
            role_definition: None,
            options: FunctionOptions::default(),
            permissions: Vec::new(),
            event_source_mappings: Vec::new(),
        }
    }

    /// A function executing under a synthesized role
    pub fn with_role_definition(handler: impl Into<String>, role: RoleDefinition) -> Self {
        Self {
            handler: handler.into(),
            role_name: None,
            role_definition: Some(role),
            options: FunctionOptions::default(),
            permissions: Vec::new(),
            event_source_mappings: Vec::new(),
        }
    }

    /// Replace the execution options
    pub fn options(mut self, options: FunctionOptions) -> Self {
        self.options = options;
        self
    }

    /// Append a permission grant
    pub fn permission(mut self, grant: PermissionGrant) -> Self {
        self.permissions.push(grant);
        self
    }

    /// Append an event-source mapping
    pub fn event_source(mut self, mapping: EventSourceMapping) -> Self {
        self.event_source_mappings.push(mapping);
        self
    }

    /// Resolve the role reference. Exactly one of the two must be set.
    pub fn role(&self) -> Result<RoleReference<'_>> {
        match (&self.role_name, &self.role_definition) {
            (Some(name), None) if !name.is_empty() => Ok(RoleReference::Named(name)),
            (None, Some(definition)) => Ok(RoleReference::Inline(definition)),
            (Some(_), Some(_)) => Err(Error::validation_for_field(
                &self.handler,
                "role",
                "roleName and roleDefinition are mutually exclusive",
            )),
            _ => Err(Error::validation_for_field(
                &self.handler,
                "role",
                "either roleName or roleDefinition must be supplied",
            )),
        }
    }

    /// Check required fields and limits
    pub fn validate(&self) -> Result<()> {
        if self.handler.trim().is_empty() {
            return Err(Error::validation_for_field(
                &self.handler,
                "handler",
                "handler id must not be empty",
            ));
        }

        self.role()?;

        if !MEMORY_RANGE.contains(&self.options.memory_size) {
            return Err(Error::validation_for_field(
                &self.handler,
                "options.memorySize",
                format!(
                    "memory size {} outside {}..={} MB",
                    self.options.memory_size,
                    MEMORY_RANGE.start(),
                    MEMORY_RANGE.end()
                ),
            ));
        }
        if !TIMEOUT_RANGE.contains(&self.options.timeout) {
            return Err(Error::validation_for_field(
                &self.handler,
                "options.timeout",
                format!(
                    "timeout {} outside {}..={} seconds",
                    self.options.timeout,
                    TIMEOUT_RANGE.start(),
                    TIMEOUT_RANGE.end()
                ),
            ));
        }

        for mapping in &self.event_source_mappings {
            if mapping.event_source_arn.split(':').count() < 3 {
                return Err(Error::validation_for_field(
                    &self.handler,
                    "eventSourceMappings.eventSourceArn",
                    format!("malformed event source ARN: {}", mapping.event_source_arn),
                ));
            }
            if !BATCH_SIZE_RANGE.contains(&mapping.batch_size) {
                return Err(Error::validation_for_field(
                    &self.handler,
                    "eventSourceMappings.batchSize",
                    format!("batch size {} out of range", mapping.batch_size),
                ));
            }
        }

        for grant in &self.permissions {
            grant.validate(&self.handler)?;
        }
        Ok(())
    }
}
