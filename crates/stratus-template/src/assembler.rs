//! ResourceGraphAssembler: composes definitions into a resource document
//!
//! This is the single entry point for turning [`FunctionDefinition`]s (and an
//! optional [`ApiDefinition`]) into a provider template. It is a pure
//! in-memory transform: synchronous, single-threaded, no remote calls.
//!
//! ```rust,ignore
//! let mut assembler = ResourceGraphAssembler::new(AssemblerConfig::new(code));
//! let document = assembler.assemble(&service)?;
//! println!("{}", document.to_json_pretty()?);
//! ```
//!
//! Assembly is all-or-nothing per run. Every definition is validated before
//! any resource is emitted; any export error discards the partial document.

use std::collections::{BTreeMap, HashSet};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use stratus_common::document::{get_att, sub};
use stratus_common::naming::{sanitized_name, ContentId};
use stratus_common::{Error, ResourceDocument, ResourceNode, ResourceType, Result};

use crate::api::{export_api, ApiDefinition};
use crate::definition::{
    CodeLocation, EventSourceMapping, FunctionDefinition, RoleReference, ServiceDefinition,
};
use crate::helpers::function_node;
use crate::iam::synthesize;

/// Default runtime for service functions and configurator helpers
pub const DEFAULT_FUNCTION_RUNTIME: &str = "nodejs20.x";

/// Explicit configuration for an assembly run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssemblerConfig {
    /// Code bundle every service function is deployed from
    pub code: CodeLocation,
    /// Runtime for service functions
    pub function_runtime: String,
    /// Runtime for configurator helpers (shipped in the same bundle)
    pub helper_runtime: String,
    /// Separate bundle for the API provisioner; defaults to `code`
    pub provisioner_code: Option<CodeLocation>,
}

impl AssemblerConfig {
    /// Configuration with default runtimes
    pub fn new(code: CodeLocation) -> Self {
        Self {
            code,
            function_runtime: DEFAULT_FUNCTION_RUNTIME.to_string(),
            helper_runtime: DEFAULT_FUNCTION_RUNTIME.to_string(),
            provisioner_code: None,
        }
    }

    /// Override the service function runtime
    pub fn with_function_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.function_runtime = runtime.into();
        self
    }

    /// Deploy the API provisioner from its own bundle
    pub fn with_provisioner_code(mut self, code: CodeLocation) -> Self {
        self.provisioner_code = Some(code);
        self
    }
}

/// The function a grant or mapping points at
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionTarget {
    /// Logical id of the function resource
    pub logical_id: String,
    /// `Fn::GetAtt` reference to the function's ARN
    pub arn: Value,
}

impl FunctionTarget {
    /// Target the function with this logical id
    pub fn new(logical_id: impl Into<String>) -> Self {
        let logical_id = logical_id.into();
        let arn = get_att(&logical_id, "Arn");
        Self { logical_id, arn }
    }
}

/// Mutable state threaded through permission exporters
pub(crate) struct ExportContext<'a> {
    pub document: &'a mut ResourceDocument,
    pub rng: &'a mut StdRng,
    pub config: &'a AssemblerConfig,
    /// Handler id of the function being exported, for error context
    pub function: &'a str,
}

/// Content-addressable logical id of a function
pub fn function_logical_id(handler: &str) -> String {
    ContentId::new("Lambda").field(handler).finish()
}

/// Content-addressable logical id of an event-source mapping
pub fn event_source_logical_id(mapping: &EventSourceMapping) -> String {
    ContentId::new("LambdaES")
        .field(&mapping.event_source_arn)
        .number(mapping.batch_size)
        .field(mapping.starting_position.as_str())
        .finish()
}

/// Orchestrates assembly of definitions into a [`ResourceDocument`].
pub struct ResourceGraphAssembler {
    config: AssemblerConfig,
    rng: StdRng,
}

impl ResourceGraphAssembler {
    /// Create an assembler; salted ids draw from OS entropy
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seed the salt generator, making salted ids reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// The configuration this assembler was built with
    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Assemble a whole service: functions, then the API (if declared)
    pub fn assemble(&mut self, service: &ServiceDefinition) -> Result<ResourceDocument> {
        let description = if service.description.is_empty() {
            service.name.clone()
        } else {
            service.description.clone()
        };
        self.assemble_parts(&description, &service.functions, service.api.as_ref())
    }

    /// Assemble functions only
    pub fn assemble_functions(
        &mut self,
        description: &str,
        functions: &[FunctionDefinition],
    ) -> Result<ResourceDocument> {
        self.assemble_parts(description, functions, None)
    }

    fn assemble_parts(
        &mut self,
        description: &str,
        functions: &[FunctionDefinition],
        api: Option<&ApiDefinition>,
    ) -> Result<ResourceDocument> {
        validate_all(functions)?;

        let mut document = ResourceDocument::new(description);
        let mut function_ids = BTreeMap::new();

        for function in functions {
            let logical_id = self.export_function(function, &mut document)?;
            function_ids.insert(function.handler.clone(), logical_id);
        }

        if let Some(api) = api {
            export_api(api, &function_ids, &self.config, &mut document)?;
        }

        info!(
            functions = functions.len(),
            resources = document.len(),
            "Assembled resource document"
        );
        Ok(document)
    }

    /// Export one function and everything hanging off it
    fn export_function(
        &mut self,
        function: &FunctionDefinition,
        document: &mut ResourceDocument,
    ) -> Result<String> {
        let mut depends_on = Vec::new();

        let role = match function.role()? {
            RoleReference::Named(name) => named_role_value(name),
            RoleReference::Inline(definition) => {
                let policy = synthesize(&definition.privileges, &function.event_source_mappings);
                let role_id = policy.logical_id();
                if !document.contains(&role_id) {
                    debug!(function = %function.handler, role = %role_id, "Adding role");
                    document.insert(role_id.clone(), policy.to_role_node());
                    depends_on.push(role_id.clone());
                } else {
                    debug!(function = %function.handler, role = %role_id, "Reusing role");
                }
                get_att(&role_id, "Arn")
            }
        };

        let logical_id = function_logical_id(&function.handler);
        let handler = format!("index.{}", sanitized_name(&function.handler));
        let node = function_node(
            &self.config.code,
            &handler,
            &self.config.function_runtime,
            role,
            &function.options,
        )
        .depends_on(depends_on);
        document.insert(logical_id.clone(), node);

        let target = FunctionTarget::new(logical_id.clone());
        {
            let mut ctx = ExportContext {
                document: &mut *document,
                rng: &mut self.rng,
                config: &self.config,
                function: &function.handler,
            };
            for grant in &function.permissions {
                grant.export(&mut ctx, &target)?;
            }
        }

        for mapping in &function.event_source_mappings {
            let (id, node) = event_source_node(mapping, &target);
            if let Some(existing) = document.get(&id) {
                if existing.property("FunctionName") == Some(&target.arn) {
                    debug!(event_source = %id, "Event source mapping already exported");
                    continue;
                }
                return Err(Error::export(
                    &function.handler,
                    format!(
                        "event source {} already maps to another function ({id})",
                        mapping.event_source_arn
                    ),
                ));
            }
            document.insert(id, node);
        }

        debug!(
            function = %function.handler,
            resource = %logical_id,
            permissions = function.permissions.len(),
            event_sources = function.event_source_mappings.len(),
            "Exported function"
        );
        Ok(logical_id)
    }
}

/// Validate every definition before anything is emitted
fn validate_all(functions: &[FunctionDefinition]) -> Result<()> {
    let mut seen = HashSet::new();
    for function in functions {
        function.validate()?;
        if !seen.insert(function.handler.as_str()) {
            return Err(Error::validation_for_field(
                &function.handler,
                "handler",
                "duplicate handler id",
            ));
        }
    }
    Ok(())
}

/// Role property for an existing role: ARNs verbatim, names resolved in the
/// deploying account
fn named_role_value(name: &str) -> Value {
    if name.starts_with("arn:") {
        json!(name)
    } else {
        sub(format!("arn:aws:iam::${{AWS::AccountId}}:role/{name}"))
    }
}

fn event_source_node(mapping: &EventSourceMapping, target: &FunctionTarget) -> (String, ResourceNode) {
    let mut properties = Map::new();
    properties.insert("EventSourceArn".to_string(), json!(mapping.event_source_arn));
    properties.insert("FunctionName".to_string(), target.arn.clone());
    properties.insert(
        "StartingPosition".to_string(),
        json!(mapping.starting_position.as_str()),
    );
    properties.insert("BatchSize".to_string(), json!(mapping.batch_size));
    if let Some(enabled) = mapping.enabled {
        properties.insert("Enabled".to_string(), json!(enabled));
    }
    (
        event_source_logical_id(mapping),
        ResourceNode::new(ResourceType::EventSourceMapping, properties),
    )
}
