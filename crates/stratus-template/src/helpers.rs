//! Shared builders for function resources and helper functions

use serde_json::{json, Map, Value};
use tracing::debug;

use stratus_common::document::get_att;
use stratus_common::{ResourceDocument, ResourceNode, ResourceType};

use crate::definition::{CodeLocation, FunctionOptions};
use crate::iam::SynthesizedPolicy;

/// Timeout for helper functions servicing out-of-band requests (seconds)
pub(crate) const HELPER_TIMEOUT: u32 = 30;

/// Build an `AWS::Lambda::Function` node
pub(crate) fn function_node(
    code: &CodeLocation,
    handler: &str,
    runtime: &str,
    role: Value,
    options: &FunctionOptions,
) -> ResourceNode {
    let mut properties = Map::new();
    properties.insert(
        "Code".to_string(),
        json!({ "S3Bucket": code.bucket, "S3Key": code.key }),
    );
    properties.insert("Description".to_string(), json!(options.description));
    properties.insert("Handler".to_string(), json!(handler));
    properties.insert("MemorySize".to_string(), json!(options.memory_size));
    properties.insert("Role".to_string(), role);
    properties.insert("Runtime".to_string(), json!(runtime));
    properties.insert("Timeout".to_string(), json!(options.timeout));
    ResourceNode::new(ResourceType::Function, properties)
}

/// A shared helper function that services custom resource requests
pub(crate) struct HelperFunction<'a> {
    pub logical_id: String,
    pub description: &'a str,
    pub handler: &'a str,
    pub runtime: &'a str,
    pub code: &'a CodeLocation,
    pub policy: SynthesizedPolicy,
}

/// Insert the helper and its role unless already present. Returns the
/// helper's logical id either way.
pub(crate) fn ensure_helper(document: &mut ResourceDocument, helper: HelperFunction<'_>) -> String {
    if document.contains(&helper.logical_id) {
        debug!(helper = %helper.logical_id, "Reusing helper function");
        return helper.logical_id;
    }

    let role_id = helper.policy.logical_id();
    if !document.contains(&role_id) {
        document.insert(role_id.clone(), helper.policy.to_role_node());
    }

    let options = FunctionOptions {
        description: helper.description.to_string(),
        memory_size: crate::definition::DEFAULT_MEMORY_SIZE,
        timeout: HELPER_TIMEOUT,
    };
    let node = function_node(
        helper.code,
        helper.handler,
        helper.runtime,
        get_att(&role_id, "Arn"),
        &options,
    )
    .depends_on([role_id]);

    debug!(helper = %helper.logical_id, handler = helper.handler, "Adding helper function");
    document.insert(helper.logical_id.clone(), node);
    helper.logical_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::synthesize;

    fn helper(id: &str) -> HelperFunction<'static> {
        static CODE: std::sync::OnceLock<CodeLocation> = std::sync::OnceLock::new();
        HelperFunction {
            logical_id: id.to_string(),
            description: "helper",
            handler: "index.helper",
            runtime: "nodejs20.x",
            code: CODE.get_or_init(|| CodeLocation::new("bucket", "key.zip")),
            policy: synthesize(&[], &[]),
        }
    }

    #[test]
    fn helper_inserted_once_with_role() {
        let mut doc = ResourceDocument::new("");
        let first = ensure_helper(&mut doc, helper("ConfiguratorA"));
        let second = ensure_helper(&mut doc, helper("ConfiguratorA"));
        assert_eq!(first, second);
        // helper + role
        assert_eq!(doc.len(), 2);

        let node = doc.get("ConfiguratorA").unwrap();
        assert_eq!(node.property("Timeout"), Some(&json!(HELPER_TIMEOUT)));
        assert_eq!(node.depends_on.len(), 1);
    }

    #[test]
    fn helpers_with_same_policy_share_role() {
        let mut doc = ResourceDocument::new("");
        ensure_helper(&mut doc, helper("A"));
        ensure_helper(&mut doc, helper("B"));
        assert_eq!(doc.ids_of_type(ResourceType::Role).len(), 1);
        assert_eq!(doc.ids_of_type(ResourceType::Function).len(), 2);
    }
}
