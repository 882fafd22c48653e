//! IAM policy synthesis
//!
//! Builds the inline policy for a synthesized role from:
//! 1. a baseline statement allowing the function to write logs (always first)
//! 2. the explicit privileges of the role definition, in order
//! 3. one statement per event-source mapping whose service has a known
//!    template, scoped to that mapping's exact ARN
//!
//! The role's logical id hashes the fully resolved statement list, so
//! identical privilege sets collapse to one role even across unrelated
//! functions.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use stratus_common::naming::ContentId;
use stratus_common::{
    ResourceNode, ResourceType, EC2_PRINCIPAL, LAMBDA_PRINCIPAL, POLICY_VERSION,
};

use crate::definition::{EventSourceMapping, Privilege};

/// Inline policy name on every synthesized role
const POLICY_NAME: &str = "LambdaPolicy";

/// Actions in the baseline logging statement
const LOG_ACTIONS: &[&str] = &[
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
];

/// Resource of the baseline logging statement
const LOG_RESOURCE: &str = "arn:aws:logs:*:*:*";

/// Per-service read privileges implied by a pull-based event source.
fn service_actions(namespace: &str) -> Option<&'static [&'static str]> {
    match namespace {
        "dynamodb" => Some(&[
            "dynamodb:DescribeStream",
            "dynamodb:GetRecords",
            "dynamodb:GetShardIterator",
            "dynamodb:ListStreams",
        ]),
        "kinesis" => Some(&[
            "kinesis:GetRecords",
            "kinesis:GetShardIterator",
            "kinesis:DescribeStream",
            "kinesis:ListStreams",
        ]),
        _ => None,
    }
}

/// One `Allow` statement of a policy document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    /// Always `Allow` for synthesized statements
    #[serde(rename = "Effect")]
    pub effect: String,
    /// Allowed actions
    #[serde(rename = "Action")]
    pub actions: Vec<String>,
    /// Resource pattern
    #[serde(rename = "Resource")]
    pub resource: String,
}

impl PolicyStatement {
    /// An `Allow` statement
    pub fn allow<I, S>(actions: I, resource: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            effect: "Allow".to_string(),
            actions: actions.into_iter().map(Into::into).collect(),
            resource: resource.into(),
        }
    }

    /// The baseline "write logs" statement
    pub fn write_logs() -> Self {
        Self::allow(LOG_ACTIONS.iter().copied(), LOG_RESOURCE)
    }
}

impl From<&Privilege> for PolicyStatement {
    fn from(privilege: &Privilege) -> Self {
        Self::allow(privilege.actions.iter().cloned(), privilege.resource.clone())
    }
}

/// A fully resolved inline policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesizedPolicy {
    /// Statements, baseline first
    pub statements: Vec<PolicyStatement>,
}

impl SynthesizedPolicy {
    /// Content-addressable role logical id over the resolved statements
    pub fn logical_id(&self) -> String {
        let mut id = ContentId::new("IAMRole");
        for statement in &self.statements {
            id = id.field(&statement.effect);
            for action in &statement.actions {
                id = id.field(action);
            }
            id = id.field(&statement.resource).field("|");
        }
        id.finish()
    }

    /// The policy document value
    pub fn policy_document(&self) -> Value {
        json!({
            "Version": POLICY_VERSION,
            "Statement": self.statements,
        })
    }

    /// Build the role resource carrying this policy
    pub fn to_role_node(&self) -> ResourceNode {
        let mut properties = Map::new();
        properties.insert(
            "AssumeRolePolicyDocument".to_string(),
            assume_role_policy_document(),
        );
        properties.insert(
            "Policies".to_string(),
            json!([{
                "PolicyName": POLICY_NAME,
                "PolicyDocument": self.policy_document(),
            }]),
        );
        ResourceNode::new(ResourceType::Role, properties)
    }
}

/// Trust policy letting the function service (and EC2) assume the role
pub fn assume_role_policy_document() -> Value {
    json!({
        "Version": POLICY_VERSION,
        "Statement": [
            {
                "Effect": "Allow",
                "Principal": { "Service": [LAMBDA_PRINCIPAL] },
                "Action": ["sts:AssumeRole"],
            },
            {
                "Effect": "Allow",
                "Principal": { "Service": [EC2_PRINCIPAL] },
                "Action": ["sts:AssumeRole"],
            },
        ],
    })
}

/// Resolve explicit privileges and event-source mappings into one policy.
pub fn synthesize(privileges: &[Privilege], mappings: &[EventSourceMapping]) -> SynthesizedPolicy {
    let mut statements = Vec::with_capacity(1 + privileges.len() + mappings.len());
    statements.push(PolicyStatement::write_logs());
    statements.extend(privileges.iter().map(PolicyStatement::from));

    for mapping in mappings {
        let Some(namespace) = mapping.service_namespace() else {
            continue;
        };
        debug!(service = namespace, arn = %mapping.event_source_arn, "Looking up event source privileges");
        if let Some(actions) = service_actions(namespace) {
            statements.push(PolicyStatement::allow(
                actions.iter().copied(),
                mapping.event_source_arn.clone(),
            ));
        }
    }

    SynthesizedPolicy { statements }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::StartingPosition;

    fn s3_read() -> Privilege {
        Privilege::new(["s3:GetObject"], "arn:aws:s3:::uploads/*")
    }

    #[test]
    fn baseline_logging_always_first() {
        let policy = synthesize(&[], &[]);
        assert_eq!(policy.statements.len(), 1);
        assert_eq!(policy.statements[0], PolicyStatement::write_logs());

        let policy = synthesize(&[s3_read()], &[]);
        assert_eq!(policy.statements[0], PolicyStatement::write_logs());
        assert_eq!(policy.statements[1].actions, vec!["s3:GetObject"]);
    }

    #[test]
    fn event_source_statement_scoped_to_exact_arn() {
        let arn = "arn:aws:dynamodb:us-west-2:123412341234:table/X";
        let mapping = EventSourceMapping::new(arn, StartingPosition::TrimHorizon, 10);
        let policy = synthesize(&[], &[mapping]);

        assert_eq!(policy.statements.len(), 2);
        let statement = &policy.statements[1];
        assert_eq!(statement.resource, arn);
        assert!(statement.actions.contains(&"dynamodb:GetRecords".to_string()));
        assert!(!statement.resource.contains('*'));
    }

    #[test]
    fn unknown_services_add_nothing() {
        let mapping = EventSourceMapping::new(
            "arn:aws:sqs:us-west-2:123412341234:queue",
            StartingPosition::Latest,
            10,
        );
        let policy = synthesize(&[], &[mapping]);
        assert_eq!(policy.statements.len(), 1);
    }

    #[test]
    fn identical_privilege_sets_share_an_id() {
        let a = synthesize(&[s3_read()], &[]);
        let b = synthesize(&[s3_read()], &[]);
        assert_eq!(a.logical_id(), b.logical_id());
        assert!(a.logical_id().starts_with("IAMRole"));
    }

    #[test]
    fn event_sources_change_the_role_id() {
        let mapping = EventSourceMapping::new(
            "arn:aws:kinesis:us-west-2:1:stream/orders",
            StartingPosition::Latest,
            10,
        );
        let plain = synthesize(&[s3_read()], &[]);
        let with_stream = synthesize(&[s3_read()], &[mapping]);
        assert_ne!(plain.logical_id(), with_stream.logical_id());
    }

    #[test]
    fn role_node_embeds_policy() {
        let node = synthesize(&[s3_read()], &[]).to_role_node();
        assert_eq!(node.type_, ResourceType::Role);
        let policies = node.property("Policies").unwrap();
        assert_eq!(policies[0]["PolicyName"], POLICY_NAME);
        assert_eq!(
            policies[0]["PolicyDocument"]["Statement"][1]["Resource"],
            "arn:aws:s3:::uploads/*"
        );
        let trust = node.property("AssumeRolePolicyDocument").unwrap();
        assert_eq!(
            trust["Statement"][0]["Principal"]["Service"][0],
            LAMBDA_PRINCIPAL
        );
    }
}
