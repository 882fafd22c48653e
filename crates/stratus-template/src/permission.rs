//! Permission exporters
//!
//! A [`PermissionGrant`] turns into one or more document entries:
//!
//! - **Direct**: one Permission resource.
//! - **BucketNotification**: a Permission, the shared configurator helper for
//!   (principal, bucket), and a notification-registration invocation that
//!   depends on both.
//! - **TopicSubscription**: a Permission, the shared configurator helper for
//!   (principal, topic), a Subscribe invocation depending on both, and an
//!   Unsubscribe invocation depending on the Subscribe so teardown only runs
//!   once the subscription is known to exist.
//!
//! Configurators are keyed by (principal, source ARN): every grant naming the
//! same pair resolves to the same helper logical id.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use stratus_common::document::get_att;
use stratus_common::naming::{salted_name, ContentId};
use stratus_common::{Error, ResourceNode, ResourceType, Result, INVOKE_ACTION};
use stratus_common::{S3_PRINCIPAL, SNS_PRINCIPAL};

use crate::assembler::{ExportContext, FunctionTarget};
use crate::helpers::{ensure_helper, HelperFunction};
use crate::iam::{synthesize, SynthesizedPolicy};
use crate::definition::Privilege;

/// Handler in the code bundle servicing bucket notification requests
pub const S3_CONFIGURATOR_HANDLER: &str = "index.s3ConfiguratorHandler";

/// Handler in the code bundle servicing topic subscription requests
pub const SNS_CONFIGURATOR_HANDLER: &str = "index.snsConfiguratorHandler";

// =============================================================================
// Grant types
// =============================================================================

/// Scoping filters shared by every grant
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasePermission {
    /// Account (without hyphens) owning the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_account: Option<String>,
    /// ARN of the resource invoking the function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_arn: Option<String>,
}

impl BasePermission {
    /// Scope a grant to a source ARN
    pub fn source(arn: impl Into<String>) -> Self {
        Self {
            source_account: None,
            source_arn: Some(arn.into()),
        }
    }

    /// Also scope the grant to an account
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.source_account = Some(account.into());
        self
    }

    fn account(&self) -> Option<&str> {
        self.source_account.as_deref().filter(|s| !s.is_empty())
    }

    fn arn(&self) -> Option<&str> {
        self.source_arn.as_deref().filter(|s| !s.is_empty())
    }

    /// Statement id for this grant under `principal`
    pub fn statement_id(&self, principal: &str) -> String {
        ContentId::new("LambdaPerm")
            .field(principal)
            .optional(self.account())
            .optional(self.arn())
            .finish()
    }

    fn last_arn_segment(&self) -> &str {
        self.arn()
            .and_then(|arn| arn.rsplit(':').next())
            .unwrap_or_default()
    }

    fn require_arn(&self, function: &str, kind: &str) -> Result<&str> {
        self.arn().ok_or_else(|| {
            Error::validation_for_field(
                function,
                "permissions.sourceArn",
                format!("{kind} grant requires a source ARN"),
            )
        })
    }
}

/// Grant to an arbitrary principal; registration with the source is external
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectPermission {
    /// Scoping filters
    #[serde(flatten)]
    pub base: BasePermission,
    /// Entity allowed to invoke the function
    pub principal: String,
}

/// One key-name filter rule (`prefix` or `suffix`)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRule {
    /// `prefix` or `suffix`
    pub name: String,
    /// Value to match
    pub value: String,
}

/// Grant to the storage service plus registration of bucket notifications
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketNotificationPermission {
    /// Scoping filters; `source_arn` is the bucket ARN
    #[serde(flatten)]
    pub base: BasePermission,
    /// Event types to register for (e.g. `s3:ObjectCreated:*`)
    pub events: Vec<String>,
    /// Optional key-name filter
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_filter: Vec<FilterRule>,
}

/// Grant to the notification service plus a topic subscription
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSubscriptionPermission {
    /// Scoping filters; `source_arn` is the topic ARN
    #[serde(flatten)]
    pub base: BasePermission,
}

/// A push-based invoke grant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PermissionGrant {
    /// Permission resource only
    Direct(DirectPermission),
    /// Permission + bucket notification registration
    BucketNotification(BucketNotificationPermission),
    /// Permission + topic subscribe/unsubscribe
    TopicSubscription(TopicSubscriptionPermission),
}

impl PermissionGrant {
    /// Direct grant to `principal`
    pub fn direct(principal: impl Into<String>, base: BasePermission) -> Self {
        Self::Direct(DirectPermission {
            base,
            principal: principal.into(),
        })
    }

    /// Bucket notification grant for `events`
    pub fn bucket_notification<I, S>(base: BasePermission, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::BucketNotification(BucketNotificationPermission {
            base,
            events: events.into_iter().map(Into::into).collect(),
            key_filter: Vec::new(),
        })
    }

    /// Topic subscription grant
    pub fn topic_subscription(base: BasePermission) -> Self {
        Self::TopicSubscription(TopicSubscriptionPermission { base })
    }

    /// Common scoping filters
    pub fn base(&self) -> &BasePermission {
        match self {
            Self::Direct(p) => &p.base,
            Self::BucketNotification(p) => &p.base,
            Self::TopicSubscription(p) => &p.base,
        }
    }

    /// Principal the invoke permission is granted to
    pub fn principal(&self) -> &str {
        match self {
            Self::Direct(p) => &p.principal,
            Self::BucketNotification(_) => S3_PRINCIPAL,
            Self::TopicSubscription(_) => SNS_PRINCIPAL,
        }
    }

    /// Statement id of this grant's Permission resource
    pub fn statement_id(&self) -> String {
        self.base().statement_id(self.principal())
    }

    /// Check the fields each variant requires
    pub fn validate(&self, function: &str) -> Result<()> {
        match self {
            Self::Direct(p) if p.principal.is_empty() => Err(Error::validation_for_field(
                function,
                "permissions.principal",
                "direct grant requires a principal",
            )),
            Self::Direct(_) => Ok(()),
            Self::BucketNotification(p) => {
                p.base.require_arn(function, "bucket notification")?;
                if p.events.is_empty() {
                    return Err(Error::validation_for_field(
                        function,
                        "permissions.events",
                        "bucket notification grant requires at least one event type",
                    ));
                }
                Ok(())
            }
            Self::TopicSubscription(p) => {
                p.base.require_arn(function, "topic subscription")?;
                Ok(())
            }
        }
    }

    /// Export into the document. Returns the Permission resource's logical id.
    pub(crate) fn export(
        &self,
        ctx: &mut ExportContext<'_>,
        target: &FunctionTarget,
    ) -> Result<String> {
        match self {
            Self::Direct(p) => export_direct(p, ctx, target),
            Self::BucketNotification(p) => export_bucket_notification(p, ctx, target),
            Self::TopicSubscription(p) => export_topic_subscription(p, ctx, target),
        }
    }

    /// `(label, detail)` pair for read-only consumers of the document
    pub fn description_info(&self) -> (String, String) {
        match self {
            Self::Direct(p) => (
                "Source".to_string(),
                p.base.source_arn.clone().unwrap_or_default(),
            ),
            Self::BucketNotification(p) => (
                p.base.source_arn.clone().unwrap_or_default(),
                format!("[{}]", p.events.join(" ")),
            ),
            Self::TopicSubscription(p) => {
                (p.base.source_arn.clone().unwrap_or_default(), String::new())
            }
        }
    }
}

// =============================================================================
// Exporters
// =============================================================================

/// Emit the Permission resource shared by every variant
fn export_base(
    base: &BasePermission,
    principal: &str,
    ctx: &mut ExportContext<'_>,
    target: &FunctionTarget,
) -> Result<String> {
    let logical_id = base.statement_id(principal);

    if let Some(existing) = ctx.document.get(&logical_id) {
        if existing.property("FunctionName") == Some(&target.arn) {
            debug!(permission = %logical_id, "Permission already exported");
            return Ok(logical_id);
        }
        return Err(Error::export(
            ctx.function,
            format!(
                "grant to {principal} already targets another function ({logical_id})"
            ),
        ));
    }

    let mut properties = Map::new();
    properties.insert("Action".to_string(), json!(INVOKE_ACTION));
    properties.insert("FunctionName".to_string(), target.arn.clone());
    properties.insert("Principal".to_string(), json!(principal));
    if let Some(account) = base.account() {
        properties.insert("SourceAccount".to_string(), json!(account));
    }
    if let Some(arn) = base.arn() {
        properties.insert("SourceArn".to_string(), json!(arn));
    }

    debug!(permission = %logical_id, principal, "Exporting permission");
    ctx.document.insert(
        logical_id.clone(),
        ResourceNode::new(ResourceType::Permission, properties),
    );
    Ok(logical_id)
}

fn export_direct(
    grant: &DirectPermission,
    ctx: &mut ExportContext<'_>,
    target: &FunctionTarget,
) -> Result<String> {
    export_base(&grant.base, &grant.principal, ctx, target)
}

fn export_bucket_notification(
    grant: &BucketNotificationPermission,
    ctx: &mut ExportContext<'_>,
    target: &FunctionTarget,
) -> Result<String> {
    let bucket_arn = grant.base.require_arn(ctx.function, "bucket notification")?;
    let permission_id = export_base(&grant.base, S3_PRINCIPAL, ctx, target)?;
    let configurator_id = ensure_configurator(ctx, S3_PRINCIPAL, bucket_arn);

    let mut permission = Map::new();
    permission.insert("Events".to_string(), json!(grant.events));
    if !grant.key_filter.is_empty() {
        let rules: Vec<Value> = grant
            .key_filter
            .iter()
            .map(|rule| json!({ "Name": rule.name, "Value": rule.value }))
            .collect();
        permission.insert("Filter".to_string(), json!({ "Key": { "FilterRules": rules } }));
    }

    let mut properties = Map::new();
    properties.insert("ServiceToken".to_string(), get_att(&configurator_id, "Arn"));
    properties.insert("Permission".to_string(), Value::Object(permission));
    properties.insert("LambdaTarget".to_string(), target.arn.clone());
    properties.insert("Bucket".to_string(), json!(grant.base.last_arn_segment()));

    let invoker_id = salted_name(&format!("ConfigS3{permission_id}"), ctx.rng);
    ctx.document.insert(
        invoker_id,
        ResourceNode::new(ResourceType::CustomResource, properties)
            .depends_on([permission_id.clone(), configurator_id]),
    );
    Ok(permission_id)
}

fn export_topic_subscription(
    grant: &TopicSubscriptionPermission,
    ctx: &mut ExportContext<'_>,
    target: &FunctionTarget,
) -> Result<String> {
    let topic_arn = grant.base.require_arn(ctx.function, "topic subscription")?;
    let permission_id = export_base(&grant.base, SNS_PRINCIPAL, ctx, target)?;
    let configurator_id = ensure_configurator(ctx, SNS_PRINCIPAL, topic_arn);

    let mut subscribe = Map::new();
    subscribe.insert("ServiceToken".to_string(), get_att(&configurator_id, "Arn"));
    subscribe.insert("Mode".to_string(), json!("Subscribe"));
    subscribe.insert("TopicArn".to_string(), json!(topic_arn));
    subscribe.insert("LambdaTarget".to_string(), target.arn.clone());

    let subscriber_id = salted_name(&format!("SubscriberSNS{permission_id}"), ctx.rng);
    ctx.document.insert(
        subscriber_id.clone(),
        ResourceNode::new(ResourceType::CustomResource, subscribe)
            .depends_on([permission_id.clone(), configurator_id.clone()]),
    );

    let mut unsubscribe = Map::new();
    unsubscribe.insert("ServiceToken".to_string(), get_att(&configurator_id, "Arn"));
    unsubscribe.insert("Mode".to_string(), json!("Unsubscribe"));
    unsubscribe.insert(
        "SubscriptionArn".to_string(),
        get_att(&subscriber_id, "SubscriptionArn"),
    );
    unsubscribe.insert("TopicArn".to_string(), json!(topic_arn));
    unsubscribe.insert("LambdaTarget".to_string(), target.arn.clone());

    let unsubscriber_id = salted_name(&format!("UnsubscriberSNS{permission_id}"), ctx.rng);
    ctx.document.insert(
        unsubscriber_id,
        ResourceNode::new(ResourceType::CustomResource, unsubscribe).depends_on([subscriber_id]),
    );
    Ok(permission_id)
}

// =============================================================================
// Configurator
// =============================================================================

/// Logical id of the configurator shared by every grant on (principal, source)
pub fn configurator_id(principal: &str, source_arn: &str) -> String {
    ContentId::new("Configurator")
        .field(principal)
        .field(source_arn)
        .finish()
}

fn configurator_policy(principal: &str, source_arn: &str) -> SynthesizedPolicy {
    let actions: &[&str] = if principal == S3_PRINCIPAL {
        &["s3:GetBucketNotification", "s3:PutBucketNotification"]
    } else {
        &[
            "sns:Subscribe",
            "sns:Unsubscribe",
            "sns:ListSubscriptionsByTopic",
        ]
    };
    synthesize(&[Privilege::new(actions.iter().copied(), source_arn)], &[])
}

fn ensure_configurator(ctx: &mut ExportContext<'_>, principal: &str, source_arn: &str) -> String {
    let handler = if principal == S3_PRINCIPAL {
        S3_CONFIGURATOR_HANDLER
    } else {
        SNS_CONFIGURATOR_HANDLER
    };
    ensure_helper(
        ctx.document,
        HelperFunction {
            logical_id: configurator_id(principal, source_arn),
            description: "Registers push-based event sources",
            handler,
            runtime: &ctx.config.helper_runtime,
            code: &ctx.config.code,
            policy: configurator_policy(principal, source_arn),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::AssemblerConfig;
    use crate::definition::CodeLocation;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use stratus_common::ResourceDocument;

    const BUCKET: &str = "arn:aws:s3:::uploads";
    const TOPIC: &str = "arn:aws:sns:us-west-2:123412341234:events";

    struct Fixture {
        document: ResourceDocument,
        rng: StdRng,
        config: AssemblerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                document: ResourceDocument::new(""),
                rng: StdRng::seed_from_u64(1),
                config: AssemblerConfig::new(CodeLocation::new("code", "bundle.zip")),
            }
        }

        fn export(&mut self, grant: &PermissionGrant, target: &FunctionTarget) -> Result<String> {
            let mut ctx = ExportContext {
                document: &mut self.document,
                rng: &mut self.rng,
                config: &self.config,
                function: "orders.Handle",
            };
            grant.export(&mut ctx, target)
        }
    }

    fn target(id: &str) -> FunctionTarget {
        FunctionTarget::new(id)
    }

    #[test]
    fn direct_emits_single_permission() {
        let mut fx = Fixture::new();
        let grant = PermissionGrant::direct(
            "events.amazonaws.com",
            BasePermission::source("arn:aws:events:us-west-2:1:rule/r").with_account("1"),
        );
        let id = fx.export(&grant, &target("LambdaA")).unwrap();

        assert_eq!(fx.document.len(), 1);
        let node = fx.document.get(&id).unwrap();
        assert_eq!(node.type_, ResourceType::Permission);
        assert_eq!(node.property("Principal"), Some(&json!("events.amazonaws.com")));
        assert_eq!(node.property("SourceAccount"), Some(&json!("1")));
        assert_eq!(node.property("Action"), Some(&json!(INVOKE_ACTION)));
    }

    #[test]
    fn statement_id_covers_principal_account_and_arn() {
        let a = PermissionGrant::direct("p", BasePermission::source("arn:x"));
        let b = PermissionGrant::direct("p", BasePermission::source("arn:x").with_account("1"));
        let c = PermissionGrant::direct("q", BasePermission::source("arn:x"));
        assert_ne!(a.statement_id(), b.statement_id());
        assert_ne!(a.statement_id(), c.statement_id());
        assert_eq!(
            a.statement_id(),
            PermissionGrant::direct("p", BasePermission::source("arn:x")).statement_id()
        );

        let account_only = PermissionGrant::direct(
            "p",
            BasePermission {
                source_account: Some("X".into()),
                source_arn: None,
            },
        );
        let arn_only = PermissionGrant::direct("p", BasePermission::source("X"));
        assert_ne!(account_only.statement_id(), arn_only.statement_id());
    }

    #[test]
    fn same_grant_for_same_target_is_noop() {
        let mut fx = Fixture::new();
        let grant = PermissionGrant::direct("p", BasePermission::source("arn:x"));
        let a = fx.export(&grant, &target("LambdaA")).unwrap();
        let b = fx.export(&grant, &target("LambdaA")).unwrap();
        assert_eq!(a, b);
        assert_eq!(fx.document.len(), 1);
    }

    #[test]
    fn same_grant_for_other_target_is_export_error() {
        let mut fx = Fixture::new();
        let grant = PermissionGrant::direct("p", BasePermission::source("arn:x"));
        fx.export(&grant, &target("LambdaA")).unwrap();
        let err = fx.export(&grant, &target("LambdaB")).unwrap_err();
        assert!(matches!(err, Error::Export { .. }));
    }

    #[test]
    fn bucket_notification_wires_configurator_and_invoker() {
        let mut fx = Fixture::new();
        let grant = PermissionGrant::BucketNotification(BucketNotificationPermission {
            base: BasePermission::source(BUCKET),
            events: vec!["s3:ObjectCreated:*".into()],
            key_filter: vec![FilterRule {
                name: "prefix".into(),
                value: "images/".into(),
            }],
        });
        let permission_id = fx.export(&grant, &target("LambdaA")).unwrap();
        let configurator = configurator_id(S3_PRINCIPAL, BUCKET);

        assert!(fx.document.contains(&configurator));
        let invokers = fx.document.ids_of_type(ResourceType::CustomResource);
        assert_eq!(invokers.len(), 1);
        let invoker = fx.document.get(invokers[0]).unwrap();
        assert!(invokers[0].starts_with("ConfigS3"));
        assert!(invoker.depends_on.contains(&permission_id));
        assert!(invoker.depends_on.contains(&configurator));
        assert_eq!(invoker.property("Bucket"), Some(&json!("uploads")));
        assert_eq!(
            invoker.property("Permission").unwrap()["Filter"]["Key"]["FilterRules"][0]["Value"],
            "images/"
        );
        assert_eq!(invoker.property("ServiceToken"), Some(&get_att(&configurator, "Arn")));
    }

    #[test]
    fn configurator_shared_across_grants_on_same_source() {
        let mut fx = Fixture::new();
        let created = PermissionGrant::bucket_notification(
            BasePermission::source(BUCKET),
            ["s3:ObjectCreated:*"],
        );
        let removed = PermissionGrant::bucket_notification(
            BasePermission::source(BUCKET).with_account("123412341234"),
            ["s3:ObjectRemoved:*"],
        );
        fx.export(&created, &target("LambdaA")).unwrap();
        fx.export(&removed, &target("LambdaA")).unwrap();

        let configurators: Vec<_> = fx
            .document
            .resources
            .keys()
            .filter(|id| id.starts_with("Configurator"))
            .collect();
        assert_eq!(configurators.len(), 1);
        assert_eq!(fx.document.ids_of_type(ResourceType::CustomResource).len(), 2);
    }

    #[test]
    fn topic_subscription_orders_unsubscribe_after_subscribe() {
        let mut fx = Fixture::new();
        let grant = PermissionGrant::topic_subscription(BasePermission::source(TOPIC));
        let permission_id = fx.export(&grant, &target("LambdaA")).unwrap();

        let subscriber = fx
            .document
            .resources
            .iter()
            .find(|(id, _)| id.starts_with("SubscriberSNS"))
            .map(|(id, node)| (id.clone(), node.clone()))
            .unwrap();
        let unsubscriber = fx
            .document
            .resources
            .iter()
            .find(|(id, _)| id.starts_with("UnsubscriberSNS"))
            .map(|(_, node)| node.clone())
            .unwrap();

        assert!(subscriber.1.depends_on.contains(&permission_id));
        assert_eq!(subscriber.1.property("Mode"), Some(&json!("Subscribe")));
        assert!(unsubscriber.depends_on.contains(&subscriber.0));
        assert_eq!(
            unsubscriber.property("SubscriptionArn"),
            Some(&get_att(&subscriber.0, "SubscriptionArn"))
        );
    }

    #[test]
    fn configurator_role_scoped_to_source() {
        let policy = configurator_policy(SNS_PRINCIPAL, TOPIC);
        assert_eq!(policy.statements[1].resource, TOPIC);
        assert!(policy.statements[1]
            .actions
            .contains(&"sns:Subscribe".to_string()));
    }

    #[test]
    fn description_info_per_variant() {
        let direct = PermissionGrant::direct("p", BasePermission::source("arn:x"));
        assert_eq!(
            direct.description_info(),
            ("Source".to_string(), "arn:x".to_string())
        );

        let bucket = PermissionGrant::bucket_notification(
            BasePermission::source(BUCKET),
            ["s3:ObjectCreated:*", "s3:ObjectRemoved:*"],
        );
        assert_eq!(
            bucket.description_info(),
            (
                BUCKET.to_string(),
                "[s3:ObjectCreated:* s3:ObjectRemoved:*]".to_string()
            )
        );

        let topic = PermissionGrant::topic_subscription(BasePermission::source(TOPIC));
        assert_eq!(topic.description_info(), (TOPIC.to_string(), String::new()));
    }

    #[test]
    fn deserializes_tagged_grants() {
        let grant: PermissionGrant = serde_json::from_value(json!({
            "type": "bucketNotification",
            "sourceArn": BUCKET,
            "events": ["s3:ObjectCreated:*"],
            "keyFilter": [{"name": "suffix", "value": ".jpg"}]
        }))
        .unwrap();
        assert_eq!(grant.principal(), S3_PRINCIPAL);
        assert!(grant.validate("h").is_ok());

        let grant: PermissionGrant = serde_json::from_value(json!({
            "type": "direct",
            "principal": "events.amazonaws.com"
        }))
        .unwrap();
        assert_eq!(grant.base(), &BasePermission::default());
    }
}
