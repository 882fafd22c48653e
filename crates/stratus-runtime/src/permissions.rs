//! Invoke permissions granted to the API
//!
//! Statement ids are recomputed from (principal, source account, source ARN).
//! The source ARN names the API container, so a grant left behind by an
//! earlier container never satisfies a new one, and teardown can revoke
//! exactly what was granted without any stored state.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use stratus_common::naming::ContentId;
use stratus_common::APIGATEWAY_PRINCIPAL;

use crate::client::{InvokeGrant, LambdaClient};
use crate::error::ProvisionError;

/// Provider limit on statement id length
pub const MAX_STATEMENT_ID_LEN: usize = 100;

/// The parts of a function ARN the runtime needs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionArn<'a> {
    /// Full ARN
    pub arn: &'a str,
    /// Partition (e.g. `aws`)
    pub partition: &'a str,
    /// Region hosting the function
    pub region: &'a str,
    /// Owning account
    pub account: &'a str,
}

impl<'a> FunctionArn<'a> {
    /// Parse `arn:<partition>:lambda:<region>:<account>:function:<name>`
    pub fn parse(arn: &'a str) -> Result<Self, ProvisionError> {
        let segments: Vec<&str> = arn.splitn(7, ':').collect();
        match segments[..] {
            ["arn", partition, "lambda", region, account, "function", name]
                if !region.is_empty() && !account.is_empty() && !name.is_empty() =>
            {
                Ok(Self {
                    arn,
                    partition,
                    region,
                    account,
                })
            }
            _ => Err(ProvisionError::invalid_request(format!(
                "not a function ARN: {arn}"
            ))),
        }
    }

    /// Invocation endpoint the integration proxies to
    pub fn integration_uri(&self) -> String {
        format!(
            "arn:{}:apigateway:{}:lambda:path/2015-03-31/functions/{}/invocations",
            self.partition, self.region, self.arn
        )
    }

    /// Source ARN scoping the grant to every method of one API
    pub fn execute_api_source_arn(&self, rest_api_id: &str) -> String {
        format!(
            "arn:{}:execute-api:{}:{}:{}/*",
            self.partition, self.region, self.account, rest_api_id
        )
    }
}

/// Statement id for the invoke grant of API `rest_api_id` on `target`
pub fn statement_id(target: &FunctionArn<'_>, rest_api_id: &str) -> String {
    let mut id = ContentId::new("ApiGateway")
        .field(APIGATEWAY_PRINCIPAL)
        .field(target.account)
        .field(target.execute_api_source_arn(rest_api_id))
        .finish();
    id.truncate(MAX_STATEMENT_ID_LEN);
    id
}

/// Per-invocation cache of statement ids already present on each target.
///
/// A target's policy is fetched at most once per run; grants made during the
/// run are recorded so later methods sharing the target skip the call.
pub struct PermissionCache {
    lambda: Arc<dyn LambdaClient>,
    known: HashMap<String, BTreeSet<String>>,
}

impl PermissionCache {
    /// Empty cache
    pub fn new(lambda: Arc<dyn LambdaClient>) -> Self {
        Self {
            lambda,
            known: HashMap::new(),
        }
    }

    /// Grant the API invoke access to `target` unless already granted.
    pub async fn ensure_invoke(
        &mut self,
        target: &FunctionArn<'_>,
        rest_api_id: &str,
    ) -> Result<(), ProvisionError> {
        let sid = statement_id(target, rest_api_id);

        if !self.known.contains_key(target.arn) {
            let existing = self.lambda.get_policy_statement_ids(target.arn).await?;
            self.known.insert(target.arn.to_string(), existing);
        }
        if self
            .known
            .get(target.arn)
            .is_some_and(|ids| ids.contains(&sid))
        {
            debug!(function = target.arn, statement_id = %sid, "Invoke permission already granted");
            return Ok(());
        }

        let grant = InvokeGrant {
            function_name: target.arn.to_string(),
            statement_id: sid.clone(),
            principal: APIGATEWAY_PRINCIPAL.to_string(),
            source_arn: target.execute_api_source_arn(rest_api_id),
        };
        match self.lambda.add_permission(&grant).await {
            Ok(()) => {
                debug!(function = target.arn, statement_id = %sid, "Granted invoke permission");
            }
            Err(err) if err.is_already_exists() => {
                warn!(function = target.arn, statement_id = %sid, error = %err, "Invoke permission already exists");
            }
            Err(err) => return Err(err),
        }
        self.known.entry(target.arn.to_string()).or_default().insert(sid);
        Ok(())
    }
}

/// Best-effort revocation of the API's grants on every target. Failures are
/// logged and never escalated.
pub async fn revoke_all<'a, I>(lambda: &dyn LambdaClient, targets: I, rest_api_id: &str)
where
    I: IntoIterator<Item = &'a str>,
{
    for target in targets {
        let arn = match FunctionArn::parse(target) {
            Ok(arn) => arn,
            Err(err) => {
                warn!(function = target, error = %err, "Skipping revocation for unparseable target");
                continue;
            }
        };
        let sid = statement_id(&arn, rest_api_id);
        match lambda.remove_permission(target, &sid).await {
            Ok(()) => debug!(function = target, statement_id = %sid, "Revoked invoke permission"),
            Err(err) => {
                warn!(function = target, statement_id = %sid, error = %err, "Failed to revoke invoke permission")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockLambdaClient;

    const FUNCTION: &str = "arn:aws:lambda:us-west-2:123412341234:function:orders-get";

    #[test]
    fn parses_function_arn() {
        let arn = FunctionArn::parse(FUNCTION).unwrap();
        assert_eq!(arn.region, "us-west-2");
        assert_eq!(arn.account, "123412341234");
        assert_eq!(
            arn.integration_uri(),
            format!("arn:aws:apigateway:us-west-2:lambda:path/2015-03-31/functions/{FUNCTION}/invocations")
        );
        assert_eq!(
            arn.execute_api_source_arn("abc123"),
            "arn:aws:execute-api:us-west-2:123412341234:abc123/*"
        );
    }

    #[test]
    fn rejects_non_function_arns() {
        assert!(FunctionArn::parse("arn:aws:s3:::bucket").is_err());
        assert!(FunctionArn::parse("orders-get").is_err());
    }

    #[test]
    fn statement_id_is_recomputable_and_bounded() {
        let target = FunctionArn::parse(FUNCTION).unwrap();
        let a = statement_id(&target, "abc");
        assert_eq!(a, statement_id(&target, "abc"));
        assert_ne!(a, statement_id(&target, "def"));
        assert!(a.len() <= MAX_STATEMENT_ID_LEN);
        assert!(a.starts_with("ApiGateway"));
    }

    #[test]
    fn statement_id_scoped_to_source_account() {
        let home = FunctionArn::parse(FUNCTION).unwrap();
        let other = FunctionArn::parse("arn:aws:lambda:us-west-2:999999999999:function:orders-get")
            .unwrap();
        assert_ne!(statement_id(&home, "abc"), statement_id(&other, "abc"));
    }

    #[tokio::test]
    async fn policy_fetched_once_per_target() {
        let mut lambda = MockLambdaClient::new();
        lambda
            .expect_get_policy_statement_ids()
            .times(1)
            .returning(|_| Ok(BTreeSet::new()));
        lambda
            .expect_add_permission()
            .times(1)
            .withf(|grant| {
                grant.principal == APIGATEWAY_PRINCIPAL
                    && grant.source_arn == "arn:aws:execute-api:us-west-2:123412341234:abc/*"
            })
            .returning(|_| Ok(()));

        let mut cache = PermissionCache::new(Arc::new(lambda));
        let target = FunctionArn::parse(FUNCTION).unwrap();
        cache.ensure_invoke(&target, "abc").await.unwrap();
        cache.ensure_invoke(&target, "abc").await.unwrap();
    }

    #[tokio::test]
    async fn existing_statement_skips_grant() {
        let target = FunctionArn::parse(FUNCTION).unwrap();
        let existing = statement_id(&target, "abc");
        let mut lambda = MockLambdaClient::new();
        lambda
            .expect_get_policy_statement_ids()
            .returning(move |_| Ok(BTreeSet::from([existing.clone()])));
        lambda.expect_add_permission().never();

        let mut cache = PermissionCache::new(Arc::new(lambda));
        cache.ensure_invoke(&target, "abc").await.unwrap();
    }

    #[tokio::test]
    async fn statement_from_previous_container_does_not_satisfy_new_one() {
        let target = FunctionArn::parse(FUNCTION).unwrap();
        let leftover = statement_id(&target, "old1");
        let mut lambda = MockLambdaClient::new();
        lambda
            .expect_get_policy_statement_ids()
            .returning(move |_| Ok(BTreeSet::from([leftover.clone()])));
        lambda
            .expect_add_permission()
            .times(1)
            .withf(|grant| grant.source_arn == "arn:aws:execute-api:us-west-2:123412341234:new2/*")
            .returning(|_| Ok(()));

        let mut cache = PermissionCache::new(Arc::new(lambda));
        cache.ensure_invoke(&target, "new2").await.unwrap();
    }

    #[tokio::test]
    async fn already_exists_conflict_is_success() {
        let mut lambda = MockLambdaClient::new();
        lambda
            .expect_get_policy_statement_ids()
            .returning(|_| Ok(BTreeSet::new()));
        lambda.expect_add_permission().returning(|_| {
            Err(ProvisionError::remote(
                "AddPermission",
                "ResourceConflictException: The statement id provided already exists",
            ))
        });

        let mut cache = PermissionCache::new(Arc::new(lambda));
        let target = FunctionArn::parse(FUNCTION).unwrap();
        assert!(cache.ensure_invoke(&target, "abc").await.is_ok());
    }

    #[tokio::test]
    async fn other_grant_errors_propagate() {
        let mut lambda = MockLambdaClient::new();
        lambda
            .expect_get_policy_statement_ids()
            .returning(|_| Ok(BTreeSet::new()));
        lambda
            .expect_add_permission()
            .returning(|_| Err(ProvisionError::remote("AddPermission", "AccessDeniedException")));

        let mut cache = PermissionCache::new(Arc::new(lambda));
        let target = FunctionArn::parse(FUNCTION).unwrap();
        let err = cache.ensure_invoke(&target, "abc").await.unwrap_err();
        assert_eq!(err.to_string(), "AddPermission: AccessDeniedException");
    }

    #[tokio::test]
    async fn revoke_failures_are_swallowed() {
        let mut lambda = MockLambdaClient::new();
        lambda
            .expect_remove_permission()
            .times(2)
            .returning(|_, _| Err(ProvisionError::remote("RemovePermission", "ResourceNotFoundException")));

        revoke_all(
            &lambda,
            [FUNCTION, "arn:aws:lambda:us-west-2:1:function:b", "not-an-arn"],
            "abc",
        )
        .await;
    }
}
