//! API object-graph provisioner
//!
//! Services one custom resource request per invocation. Top-level stages form
//! a linear chain, each starting only after its predecessor completes:
//!
//! 1. **ensure-deleted**: Delete only. Removes the API container found by
//!    name and revokes the invoke grants recomputed from the previous
//!    properties and the container id (the request's physical id when the
//!    container is already gone). Failures are logged; Delete always
//!    succeeds.
//! 2. **ensure-created**: reuse the container with the desired name, or
//!    create it.
//! 3. **ensure-resources**: walk the desired tree with a single-worker queue.
//!    A node's children are enqueued only after the node's resource and every
//!    method pipeline under it succeeded, carrying the resolved resource id
//!    as their parent.
//! 4. **ensure-deployment**: one deployment when a stage is named, none
//!    otherwise.
//!
//! Update re-applies Create against current remote state. Resources that are
//! no longer desired are left in place.
//!
//! The permission cache and the path index live for one invocation and are
//! rebuilt from remote state every time.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::client::{ApiGatewayClient, DeploymentRequest, LambdaClient, MethodRef};
use crate::error::ProvisionError;
use crate::permissions::{revoke_all, FunctionArn, PermissionCache};
use crate::protocol::{ApiResourceNode, ApiSpec, CustomResourceRequest, MethodSpec, RequestType};

/// Status code of the declared method and integration responses
const SUCCESS_STATUS: &str = "200";

/// Authorization mode when a method declares none
const DEFAULT_AUTHORIZATION: &str = "NONE";

/// Path of the root resource every API starts with
const ROOT_PATH: &str = "/";

/// Result of a successful request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// API container the request provisioned (none for Delete)
    pub rest_api_id: Option<String>,
    /// Deployment created for the named stage
    pub deployment_id: Option<String>,
    /// Invoke URL of the deployed stage
    pub url: Option<String>,
}

impl ProvisionOutcome {
    /// Result values readable by other resources in the document
    pub fn data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        if let Some(id) = &self.rest_api_id {
            data.insert("RestApiId".to_string(), json!(id));
        }
        if let Some(url) = &self.url {
            data.insert("URL".to_string(), json!(url));
        }
        data
    }
}

/// A resource whose id is known
#[derive(Clone, Debug, PartialEq, Eq)]
struct ResolvedResource {
    id: String,
    path: String,
}

/// One pending node of the tree walk
struct WorkItem<'s> {
    node: &'s ApiResourceNode,
    path_part: Option<&'s str>,
    parent: Option<ResolvedResource>,
}

// Typed method pipeline stages. Each stage consumes its predecessor.
struct MethodDeclared(MethodRef);
struct MethodResponseDeclared(MethodRef);
struct Integrated(MethodRef);
struct IntegrationResponseDeclared(MethodRef);

/// Provisions REST API resource graphs against the remote control plane
pub struct ApiProvisioner {
    gateway: Arc<dyn ApiGatewayClient>,
    lambda: Arc<dyn LambdaClient>,
    region: Option<String>,
}

impl ApiProvisioner {
    /// Create a provisioner over explicit clients
    pub fn new(gateway: Arc<dyn ApiGatewayClient>, lambda: Arc<dyn LambdaClient>) -> Self {
        Self {
            gateway,
            lambda,
            region: None,
        }
    }

    /// Region the API lives in, used to report the stage URL
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Run the stage chain for one request
    pub async fn apply(
        &self,
        request: &CustomResourceRequest,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        info!(
            request_type = %request.request_type,
            logical_id = %request.logical_resource_id,
            request_id = %request.request_id,
            "Provisioning request received"
        );
        match request.request_type {
            RequestType::Delete => {
                self.ensure_deleted(request).await;
                Ok(ProvisionOutcome::default())
            }
            RequestType::Create | RequestType::Update => {
                let api = request.desired_api()?;
                self.provision(&api).await
            }
        }
    }

    /// Create or update the API described by `api`
    pub async fn provision(&self, api: &ApiSpec) -> Result<ProvisionOutcome, ProvisionError> {
        let rest_api_id = self.ensure_created(api).await?;
        self.ensure_resources(api, &rest_api_id).await?;
        let deployment_id = self.ensure_deployment(api, &rest_api_id).await?;

        let url = match (&deployment_id, &self.region, api.named_stage()) {
            (Some(_), Some(region), Some(stage)) => Some(format!(
                "https://{rest_api_id}.execute-api.{region}.amazonaws.com/{}",
                stage.name
            )),
            _ => None,
        };
        info!(api = %api.name, rest_api_id = %rest_api_id, "API provisioned");
        Ok(ProvisionOutcome {
            rest_api_id: Some(rest_api_id),
            deployment_id,
            url,
        })
    }

    /// Best-effort teardown of the API described by `api`. `known_id` is the
    /// container id reported earlier, used for revocation when the container
    /// can no longer be found by name.
    pub async fn teardown(&self, api: &ApiSpec, known_id: Option<&str>) {
        let found = match self.gateway.find_rest_api(&api.name).await {
            Ok(found) => found,
            Err(err) => {
                warn!(api = %api.name, error = %err, "Failed to look up API for deletion");
                None
            }
        };
        match &found {
            Some(rest_api_id) => match self.gateway.delete_rest_api(rest_api_id).await {
                Ok(()) => info!(api = %api.name, rest_api_id = %rest_api_id, "Deleted API"),
                Err(err) => {
                    warn!(api = %api.name, rest_api_id = %rest_api_id, error = %err, "Failed to delete API")
                }
            },
            None => info!(api = %api.name, "No API to delete"),
        }

        let Some(rest_api_id) = found.as_deref().or(known_id) else {
            warn!(api = %api.name, "API id unknown, skipping permission revocation");
            return;
        };
        revoke_all(self.lambda.as_ref(), api.lambda_targets(), rest_api_id).await;
    }

    async fn ensure_deleted(&self, request: &CustomResourceRequest) {
        match request.previous_api() {
            Ok(api) => {
                self.teardown(&api, request.physical_resource_id.as_deref())
                    .await
            }
            Err(err) => warn!(error = %err, "Nothing to tear down: properties unreadable"),
        }
    }

    async fn ensure_created(&self, api: &ApiSpec) -> Result<String, ProvisionError> {
        if let Some(rest_api_id) = self.gateway.find_rest_api(&api.name).await? {
            debug!(api = %api.name, rest_api_id = %rest_api_id, "Reusing existing API");
            return Ok(rest_api_id);
        }
        let description = api.description.as_deref().unwrap_or_default();
        let rest_api_id = self.gateway.create_rest_api(&api.name, description).await?;
        info!(api = %api.name, rest_api_id = %rest_api_id, "Created API");
        Ok(rest_api_id)
    }

    // =========================================================================
    // Tree walk
    // =========================================================================

    async fn ensure_resources(&self, api: &ApiSpec, rest_api_id: &str) -> Result<(), ProvisionError> {
        let mut index = self.gateway.get_resources(rest_api_id).await?;
        let root = ResolvedResource {
            id: index
                .get(ROOT_PATH)
                .cloned()
                .ok_or_else(|| ProvisionError::MissingRoot {
                    rest_api_id: rest_api_id.to_string(),
                })?,
            path: ROOT_PATH.to_string(),
        };
        let mut permissions = PermissionCache::new(Arc::clone(&self.lambda));

        let mut queue = VecDeque::from([WorkItem {
            node: &api.resources,
            path_part: None,
            parent: None,
        }]);
        let mut first_error: Option<ProvisionError> = None;
        let mut skipped = 0usize;

        while let Some(item) = queue.pop_front() {
            if first_error.is_some() {
                skipped += 1;
                continue;
            }
            let result = self
                .provision_node(rest_api_id, &root, &mut index, &mut permissions, &item)
                .await;
            match result {
                Ok(resolved) => {
                    for (key, child) in &item.node.children {
                        queue.push_back(WorkItem {
                            node: child,
                            path_part: Some(child.path_part.as_deref().unwrap_or(key)),
                            parent: Some(resolved.clone()),
                        });
                    }
                }
                Err(err) => {
                    error!(api = %api.name, error = %err, "Resource tree walk failed");
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(err) => {
                debug!(skipped, "Drained remaining work after failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Resolve one node's resource and run every method pipeline under it
    async fn provision_node(
        &self,
        rest_api_id: &str,
        root: &ResolvedResource,
        index: &mut BTreeMap<String, String>,
        permissions: &mut PermissionCache,
        item: &WorkItem<'_>,
    ) -> Result<ResolvedResource, ProvisionError> {
        let resource = match (&item.parent, item.path_part) {
            (Some(parent), Some(part)) => {
                let path = child_path(&parent.path, part);
                let id = match index.get(&path) {
                    Some(id) => {
                        debug!(path = %path, resource_id = %id, "Reusing existing resource");
                        id.clone()
                    }
                    None => {
                        let id = self
                            .gateway
                            .create_resource(rest_api_id, &parent.id, part)
                            .await?;
                        debug!(path = %path, resource_id = %id, parent_id = %parent.id, "Created resource");
                        index.insert(path.clone(), id.clone());
                        id
                    }
                };
                ResolvedResource { id, path }
            }
            _ => root.clone(),
        };

        for (key, method) in &item.node.methods {
            self.provision_method(rest_api_id, &resource, key, method, permissions)
                .await?;
        }
        Ok(resource)
    }

    // =========================================================================
    // Method pipeline
    // =========================================================================

    /// method -> method response -> integration -> integration response ->
    /// invoke permission, strictly in that order
    async fn provision_method(
        &self,
        rest_api_id: &str,
        resource: &ResolvedResource,
        key: &str,
        method: &MethodSpec,
        permissions: &mut PermissionCache,
    ) -> Result<(), ProvisionError> {
        let target = FunctionArn::parse(&method.lambda_target)?;
        let method_ref = MethodRef {
            rest_api_id: rest_api_id.to_string(),
            resource_id: resource.id.clone(),
            http_method: method
                .http_method
                .as_deref()
                .unwrap_or(key)
                .to_ascii_uppercase(),
        };

        let declared = self.declare_method(method_ref, method).await?;
        let responded = self.declare_method_response(declared).await?;
        let integrated = self.integrate(responded, &target).await?;
        let done = self.declare_integration_response(integrated).await?;
        permissions.ensure_invoke(&target, rest_api_id).await?;

        info!(
            path = %resource.path,
            method = %done.0.http_method,
            target = %method.lambda_target,
            "Method provisioned"
        );
        Ok(())
    }

    async fn declare_method(
        &self,
        method: MethodRef,
        spec: &MethodSpec,
    ) -> Result<MethodDeclared, ProvisionError> {
        let authorization = spec
            .authorization_type
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(DEFAULT_AUTHORIZATION);
        self.gateway
            .put_method(&method, authorization, spec.api_key_required)
            .await?;
        Ok(MethodDeclared(method))
    }

    async fn declare_method_response(
        &self,
        MethodDeclared(method): MethodDeclared,
    ) -> Result<MethodResponseDeclared, ProvisionError> {
        self.gateway
            .put_method_response(&method, SUCCESS_STATUS)
            .await?;
        Ok(MethodResponseDeclared(method))
    }

    async fn integrate(
        &self,
        MethodResponseDeclared(method): MethodResponseDeclared,
        target: &FunctionArn<'_>,
    ) -> Result<Integrated, ProvisionError> {
        self.gateway
            .put_integration(&method, &target.integration_uri())
            .await?;
        Ok(Integrated(method))
    }

    async fn declare_integration_response(
        &self,
        Integrated(method): Integrated,
    ) -> Result<IntegrationResponseDeclared, ProvisionError> {
        self.gateway
            .put_integration_response(&method, SUCCESS_STATUS)
            .await?;
        Ok(IntegrationResponseDeclared(method))
    }

    // =========================================================================
    // Deployment
    // =========================================================================

    async fn ensure_deployment(
        &self,
        api: &ApiSpec,
        rest_api_id: &str,
    ) -> Result<Option<String>, ProvisionError> {
        let Some(stage) = api.named_stage() else {
            debug!(api = %api.name, "No stage named, skipping deployment");
            return Ok(None);
        };
        let deployment = DeploymentRequest {
            rest_api_id: rest_api_id.to_string(),
            stage_name: stage.name.clone(),
            stage_description: stage.description.clone(),
            variables: stage.variables.clone(),
            cache_cluster_enabled: stage.cache_cluster_enabled,
            cache_cluster_size: stage.cache_cluster_size.clone(),
        };
        let deployment_id = self.gateway.create_deployment(&deployment).await?;
        info!(api = %api.name, stage = %stage.name, deployment_id = %deployment_id, "Deployed API");
        Ok(Some(deployment_id))
    }
}

fn child_path(parent: &str, part: &str) -> String {
    if parent == ROOT_PATH {
        format!("/{part}")
    } else {
        format!("{parent}/{part}")
    }
}
