//! Resource document assembly for function-based services
//!
//! Turns declarative function definitions into a single template document:
//! - `iam`: inline role synthesis with content-addressable role ids
//! - `permission`: Direct, BucketNotification and TopicSubscription exporters
//! - `api`: the REST API custom resource serviced by the API provisioner
//! - `assembler`: orchestration, validation and the all-or-nothing policy

#![deny(missing_docs)]

pub mod api;
pub mod assembler;
pub mod definition;
mod helpers;
pub mod iam;
pub mod permission;

pub use api::{ApiDefinition, ApiResourceDefinition, MethodDefinition, StageDefinition};
pub use assembler::{AssemblerConfig, FunctionTarget, ResourceGraphAssembler};
pub use definition::{
    CodeLocation, EventSourceMapping, FunctionDefinition, FunctionOptions, Privilege,
    RoleDefinition, ServiceDefinition, StartingPosition,
};
pub use iam::{synthesize, PolicyStatement, SynthesizedPolicy};
pub use permission::{
    BasePermission, BucketNotificationPermission, DirectPermission, FilterRule, PermissionGrant,
    TopicSubscriptionPermission,
};
