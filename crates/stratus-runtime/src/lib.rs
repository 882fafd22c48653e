//! Custom resource runtime for stratus
//!
//! Performs what the template format cannot express: building a REST API's
//! hierarchical resource/method graph, granting the API invoke access to its
//! target functions, and tearing both down. The control plane invokes it once
//! per request; the outcome is reported through the callback protocol.
//!
//! - `protocol`: request/response envelope and API property shapes
//! - `client`: mockable remote clients, with AWS SDK implementations in `aws`
//! - `provisioner`: the ordered stage chain and serialized tree walk
//! - `handler`: exactly-once response delivery
//! - `runtime_api`: the function Runtime API loop behind `bootstrap`

#![deny(missing_docs)]

pub mod aws;
pub mod client;
pub mod error;
pub mod handler;
pub mod permissions;
pub mod protocol;
pub mod provisioner;
pub mod runtime_api;

pub use error::ProvisionError;
pub use handler::{CustomResourceHandler, HttpResponseSender, ResponseSender};
pub use protocol::{CustomResourceRequest, CustomResourceResponse, ResponseStatus};
pub use provisioner::{ApiProvisioner, ProvisionOutcome};
