//! Common types for stratus: errors, resource documents, naming, telemetry

#![deny(missing_docs)]

pub mod document;
pub mod error;
pub mod naming;
pub mod telemetry;

pub use document::{ResourceDocument, ResourceNode, ResourceType};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Principal for S3 bucket event sources
pub const S3_PRINCIPAL: &str = "s3.amazonaws.com";

/// Principal for SNS topic event sources
pub const SNS_PRINCIPAL: &str = "sns.amazonaws.com";

/// Principal for EC2 (allowed to assume generated roles)
pub const EC2_PRINCIPAL: &str = "ec2.amazonaws.com";

/// Principal for Lambda (allowed to assume generated roles)
pub const LAMBDA_PRINCIPAL: &str = "lambda.amazonaws.com";

/// Principal for API Gateway invoke permissions
pub const APIGATEWAY_PRINCIPAL: &str = "apigateway.amazonaws.com";

/// Action granted by every invoke permission
pub const INVOKE_ACTION: &str = "lambda:InvokeFunction";

/// IAM policy language version used by generated documents
pub const POLICY_VERSION: &str = "2012-10-17";
