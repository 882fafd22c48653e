//! Error types for the custom resource runtime

use thiserror::Error;

/// Errors raised while servicing one provisioning request
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A remote control-plane call failed; the message is passed through verbatim
    #[error("{operation}: {message}")]
    Remote {
        /// Remote operation that failed (e.g., "PutMethod")
        operation: String,
        /// Remote error message
        message: String,
    },

    /// The request or its properties could not be interpreted
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of what's invalid
        message: String,
    },

    /// The REST API has no root resource to hang the tree from
    #[error("REST API {rest_api_id} has no root resource")]
    MissingRoot {
        /// The API without a root
        rest_api_id: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// The response could not be delivered to the callback target
    #[error("response delivery failed: {message}")]
    Delivery {
        /// Description of what failed
        message: String,
    },
}

impl ProvisionError {
    /// Create a remote call error
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a delivery error
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery {
            message: msg.into(),
        }
    }

    /// Whether this is a remote "already exists" conflict.
    ///
    /// For permission grants this means the desired end state already holds.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::Remote { message, .. } => message.to_ascii_lowercase().contains("already exists"),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ProvisionError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(
        "ResourceConflictException: The statement id (ApiGateway1) provided already exists. \
         Please provide a new statement id, or remove the existing statement.",
        true
    )]
    #[case("Statement Already Exists", true)]
    #[case("AccessDeniedException: not authorized", false)]
    #[case("TooManyRequestsException: Rate exceeded", false)]
    fn classifies_conflicts(#[case] message: &str, #[case] expected: bool) {
        let err = ProvisionError::remote("AddPermission", message);
        assert_eq!(err.is_already_exists(), expected);
    }

    #[test]
    fn only_remote_errors_are_conflicts() {
        assert!(!ProvisionError::invalid_request("already exists").is_already_exists());
    }

    #[test]
    fn remote_message_passes_through() {
        let err = ProvisionError::remote("PutMethod", "BadRequestException: Invalid method");
        assert_eq!(err.to_string(), "PutMethod: BadRequestException: Invalid method");
    }
}
