//! Error types shared across stratus crates
//!
//! Errors are structured with fields to aid debugging. Assembly-time errors
//! carry the function (handler id) they were raised for so the caller can tell
//! which definition needs fixing.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for stratus operations
#[derive(Debug, Error)]
pub enum Error {
    /// A definition is malformed or missing required fields
    #[error("validation error for {function}: {message}")]
    Validation {
        /// Handler id of the offending function definition
        function: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g., "role", "options.memory_size")
        field: Option<String>,
    },

    /// A permission grant, mapping or API declaration failed to translate
    #[error("export error for {function}: {message}")]
    Export {
        /// Handler id of the function being exported
        function: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "telemetry", "naming")
        context: String,
    },
}

impl Error {
    /// Create a validation error without function context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            function: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific function definition
    pub fn validation_for(function: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            function: function.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific function definition and field
    pub fn validation_for_field(
        function: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            function: function.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an export error for a specific function definition
    pub fn export(function: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Export {
            function: function.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(msg: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Returns the function this error was raised for, if known
    pub fn function(&self) -> Option<&str> {
        match self {
            Self::Validation { function, .. } | Self::Export { function, .. } => {
                if function == UNKNOWN_CONTEXT {
                    None
                } else {
                    Some(function)
                }
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_function_and_field() {
        let err = Error::validation_for_field("orders.Handle", "role", "no role supplied");
        assert_eq!(
            err.to_string(),
            "validation error for orders.Handle: no role supplied"
        );
        match err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("role")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn function_context_hidden_when_unknown() {
        assert_eq!(Error::validation("bad").function(), None);
        assert_eq!(
            Error::export("orders.Handle", "bad grant").function(),
            Some("orders.Handle")
        );
        assert_eq!(Error::serialization("eof").function(), None);
    }

    #[test]
    fn serde_errors_become_serialization_errors() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
