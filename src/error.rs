//! Error taxonomy
//!
//! Every fallible operation in the crate returns [`NetError`]. Each variant
//! belongs to one [`ErrorKind`], and each kind maps onto a stable status code
//! so callers can tell "fix your request" apart from "try again later".

use crate::resource::{Provider, ResourceKind, Verb};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetError>;

/// Stable error category exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationFailed,
    NotSupported,
    NotImplemented,
    NotFound,
    Conflict,
    Timeout,
    Cancelled,
    ProviderError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "validation_failed",
            Self::NotSupported => "not_supported",
            Self::NotImplemented => "not_implemented",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::ProviderError => "provider_error",
            Self::InternalError => "internal_error",
        }
    }

    /// HTTP-style status code for this category
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ValidationFailed | Self::NotSupported => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Cancelled => 499,
            Self::InternalError => 500,
            Self::NotImplemented => 501,
            Self::ProviderError => 502,
            Self::Timeout => 504,
        }
    }
}

#[derive(Error, Debug)]
pub enum NetError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("provider '{0}' is not supported")]
    NotSupported(String),

    #[error("{verb} {kind} is not implemented for provider {provider}")]
    NotImplemented {
        provider: Provider,
        kind: ResourceKind,
        verb: Verb,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation {operation} did not finish within {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("operation {operation} failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("{provider} API error while trying to {context}: {message}")]
    Provider {
        provider: Provider,
        context: String,
        message: String,
        status: Option<u16>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl NetError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_implemented(provider: Provider, kind: ResourceKind, verb: Verb) -> Self {
        Self::NotImplemented {
            provider,
            kind,
            verb,
        }
    }

    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn provider(
        provider: Provider,
        context: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Provider {
            provider,
            context: context.into(),
            message: message.to_string(),
            status: None,
        }
    }

    /// Map a non-success upstream HTTP status onto the taxonomy.
    pub fn from_status(
        provider: Provider,
        kind: ResourceKind,
        context: impl Into<String>,
        target: &str,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        match status {
            400 => Self::Validation(message),
            404 => Self::not_found(kind, target),
            409 => Self::Conflict(message),
            _ => Self::Provider {
                provider,
                context: context.into(),
                message,
                status: Some(status),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationFailed,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::NotImplemented { .. } => ErrorKind::NotImplemented,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Provider { .. } => ErrorKind::ProviderError,
            Self::OperationFailed { .. } | Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(NetError::validation("x").status_code(), 400);
        assert_eq!(NetError::NotSupported("oci".into()).status_code(), 400);
        assert_eq!(
            NetError::not_implemented(Provider::Azure, ResourceKind::SecurityGroup, Verb::AddRule)
                .status_code(),
            501
        );
        assert_eq!(
            NetError::not_found(ResourceKind::Vpc, "vpc-1").status_code(),
            404
        );
        assert_eq!(NetError::Conflict("busy".into()).status_code(), 409);
        assert_eq!(
            NetError::Timeout {
                operation: "op".into(),
                elapsed: Duration::from_secs(1)
            }
            .status_code(),
            504
        );
        assert_eq!(
            NetError::provider(Provider::Gcp, "list networks", "boom").status_code(),
            502
        );
        assert_eq!(NetError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_from_status_maps_common_codes() {
        let err = NetError::from_status(
            Provider::Gcp,
            ResourceKind::Vpc,
            "get network",
            "net-a",
            404,
            "missing",
        );
        assert!(matches!(err, NetError::NotFound { .. }));

        let err = NetError::from_status(
            Provider::Gcp,
            ResourceKind::Vpc,
            "delete network",
            "net-a",
            409,
            "in use",
        );
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = NetError::from_status(
            Provider::Azure,
            ResourceKind::Subnet,
            "list subnets",
            "",
            503,
            "unavailable",
        );
        assert!(matches!(err, NetError::Provider { status: Some(503), .. }));
    }

    #[test]
    fn test_not_implemented_message_names_the_combination() {
        let err = NetError::not_implemented(Provider::Azure, ResourceKind::SecurityGroup, Verb::AddRule);
        assert_eq!(
            err.to_string(),
            "add-rule security-group is not implemented for provider azure"
        );
    }
}
