//! Errors returned by metadata operations.
//!
//! Every failure an admin caller can see is a [`MetadataError`]. The
//! [`ErrorClass`] separates a change that is invalid in itself, a change that
//! broke other objects, a bad request, and a broken system.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::inconsistency::InconsistentMetadata;
use crate::metadata::ValidationError;
use crate::store::StoreError;

/// Machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotExists,
    AlreadyExists,
    DependencyError,
    InvalidConfiguration,
    InconsistentMetadata,
    ParseFailed,
    Conflict,
    Unexpected,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotExists => "not-exists",
            ErrorCode::AlreadyExists => "already-exists",
            ErrorCode::DependencyError => "dependency-error",
            ErrorCode::InvalidConfiguration => "invalid-configuration",
            ErrorCode::InconsistentMetadata => "inconsistent-metadata",
            ErrorCode::ParseFailed => "parse-failed",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The object the request changed did not resolve.
    Targeted,
    /// The request broke objects it did not name.
    Collateral,
    /// The request itself is malformed or names something absent.
    User,
    /// The system cannot serve the request.
    Fatal,
}

/// Error returned by engine and API operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct MetadataError {
    pub code: ErrorCode,
    pub message: String,
    pub class: ErrorClass,
    pub internal: Option<Value>,
}

pub type MetadataResult<T> = Result<T, MetadataError>;

impl MetadataError {
    pub fn new(code: ErrorCode, class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            class,
            internal: None,
        }
    }

    pub fn with_internal(mut self, internal: Value) -> Self {
        self.internal = Some(internal);
        self
    }

    pub fn not_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotExists, ErrorClass::User, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, ErrorClass::User, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, ErrorClass::User, message)
    }

    pub fn parse_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseFailed, ErrorClass::User, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unexpected, ErrorClass::Fatal, message)
    }

    /// The object a request targeted became inconsistent.
    pub fn targeted(reasons: &[String]) -> Self {
        Self::new(
            ErrorCode::InvalidConfiguration,
            ErrorClass::Targeted,
            format!("Inconsistent object: {}", reasons.join("; ")),
        )
    }

    /// Objects the request did not name became inconsistent.
    pub fn collateral(new: &[&InconsistentMetadata]) -> Self {
        Self::new(
            ErrorCode::InconsistentMetadata,
            ErrorClass::Collateral,
            "cannot continue due to inconsistent metadata",
        )
        .with_internal(Value::Array(new.iter().map(|e| e.to_json()).collect()))
    }

    /// A rebuild that must not break anything did.
    pub fn newly_inconsistent(new: &[&InconsistentMetadata]) -> Self {
        Self::new(
            ErrorCode::Unexpected,
            ErrorClass::Fatal,
            "cannot continue due to newly found inconsistent metadata",
        )
        .with_internal(Value::Array(new.iter().map(|e| e.to_json()).collect()))
    }

    pub fn dependency(dependents: &[String]) -> Self {
        Self::new(
            ErrorCode::DependencyError,
            ErrorClass::User,
            format!(
                "cannot drop, dependent objects exist: {}",
                dependents.join(", ")
            ),
        )
    }

    /// HTTP-style status for the error.
    pub fn status(&self) -> u16 {
        match self.code {
            ErrorCode::NotExists => 404,
            ErrorCode::AlreadyExists | ErrorCode::Conflict => 409,
            ErrorCode::Unexpected => 500,
            ErrorCode::DependencyError
            | ErrorCode::InvalidConfiguration
            | ErrorCode::InconsistentMetadata
            | ErrorCode::ParseFailed => 400,
        }
    }
}

impl Serialize for MetadataError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.internal.is_some() { 3 } else { 2 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("code", self.code.as_str())?;
        map.serialize_entry("error", &self.message)?;
        if let Some(internal) = &self.internal {
            map.serialize_entry("internal", internal)?;
        }
        map.end()
    }
}

impl From<StoreError> for MetadataError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => {
                MetadataError::new(ErrorCode::Conflict, ErrorClass::User, err.to_string())
            }
            other => MetadataError::unexpected(format!("metadata storage failed: {}", other)),
        }
    }
}

impl From<Vec<ValidationError>> for MetadataError {
    fn from(errors: Vec<ValidationError>) -> Self {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        MetadataError::invalid(messages.join("; "))
            .with_internal(Value::Array(messages.into_iter().map(Value::String).collect()))
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(err: serde_json::Error) -> Self {
        MetadataError::parse_failed(err.to_string())
    }
}
