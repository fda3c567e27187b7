//! Error types for the authorization engine

use crate::types::{GrantId, GroupId};
use thiserror::Error;

/// Boxed underlying cause of a store failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Malformed grant: missing action, empty resource class or ill-formed holder
    #[error("Invalid grant: {0}")]
    GrantInvalid(String),

    /// Malformed group membership: bad holder, self-membership, cycle or duplicate edge
    #[error("Invalid group member: {0}")]
    GroupMemberInvalid(String),

    /// Authorization resource does not exist
    #[error("Authorization resource not found: {0}")]
    ResourceNotFound(String),

    /// Group does not exist
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    /// Grant does not exist
    #[error("Grant not found: {0}")]
    GrantNotFound(GrantId),

    /// The current user may not perform the requested mutation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Policy expression could not be compiled or evaluated
    #[error("Expression error: {0}")]
    Expression(#[from] crate::cel::CelError),

    /// Underlying persistence failure
    #[error("Store failure: {message}")]
    StoreFailure {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl AuthzError {
    /// Store failure without an underlying cause (e.g. a violated constraint)
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreFailure {
            message: message.into(),
            source: None,
        }
    }

    /// Store failure wrapping the causing error
    pub fn store_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::StoreFailure {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl From<toml::de::Error> for AuthzError {
    fn from(err: toml::de::Error) -> Self {
        AuthzError::InvalidConfig(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AuthzError {
    fn from(err: sqlx::Error) -> Self {
        AuthzError::store_with("database operation failed", err)
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::migrate::MigrateError> for AuthzError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AuthzError::store_with("migration failed", err)
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_store_failure_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = AuthzError::store_with("insert grant", io);

        assert_eq!(err.to_string(), "Store failure: insert grant");
        assert_eq!(err.source().map(|s| s.to_string()), Some("disk gone".to_string()));
    }

    #[test]
    fn test_store_failure_without_source() {
        let err = AuthzError::store("duplicate resource");
        assert!(err.source().is_none());
    }
}
