//! Error types
//!
//! Internal contracts return `anyhow::Result`. Conditions callers must
//! branch on travel inside it as small marker types and are detected with
//! `downcast_ref`. The public facade converts everything to [`MailError`].

/// The provider rejected the stored change cursor (stale or invalid)
#[derive(Debug, thiserror::Error)]
#[error("Checkpoint expired or invalid")]
pub struct CheckpointExpiredError;

/// A category with the same (account, name) already exists
#[derive(Debug, thiserror::Error)]
#[error("Category '{name}' already exists for account {account_id}")]
pub struct DuplicateCategoryError {
    pub account_id: i64,
    pub name: String,
}

/// The caller cancelled the operation
#[derive(Debug, thiserror::Error)]
#[error("Operation cancelled")]
pub struct CancelledError;

/// A requested entity does not exist
#[derive(Debug, thiserror::Error)]
#[error("Not found: {0}")]
pub struct NotFoundError(pub String);

/// Error returned by the public mail service API
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Already exists: {resource}")]
    AlreadyExists { resource: String },

    #[error("Checkpoint expired; the next refresh performs a full sync")]
    CheckpointExpired,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Not configured: {feature}")]
    NotConfigured { feature: String },
}

impl MailError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        MailError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn not_configured(feature: impl Into<String>) -> Self {
        MailError::NotConfigured {
            feature: feature.into(),
        }
    }

    /// Whether the same call may succeed if repeated
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MailError::CheckpointExpired | MailError::Cancelled | MailError::Provider { .. }
        )
    }
}

impl From<anyhow::Error> for MailError {
    fn from(e: anyhow::Error) -> Self {
        if e.downcast_ref::<CheckpointExpiredError>().is_some() {
            return MailError::CheckpointExpired;
        }
        if e.downcast_ref::<CancelledError>().is_some() {
            return MailError::Cancelled;
        }
        if let Some(nf) = e.downcast_ref::<NotFoundError>() {
            return MailError::NotFound {
                resource: nf.0.clone(),
            };
        }
        if let Some(dup) = e.downcast_ref::<DuplicateCategoryError>() {
            return MailError::AlreadyExists {
                resource: format!("category '{}'", dup.name),
            };
        }
        if e.downcast_ref::<rusqlite::Error>().is_some() {
            return MailError::Storage {
                message: format!("{:#}", e),
            };
        }
        MailError::Provider {
            message: format!("{:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_marker_errors_survive_context() {
        let err: anyhow::Error = Err::<(), _>(CheckpointExpiredError)
            .context("Failed to list history")
            .unwrap_err();
        assert!(matches!(MailError::from(err), MailError::CheckpointExpired));
    }

    #[test]
    fn test_duplicate_maps_to_already_exists() {
        let err = anyhow::Error::new(DuplicateCategoryError {
            account_id: 1,
            name: "Work".to_string(),
        });
        match MailError::from(err) {
            MailError::AlreadyExists { resource } => assert!(resource.contains("Work")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_retryable() {
        assert!(MailError::Provider { message: "503".into() }.is_retryable());
        assert!(MailError::CheckpointExpired.is_retryable());
        assert!(!MailError::not_found("account 1").is_retryable());
    }

    #[test]
    fn test_plain_error_is_provider() {
        let err = anyhow::anyhow!("connection reset");
        assert!(matches!(MailError::from(err), MailError::Provider { .. }));
    }
}
