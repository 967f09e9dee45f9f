use std::path::PathBuf;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::pipeline::dispatch::DispatchError;
use crate::pipeline::extraction::ExtractionError;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown {kind}: {name}")]
    UnknownReference { kind: &'static str, name: String },

    #[error("Dimensions {}x{} do not match measured {}x{}", .provided.0, .provided.1, .measured.0, .measured.1)]
    DimensionMismatch {
        /// `(width, height)` as supplied by the caller.
        provided: (u32, u32),
        /// `(width, height)` of the decoded source.
        measured: (u32, u32),
    },

    #[error("List {dimension} has {actual} entries, expected {expected}")]
    CountMismatch {
        dimension: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Cannot decode image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: &'static str, id: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl RegistrationError {
    pub(crate) fn not_found(entity_type: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    pub(crate) fn unknown(kind: &'static str, name: &str) -> Self {
        Self::UnknownReference {
            kind,
            name: name.to_string(),
        }
    }

    /// Caller-side input problem rather than a storage or runtime failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::UnknownReference { .. }
                | Self::DimensionMismatch { .. }
                | Self::CountMismatch { .. }
        )
    }
}

impl From<ExtractionError> for RegistrationError {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::Decode { path, reason } => Self::Decode { path, reason },
            ExtractionError::Database(db) => Self::Database(db),
            other => Self::Validation(other.to_string()),
        }
    }
}
