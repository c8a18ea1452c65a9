//! Error taxonomy for a res_map reconciliation pass.

use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ResMapError {
    #[error("failed to parse fragment {source_path}: {reason}")]
    FragmentParse { source_path: String, reason: String },

    #[error("item {index} in {source_path} rejected: {reason}")]
    InvalidItem {
        source_path: String,
        index: usize,
        reason: String,
    },

    #[error("item with key {item_id} already exists ({source_path}), skipping")]
    DuplicateIdentifier {
        item_id: String,
        source_path: String,
    },

    #[error("cannot read original res_map: {0}")]
    CatalogRead(String),

    #[error("no free catalog key for {item_id} after {attempts} attempts")]
    KeyAllocationExhausted { item_id: String, attempts: u32 },

    #[error("failed to persist {path:?}: {reason}")]
    Persistence { path: PathBuf, reason: String },
}

impl ResMapError {
    /// Fatal errors abort the pass and leave persisted state untouched.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ResMapError::CatalogRead(_) | ResMapError::Persistence { .. }
        )
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        ResMapError::Persistence {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ResMapError>;

/// Recoverable errors collected during a pass.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<ResMapError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, err: ResMapError) {
        if err.is_fatal() {
            error!("{err}");
        } else {
            warn!("{err}");
        }
        self.errors.push(err);
    }

    pub fn errors(&self) -> &[ResMapError] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn count_where(&self, predicate: impl Fn(&ResMapError) -> bool) -> usize {
        self.errors.iter().filter(|err| predicate(err)).count()
    }

    pub fn into_errors(self) -> Vec<ResMapError> {
        self.errors
    }
}
