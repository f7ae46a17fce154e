//! Error taxonomy for the loading, segmentation and page pipeline

use polars::error::PolarsError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Failures of the data core
///
/// `Clone` so a load failure can be kept by the dashboard and reported by
/// every page that needs the table.
#[derive(Error, Debug, Clone)]
pub enum ChurnError {
    #[error("dataset unavailable at {path}: {reason}")]
    DataUnavailable { path: PathBuf, reason: String },

    #[error("dataset is missing required column '{column}'")]
    MissingColumn { column: String },

    #[error("customer '{customer_id}' appears more than once")]
    DuplicateCustomer { customer_id: String },

    #[error("insufficient data: need at least {required} rows, found {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("polars error: {0}")]
    Polars(#[source] Arc<PolarsError>),
}

impl From<PolarsError> for ChurnError {
    fn from(err: PolarsError) -> Self {
        ChurnError::Polars(Arc::new(err))
    }
}

impl ChurnError {
    pub(crate) fn unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ChurnError::DataUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error means the source table could not be used at all.
    pub fn is_data_unavailable(&self) -> bool {
        matches!(
            self,
            ChurnError::DataUnavailable { .. }
                | ChurnError::MissingColumn { .. }
                | ChurnError::DuplicateCustomer { .. }
                | ChurnError::Polars(_)
        )
    }
}

/// Result of the library's data operations
pub type CoreResult<T> = Result<T, ChurnError>;
