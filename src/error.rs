use thiserror::Error;

use crate::services::catalog::CatalogError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown session: {0}")]
    SessionNotFound(String),
    #[error("tag selection out of range: {count} active tags (expected {min}..={max})")]
    InvalidTagSelection {
        count: usize,
        min: usize,
        max: usize,
    },
    #[error("catalog fetch failed: {0}")]
    Catalog(#[from] CatalogError),
}
