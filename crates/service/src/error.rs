use common::Sku;
use domain::AllocationError;
use store::StoreError;
use thiserror::Error;

/// Errors returned by the allocation use cases.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No product exists for the requested sku.
    #[error("Invalid sku {sku}")]
    InvalidSku { sku: Sku },

    /// The aggregate rejected the operation.
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// Loading or committing the aggregate failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    /// Returns true if the error came from a concurrent write to the same product.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, ServiceError::Store(StoreError::ConcurrencyConflict { .. }))
    }
}
