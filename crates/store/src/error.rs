use common::{BatchReference, Sku};
use domain::Version;
use thiserror::Error;

/// Errors that can occur when loading or committing product aggregates.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another unit of work committed a change to the same product after it
    /// was loaded here. Nothing from this unit of work was written.
    #[error("Concurrency conflict for product {sku}: expected version {expected}")]
    ConcurrencyConflict { sku: Sku, expected: Version },

    /// A product with this sku already exists.
    #[error("Product already exists: {0}")]
    DuplicateProduct(Sku),

    /// A batch with this reference already belongs to another product.
    #[error("Batch reference already in use: {0}")]
    DuplicateBatch(BatchReference),

    /// Stored data could not be turned back into a valid aggregate.
    #[error("Corrupt stored data: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
