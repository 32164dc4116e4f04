//! Allocation model: order lines, batches and the product aggregate.

mod batch;
mod order_line;
mod product;

pub use batch::Batch;
pub use order_line::OrderLine;
pub use product::Product;

use common::{BatchReference, Sku};
use thiserror::Error;

/// Errors that can occur during allocation operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// No batch of the product can satisfy the order line.
    #[error("Out of stock for sku {sku}")]
    OutOfStock { sku: Sku },

    /// Order lines must request at least one unit.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// A batch with the same reference is already part of the product.
    #[error("Batch {reference} already exists for sku {sku}")]
    DuplicateBatch { reference: BatchReference, sku: Sku },

    /// The batch belongs to a different product.
    #[error("Batch {reference} has sku {actual}, expected {expected}")]
    SkuMismatch {
        reference: BatchReference,
        expected: Sku,
        actual: Sku,
    },
}
