//! Domain layer for the allocation service.
//!
//! This crate provides the allocation model and has no I/O:
//! - `OrderLine` value object
//! - `Batch` entity with its allocation set
//! - `Product` aggregate root that picks a batch for each order line
//! - `Version` counter used for optimistic concurrency control

pub mod allocation;
pub mod version;

pub use allocation::{AllocationError, Batch, OrderLine, Product};
pub use common::{BatchReference, OrderId, Sku};
pub use version::Version;
