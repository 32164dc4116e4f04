//! HTTP route handlers.

pub mod allocations;
pub mod batches;
pub mod health;
pub mod metrics;

use service::AllocationService;
use store::UnitOfWorkFactory;

/// Shared application state accessible from all handlers.
pub struct AppState<F: UnitOfWorkFactory> {
    pub allocation_service: AllocationService<F>,
}
