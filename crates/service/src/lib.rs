//! Service layer for the allocation system.
//!
//! Each use case opens its own unit of work, drives the `Product` aggregate
//! and commits. Storage is abstracted behind [`store::UnitOfWorkFactory`], so
//! the same service runs against the in-memory store in tests and PostgreSQL
//! in production.

pub mod error;
pub mod service;

pub use error::ServiceError;
pub use service::AllocationService;
