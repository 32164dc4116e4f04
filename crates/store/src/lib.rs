//! Persistence for product aggregates.
//!
//! The service layer only sees the traits in [`repository`] and
//! [`unit_of_work`]. Two backends implement them:
//! - [`InMemoryStore`] for tests and local runs
//! - [`PostgresStore`] backed by sqlx

pub mod error;
mod identity_map;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod unit_of_work;

pub use error::{Result, StoreError};
pub use memory::{InMemoryProductRepository, InMemoryStore, InMemoryUnitOfWork};
pub use postgres::{PostgresProductRepository, PostgresStore, PostgresUnitOfWork};
pub use repository::ProductRepository;
pub use unit_of_work::{UnitOfWork, UnitOfWorkFactory};
