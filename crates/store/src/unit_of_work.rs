use async_trait::async_trait;

use crate::{ProductRepository, Result};

/// One all-or-nothing transaction around a use case.
///
/// A unit of work owns exactly one repository, valid only for its lifetime.
/// Changes become durable only through [`UnitOfWork::commit`]. Dropping the
/// unit of work without committing rolls everything back, which also covers
/// early returns with `?`: the error propagates unchanged and nothing is
/// written.
#[async_trait]
pub trait UnitOfWork: Send + Sized {
    /// The repository bound to this transaction.
    type Products: ProductRepository;

    /// Returns the repository scoped to this unit of work.
    fn products(&mut self) -> &mut Self::Products;

    /// Persists every change made through the repository.
    ///
    /// If any tracked product was changed by someone else since it was
    /// loaded, fails with `ConcurrencyConflict` and writes nothing.
    async fn commit(self) -> Result<()>;

    /// Discards every change made through the repository.
    async fn rollback(self) -> Result<()>;
}

/// Opens units of work against a backing store.
#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    type UnitOfWork: UnitOfWork;

    /// Starts a new transaction and returns the unit of work wrapping it.
    async fn begin(&self) -> Result<Self::UnitOfWork>;
}
