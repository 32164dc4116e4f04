use async_trait::async_trait;
use common::Sku;
use domain::Product;

use crate::Result;

/// Read/write access to product aggregates inside one unit of work.
///
/// A repository does no business logic; it maps aggregates to and from
/// their stored form. Every product handed out is tracked, so changes made
/// through the returned reference are written when the owning unit of work
/// commits.
#[async_trait]
pub trait ProductRepository: Send {
    /// Registers a new product.
    ///
    /// Fails with `DuplicateProduct` if the sku is already known, either now
    /// or when the unit of work commits.
    async fn add(&mut self, product: Product) -> Result<()>;

    /// Returns the product for `sku`, fully loaded with its batches and
    /// their allocations, or `None` if there is no such product.
    ///
    /// Repeated calls for the same sku return the same tracked instance.
    async fn get<'a>(&'a mut self, sku: &Sku) -> Result<Option<&'a mut Product>>;
}
