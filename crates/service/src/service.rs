//! Allocation service providing the use cases of the system.

use chrono::NaiveDate;
use common::{BatchReference, OrderId, Sku};
use domain::{AllocationError, Batch, OrderLine, Product};
use store::{ProductRepository, UnitOfWork, UnitOfWorkFactory};

use crate::ServiceError;

/// Service for allocating stock.
///
/// Every method runs in its own unit of work: it is committed on success
/// and rolled back on any error, which is returned unchanged.
pub struct AllocationService<F: UnitOfWorkFactory> {
    factory: F,
}

impl<F: UnitOfWorkFactory> AllocationService<F> {
    /// Creates a new allocation service over the given store.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Allocates an order line to a batch of its product.
    ///
    /// Fails with `InvalidSku` if the product is unknown and with
    /// `OutOfStock` if no batch can take the line.
    #[tracing::instrument(skip(self))]
    pub async fn allocate_order_line(
        &self,
        order_id: OrderId,
        sku: Sku,
        quantity: u32,
    ) -> Result<BatchReference, ServiceError> {
        let line = OrderLine::new(order_id, sku, quantity)?;

        let mut uow = self.factory.begin().await?;
        let product = uow
            .products()
            .get(line.sku())
            .await?
            .ok_or_else(|| ServiceError::InvalidSku {
                sku: line.sku().clone(),
            })?;

        let reference = product.allocate(&line).inspect_err(record_failure)?;
        uow.commit().await?;

        metrics::counter!("allocations_total").increment(1);
        tracing::info!(%reference, "order line allocated");
        Ok(reference)
    }

    /// Adds a batch of stock, creating the product on its first batch.
    #[tracing::instrument(skip(self))]
    pub async fn register_batch(
        &self,
        reference: BatchReference,
        sku: Sku,
        quantity: u32,
        eta: Option<NaiveDate>,
    ) -> Result<(), ServiceError> {
        let mut uow = self.factory.begin().await?;
        let products = uow.products();

        if products.get(&sku).await?.is_none() {
            tracing::debug!("creating product for first batch");
            products.add(Product::new(sku.clone(), Vec::new())?).await?;
        }
        let product = products
            .get(&sku)
            .await?
            .ok_or_else(|| ServiceError::InvalidSku { sku: sku.clone() })?;

        product.add_batch(Batch::new(reference, sku.clone(), quantity, eta))?;
        uow.commit().await?;

        metrics::counter!("batches_registered_total").increment(1);
        tracing::info!("batch registered");
        Ok(())
    }

    /// Moves an order line back through the allocation algorithm.
    ///
    /// The line is released from the batch holding it (if any) and allocated
    /// again by priority, both within one unit of work.
    #[tracing::instrument(skip(self))]
    pub async fn reallocate_order_line(
        &self,
        order_id: OrderId,
        sku: Sku,
        quantity: u32,
    ) -> Result<BatchReference, ServiceError> {
        let line = OrderLine::new(order_id, sku, quantity)?;

        let mut uow = self.factory.begin().await?;
        let product = uow
            .products()
            .get(line.sku())
            .await?
            .ok_or_else(|| ServiceError::InvalidSku {
                sku: line.sku().clone(),
            })?;

        let previous = product.deallocate(&line);
        let reference = product.allocate(&line).inspect_err(record_failure)?;
        uow.commit().await?;

        metrics::counter!("allocations_total").increment(1);
        tracing::info!(?previous, %reference, "order line reallocated");
        Ok(reference)
    }
}

fn record_failure(err: &AllocationError) {
    if let AllocationError::OutOfStock { sku } = err {
        metrics::counter!("allocations_out_of_stock_total").increment(1);
        tracing::warn!(%sku, "out of stock");
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Days, NaiveDate};
    use domain::Version;
    use store::{InMemoryStore, StoreError};

    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn service() -> (AllocationService<InMemoryStore>, InMemoryStore) {
        let store = InMemoryStore::new();
        (AllocationService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn add_batch_for_new_product() {
        let (service, store) = service();

        service
            .register_batch("b1".into(), "CRUNCHY-ARMCHAIR".into(), 100, None)
            .await
            .unwrap();

        let product = store.product(&Sku::new("CRUNCHY-ARMCHAIR")).await.unwrap();
        assert!(product.batch(&BatchReference::new("b1")).is_some());
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn add_batch_for_existing_product() {
        let (service, store) = service();

        service
            .register_batch("b1".into(), "GARISH-RUG".into(), 100, None)
            .await
            .unwrap();
        service
            .register_batch("b2".into(), "GARISH-RUG".into(), 99, None)
            .await
            .unwrap();

        let product = store.product(&Sku::new("GARISH-RUG")).await.unwrap();
        let references: Vec<&str> = product
            .batches()
            .iter()
            .map(|b| b.reference().as_str())
            .collect();
        assert_eq!(references, vec!["b1", "b2"]);
    }

    #[tokio::test]
    async fn duplicate_batch_reference_is_rejected() {
        let (service, store) = service();
        service
            .register_batch("b1".into(), "LAMP".into(), 10, None)
            .await
            .unwrap();

        let result = service
            .register_batch("b1".into(), "LAMP".into(), 20, None)
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::Allocation(AllocationError::DuplicateBatch { .. }))
        ));
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn allocate_returns_allocation() {
        let (service, _) = service();
        service
            .register_batch("batch1".into(), "COMPLICATED-LAMP".into(), 100, None)
            .await
            .unwrap();

        let result = service
            .allocate_order_line("o1".into(), "COMPLICATED-LAMP".into(), 10)
            .await
            .unwrap();

        assert_eq!(result, "batch1");
    }

    #[tokio::test]
    async fn allocate_errors_for_invalid_sku() {
        let (service, _) = service();
        service
            .register_batch("b1".into(), "AREALSKU".into(), 100, None)
            .await
            .unwrap();

        let err = service
            .allocate_order_line("o1".into(), "NONEXISTENTSKU".into(), 10)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InvalidSku { .. }));
        assert_eq!(err.to_string(), "Invalid sku NONEXISTENTSKU");
    }

    #[tokio::test]
    async fn allocate_commits() {
        let (service, store) = service();
        service
            .register_batch("b1".into(), "OMINOUS-MIRROR".into(), 100, None)
            .await
            .unwrap();

        service
            .allocate_order_line("o1".into(), "OMINOUS-MIRROR".into(), 10)
            .await
            .unwrap();

        assert_eq!(store.commit_count(), 2);
        let product = store.product(&Sku::new("OMINOUS-MIRROR")).await.unwrap();
        assert_eq!(product.available_quantity(), 90);
        assert_eq!(product.version(), Version::new(1));
    }

    #[tokio::test]
    async fn out_of_stock_is_reported_and_not_committed() {
        let (service, store) = service();
        service
            .register_batch("b1".into(), "SMALL-FORK".into(), 10, None)
            .await
            .unwrap();

        let err = service
            .allocate_order_line("o1".into(), "SMALL-FORK".into(), 11)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Allocation(AllocationError::OutOfStock { .. })
        ));
        assert_eq!(err.to_string(), "Out of stock for sku SMALL-FORK");
        assert_eq!(store.commit_count(), 1);
        let product = store.product(&Sku::new("SMALL-FORK")).await.unwrap();
        assert_eq!(product.available_quantity(), 10);
        assert_eq!(product.version(), Version::initial());
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected_before_opening_a_unit_of_work() {
        let (service, store) = service();

        let err = service
            .allocate_order_line("o1".into(), "CHAIR".into(), 0)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Allocation(AllocationError::InvalidQuantity { quantity: 0 })
        ));
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn prefers_warehouse_stock_over_shipments() {
        let (service, _) = service();
        service
            .register_batch("shipment".into(), "CLOCK".into(), 100, Some(today()))
            .await
            .unwrap();
        service
            .register_batch("in-stock".into(), "CLOCK".into(), 100, None)
            .await
            .unwrap();

        let reference = service
            .allocate_order_line("o1".into(), "CLOCK".into(), 10)
            .await
            .unwrap();

        assert_eq!(reference, "in-stock");
    }

    #[tokio::test]
    async fn reallocate_moves_line_to_preferred_batch() {
        let (service, store) = service();
        service
            .register_batch("late".into(), "SPOON".into(), 10, Some(today() + Days::new(7)))
            .await
            .unwrap();
        service
            .allocate_order_line("o1".into(), "SPOON".into(), 4)
            .await
            .unwrap();
        service
            .register_batch("early".into(), "SPOON".into(), 10, Some(today()))
            .await
            .unwrap();

        let reference = service
            .reallocate_order_line("o1".into(), "SPOON".into(), 4)
            .await
            .unwrap();

        assert_eq!(reference, "early");
        let product = store.product(&Sku::new("SPOON")).await.unwrap();
        let late = product.batch(&BatchReference::new("late")).unwrap();
        let early = product.batch(&BatchReference::new("early")).unwrap();
        assert_eq!(late.available_quantity(), 10);
        assert_eq!(early.available_quantity(), 6);
    }

    #[tokio::test]
    async fn reallocate_errors_for_invalid_sku() {
        let (service, _) = service();

        let err = service
            .reallocate_order_line("o1".into(), "NOPE".into(), 1)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InvalidSku { .. }));
    }

    #[tokio::test]
    async fn conflicting_commit_surfaces_as_store_error() {
        let (service, store) = service();
        service
            .register_batch("b1".into(), "DESK".into(), 10, None)
            .await
            .unwrap();

        // A unit of work that loaded the product before the service changed it.
        let mut stale = store.begin().await.unwrap();
        stale
            .products()
            .get(&Sku::new("DESK"))
            .await
            .unwrap()
            .unwrap()
            .allocate(&OrderLine::new("o2", "DESK", 1).unwrap())
            .unwrap();

        service
            .allocate_order_line("o1".into(), "DESK".into(), 2)
            .await
            .unwrap();
        let result = stale.commit().await;

        assert!(matches!(result, Err(StoreError::ConcurrencyConflict { .. })));
    }
}
