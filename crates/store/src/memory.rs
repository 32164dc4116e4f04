use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::Sku;
use domain::Product;
use tokio::sync::RwLock;

use crate::identity_map::{IdentityMap, Tracked};
use crate::{ProductRepository, Result, StoreError, UnitOfWork, UnitOfWorkFactory};

/// A committed product and its write stamp.
///
/// The stamp increments on every commit that writes the product, including
/// commits that leave `version_number` unchanged such as adding a batch.
#[derive(Debug, Clone)]
struct Stored {
    product: Product,
    stamp: u64,
}

/// In-memory product store for testing.
///
/// Units of work operate on private copies of the products they load and
/// only write them back on commit, so an uncommitted unit of work leaves
/// the store untouched. A commit fails with `ConcurrencyConflict` if any
/// product it loaded was written by another commit in the meantime.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    products: Arc<RwLock<HashMap<Sku, Stored>>>,
    commits: Arc<AtomicUsize>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh copy of the stored product, ignoring any open unit of work.
    pub async fn product(&self, sku: &Sku) -> Option<Product> {
        self.products
            .read()
            .await
            .get(sku)
            .map(|stored| stored.product.clone())
    }

    /// Returns the number of stored products.
    pub async fn product_count(&self) -> usize {
        self.products.read().await.len()
    }

    /// Returns how many units of work have committed successfully.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnitOfWorkFactory for InMemoryStore {
    type UnitOfWork = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<InMemoryUnitOfWork> {
        Ok(InMemoryUnitOfWork {
            products: InMemoryProductRepository {
                store: self.clone(),
                tracked: IdentityMap::default(),
                loaded_stamps: HashMap::new(),
            },
        })
    }
}

/// Repository over an [`InMemoryStore`], scoped to one unit of work.
pub struct InMemoryProductRepository {
    store: InMemoryStore,
    tracked: IdentityMap,

    /// Write stamp of each product at the time it was loaded.
    loaded_stamps: HashMap<Sku, u64>,
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn add(&mut self, product: Product) -> Result<()> {
        let sku = product.sku().clone();
        if self.tracked.contains(&sku) || self.store.products.read().await.contains_key(&sku) {
            return Err(StoreError::DuplicateProduct(sku));
        }

        self.tracked.insert_new(product);
        Ok(())
    }

    async fn get<'a>(&'a mut self, sku: &Sku) -> Result<Option<&'a mut Product>> {
        if !self.tracked.contains(sku) {
            let stored = self.store.products.read().await.get(sku).cloned();
            match stored {
                Some(Stored { product, stamp }) => {
                    self.loaded_stamps.insert(sku.clone(), stamp);
                    self.tracked.insert_loaded(product);
                }
                None => return Ok(None),
            }
        }

        Ok(self.tracked.get_mut(sku))
    }
}

/// Unit of work over an [`InMemoryStore`].
pub struct InMemoryUnitOfWork {
    products: InMemoryProductRepository,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    type Products = InMemoryProductRepository;

    fn products(&mut self) -> &mut InMemoryProductRepository {
        &mut self.products
    }

    async fn commit(self) -> Result<()> {
        let InMemoryProductRepository {
            store,
            tracked,
            loaded_stamps,
        } = self.products;
        let count = tracked.len();
        let entries: Vec<Tracked> = tracked.into_entries().collect();

        let mut products = store.products.write().await;

        // Check everything before writing anything.
        for entry in &entries {
            let loaded_stamp = loaded_stamps.get(entry.product.sku()).copied();
            check_writable(&products, entry, loaded_stamp)?;
        }

        for entry in entries {
            let sku = entry.product.sku().clone();
            let stamp = products.get(&sku).map_or(0, |stored| stored.stamp) + 1;
            products.insert(
                sku,
                Stored {
                    product: entry.product,
                    stamp,
                },
            );
        }

        store.commits.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(products = count, "committed in-memory unit of work");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        tracing::debug!("rolled back in-memory unit of work");
        Ok(())
    }
}

fn check_writable(
    products: &HashMap<Sku, Stored>,
    entry: &Tracked,
    loaded_stamp: Option<u64>,
) -> Result<()> {
    let sku = entry.product.sku();

    match (entry.loaded_version, products.get(sku)) {
        (None, Some(_)) => Err(StoreError::DuplicateProduct(sku.clone())),
        (Some(expected), stored) => {
            let current_stamp = stored.map(|s| s.stamp);
            if current_stamp.is_none() || current_stamp != loaded_stamp {
                let actual = stored.map(|s| s.product.version());
                tracing::warn!(%sku, %expected, ?actual, "concurrency conflict on commit");
                metrics::counter!("store_concurrency_conflicts_total").increment(1);
                return Err(StoreError::ConcurrencyConflict {
                    sku: sku.clone(),
                    expected,
                });
            }
            check_batch_references(products, entry)
        }
        (None, None) => check_batch_references(products, entry),
    }
}

/// Batch references are unique across all products.
fn check_batch_references(products: &HashMap<Sku, Stored>, entry: &Tracked) -> Result<()> {
    let sku = entry.product.sku();
    for batch in entry.product.batches() {
        let taken = products
            .values()
            .map(|stored| &stored.product)
            .filter(|other| other.sku() != sku)
            .any(|other| other.batch(batch.reference()).is_some());
        if taken {
            return Err(StoreError::DuplicateBatch(batch.reference().clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use domain::{Batch, OrderLine, Version};

    use super::*;

    fn sku(s: &str) -> Sku {
        Sku::new(s)
    }

    async fn seeded_store(sku: &str, batches: Vec<Batch>) -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.products()
            .add(Product::new(sku, batches).unwrap())
            .await
            .unwrap();
        uow.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn commit_persists_added_product() {
        let store = seeded_store("CHAIR", vec![Batch::new("b1", "CHAIR", 10, None)]).await;

        let product = store.product(&sku("CHAIR")).await.unwrap();
        assert_eq!(product.batches().len(), 1);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_sku() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();

        assert!(uow.products().get(&sku("NOPE")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn uncommitted_work_is_rolled_back_on_drop() {
        let store = seeded_store("CHAIR", vec![Batch::new("b1", "CHAIR", 10, None)]).await;

        {
            let mut uow = store.begin().await.unwrap();
            let product = uow.products().get(&sku("CHAIR")).await.unwrap().unwrap();
            product
                .allocate(&OrderLine::new("o1", "CHAIR", 5).unwrap())
                .unwrap();
        }

        let product = store.product(&sku("CHAIR")).await.unwrap();
        assert_eq!(product.available_quantity(), 10);
        assert_eq!(product.version(), Version::initial());
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn explicit_rollback_discards_changes() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.products()
            .add(Product::new("LAMP", vec![]).unwrap())
            .await
            .unwrap();

        uow.rollback().await.unwrap();

        assert_eq!(store.product_count().await, 0);
    }

    #[tokio::test]
    async fn repeated_get_returns_tracked_instance() {
        let store = seeded_store("CHAIR", vec![Batch::new("b1", "CHAIR", 10, None)]).await;
        let mut uow = store.begin().await.unwrap();

        let line = OrderLine::new("o1", "CHAIR", 3).unwrap();
        uow.products()
            .get(&sku("CHAIR"))
            .await
            .unwrap()
            .unwrap()
            .allocate(&line)
            .unwrap();
        let again = uow.products().get(&sku("CHAIR")).await.unwrap().unwrap();

        assert_eq!(again.available_quantity(), 7);
    }

    #[tokio::test]
    async fn adding_existing_product_fails() {
        let store = seeded_store("CHAIR", vec![]).await;
        let mut uow = store.begin().await.unwrap();

        let result = uow.products().add(Product::new("CHAIR", vec![]).unwrap()).await;

        assert!(matches!(result, Err(StoreError::DuplicateProduct(_))));
    }

    #[tokio::test]
    async fn concurrent_allocations_conflict() {
        let store = seeded_store("CHAIR", vec![Batch::new("b1", "CHAIR", 10, None)]).await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        first
            .products()
            .get(&sku("CHAIR"))
            .await
            .unwrap()
            .unwrap()
            .allocate(&OrderLine::new("o1", "CHAIR", 2).unwrap())
            .unwrap();
        second
            .products()
            .get(&sku("CHAIR"))
            .await
            .unwrap()
            .unwrap()
            .allocate(&OrderLine::new("o2", "CHAIR", 3).unwrap())
            .unwrap();

        first.commit().await.unwrap();
        let result = second.commit().await;

        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict { expected, .. }) if expected == Version::initial()
        ));
        let product = store.product(&sku("CHAIR")).await.unwrap();
        assert_eq!(product.available_quantity(), 8);
        assert_eq!(product.version(), Version::new(1));
    }

    #[tokio::test]
    async fn batch_references_are_unique_across_products() {
        let store = seeded_store("CHAIR", vec![Batch::new("b1", "CHAIR", 10, None)]).await;
        let mut uow = store.begin().await.unwrap();
        uow.products()
            .add(Product::new("LAMP", vec![Batch::new("b1", "LAMP", 5, None)]).unwrap())
            .await
            .unwrap();

        let result = uow.commit().await;

        assert!(matches!(result, Err(StoreError::DuplicateBatch(_))));
        assert!(store.product(&sku("LAMP")).await.is_none());
    }

    #[tokio::test]
    async fn stale_allocation_cannot_overwrite_added_batch() {
        let store = seeded_store("CHAIR", vec![Batch::new("b1", "CHAIR", 10, None)]).await;

        let mut stale = store.begin().await.unwrap();
        stale
            .products()
            .get(&sku("CHAIR"))
            .await
            .unwrap()
            .unwrap()
            .allocate(&OrderLine::new("o1", "CHAIR", 2).unwrap())
            .unwrap();

        let mut restock = store.begin().await.unwrap();
        restock
            .products()
            .get(&sku("CHAIR"))
            .await
            .unwrap()
            .unwrap()
            .add_batch(Batch::new("b2", "CHAIR", 5, None))
            .unwrap();
        restock.commit().await.unwrap();

        let result = stale.commit().await;

        assert!(matches!(result, Err(StoreError::ConcurrencyConflict { .. })));
        let product = store.product(&sku("CHAIR")).await.unwrap();
        assert_eq!(product.batches().len(), 2);
        assert_eq!(product.available_quantity(), 15);
        assert_eq!(product.version(), Version::initial());
    }

    #[tokio::test]
    async fn concurrent_batch_additions_conflict() {
        let store = seeded_store("CHAIR", vec![Batch::new("b1", "CHAIR", 10, None)]).await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        for (uow, reference) in [(&mut first, "b2"), (&mut second, "b3")] {
            uow.products()
                .get(&sku("CHAIR"))
                .await
                .unwrap()
                .unwrap()
                .add_batch(Batch::new(reference, "CHAIR", 5, None))
                .unwrap();
        }

        first.commit().await.unwrap();
        let result = second.commit().await;

        assert!(matches!(result, Err(StoreError::ConcurrencyConflict { .. })));
        let product = store.product(&sku("CHAIR")).await.unwrap();
        let references: Vec<&str> = product
            .batches()
            .iter()
            .map(|b| b.reference().as_str())
            .collect();
        assert_eq!(references, vec!["b1", "b2"]);
    }
}
