use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{BatchReference, OrderId, Sku};
use domain::{Batch, OrderLine, Product, Version};
use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::identity_map::{IdentityMap, Tracked};
use crate::{ProductRepository, Result, StoreError, UnitOfWork, UnitOfWorkFactory};

const SERIALIZATION_FAILURE: &str = "40001";

/// PostgreSQL-backed product store.
///
/// Every unit of work runs in its own REPEATABLE READ transaction. Products
/// are written back with a compare-and-swap on `version_number`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWorkFactory for PostgresStore {
    type UnitOfWork = PostgresUnitOfWork;

    async fn begin(&self) -> Result<PostgresUnitOfWork> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        Ok(PostgresUnitOfWork {
            products: PostgresProductRepository {
                tx,
                tracked: IdentityMap::default(),
            },
        })
    }
}

/// Repository bound to the transaction of a [`PostgresUnitOfWork`].
pub struct PostgresProductRepository {
    tx: Transaction<'static, Postgres>,
    tracked: IdentityMap,
}

#[async_trait]
impl ProductRepository for PostgresProductRepository {
    async fn add(&mut self, product: Product) -> Result<()> {
        let sku = product.sku().clone();
        if self.tracked.contains(&sku) {
            return Err(StoreError::DuplicateProduct(sku));
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM products WHERE sku = $1)")
            .bind(sku.as_str())
            .fetch_one(&mut *self.tx)
            .await?;
        if exists {
            return Err(StoreError::DuplicateProduct(sku));
        }

        self.tracked.insert_new(product);
        Ok(())
    }

    async fn get<'a>(&'a mut self, sku: &Sku) -> Result<Option<&'a mut Product>> {
        if !self.tracked.contains(sku) {
            match load_product(&mut self.tx, sku).await? {
                Some(product) => self.tracked.insert_loaded(product),
                None => return Ok(None),
            }
        }

        Ok(self.tracked.get_mut(sku))
    }
}

/// Unit of work wrapping one PostgreSQL transaction.
///
/// Dropping it without calling `commit` drops the transaction, which sqlx
/// rolls back.
pub struct PostgresUnitOfWork {
    products: PostgresProductRepository,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    type Products = PostgresProductRepository;

    fn products(&mut self) -> &mut PostgresProductRepository {
        &mut self.products
    }

    async fn commit(self) -> Result<()> {
        let PostgresProductRepository { mut tx, tracked } = self.products;
        let count = tracked.len();

        for entry in tracked.into_entries() {
            save_product(&mut tx, &entry).await?;
        }

        tx.commit().await?;
        tracing::debug!(products = count, "committed postgres unit of work");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.products.tx.rollback().await?;
        tracing::debug!("rolled back postgres unit of work");
        Ok(())
    }
}

async fn load_product(conn: &mut PgConnection, sku: &Sku) -> Result<Option<Product>> {
    let row = sqlx::query("SELECT version_number FROM products WHERE sku = $1")
        .bind(sku.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let version = Version::new(row.try_get("version_number")?);

    let allocation_rows = sqlx::query(
        r#"
        SELECT a.batch_id, a.order_id, a.quantity
        FROM allocations a
        JOIN batches b ON b.id = a.batch_id
        WHERE b.sku = $1
        "#,
    )
    .bind(sku.as_str())
    .fetch_all(&mut *conn)
    .await?;

    let mut lines_by_batch: HashMap<i64, Vec<OrderLine>> = HashMap::new();
    for row in allocation_rows {
        let batch_id: i64 = row.try_get("batch_id")?;
        let order_id: String = row.try_get("order_id")?;
        let quantity = to_u32(row.try_get("quantity")?, "allocations.quantity")?;
        let line = OrderLine::new(OrderId::new(order_id), sku.clone(), quantity)
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        lines_by_batch.entry(batch_id).or_default().push(line);
    }

    let batch_rows = sqlx::query(
        r#"
        SELECT id, reference, purchased_quantity, eta
        FROM batches
        WHERE sku = $1
        ORDER BY id ASC
        "#,
    )
    .bind(sku.as_str())
    .fetch_all(&mut *conn)
    .await?;

    let mut batches = Vec::with_capacity(batch_rows.len());
    for row in batch_rows {
        let id: i64 = row.try_get("id")?;
        let reference: String = row.try_get("reference")?;
        let purchased = to_u32(row.try_get("purchased_quantity")?, "batches.purchased_quantity")?;
        let eta: Option<NaiveDate> = row.try_get("eta")?;
        batches.push(Batch::restore(
            BatchReference::new(reference),
            sku.clone(),
            purchased,
            eta,
            lines_by_batch.remove(&id).unwrap_or_default(),
        ));
    }

    let product = Product::with_version(sku.clone(), batches, version)
        .map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(Some(product))
}

async fn save_product(conn: &mut PgConnection, entry: &Tracked) -> Result<()> {
    let product = &entry.product;
    let sku = product.sku();

    match entry.loaded_version {
        None => {
            sqlx::query("INSERT INTO products (sku, version_number) VALUES ($1, $2)")
                .bind(sku.as_str())
                .bind(product.version().as_i64())
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    // Another unit of work created the same product first
                    if let sqlx::Error::Database(ref db_err) = e
                        && db_err.constraint() == Some("products_pkey")
                    {
                        return StoreError::DuplicateProduct(sku.clone());
                    }
                    StoreError::Database(e)
                })?;
        }
        Some(expected) => {
            let conflict = || {
                tracing::warn!(%sku, %expected, "concurrency conflict on commit");
                metrics::counter!("store_concurrency_conflicts_total").increment(1);
                StoreError::ConcurrencyConflict {
                    sku: sku.clone(),
                    expected,
                }
            };

            let result = sqlx::query(
                "UPDATE products SET version_number = $1 WHERE sku = $2 AND version_number = $3",
            )
            .bind(product.version().as_i64())
            .bind(sku.as_str())
            .bind(expected.as_i64())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                // REPEATABLE READ reports a concurrent update of the row this way
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.code().as_deref() == Some(SERIALIZATION_FAILURE)
                {
                    return conflict();
                }
                StoreError::Database(e)
            })?;

            if result.rows_affected() == 0 {
                return Err(conflict());
            }
        }
    }

    for batch in product.batches() {
        let batch_id = save_batch(&mut *conn, sku, batch).await?;
        save_allocations(&mut *conn, batch_id, batch).await?;
    }

    Ok(())
}

/// Inserts the batch if it is new and returns its row id.
async fn save_batch(conn: &mut PgConnection, sku: &Sku, batch: &Batch) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO batches (reference, sku, purchased_quantity, eta)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (reference) DO UPDATE SET reference = EXCLUDED.reference
        RETURNING id, sku
        "#,
    )
    .bind(batch.reference().as_str())
    .bind(sku.as_str())
    .bind(i64::from(batch.purchased_quantity()))
    .bind(batch.eta())
    .fetch_one(&mut *conn)
    .await?;

    let owner: String = row.try_get("sku")?;
    if owner != sku.as_str() {
        return Err(StoreError::DuplicateBatch(batch.reference().clone()));
    }

    Ok(row.try_get("id")?)
}

/// Replaces the stored allocation set of a batch.
async fn save_allocations(conn: &mut PgConnection, batch_id: i64, batch: &Batch) -> Result<()> {
    sqlx::query("DELETE FROM allocations WHERE batch_id = $1")
        .bind(batch_id)
        .execute(&mut *conn)
        .await?;

    for line in batch.allocations() {
        sqlx::query("INSERT INTO allocations (batch_id, order_id, quantity) VALUES ($1, $2, $3)")
            .bind(batch_id)
            .bind(line.order_id().as_str())
            .bind(i64::from(line.quantity()))
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Decode(format!("{column} out of range: {value}")))
}
