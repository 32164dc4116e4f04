//! Product aggregate.

use common::{BatchReference, Sku};

use crate::version::Version;

use super::{AllocationError, Batch, OrderLine};

/// Product aggregate root.
///
/// A product owns every batch of its SKU and is the consistency boundary for
/// allocation: no oversell is checked across the whole batch collection at
/// once. It is also the unit of optimistic concurrency control through its
/// version number.
#[derive(Debug, Clone)]
pub struct Product {
    sku: Sku,

    /// Batches in insertion order. References are unique.
    batches: Vec<Batch>,

    /// Incremented once per successful allocation.
    version_number: Version,
}

impl Product {
    /// Creates a product at the initial version.
    ///
    /// Batches of another SKU and duplicate references are rejected.
    pub fn new(sku: impl Into<Sku>, batches: Vec<Batch>) -> Result<Self, AllocationError> {
        Self::with_version(sku, batches, Version::initial())
    }

    /// Creates a product at a given version, e.g. when loading from storage.
    pub fn with_version(
        sku: impl Into<Sku>,
        batches: Vec<Batch>,
        version_number: Version,
    ) -> Result<Self, AllocationError> {
        let mut product = Self {
            sku: sku.into(),
            batches: Vec::with_capacity(batches.len()),
            version_number,
        };
        for batch in batches {
            product.add_batch(batch)?;
        }
        Ok(product)
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn version(&self) -> Version {
        self.version_number
    }

    /// Returns the batches in insertion order.
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Returns a batch by reference.
    pub fn batch(&self, reference: &BatchReference) -> Option<&Batch> {
        self.batches.iter().find(|b| b.reference() == reference)
    }

    /// Returns the reference of the batch the line is allocated to, if any.
    pub fn allocated_batch_for(&self, line: &OrderLine) -> Option<&BatchReference> {
        self.batches
            .iter()
            .find(|b| b.is_allocated(line))
            .map(Batch::reference)
    }

    /// Total available quantity across all batches.
    pub fn available_quantity(&self) -> u32 {
        self.batches.iter().map(Batch::available_quantity).sum()
    }

    /// Appends a newly purchased batch.
    pub fn add_batch(&mut self, batch: Batch) -> Result<(), AllocationError> {
        if batch.sku() != &self.sku {
            return Err(AllocationError::SkuMismatch {
                reference: batch.reference().clone(),
                expected: self.sku.clone(),
                actual: batch.sku().clone(),
            });
        }

        if self.batch(batch.reference()).is_some() {
            return Err(AllocationError::DuplicateBatch {
                reference: batch.reference().clone(),
                sku: self.sku.clone(),
            });
        }

        self.batches.push(batch);
        Ok(())
    }

    /// Allocates the line to the preferred batch that can take it.
    ///
    /// Batches are tried in priority order: warehouse stock (no eta) first,
    /// then shipments by earliest eta; ties keep insertion order. A line that
    /// is already allocated stays where it is. On success the version is
    /// incremented and the chosen batch reference returned.
    pub fn allocate(&mut self, line: &OrderLine) -> Result<BatchReference, AllocationError> {
        if let Some(existing) = self.allocated_batch_for(line) {
            let reference = existing.clone();
            self.version_number = self.version_number.next();
            return Ok(reference);
        }

        let mut candidates: Vec<&mut Batch> = self.batches.iter_mut().collect();
        candidates.sort_by_key(|batch| batch.allocation_priority());

        let batch = candidates
            .into_iter()
            .find(|batch| batch.can_allocate(line))
            .ok_or_else(|| AllocationError::OutOfStock {
                sku: line.sku().clone(),
            })?;

        batch.allocate(line.clone());
        let reference = batch.reference().clone();
        self.version_number = self.version_number.next();

        Ok(reference)
    }

    /// Removes the line from whichever batch holds it.
    ///
    /// Returns the reference of that batch, or None if the line was not
    /// allocated. The version is not changed.
    pub fn deallocate(&mut self, line: &OrderLine) -> Option<BatchReference> {
        self.batches
            .iter_mut()
            .find(|b| b.is_allocated(line))
            .map(|batch| {
                batch.deallocate(line);
                batch.reference().clone()
            })
    }
}
