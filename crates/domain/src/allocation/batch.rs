use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use common::{BatchReference, Sku};

use super::OrderLine;

/// A purchased lot of a SKU with an optional expected arrival date.
///
/// Batches are entities: equality and hashing use the reference only.
/// A batch without an `eta` is stock already in the warehouse.
#[derive(Debug, Clone)]
pub struct Batch {
    reference: BatchReference,
    sku: Sku,
    eta: Option<NaiveDate>,
    purchased_quantity: u32,
    allocations: HashSet<OrderLine>,
}

impl Batch {
    /// Creates a batch with no allocations.
    pub fn new(
        reference: impl Into<BatchReference>,
        sku: impl Into<Sku>,
        purchased_quantity: u32,
        eta: Option<NaiveDate>,
    ) -> Self {
        Self {
            reference: reference.into(),
            sku: sku.into(),
            eta,
            purchased_quantity,
            allocations: HashSet::new(),
        }
    }

    /// Rebuilds a batch from persisted state.
    ///
    /// The allocations are taken as stored and are not re-checked against
    /// the available quantity.
    pub fn restore(
        reference: BatchReference,
        sku: Sku,
        purchased_quantity: u32,
        eta: Option<NaiveDate>,
        allocations: impl IntoIterator<Item = OrderLine>,
    ) -> Self {
        Self {
            reference,
            sku,
            eta,
            purchased_quantity,
            allocations: allocations.into_iter().collect(),
        }
    }

    pub fn reference(&self) -> &BatchReference {
        &self.reference
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn eta(&self) -> Option<NaiveDate> {
        self.eta
    }

    pub fn purchased_quantity(&self) -> u32 {
        self.purchased_quantity
    }

    /// Returns the order lines currently allocated to this batch.
    pub fn allocations(&self) -> impl Iterator<Item = &OrderLine> {
        self.allocations.iter()
    }

    /// Returns true if the line is allocated to this batch.
    pub fn is_allocated(&self, line: &OrderLine) -> bool {
        self.allocations.contains(line)
    }

    /// Sum of the quantities of all allocated lines.
    pub fn allocated_quantity(&self) -> u32 {
        self.allocations.iter().map(OrderLine::quantity).sum()
    }

    /// Purchased quantity minus allocated quantity. Never negative.
    pub fn available_quantity(&self) -> u32 {
        self.purchased_quantity.saturating_sub(self.allocated_quantity())
    }

    /// Returns true if the sku matches and enough stock is left for the line.
    pub fn can_allocate(&self, line: &OrderLine) -> bool {
        self.sku == *line.sku() && self.available_quantity() >= line.quantity()
    }

    /// Allocates the line to this batch.
    ///
    /// Allocating a line that is already present has no effect. A line that
    /// cannot be allocated is ignored without error: this is the best-effort
    /// primitive, `Product::allocate` is the operation that reports failure.
    pub fn allocate(&mut self, line: OrderLine) {
        if self.can_allocate(&line) {
            self.allocations.insert(line);
        }
    }

    /// Removes the line if it is allocated to this batch.
    ///
    /// Returns true if the line was removed.
    pub fn deallocate(&mut self, line: &OrderLine) -> bool {
        self.allocations.remove(line)
    }

    /// Sort key for allocation priority.
    ///
    /// `None` orders before any date, so warehouse stock is preferred over
    /// shipments, and earlier shipments over later ones.
    pub fn allocation_priority(&self) -> Option<NaiveDate> {
        self.eta
    }
}

impl PartialEq for Batch {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl Eq for Batch {}

impl Hash for Batch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.reference.hash(state);
    }
}
