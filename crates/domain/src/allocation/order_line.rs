use common::{OrderId, Sku};

use super::AllocationError;

/// A customer's requested quantity of a SKU for an order.
///
/// Order lines are values: two lines are equal when order id, sku and
/// quantity all match, and equal lines hash identically. This is what makes
/// allocation idempotent, since a batch keeps its lines in a set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderLine {
    order_id: OrderId,
    sku: Sku,
    quantity: u32,
}

impl OrderLine {
    /// Creates a new order line.
    ///
    /// Fails with `InvalidQuantity` when `quantity` is zero.
    pub fn new(
        order_id: impl Into<OrderId>,
        sku: impl Into<Sku>,
        quantity: u32,
    ) -> Result<Self, AllocationError> {
        if quantity == 0 {
            return Err(AllocationError::InvalidQuantity { quantity });
        }

        Ok(Self {
            order_id: order_id.into(),
            sku: sku.into(),
            quantity,
        })
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }
}
