mod types;

pub use types::{BatchReference, OrderId, Sku};
