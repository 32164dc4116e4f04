use std::collections::HashMap;

use common::Sku;
use domain::{Product, Version};

/// A product tracked by a unit of work.
#[derive(Debug)]
pub(crate) struct Tracked {
    pub product: Product,

    /// Version seen when the product was loaded; `None` for products added
    /// in this unit of work.
    pub loaded_version: Option<Version>,
}

/// Products loaded or added during one unit of work, keyed by sku.
#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    entries: HashMap<Sku, Tracked>,
}

impl IdentityMap {
    pub fn contains(&self, sku: &Sku) -> bool {
        self.entries.contains_key(sku)
    }

    pub fn get_mut(&mut self, sku: &Sku) -> Option<&mut Product> {
        self.entries.get_mut(sku).map(|tracked| &mut tracked.product)
    }

    pub fn insert_loaded(&mut self, product: Product) {
        let tracked = Tracked {
            loaded_version: Some(product.version()),
            product,
        };
        self.entries.insert(tracked.product.sku().clone(), tracked);
    }

    pub fn insert_new(&mut self, product: Product) {
        let tracked = Tracked {
            loaded_version: None,
            product,
        };
        self.entries.insert(tracked.product.sku().clone(), tracked);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn into_entries(self) -> impl Iterator<Item = Tracked> {
        self.entries.into_values()
    }
}
