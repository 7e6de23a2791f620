//! Where units and their fields come from.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Field, Unit, UnitId};
use crate::error::{GuardError, Result};

/// Lists the units of a project and the fields of each unit.
///
/// The runner reads the inventory once per run and treats the result as an
/// immutable snapshot.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// Every unit available for selection.
    async fn units(&self) -> Result<Vec<UnitId>>;

    /// The ordered fields of `unit`.
    async fn fields(&self, unit: &UnitId) -> Result<Vec<Field>>;
}

#[async_trait]
impl<T: InventoryProvider + ?Sized> InventoryProvider for Arc<T> {
    async fn units(&self) -> Result<Vec<UnitId>> {
        (**self).units().await
    }

    async fn fields(&self, unit: &UnitId) -> Result<Vec<Field>> {
        (**self).fields(unit).await
    }
}

/// An inventory held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    units: BTreeMap<UnitId, Vec<Field>>,
}

impl StaticInventory {
    /// Builds an inventory from complete units.
    pub fn new<I>(units: I) -> Self
    where
        I: IntoIterator<Item = Unit>,
    {
        Self {
            units: units.into_iter().map(|u| (u.id, u.fields)).collect(),
        }
    }

    /// Adds or replaces a unit.
    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.units.insert(unit.id, unit.fields);
        self
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns true if the inventory holds no unit.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[async_trait]
impl InventoryProvider for StaticInventory {
    async fn units(&self) -> Result<Vec<UnitId>> {
        Ok(self.units.keys().cloned().collect())
    }

    async fn fields(&self, unit: &UnitId) -> Result<Vec<Field>> {
        self.units
            .get(unit)
            .cloned()
            .ok_or_else(|| GuardError::inventory(format!("unit '{unit}' not found")))
    }
}
