//! Table placement: which engines hold a full copy of each table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::{Engine, EngineBitmap};

/// Ordered so that serialization and fingerprints are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TablePlacement(BTreeMap<String, EngineBitmap>);

impl TablePlacement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every table starts on no engine; used to seed planning candidates.
    pub fn empty_for<'a, I: IntoIterator<Item = &'a str>>(tables: I) -> Self {
        Self(
            tables
                .into_iter()
                .map(|t| (t.to_string(), EngineBitmap::EMPTY))
                .collect(),
        )
    }

    pub fn set(&mut self, table: impl Into<String>, bitmap: EngineBitmap) {
        self.0.insert(table.into(), bitmap);
    }

    pub fn get(&self, table: &str) -> Option<EngineBitmap> {
        self.0.get(table).copied()
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.0.contains_key(table)
    }

    /// ORs `engine` into a known table. Returns the bitmap before the change,
    /// or `None` when the table is unknown (e.g. a CTE name).
    pub fn add_engine(&mut self, table: &str, engine: Engine) -> Option<EngineBitmap> {
        let slot = self.0.get_mut(table)?;
        let before = *slot;
        slot.insert(engine);
        Some(before)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, EngineBitmap)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Union of all bitmaps: the engines that hold at least one table.
    pub fn engines_in_use(&self) -> EngineBitmap {
        self.0
            .values()
            .fold(EngineBitmap::EMPTY, |acc, bm| acc | *bm)
    }

    /// Tables hosted on no engine.
    pub fn unplaced(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, bm)| bm.is_empty())
            .map(|(k, _)| k.as_str())
    }
}

impl FromIterator<(String, EngineBitmap)> for TablePlacement {
    fn from_iter<T: IntoIterator<Item = (String, EngineBitmap)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
