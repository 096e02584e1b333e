// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device settings storage.

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::Result;

/// The host's settings map for one device.
pub trait SettingsStore: Send + Sync {
    /// Returns all settings.
    fn get_all(&self) -> Map<String, Value>;

    /// Merges `changes` into the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`](crate::Error::Store) if the host rejects the patch.
    fn patch(&self, changes: Map<String, Value>) -> Result<()>;

    /// Returns one setting.
    fn get(&self, key: &str) -> Option<Value> {
        self.get_all().get(key).cloned()
    }
}

/// In-memory [`SettingsStore`] that records every patch.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<Map<String, Value>>,
    patches: RwLock<Vec<Map<String, Value>>>,
}

impl MemorySettingsStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `values`.
    #[must_use]
    pub fn with_values(values: Map<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
            patches: RwLock::default(),
        }
    }

    /// Returns every patch received, oldest first.
    #[must_use]
    pub fn patches(&self) -> Vec<Map<String, Value>> {
        self.patches.read().clone()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get_all(&self) -> Map<String, Value> {
        self.values.read().clone()
    }

    fn patch(&self, changes: Map<String, Value>) -> Result<()> {
        let mut values = self.values.write();
        for (key, value) in &changes {
            values.insert(key.clone(), value.clone());
        }
        self.patches.write().push(changes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_merges_and_records() {
        let mut initial = Map::new();
        initial.insert("address".to_string(), json!("10.0.0.5"));
        let store = MemorySettingsStore::with_values(initial);

        let mut changes = Map::new();
        changes.insert("child_lock".to_string(), json!(true));
        store.patch(changes).unwrap();

        assert_eq!(store.get("address"), Some(json!("10.0.0.5")));
        assert_eq!(store.get("child_lock"), Some(json!(true)));
        assert_eq!(store.patches().len(), 1);
    }
}
