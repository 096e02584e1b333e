// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability storage.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::CapabilityUpdate;
use crate::error::{Error, Result};
use crate::types::CapabilityValue;

/// The host's capability model for one device.
///
/// A capability must be registered with [`add`](Self::add) before it holds
/// a value. The engine never sets unregistered capabilities.
pub trait CapabilityStore: Send + Sync {
    /// Returns the current value of `name`, if registered and known.
    fn get(&self, name: &str) -> Option<CapabilityValue>;

    /// Sets the value of a registered capability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the capability is not registered or the
    /// host rejects the value.
    fn set(&self, name: &str, value: CapabilityValue) -> Result<()>;

    /// Returns `true` if `name` is registered.
    fn has(&self, name: &str) -> bool;

    /// Registers `name`. Registering twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the host rejects the capability.
    fn add(&self, name: &str) -> Result<()>;

    /// Unregisters `name`. Removing an unknown capability is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the host rejects the removal.
    fn remove(&self, name: &str) -> Result<()>;

    /// Applies an update, returning `true` if the stored value changed.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`set`](Self::set).
    fn apply(&self, update: &CapabilityUpdate) -> Result<bool> {
        if self.get(&update.name).as_ref() == Some(&update.value) {
            return Ok(false);
        }
        self.set(&update.name, update.value.clone())?;
        Ok(true)
    }
}

/// In-memory [`CapabilityStore`].
#[derive(Debug, Default)]
pub struct MemoryCapabilityStore {
    values: RwLock<BTreeMap<String, Option<CapabilityValue>>>,
}

impl MemoryCapabilityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with the given capabilities registered.
    #[must_use]
    pub fn with_capabilities<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: RwLock::new(names.into_iter().map(|n| (n.into(), None)).collect()),
        }
    }

    /// Returns the registered capability names in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    /// Returns all known values.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, CapabilityValue> {
        self.values
            .read()
            .iter()
            .filter_map(|(n, v)| v.clone().map(|v| (n.clone(), v)))
            .collect()
    }
}

impl CapabilityStore for MemoryCapabilityStore {
    fn get(&self, name: &str) -> Option<CapabilityValue> {
        self.values.read().get(name).cloned().flatten()
    }

    fn set(&self, name: &str, value: CapabilityValue) -> Result<()> {
        match self.values.write().get_mut(name) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(Error::Store(format!("capability {name} is not registered"))),
        }
    }

    fn has(&self, name: &str) -> bool {
        self.values.read().contains_key(name)
    }

    fn add(&self, name: &str) -> Result<()> {
        self.values.write().entry(name.to_string()).or_insert(None);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.values.write().remove(name);
        Ok(())
    }
}
