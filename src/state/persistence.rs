// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Durable derived-state records.
//!
//! The derived-state tracker keeps counters that must survive restarts. The
//! record is read once when a device starts and written only when it
//! changes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::DeviceId;
use crate::types::DayKey;

/// Persisted state of the daily counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedRecord {
    /// Local day the accumulator belongs to.
    #[serde(default)]
    pub epoch_key: Option<DayKey>,
    /// Consumption counted so far today.
    #[serde(default)]
    pub accumulated: f64,
    /// Decreases held back while a run is in progress.
    #[serde(default)]
    pub pending_delta: f64,
    /// Last proxy reading, the baseline for the next decrease.
    #[serde(default)]
    pub last_proxy: Option<f64>,
    /// Whether a run was in progress at the last poll.
    #[serde(default)]
    pub dispensing: bool,
    /// Last requested run amount.
    #[serde(default)]
    pub last_target: Option<f64>,
}

/// Storage for [`DerivedRecord`]s, keyed by device.
pub trait DerivedStateStore: Send + Sync {
    /// Loads the record of `device`, or `None` if none was saved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if a record exists but cannot be read.
    fn load(&self, device: DeviceId) -> Result<Option<DerivedRecord>>;

    /// Saves the record of `device`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the record cannot be written.
    fn save(&self, device: DeviceId, record: &DerivedRecord) -> Result<()>;
}

/// In-memory [`DerivedStateStore`] that counts saves.
#[derive(Debug, Default)]
pub struct MemoryDerivedStore {
    records: RwLock<HashMap<DeviceId, DerivedRecord>>,
    saves: RwLock<usize>,
}

impl MemoryDerivedStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the record of `device`.
    pub fn insert(&self, device: DeviceId, record: DerivedRecord) {
        self.records.write().insert(device, record);
    }

    /// Returns the number of saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        *self.saves.read()
    }
}

impl DerivedStateStore for MemoryDerivedStore {
    fn load(&self, device: DeviceId) -> Result<Option<DerivedRecord>> {
        Ok(self.records.read().get(&device).cloned())
    }

    fn save(&self, device: DeviceId, record: &DerivedRecord) -> Result<()> {
        self.records.write().insert(device, record.clone());
        *self.saves.write() += 1;
        Ok(())
    }
}

/// One JSON file per device under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, device: DeviceId) -> PathBuf {
        self.dir.join(format!("{device}.json"))
    }
}

impl DerivedStateStore for JsonFileStore {
    fn load(&self, device: DeviceId) -> Result<Option<DerivedRecord>> {
        let path = self.path(device);
        if !path.exists() {
            tracing::debug!(%device, path = %path.display(), "No derived record on disk");
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| Error::Persistence(format!("failed to read {}: {e}", path.display())))?;
        let record = serde_json::from_str(&contents)
            .map_err(|e| Error::Persistence(format!("failed to parse {}: {e}", path.display())))?;

        tracing::debug!(%device, path = %path.display(), "Loaded derived record");
        Ok(Some(record))
    }

    fn save(&self, device: DeviceId, record: &DerivedRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Persistence(format!("failed to create {}: {e}", self.dir.display()))
        })?;

        let path = self.path(device);
        let contents = serde_json::to_string_pretty(record)
            .map_err(|e| Error::Persistence(e.to_string()))?;

        // Atomic replace: readers never see a partial record.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| Error::Persistence(format!("failed to write {}: {e}", path.display())))?;

        tracing::debug!(%device, path = %path.display(), "Saved derived record");
        Ok(())
    }
}
