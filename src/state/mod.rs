// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side state the engine reads and writes.
//!
//! The host owns three stores: capability values, device settings and a
//! durable record per device. The engine sees them only through the traits
//! in this module, so any host storage can be plugged in. In-memory and
//! file-backed implementations are provided.
//!
//! # Examples
//!
//! ```
//! use miot_sync::state::{CapabilityStore, CapabilityUpdate, MemoryCapabilityStore};
//!
//! let store = MemoryCapabilityStore::with_capabilities(["power"]);
//!
//! // Apply returns true if the value actually changed
//! let update = CapabilityUpdate::new("power", true);
//! assert!(store.apply(&update).unwrap());
//! assert!(!store.apply(&update).unwrap());
//! ```

mod capability_store;
mod persistence;
mod settings;
mod update;

pub use capability_store::{CapabilityStore, MemoryCapabilityStore};
pub use persistence::{DerivedRecord, DerivedStateStore, JsonFileStore, MemoryDerivedStore};
pub use settings::{MemorySettingsStore, SettingsStore};
pub use update::CapabilityUpdate;
