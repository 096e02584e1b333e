// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The synchronization engine.
//!
//! - [`ConnectionManager`]: transport ownership, availability, reconnects
//! - [`Reconciler`]: read results to capability updates and triggers
//! - [`DerivedStateTracker`]: daily counters, consumables, durations
//! - [`Dispatcher`]: capability intents and settings to remote writes
//!
//! [`Device`](crate::Device) wires them into a poll cycle.

mod connection;
mod derived;
mod dispatch;
mod reconcile;

pub use connection::{ConnectionManager, ConnectionState};
pub use derived::{DerivedSnapshot, DerivedStateTracker, days_to_percent, percent_to_days};
pub use dispatch::{Ack, Dispatcher, InFlightToken, InFlightWrites, WriteJournal};
pub use reconcile::{Reconciler, Reconciliation, TriggerFiring};
