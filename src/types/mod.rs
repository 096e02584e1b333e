// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types shared by the synchronization engine.
//!
//! # Types
//!
//! - [`PropertyAddress`] / [`ActionAddress`] - Composite remote keys (`siid`/`piid`, `siid`/`aiid`)
//! - [`CapabilityValue`] - A typed value exposed to the host
//! - [`ValueKind`] - How a raw property value maps to a capability value
//! - [`DayKey`] - Local calendar day used to reset daily counters

mod address;
mod day_key;
mod value;

pub use address::{ActionAddress, PropertyAddress};
pub use day_key::DayKey;
pub use value::{CapabilityValue, EnumOption, ValueKind};
