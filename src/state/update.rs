// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability updates.
//!
//! Updates are produced by reconciliation and the derived-state tracker and
//! applied to a [`CapabilityStore`](super::CapabilityStore). Applying is
//! idempotent: an update equal to the stored value changes nothing.

use serde::{Deserialize, Serialize};

use crate::types::CapabilityValue;

/// A new value for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityUpdate {
    /// The capability name.
    pub name: String,
    /// The new value.
    pub value: CapabilityValue,
    /// `true` if the value is a heuristic estimate.
    #[serde(default)]
    pub estimate: bool,
}

impl CapabilityUpdate {
    /// Creates an exact update.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<CapabilityValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            estimate: false,
        }
    }

    /// Creates an update flagged as an estimate.
    #[must_use]
    pub fn estimated(name: impl Into<String>, value: impl Into<CapabilityValue>) -> Self {
        Self {
            estimate: true,
            ..Self::new(name, value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimated_sets_flag() {
        let update = CapabilityUpdate::estimated("food_today", 10.0);
        assert!(update.estimate);
        assert_eq!(update.value, CapabilityValue::Number(10.0));
        assert!(!CapabilityUpdate::new("power", true).estimate);
    }
}
