// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read results to capability updates.
//!
//! Reconciliation is synchronous and does no I/O. It compares each present
//! reading with the capability store and emits an update only when the
//! value differs. Absent readings leave the capability untouched; a failed
//! property never turns into `false` or `0`.
//!
//! Edge-triggered properties additionally fire a trigger when their value
//! differs from the previous observation. The first observation after
//! startup only records the baseline.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::model::ModelTable;
use crate::protocol::ReadResult;
use crate::state::{CapabilityStore, CapabilityUpdate};
use crate::types::CapabilityValue;

/// A detected transition of an edge-triggered property.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFiring {
    /// The trigger to fire.
    pub trigger_id: String,
    /// The property that changed.
    pub property: String,
    /// Value at the previous observation.
    pub previous: CapabilityValue,
    /// Value now.
    pub new: CapabilityValue,
}

impl TriggerFiring {
    /// Returns the trigger payload, `{"previous": .., "new": ..}`.
    #[must_use]
    pub fn payload(&self) -> Value {
        json!({
            "previous": self.previous.to_json(),
            "new": self.new.to_json(),
        })
    }
}

/// Output of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Capabilities whose value changed.
    pub updates: Vec<CapabilityUpdate>,
    /// Triggers to fire, at most one per property.
    pub triggers: Vec<TriggerFiring>,
}

impl Reconciliation {
    /// Returns `true` if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.triggers.is_empty()
    }
}

/// Keeps the last observation of each edge-triggered property.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    observed: HashMap<String, CapabilityValue>,
}

impl Reconciler {
    /// Creates a reconciler with no observations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last observed value of an edge-triggered property.
    #[must_use]
    pub fn observed(&self, property: &str) -> Option<&CapabilityValue> {
        self.observed.get(property)
    }

    /// Forgets all observations; the next pass records fresh baselines.
    pub fn reset(&mut self) {
        self.observed.clear();
    }

    /// Maps `result` onto the capabilities of `table`.
    ///
    /// Only capabilities registered in `store` receive updates. The store is
    /// read, never written.
    pub fn apply(
        &mut self,
        table: &ModelTable,
        result: &ReadResult,
        store: &dyn CapabilityStore,
    ) -> Reconciliation {
        let mut out = Reconciliation::default();

        for spec in table.properties() {
            let Some(raw) = result.value(&spec.name) else {
                continue;
            };
            let Some(value) = spec.kind.decode(raw) else {
                tracing::debug!(property = %spec.name, %raw, "Ignoring undecodable value");
                continue;
            };

            if let Some(trigger_id) = &spec.trigger {
                let previous = self.observed.insert(spec.name.clone(), value.clone());
                if let Some(previous) = previous.filter(|p| *p != value) {
                    out.triggers.push(TriggerFiring {
                        trigger_id: trigger_id.clone(),
                        property: spec.name.clone(),
                        previous,
                        new: value.clone(),
                    });
                }
            }

            if spec.exposed && store.has(&spec.name) && store.get(&spec.name).as_ref() != Some(&value) {
                out.updates.push(CapabilityUpdate::new(spec.name.clone(), value));
            }
        }

        out
    }
}
