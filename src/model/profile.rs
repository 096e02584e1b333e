// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Derived-state profiles.
//!
//! A profile tells the derived-state tracker which raw properties feed which
//! computed capabilities. All property names refer to entries of the owning
//! [`ModelTable`](super::ModelTable).

use serde::{Deserialize, Serialize};

/// Progress at or above this percentage counts as "done".
pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 99.5;

/// Raw durations above this value are read as hours.
pub const DEFAULT_HOURS_THRESHOLD: f64 = 400.0;

/// Everything the tracker derives for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedProfile {
    /// Daily consumption counter, if the model has one.
    #[serde(default)]
    pub daily: Option<DailyCounterSpec>,
    /// Consumables with percentage/days cross-derivation.
    #[serde(default)]
    pub consumables: Vec<ConsumableSpec>,
    /// Time-remaining values that may be reported in hours.
    #[serde(default)]
    pub durations: Vec<DurationSpec>,
}

impl DerivedProfile {
    /// Returns `true` if the profile derives nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.daily.is_none() && self.consumables.is_empty() && self.durations.is_empty()
    }

    /// Names of all capabilities written by the tracker.
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.daily
            .iter()
            .map(|d| d.output.as_str())
            .chain(
                self.consumables
                    .iter()
                    .flat_map(|c| [c.percent_output.as_str(), c.days_output.as_str()]),
            )
            .chain(self.durations.iter().map(|d| d.output.as_str()))
    }
}

/// A counter of today's consumption, reset at the local day boundary.
///
/// When `absolute` names a property, the device's own "today" counter is
/// authoritative. Otherwise decreases of `proxy` (a level sensor) are
/// accumulated, held back while `progress` is below the completion
/// threshold. Without a proxy, each completed run credits the last `target`
/// amount, or `default_dose`, as an estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCounterSpec {
    /// Capability receiving the accumulated value.
    pub output: String,
    /// Device-reported total for today.
    #[serde(default)]
    pub absolute: Option<String>,
    /// Level sensor whose decreases count as consumption.
    #[serde(default)]
    pub proxy: Option<String>,
    /// Progress percentage of the current run.
    #[serde(default)]
    pub progress: Option<String>,
    /// Requested amount of the current run.
    #[serde(default)]
    pub target: Option<String>,
    /// Progress at which a run counts as complete.
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: f64,
    /// Amount credited per run when neither proxy nor target is known.
    #[serde(default)]
    pub default_dose: f64,
}

fn default_completion_threshold() -> f64 {
    DEFAULT_COMPLETION_THRESHOLD
}

impl DailyCounterSpec {
    /// Counter fed by the device's own daily total.
    #[must_use]
    pub fn absolute(output: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            absolute: Some(property.into()),
            proxy: None,
            progress: None,
            target: None,
            completion_threshold: DEFAULT_COMPLETION_THRESHOLD,
            default_dose: 0.0,
        }
    }

    /// Counter fed by decreases of a level sensor.
    #[must_use]
    pub fn proxy(output: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            proxy: Some(property.into()),
            absolute: None,
            ..Self::absolute(output, String::new())
        }
    }

    /// Counter fed by completed runs only.
    #[must_use]
    pub fn runs(output: impl Into<String>, progress: impl Into<String>) -> Self {
        Self {
            absolute: None,
            progress: Some(progress.into()),
            ..Self::absolute(output, String::new())
        }
    }

    /// Gates proxy decreases on `progress`.
    #[must_use]
    pub fn with_progress(mut self, property: impl Into<String>) -> Self {
        self.progress = Some(property.into());
        self
    }

    /// Uses `property` as the expected amount of a run.
    #[must_use]
    pub fn with_target(mut self, property: impl Into<String>) -> Self {
        self.target = Some(property.into());
        self
    }

    /// Sets the completion threshold.
    #[must_use]
    pub fn with_completion_threshold(mut self, threshold: f64) -> Self {
        self.completion_threshold = threshold;
        self
    }

    /// Sets the fallback amount per run.
    #[must_use]
    pub fn with_default_dose(mut self, dose: f64) -> Self {
        self.default_dose = dose;
        self
    }
}

/// A consumable reported as a percentage, a number of days left, or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumableSpec {
    /// Property reporting the remaining percentage.
    #[serde(default)]
    pub percent: Option<String>,
    /// Property reporting the remaining days.
    #[serde(default)]
    pub days: Option<String>,
    /// Days of a fresh consumable; maps 100 % to days.
    pub capacity_days: f64,
    /// Capability receiving the percentage.
    pub percent_output: String,
    /// Capability receiving the days.
    pub days_output: String,
}

impl ConsumableSpec {
    /// Creates a consumable with the given outputs and capacity.
    #[must_use]
    pub fn new(
        percent_output: impl Into<String>,
        days_output: impl Into<String>,
        capacity_days: f64,
    ) -> Self {
        Self {
            percent: None,
            days: None,
            capacity_days,
            percent_output: percent_output.into(),
            days_output: days_output.into(),
        }
    }

    /// Reads the percentage from `property`.
    #[must_use]
    pub fn with_percent(mut self, property: impl Into<String>) -> Self {
        self.percent = Some(property.into());
        self
    }

    /// Reads the days from `property`.
    #[must_use]
    pub fn with_days(mut self, property: impl Into<String>) -> Self {
        self.days = Some(property.into());
        self
    }
}

/// A time-remaining value whose unit the firmware does not state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationSpec {
    /// Raw property.
    pub property: String,
    /// Capability receiving the value in days.
    pub output: String,
    /// Raw values above this are hours.
    #[serde(default = "default_hours_threshold")]
    pub hours_threshold: f64,
}

fn default_hours_threshold() -> f64 {
    DEFAULT_HOURS_THRESHOLD
}

impl DurationSpec {
    /// Creates a duration with the default threshold.
    #[must_use]
    pub fn new(property: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            output: output.into(),
            hours_threshold: DEFAULT_HOURS_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_cover_every_section() {
        let profile = DerivedProfile {
            daily: Some(DailyCounterSpec::absolute("food_today", "food_out_today")),
            consumables: vec![ConsumableSpec::new("filter_life", "filter_days", 30.0)],
            durations: vec![DurationSpec::new("brush_left", "brush_days")],
        };
        let outputs: Vec<&str> = profile.outputs().collect();
        assert_eq!(
            outputs,
            ["food_today", "filter_life", "filter_days", "brush_days"]
        );
    }

    #[test]
    fn defaults_apply_when_loading() {
        let spec: DailyCounterSpec = serde_json::from_value(serde_json::json!({
            "output": "water_today",
            "proxy": "water_level"
        }))
        .unwrap();
        assert!((spec.completion_threshold - 99.5).abs() < f64::EPSILON);
        assert!(spec.absolute.is_none());
    }

    #[test]
    fn proxy_constructor_clears_absolute() {
        let spec = DailyCounterSpec::proxy("food_today", "bowl_weight").with_progress("progress");
        assert_eq!(spec.proxy.as_deref(), Some("bowl_weight"));
        assert!(spec.absolute.is_none());
        assert_eq!(spec.progress.as_deref(), Some("progress"));
    }
}
