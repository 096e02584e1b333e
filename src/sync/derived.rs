// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! State the protocol does not expose directly.
//!
//! # Daily counter
//!
//! The counter belongs to a local calendar day. On the first update of a new
//! day it restarts from the device's own "today" total when the model has
//! one, else from zero, before any consumption of the new day is counted.
//! Decreases buffered on the previous day are dropped with it.
//!
//! Without a device total, consumption is measured as decreases of a level
//! sensor. While a run is in progress (progress below the completion
//! threshold) decreases are held in a pending buffer and credited in one
//! step when the run completes. When no level reading backs a completed
//! run, either because the model has no level sensor or because it did not
//! answer, the expected amount of the run is credited, flagged as an
//! estimate.
//!
//! # Consumables
//!
//! When only one of percentage and days left is reported, the other is
//! derived linearly from the consumable's capacity. Derived values are never
//! used as inputs.
//!
//! # Durations
//!
//! Some firmwares report time left in days, others in hours. Raw values
//! above the configured threshold are read as hours.

use chrono::{DateTime, FixedOffset, Utc};

use crate::model::{ConsumableSpec, DailyCounterSpec, DerivedProfile, DurationSpec};
use crate::protocol::ReadResult;
use crate::state::{CapabilityUpdate, DerivedRecord};
use crate::types::DayKey;

/// Output of one tracker update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedSnapshot {
    /// Values for derived capabilities.
    pub updates: Vec<CapabilityUpdate>,
    /// `true` if the durable record changed and should be saved.
    pub record_changed: bool,
}

/// Computes derived capabilities from raw readings.
#[derive(Debug, Clone)]
pub struct DerivedStateTracker {
    profile: DerivedProfile,
    offset: FixedOffset,
    record: DerivedRecord,
}

impl DerivedStateTracker {
    /// Creates a tracker resuming from `record`.
    #[must_use]
    pub fn new(profile: DerivedProfile, offset: FixedOffset, record: DerivedRecord) -> Self {
        Self {
            profile,
            offset,
            record,
        }
    }

    /// Returns the durable record.
    #[must_use]
    pub fn record(&self) -> &DerivedRecord {
        &self.record
    }

    /// Returns the profile.
    #[must_use]
    pub fn profile(&self) -> &DerivedProfile {
        &self.profile
    }

    /// Updates derived state from one poll.
    ///
    /// Readings with a nonzero code are ignored before any computation.
    pub fn update(&mut self, result: &ReadResult, now: DateTime<Utc>) -> DerivedSnapshot {
        let before = self.record.clone();
        let mut updates = Vec::new();

        if let Some(spec) = self.profile.daily.clone() {
            let today = DayKey::at(now, self.offset);
            updates.push(self.update_daily(&spec, result, today));
        }
        for spec in &self.profile.consumables {
            updates.extend(consumable(spec, result));
        }
        for spec in &self.profile.durations {
            updates.extend(duration(spec, result));
        }

        DerivedSnapshot {
            updates,
            record_changed: self.record != before,
        }
    }

    fn update_daily(
        &mut self,
        spec: &DailyCounterSpec,
        result: &ReadResult,
        today: DayKey,
    ) -> CapabilityUpdate {
        let number = |name: &Option<String>| name.as_deref().and_then(|n| result.number(n));
        let absolute = number(&spec.absolute);
        let record = &mut self.record;

        let new_day = record.epoch_key != Some(today);
        if new_day {
            let baseline = absolute.unwrap_or(0.0);
            if let Some(previous) = record.epoch_key {
                tracing::info!(
                    from = %previous,
                    to = %today,
                    previous_total = record.accumulated,
                    baseline,
                    dropped_pending = record.pending_delta,
                    "Daily counter reset"
                );
            }
            record.epoch_key = Some(today);
            record.accumulated = baseline;
            record.pending_delta = 0.0;
        }

        if let Some(target) = number(&spec.target) {
            record.last_target = Some(target);
        }

        let mut estimated = spec.absolute.is_none() && spec.proxy.is_none();
        if let Some(total) = absolute {
            record.accumulated = total;
        } else {
            let progress = number(&spec.progress);
            let in_progress = progress.map_or(record.dispensing, |p| p < spec.completion_threshold);

            let level = number(&spec.proxy);
            if let Some(level) = level {
                match record.last_proxy {
                    Some(previous) if !new_day && level < previous => {
                        let delta = previous - level;
                        if in_progress {
                            record.pending_delta += delta;
                        } else {
                            record.accumulated += delta;
                        }
                    }
                    _ => {}
                }
                record.last_proxy = Some(level);
            }

            if record.dispensing && !in_progress {
                if record.pending_delta > 0.0 {
                    tracing::debug!(flushed = record.pending_delta, "Run complete, crediting buffered consumption");
                    record.accumulated += record.pending_delta;
                    record.pending_delta = 0.0;
                } else if level.is_none() {
                    let dose = record.last_target.unwrap_or(spec.default_dose);
                    tracing::debug!(dose, estimate = true, "Run complete, crediting expected amount");
                    record.accumulated += dose;
                    estimated = true;
                }
            }

            record.dispensing = in_progress;
        }

        let value = round(record.accumulated);
        if estimated {
            CapabilityUpdate::estimated(spec.output.clone(), value)
        } else {
            CapabilityUpdate::new(spec.output.clone(), value)
        }
    }
}

fn consumable(spec: &ConsumableSpec, result: &ReadResult) -> Vec<CapabilityUpdate> {
    let number = |name: &Option<String>| name.as_deref().and_then(|n| result.number(n));
    let capacity = spec.capacity_days;
    let percent = number(&spec.percent).map(|p| p.clamp(0.0, 100.0));
    let days = number(&spec.days).map(|d| d.max(0.0));

    match (percent, days) {
        (Some(p), Some(d)) => vec![
            CapabilityUpdate::new(spec.percent_output.clone(), round(p)),
            CapabilityUpdate::new(spec.days_output.clone(), round(d)),
        ],
        (Some(p), None) if capacity > 0.0 => vec![
            CapabilityUpdate::new(spec.percent_output.clone(), round(p)),
            CapabilityUpdate::estimated(spec.days_output.clone(), round(percent_to_days(p, capacity))),
        ],
        (None, Some(d)) if capacity > 0.0 => vec![
            CapabilityUpdate::estimated(spec.percent_output.clone(), round(days_to_percent(d, capacity))),
            CapabilityUpdate::new(spec.days_output.clone(), round(d)),
        ],
        (Some(p), None) => vec![CapabilityUpdate::new(spec.percent_output.clone(), round(p))],
        (None, Some(d)) => vec![CapabilityUpdate::new(spec.days_output.clone(), round(d))],
        (None, None) => Vec::new(),
    }
}

/// Days left for `percent` of a consumable lasting `capacity` days.
#[must_use]
pub fn percent_to_days(percent: f64, capacity: f64) -> f64 {
    (percent * capacity / 100.0).clamp(0.0, capacity)
}

/// Percentage left for `days` of a consumable lasting `capacity` days.
#[must_use]
pub fn days_to_percent(days: f64, capacity: f64) -> f64 {
    (days / capacity * 100.0).clamp(0.0, 100.0)
}

fn duration(spec: &DurationSpec, result: &ReadResult) -> Option<CapabilityUpdate> {
    let raw = result.number(&spec.property)?;
    if raw > spec.hours_threshold {
        let days = raw / 24.0;
        tracing::debug!(property = %spec.property, raw, days, estimate = true, "Reading duration as hours");
        Some(CapabilityUpdate::estimated(spec.output.clone(), round(days)))
    } else {
        Some(CapabilityUpdate::new(spec.output.clone(), round(raw.max(0.0))))
    }
}

fn round(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    use crate::protocol::PropertyReading;
    use crate::types::CapabilityValue;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn read(pairs: &[(&str, f64)]) -> ReadResult {
        pairs
            .iter()
            .map(|(n, v)| (*n, PropertyReading::ok(json!(v))))
            .collect()
    }

    fn daily(spec: DailyCounterSpec) -> DerivedProfile {
        DerivedProfile {
            daily: Some(spec),
            ..DerivedProfile::default()
        }
    }

    fn value_of(snapshot: &DerivedSnapshot, name: &str) -> Option<f64> {
        snapshot
            .updates
            .iter()
            .find(|u| u.name == name)
            .and_then(|u| u.value.as_f64())
    }

    #[test]
    fn new_day_resets_to_absolute_counter() {
        let record = DerivedRecord {
            epoch_key: Some("2024-01-01".parse().unwrap()),
            accumulated: 120.0,
            ..DerivedRecord::default()
        };
        let mut tracker = DerivedStateTracker::new(
            daily(DailyCounterSpec::absolute("food_today", "food_out_today")),
            utc(),
            record,
        );

        let snapshot = tracker.update(&read(&[("food_out_today", 5.0)]), at(2, 0));

        assert_eq!(tracker.record().accumulated, 5.0);
        assert_eq!(tracker.record().epoch_key, Some("2024-01-02".parse().unwrap()));
        assert_eq!(value_of(&snapshot, "food_today"), Some(5.0));
        assert!(snapshot.record_changed);
    }

    #[test]
    fn new_day_without_counter_starts_from_zero() {
        let record = DerivedRecord {
            epoch_key: Some("2024-01-01".parse().unwrap()),
            accumulated: 80.0,
            pending_delta: 6.0,
            last_proxy: Some(300.0),
            ..DerivedRecord::default()
        };
        let mut tracker =
            DerivedStateTracker::new(daily(DailyCounterSpec::proxy("water_today", "water_level")), utc(), record);

        // Decrease across midnight belongs to neither day.
        tracker.update(&read(&[("water_level", 290.0)]), at(2, 0));
        assert_eq!(tracker.record().accumulated, 0.0);
        assert_eq!(tracker.record().pending_delta, 0.0);

        tracker.update(&read(&[("water_level", 285.0)]), at(2, 1));
        assert_eq!(tracker.record().accumulated, 5.0);
    }

    #[test]
    fn day_key_uses_local_offset() {
        let mut tracker = DerivedStateTracker::new(
            daily(DailyCounterSpec::absolute("food_today", "food_out_today")),
            FixedOffset::east_opt(8 * 3600).unwrap(),
            DerivedRecord::default(),
        );
        // 20:00 UTC is already the next day at UTC+8.
        tracker.update(&read(&[("food_out_today", 1.0)]), at(1, 20));
        assert_eq!(tracker.record().epoch_key, Some("2024-01-02".parse().unwrap()));
    }

    #[test]
    fn gated_decreases_flush_once_on_completion() {
        let spec = DailyCounterSpec::proxy("food_today", "bowl_weight").with_progress("feed_progress");
        let mut tracker = DerivedStateTracker::new(daily(spec), utc(), DerivedRecord::default());

        tracker.update(&read(&[("bowl_weight", 300.0), ("feed_progress", 100.0)]), at(1, 8));
        tracker.update(&read(&[("bowl_weight", 290.0), ("feed_progress", 40.0)]), at(1, 9));
        tracker.update(&read(&[("bowl_weight", 285.0), ("feed_progress", 80.0)]), at(1, 10));
        assert_eq!(tracker.record().accumulated, 0.0);
        assert_eq!(tracker.record().pending_delta, 15.0);

        let snapshot = tracker.update(&read(&[("bowl_weight", 284.0), ("feed_progress", 100.0)]), at(1, 11));
        assert_eq!(tracker.record().accumulated, 16.0);
        assert_eq!(tracker.record().pending_delta, 0.0);
        assert_eq!(value_of(&snapshot, "food_today"), Some(16.0));

        // Completion is an edge: a later idle poll credits nothing more.
        tracker.update(&read(&[("bowl_weight", 284.0), ("feed_progress", 100.0)]), at(1, 12));
        assert_eq!(tracker.record().accumulated, 16.0);
    }

    #[test]
    fn threshold_is_strict_below() {
        let spec = DailyCounterSpec::proxy("food_today", "bowl_weight").with_progress("feed_progress");
        let mut tracker = DerivedStateTracker::new(daily(spec), utc(), DerivedRecord::default());

        tracker.update(&read(&[("bowl_weight", 100.0), ("feed_progress", 99.5)]), at(1, 8));
        tracker.update(&read(&[("bowl_weight", 95.0), ("feed_progress", 99.5)]), at(1, 9));
        assert_eq!(tracker.record().accumulated, 5.0);
    }

    #[test]
    fn refill_is_not_consumption() {
        let mut tracker = DerivedStateTracker::new(
            daily(DailyCounterSpec::proxy("water_today", "water_level")),
            utc(),
            DerivedRecord::default(),
        );
        tracker.update(&read(&[("water_level", 200.0)]), at(1, 8));
        tracker.update(&read(&[("water_level", 150.0)]), at(1, 9));
        tracker.update(&read(&[("water_level", 900.0)]), at(1, 10));
        tracker.update(&read(&[("water_level", 880.0)]), at(1, 11));
        assert_eq!(tracker.record().accumulated, 70.0);
    }

    #[test]
    fn runs_credit_target_as_estimate() {
        let spec = DailyCounterSpec::runs("food_today", "feed_progress")
            .with_target("feed_target")
            .with_default_dose(10.0);
        let mut tracker = DerivedStateTracker::new(daily(spec), utc(), DerivedRecord::default());

        tracker.update(&read(&[("feed_progress", 100.0)]), at(1, 8));
        tracker.update(&read(&[("feed_progress", 30.0), ("feed_target", 12.0)]), at(1, 9));
        let snapshot = tracker.update(&read(&[("feed_progress", 100.0)]), at(1, 10));

        let update = snapshot.updates.iter().find(|u| u.name == "food_today").unwrap();
        assert_eq!(update.value, CapabilityValue::Number(12.0));
        assert!(update.estimate);
    }

    #[test]
    fn runs_fall_back_to_default_dose() {
        let spec = DailyCounterSpec::runs("food_today", "feed_progress").with_default_dose(10.0);
        let mut tracker = DerivedStateTracker::new(daily(spec), utc(), DerivedRecord::default());

        tracker.update(&read(&[("feed_progress", 20.0)]), at(1, 8));
        tracker.update(&read(&[("feed_progress", 100.0)]), at(1, 9));
        assert_eq!(tracker.record().accumulated, 10.0);
    }

    #[test]
    fn unanswered_level_sensor_credits_expected_dose() {
        let spec = DailyCounterSpec::proxy("food_today", "bowl_weight")
            .with_progress("feed_progress")
            .with_target("feed_target")
            .with_default_dose(10.0);
        let mut tracker = DerivedStateTracker::new(daily(spec), utc(), DerivedRecord::default());
        let poll = |progress: f64| -> ReadResult {
            [
                ("bowl_weight", PropertyReading::failed(-4001)),
                ("feed_target", PropertyReading::ok(json!(12))),
                ("feed_progress", PropertyReading::ok(json!(progress))),
            ]
            .into_iter()
            .collect()
        };

        tracker.update(&poll(100.0), at(1, 8));
        let running = tracker.update(&poll(30.0), at(1, 9));
        assert_eq!(value_of(&running, "food_today"), Some(0.0));

        let done = tracker.update(&poll(100.0), at(1, 10));
        let update = done.updates.iter().find(|u| u.name == "food_today").unwrap();
        assert_eq!(tracker.record().accumulated, 12.0);
        assert_eq!(update.value, CapabilityValue::Number(12.0));
        assert!(update.estimate);

        let idle = tracker.update(&poll(100.0), at(1, 11));
        assert_eq!(tracker.record().accumulated, 12.0);
        assert!(!idle.updates[0].estimate);
    }

    #[test]
    fn answered_level_sensor_is_not_estimated() {
        let spec = DailyCounterSpec::proxy("food_today", "bowl_weight")
            .with_progress("feed_progress")
            .with_default_dose(10.0);
        let mut tracker = DerivedStateTracker::new(daily(spec), utc(), DerivedRecord::default());

        tracker.update(&read(&[("bowl_weight", 50.0), ("feed_progress", 100.0)]), at(1, 8));
        tracker.update(&read(&[("bowl_weight", 50.0), ("feed_progress", 30.0)]), at(1, 9));
        let done = tracker.update(&read(&[("bowl_weight", 50.0), ("feed_progress", 100.0)]), at(1, 10));

        assert_eq!(tracker.record().accumulated, 0.0);
        assert!(!done.updates[0].estimate);
    }

    #[test]
    fn error_codes_are_excluded() {
        let mut tracker = DerivedStateTracker::new(
            daily(DailyCounterSpec::proxy("water_today", "water_level")),
            utc(),
            DerivedRecord::default(),
        );
        tracker.update(&read(&[("water_level", 200.0)]), at(1, 8));

        let failed: ReadResult = [("water_level", PropertyReading::failed(-4001))].into_iter().collect();
        tracker.update(&failed, at(1, 9));
        assert_eq!(tracker.record().last_proxy, Some(200.0));

        tracker.update(&read(&[("water_level", 190.0)]), at(1, 10));
        assert_eq!(tracker.record().accumulated, 10.0);
    }

    #[test]
    fn unchanged_record_is_not_saved() {
        let mut tracker = DerivedStateTracker::new(
            daily(DailyCounterSpec::absolute("food_today", "food_out_today")),
            utc(),
            DerivedRecord::default(),
        );
        assert!(tracker.update(&read(&[("food_out_today", 3.0)]), at(1, 8)).record_changed);
        assert!(!tracker.update(&read(&[("food_out_today", 3.0)]), at(1, 9)).record_changed);
    }

    #[test]
    fn consumable_derives_missing_side() {
        let spec = ConsumableSpec::new("filter_life", "filter_days", 180.0).with_percent("filter_level");
        let updates = consumable(&spec, &read(&[("filter_level", 50.0)]));

        assert_eq!(updates[0], CapabilityUpdate::new("filter_life", 50.0));
        assert_eq!(updates[1], CapabilityUpdate::estimated("filter_days", 90.0));
    }

    #[test]
    fn consumable_prefers_reported_values() {
        let spec = ConsumableSpec::new("filter_life", "filter_days", 30.0)
            .with_percent("filter_level")
            .with_days("filter_left_time");
        let updates = consumable(&spec, &read(&[("filter_level", 50.0), ("filter_left_time", 3.0)]));

        assert!(updates.iter().all(|u| !u.estimate));
        assert_eq!(updates[1].value, CapabilityValue::Number(3.0));
    }

    #[test]
    fn cross_derivation_round_trips_and_clamps() {
        for percent in [0.0, 12.5, 33.0, 50.0, 99.0, 100.0] {
            let back = days_to_percent(percent_to_days(percent, 30.0), 30.0);
            assert!((back - percent).abs() < 1e-9, "{percent} -> {back}");
        }
        assert_eq!(percent_to_days(150.0, 30.0), 30.0);
        assert_eq!(days_to_percent(45.0, 30.0), 100.0);
        assert_eq!(days_to_percent(-2.0, 30.0), 0.0);
    }

    #[test]
    fn large_durations_are_hours() {
        let spec = DurationSpec::new("main_brush_left", "main_brush_days");

        let days = duration(&spec, &read(&[("main_brush_left", 120.0)])).unwrap();
        assert_eq!(days, CapabilityUpdate::new("main_brush_days", 120.0));

        let hours = duration(&spec, &read(&[("main_brush_left", 4800.0)])).unwrap();
        assert_eq!(hours, CapabilityUpdate::estimated("main_brush_days", 200.0));
    }
}
