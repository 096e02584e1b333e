// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Built-in model tables.

use super::{
    ActionSpec, ConsumableSpec, DailyCounterSpec, DerivedProfile, DeviceCategory, DurationSpec,
    ModelTable, PropertySpec,
};
use crate::types::ValueKind;

pub(super) const MODELS: &[&str] = &[
    "miot.feeder.v1",
    "miot.feeder.v2",
    "miot.feeder.v3",
    "miot.fountain.v1",
    "miot.airp.v1",
    "miot.humidifier.v1",
    "miot.fan.v1",
    "miot.vacuum.v1",
    "miot.curtain.v1",
];

pub(super) fn lookup(model: &str) -> Option<ModelTable> {
    let table = match model {
        "miot.feeder.v1" => weighing_feeder(),
        "miot.feeder.v2" => counting_feeder(),
        "miot.feeder.v3" => basic_feeder(),
        "miot.fountain.v1" => fountain(),
        "miot.airp.v1" => air_purifier(),
        "miot.humidifier.v1" => humidifier(),
        "miot.fan.v1" => fan(),
        "miot.vacuum.v1" => vacuum(),
        "miot.curtain.v1" => curtain(),
        _ => return None,
    };
    Some(table)
}

fn feeder_status() -> ValueKind {
    ValueKind::options(&[(0, "idle"), (1, "feeding"), (2, "jammed"), (3, "empty")])
}

fn feeder_common(model: &str) -> super::ModelTableBuilder {
    ModelTable::builder(model, DeviceCategory::PetFeeder)
        .property(PropertySpec::read("status", 2, 1, feeder_status()).edge_triggered("feeder_status_changed"))
        .property(PropertySpec::read("food_low", 2, 3, ValueKind::Bool).edge_triggered("food_low_changed"))
        .property(PropertySpec::read_write("child_lock", 3, 1, ValueKind::Bool).mirrored("child_lock"))
        .property(PropertySpec::read("desiccant_level", 5, 1, ValueKind::number(0.0, 100.0)).internal())
        .property(PropertySpec::read("desiccant_left_time", 5, 2, ValueKind::number(0.0, 60.0)).internal())
        .action(ActionSpec::new("feed", 2, 1))
        .action(ActionSpec::new("reset_desiccant", 5, 1))
}

fn desiccant() -> ConsumableSpec {
    ConsumableSpec::new("desiccant_life", "desiccant_days", 30.0)
        .with_percent("desiccant_level")
        .with_days("desiccant_left_time")
}

/// Feeder with a bowl scale and a dispensing progress sensor.
fn weighing_feeder() -> ModelTable {
    feeder_common("miot.feeder.v1")
        .property(PropertySpec::read("bowl_weight", 2, 6, ValueKind::number(0.0, 2000.0)).internal())
        .property(PropertySpec::read("feed_target", 2, 7, ValueKind::number(1.0, 30.0)).internal())
        .property(PropertySpec::read("feed_progress", 2, 8, ValueKind::number(0.0, 100.0)).internal())
        .derived(DerivedProfile {
            daily: Some(
                DailyCounterSpec::proxy("food_today", "bowl_weight")
                    .with_progress("feed_progress")
                    .with_target("feed_target"),
            ),
            consumables: vec![desiccant()],
            durations: Vec::new(),
        })
        .build()
}

/// Feeder reporting its own daily total.
fn counting_feeder() -> ModelTable {
    feeder_common("miot.feeder.v2")
        .property(PropertySpec::read("food_out_today", 2, 10, ValueKind::number(0.0, 10_000.0)).internal())
        .derived(DerivedProfile {
            daily: Some(DailyCounterSpec::absolute("food_today", "food_out_today")),
            consumables: vec![desiccant()],
            durations: Vec::new(),
        })
        .build()
}

/// Feeder with neither scale nor counter; portions are estimated.
fn basic_feeder() -> ModelTable {
    feeder_common("miot.feeder.v3")
        .property(PropertySpec::read("feed_target", 2, 7, ValueKind::number(1.0, 30.0)).internal())
        .property(PropertySpec::read("feed_progress", 2, 8, ValueKind::number(0.0, 100.0)).internal())
        .derived(DerivedProfile {
            daily: Some(
                DailyCounterSpec::runs("food_today", "feed_progress")
                    .with_target("feed_target")
                    .with_default_dose(10.0),
            ),
            consumables: vec![desiccant()],
            durations: Vec::new(),
        })
        .build()
}

fn fountain() -> ModelTable {
    ModelTable::builder("miot.fountain.v1", DeviceCategory::PetFountain)
        .property(PropertySpec::read_write("power", 2, 1, ValueKind::Bool))
        .property(
            PropertySpec::read_write("mode", 2, 2, ValueKind::options(&[(0, "continuous"), (1, "interval"), (2, "sensor")]))
                .edge_triggered("mode_changed"),
        )
        .property(PropertySpec::read("water_shortage", 2, 3, ValueKind::Bool).edge_triggered("water_shortage_changed"))
        .property(PropertySpec::read("water_level", 2, 4, ValueKind::number(0.0, 3000.0)).internal())
        .property(PropertySpec::read("filter_level", 3, 1, ValueKind::number(0.0, 100.0)).internal())
        .property(PropertySpec::read("filter_left_time", 3, 2, ValueKind::number(0.0, 60.0)).internal())
        .property(PropertySpec::read_write("indicator_light", 4, 1, ValueKind::Bool).mirrored("indicator_light"))
        .action(ActionSpec::new("reset_filter", 3, 1))
        .derived(DerivedProfile {
            daily: Some(DailyCounterSpec::proxy("water_today", "water_level")),
            consumables: vec![
                ConsumableSpec::new("filter_life", "filter_days", 30.0)
                    .with_percent("filter_level")
                    .with_days("filter_left_time"),
            ],
            durations: Vec::new(),
        })
        .build()
}

fn air_purifier() -> ModelTable {
    ModelTable::builder("miot.airp.v1", DeviceCategory::AirPurifier)
        .property(PropertySpec::read_write("power", 2, 1, ValueKind::Bool))
        .property(
            PropertySpec::read_write("mode", 2, 4, ValueKind::options(&[(0, "auto"), (1, "sleep"), (2, "favorite"), (3, "manual")]))
                .edge_triggered("mode_changed"),
        )
        .property(PropertySpec::read_write("fan_level", 2, 5, ValueKind::number(1.0, 3.0)))
        .property(PropertySpec::read("pm25", 3, 4, ValueKind::number(0.0, 1000.0)))
        .property(PropertySpec::read("humidity", 3, 1, ValueKind::number(0.0, 100.0)))
        .property(PropertySpec::read("temperature", 3, 7, ValueKind::number(-40.0, 125.0)))
        .property(PropertySpec::read("filter_level", 4, 1, ValueKind::number(0.0, 100.0)).internal())
        .property(PropertySpec::read("filter_left_time", 4, 4, ValueKind::number(0.0, 400.0)).internal())
        .property(PropertySpec::read_write("child_lock", 7, 1, ValueKind::Bool).mirrored("child_lock"))
        .property(
            PropertySpec::read_write("led_brightness", 13, 2, ValueKind::options(&[(0, "off"), (1, "dim"), (2, "bright")]))
                .mirrored("led_brightness"),
        )
        .property(PropertySpec::read_write("buzzer", 6, 1, ValueKind::Bool).mirrored("buzzer"))
        .action(ActionSpec::new("reset_filter", 4, 1))
        .action(ActionSpec::new("toggle", 2, 1))
        .derived(DerivedProfile {
            daily: None,
            consumables: vec![
                ConsumableSpec::new("filter_life", "filter_days", 180.0)
                    .with_percent("filter_level")
                    .with_days("filter_left_time"),
            ],
            durations: Vec::new(),
        })
        .build()
}

fn humidifier() -> ModelTable {
    ModelTable::builder("miot.humidifier.v1", DeviceCategory::Humidifier)
        .property(PropertySpec::read_write("power", 2, 1, ValueKind::Bool))
        .property(
            PropertySpec::read_write("mode", 2, 5, ValueKind::options(&[(0, "auto"), (1, "low"), (2, "medium"), (3, "high")]))
                .edge_triggered("mode_changed"),
        )
        .property(PropertySpec::read_write("target_humidity", 2, 6, ValueKind::number(30.0, 80.0)))
        .property(PropertySpec::read("water_shortage", 2, 2, ValueKind::Bool).edge_triggered("water_shortage_changed"))
        .property(PropertySpec::read("humidity", 3, 1, ValueKind::number(0.0, 100.0)))
        .property(PropertySpec::read("temperature", 3, 7, ValueKind::number(-40.0, 125.0)))
        .property(PropertySpec::read_write("buzzer", 4, 1, ValueKind::Bool).mirrored("buzzer"))
        .property(PropertySpec::read_write("child_lock", 6, 1, ValueKind::Bool).mirrored("child_lock"))
        .build()
}

fn fan() -> ModelTable {
    ModelTable::builder("miot.fan.v1", DeviceCategory::Fan)
        .property(PropertySpec::read_write("power", 2, 1, ValueKind::Bool))
        .property(PropertySpec::read_write("fan_level", 2, 2, ValueKind::number(1.0, 4.0)))
        .property(
            PropertySpec::read_write("mode", 2, 3, ValueKind::options(&[(0, "straight"), (1, "natural")]))
                .edge_triggered("mode_changed"),
        )
        .property(PropertySpec::read_write("oscillating", 2, 4, ValueKind::Bool))
        .property(PropertySpec::read_write("child_lock", 3, 1, ValueKind::Bool).mirrored("child_lock"))
        .property(PropertySpec::read_write("buzzer", 2, 11, ValueKind::Bool).mirrored("buzzer"))
        .action(ActionSpec::new("toggle", 2, 1))
        .build()
}

fn vacuum() -> ModelTable {
    ModelTable::builder("miot.vacuum.v1", DeviceCategory::Vacuum)
        .property(
            PropertySpec::read(
                "status",
                2,
                1,
                ValueKind::options(&[(1, "idle"), (2, "sweeping"), (3, "paused"), (4, "error"), (5, "charging"), (6, "returning")]),
            )
            .edge_triggered("vacuum_status_changed"),
        )
        .property(PropertySpec::read("fault", 2, 2, ValueKind::number(0.0, 100.0)).edge_triggered("vacuum_fault_changed"))
        .property(
            PropertySpec::read_write("fan_speed", 2, 6, ValueKind::options(&[(0, "silent"), (1, "standard"), (2, "strong"), (3, "turbo")]))
                .mirrored("fan_speed"),
        )
        .property(PropertySpec::read("battery", 3, 1, ValueKind::number(0.0, 100.0)))
        .property(PropertySpec::read("main_brush_left", 9, 1, ValueKind::number(0.0, 10_000.0)).internal())
        .property(PropertySpec::read("main_brush_level", 9, 2, ValueKind::number(0.0, 100.0)).internal())
        .property(PropertySpec::read("side_brush_left", 10, 1, ValueKind::number(0.0, 10_000.0)).internal())
        .property(PropertySpec::read("filter_left", 11, 1, ValueKind::number(0.0, 10_000.0)).internal())
        .action(ActionSpec::new("start", 2, 1))
        .action(ActionSpec::new("stop", 2, 2))
        .action(ActionSpec::new("dock", 3, 1))
        .action(ActionSpec::new("reset_main_brush", 9, 1))
        .derived(DerivedProfile {
            daily: None,
            consumables: vec![ConsumableSpec::new("main_brush_life", "main_brush_life_days", 300.0).with_percent("main_brush_level")],
            durations: vec![
                DurationSpec::new("main_brush_left", "main_brush_days"),
                DurationSpec::new("side_brush_left", "side_brush_days"),
                DurationSpec::new("filter_left", "filter_days"),
            ],
        })
        .build()
}

fn curtain() -> ModelTable {
    ModelTable::builder("miot.curtain.v1", DeviceCategory::Curtain)
        .property(PropertySpec::read_write(
            "motor_control",
            2,
            2,
            ValueKind::options(&[(0, "pause"), (1, "open"), (2, "close")]),
        ))
        .property(PropertySpec::read("current_position", 2, 3, ValueKind::number(0.0, 100.0)))
        .property(
            PropertySpec::read("status", 2, 6, ValueKind::options(&[(0, "stopped"), (1, "opening"), (2, "closing")]))
                .edge_triggered("curtain_status_changed"),
        )
        .property(PropertySpec::read_write("target_position", 2, 7, ValueKind::number(0.0, 100.0)))
        .property(PropertySpec::read_write("reverse", 2, 8, ValueKind::Bool).mirrored("reverse"))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_model_resolves() {
        for model in MODELS {
            let table = lookup(model).unwrap();
            assert_eq!(table.model(), *model);
        }
        assert!(lookup("acme.toaster.v1").is_none());
    }

    #[test]
    fn derived_inputs_exist_in_their_table() {
        for model in MODELS {
            let table = lookup(model).unwrap();
            let profile = table.derived();
            let mut inputs: Vec<&str> = Vec::new();
            if let Some(daily) = &profile.daily {
                inputs.extend(
                    [&daily.absolute, &daily.proxy, &daily.progress, &daily.target]
                        .into_iter()
                        .flatten()
                        .map(String::as_str),
                );
            }
            for c in &profile.consumables {
                inputs.extend([&c.percent, &c.days].into_iter().flatten().map(String::as_str));
            }
            for d in &profile.durations {
                inputs.push(&d.property);
            }
            for input in inputs {
                assert!(table.property(input).is_some(), "{model}: missing {input}");
            }
        }
    }

    #[test]
    fn addresses_are_unique_per_table() {
        for model in MODELS {
            let table = lookup(model).unwrap();
            let mut seen = std::collections::HashSet::new();
            for p in table.properties() {
                assert!(seen.insert(p.address), "{model}: duplicate {}", p.address);
            }
        }
    }

    #[test]
    fn purifier_exposes_derived_filter_capabilities() {
        let table = lookup("miot.airp.v1").unwrap();
        let names = table.capability_names();
        assert!(names.contains(&"filter_life".to_string()));
        assert!(names.contains(&"filter_days".to_string()));
        assert!(!names.contains(&"filter_level".to_string()));
    }
}
