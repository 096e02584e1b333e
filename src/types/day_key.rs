// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Calendar-day keys for daily counters.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A calendar day in the device's local time.
///
/// Daily counters remember the key of the day they belong to; when the key
/// computed for "now" differs, the counter is reset.
///
/// # Examples
///
/// ```
/// use chrono::{FixedOffset, TimeZone, Utc};
/// use miot_sync::types::DayKey;
///
/// let offset = FixedOffset::east_opt(2 * 3600).unwrap();
/// // 23:30 UTC is already the next day at UTC+2
/// let now = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
/// assert_eq!(DayKey::at(now, offset).to_string(), "2024-01-02");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(NaiveDate);

impl DayKey {
    /// Returns the local day containing `now`.
    #[must_use]
    pub fn at(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self(now.with_timezone(&offset).date_naive())
    }

    /// Creates a key from a date.
    #[must_use]
    pub const fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Returns the underlying date.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for DayKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|e| Error::Config(format!("invalid day key {s:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn utc_day() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let key = DayKey::at(now, FixedOffset::east_opt(0).unwrap());
        assert_eq!(key.to_string(), "2024-01-01");
    }

    #[test]
    fn negative_offset_stays_on_previous_day() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap();
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(DayKey::at(now, offset).to_string(), "2024-01-01");
    }

    #[test]
    fn parse_round_trip() {
        let key: DayKey = "2024-02-29".parse().unwrap();
        assert_eq!(key.to_string(), "2024-02-29");
        assert!("2023-02-29".parse::<DayKey>().is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let key: DayKey = "2024-01-02".parse().unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"2024-01-02\"");
    }
}
