//! Slot grid and the best-effort availability check.
//!
//! This is a hint for the caller: the unique slot index in Postgres has the
//! final word when two sessions race for the same (date, time).

use std::collections::HashSet;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use thiserror::Error;

pub const NEW_APPOINTMENT_INTERVAL_MIN: u32 = 30;
pub const RESCHEDULE_INTERVAL_MIN: u32 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("{0} is already booked on this date")]
    Booked(String),
    #[error("this time has already passed")]
    InPast,
    #[error("this date has already passed")]
    DateInPast,
    #[error("interval_minutes must be between 5 and 120 and divide a day evenly (got {0})")]
    BadInterval(u32),
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotDto {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub available: bool,
}

pub fn validate_interval(interval_minutes: u32) -> Result<(), SlotError> {
    if (5..=120).contains(&interval_minutes) && (24 * 60) % interval_minutes == 0 {
        Ok(())
    } else {
        Err(SlotError::BadInterval(interval_minutes))
    }
}

/// Every start time of a day, from 00:00, `interval_minutes` apart.
pub fn slot_grid(interval_minutes: u32) -> Result<Vec<NaiveTime>, SlotError> {
    validate_interval(interval_minutes)?;
    let step = Duration::minutes(i64::from(interval_minutes));
    let slots = (0..(24 * 60 / interval_minutes))
        .map(|i| NaiveTime::MIN + step * i as i32)
        .collect();
    Ok(slots)
}

/// Drops seconds so "10:30:00" and "10:30:27" land on the same slot.
pub fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
    use chrono::Timelike;
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

/// Why `time` on `date` cannot be offered, if anything.
///
/// `now` is the clinic's wall clock. The past check only bites on today;
/// future dates are never rejected for it.
pub fn check_slot(
    date: NaiveDate,
    time: NaiveTime,
    booked: &HashSet<NaiveTime>,
    now: NaiveDateTime,
) -> Result<(), SlotError> {
    let today = now.date();
    if date < today {
        return Err(SlotError::DateInPast);
    }
    if date == today && date.and_time(time) < now {
        return Err(SlotError::InPast);
    }
    if booked.contains(&truncate_to_minute(time)) {
        return Err(SlotError::Booked(time.format("%H:%M").to_string()));
    }
    Ok(())
}

pub fn is_time_available(
    date: NaiveDate,
    time: NaiveTime,
    booked: &HashSet<NaiveTime>,
    now: NaiveDateTime,
) -> bool {
    check_slot(date, time, booked, now).is_ok()
}

pub fn day_slots(
    date: NaiveDate,
    interval_minutes: u32,
    booked: &HashSet<NaiveTime>,
    now: NaiveDateTime,
) -> Result<Vec<SlotDto>, SlotError> {
    Ok(slot_grid(interval_minutes)?
        .into_iter()
        .map(|time| SlotDto {
            time,
            available: is_time_available(date, time, booked, now),
        })
        .collect())
}

/// `HH:MM` on the wire, also accepting `HH:MM:SS` on input.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<NaiveTime, String> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .map(super::truncate_to_minute)
            .map_err(|_| format!("time must be HH:MM (got {raw:?})"))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer};

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
            match Option::<String>::deserialize(d)? {
                None => Ok(None),
                Some(s) if s.trim().is_empty() => Ok(None),
                Some(s) => super::parse(&s).map(Some).map_err(serde::de::Error::custom),
            }
        }
    }
}
