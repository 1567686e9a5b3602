//! Pure availability queries over an [`OperatingWindow`].
//!
//! Nothing here looks at existing bookings; occupancy is the conflict index's concern.
//! `today` is always supplied by the caller so the functions stay deterministic.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use super::window::{MinuteOfDay, OperatingWindow};

/// A single bookable (date, time) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub time: MinuteOfDay,
}

/// Coarse answer used to tell "not configured" apart from "fully booked".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Open,
    NotConfigured,
}

pub fn availability(window: &OperatingWindow) -> Availability {
    if window.is_configured() {
        Availability::Open
    } else {
        Availability::NotConfigured
    }
}

/// ISO weekday number, Monday = 1 through Sunday = 7.
pub fn weekday_number(date: NaiveDate) -> u8 {
    // number_from_monday is always within 1..=7
    date.weekday().number_from_monday() as u8
}

pub fn is_date_available(window: &OperatingWindow, date: NaiveDate, today: NaiveDate) -> bool {
    date >= today && window.operates_on(weekday_number(date))
}

/// Slot starts offered on `date`, ascending. Empty when the date is unavailable.
pub fn slots_for_date(
    window: &OperatingWindow,
    date: NaiveDate,
    today: NaiveDate,
) -> impl Iterator<Item = MinuteOfDay> + Clone + '_ {
    let open = is_date_available(window, date, today);
    window
        .operating_time_slots()
        .iter()
        .copied()
        .filter(move |_| open)
}

pub fn is_slot_in_window(
    window: &OperatingWindow,
    date: NaiveDate,
    time: MinuteOfDay,
    today: NaiveDate,
) -> bool {
    is_date_available(window, date, today) && window.has_slot(time)
}

/// Every bookable slot between `from` and `to` inclusive, ordered by date then time.
pub fn bookable_slots(
    window: &OperatingWindow,
    from: NaiveDate,
    to: NaiveDate,
    today: NaiveDate,
) -> impl Iterator<Item = Slot> + Clone + '_ {
    from.iter_days()
        .take_while(move |date| *date <= to)
        .flat_map(move |date| slots_for_date(window, date, today).map(move |time| Slot { date, time }))
}
