use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Start of a visiting slot expressed as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinuteOfDay(u16);

impl MinuteOfDay {
    pub const MIDNIGHT: Self = Self(0);
    pub const LAST: Self = Self(MINUTES_PER_DAY - 1);

    pub fn new(minutes: u16) -> Result<Self, TimeParseError> {
        if minutes >= MINUTES_PER_DAY {
            return Err(TimeParseError::OutOfRange(i64::from(minutes)));
        }
        Ok(Self(minutes))
    }

    pub fn from_hm(hour: u16, minute: u16) -> Result<Self, TimeParseError> {
        if hour >= 24 || minute >= 60 {
            return Err(TimeParseError::Malformed(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self(hour * 60 + minute))
    }

    pub const fn minutes(self) -> u16 {
        self.0
    }

    pub const fn hour(self) -> u16 {
        self.0 / 60
    }

    pub const fn minute(self) -> u16 {
        self.0 % 60
    }

    /// Point in time at which this slot starts on `date`.
    pub fn on(self, date: NaiveDate) -> Option<NaiveDateTime> {
        date.and_hms_opt(u32::from(self.hour()), u32::from(self.minute()), 0)
    }

    /// Zero-padded `HH:MM` rendering.
    pub fn label(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MinuteOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Accepts `HH:MM`, `HH:MM:SS` (seconds must be zero) or a bare minute count.
impl FromStr for MinuteOfDay {
    type Err = TimeParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(TimeParseError::Empty);
        }

        if !value.contains(':') {
            let minutes = value
                .parse::<i64>()
                .map_err(|_| TimeParseError::Malformed(value.to_string()))?;
            return TimeInput::Minutes(minutes).normalize();
        }

        let malformed = || TimeParseError::Malformed(value.to_string());
        let mut parts = value.split(':');
        let hour = parse_component(parts.next()).ok_or_else(malformed)?;
        let minute = parse_component(parts.next()).ok_or_else(malformed)?;
        if let Some(seconds) = parts.next() {
            if parse_component(Some(seconds)) != Some(0) {
                return Err(malformed());
            }
        }
        if parts.next().is_some() {
            return Err(malformed());
        }

        Self::from_hm(hour, minute).map_err(|_| malformed())
    }
}

fn parse_component(part: Option<&str>) -> Option<u16> {
    let part = part?;
    if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

impl Serialize for MinuteOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.0)
    }
}

impl<'de> Deserialize<'de> for MinuteOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        TimeInput::deserialize(deserializer)?
            .normalize()
            .map_err(serde::de::Error::custom)
    }
}

/// Either representation callers use for a time of day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeInput {
    Minutes(i64),
    Text(String),
}

impl TimeInput {
    pub fn normalize(&self) -> Result<MinuteOfDay, TimeParseError> {
        match self {
            TimeInput::Minutes(minutes) => u16::try_from(*minutes)
                .ok()
                .filter(|value| *value < MINUTES_PER_DAY)
                .map(MinuteOfDay)
                .ok_or(TimeParseError::OutOfRange(*minutes)),
            TimeInput::Text(raw) => raw.parse(),
        }
    }
}

impl From<MinuteOfDay> for TimeInput {
    fn from(value: MinuteOfDay) -> Self {
        TimeInput::Minutes(i64::from(value.minutes()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeParseError {
    #[error("time of day is empty")]
    Empty,
    #[error("'{0}' is not a valid HH:MM time")]
    Malformed(String),
    #[error("{0} is outside the 0..1440 minute range")]
    OutOfRange(i64),
}

/// Weekdays and slot starts during which an agency accepts visitors.
///
/// Days are numbered 1 (Monday) through 7 (Sunday). An empty day or slot set is a valid
/// window that simply offers no availability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "OperatingWindowPayload")]
pub struct OperatingWindow {
    operating_days: BTreeSet<u8>,
    operating_time_slots: BTreeSet<MinuteOfDay>,
}

#[derive(Deserialize)]
struct OperatingWindowPayload {
    #[serde(default)]
    operating_days: Vec<u8>,
    #[serde(default)]
    operating_time_slots: Vec<MinuteOfDay>,
}

impl TryFrom<OperatingWindowPayload> for OperatingWindow {
    type Error = WindowError;

    fn try_from(payload: OperatingWindowPayload) -> Result<Self, Self::Error> {
        OperatingWindow::new(payload.operating_days, payload.operating_time_slots)
    }
}

impl OperatingWindow {
    pub fn new(
        days: impl IntoIterator<Item = u8>,
        slots: impl IntoIterator<Item = MinuteOfDay>,
    ) -> Result<Self, WindowError> {
        let operating_days = days
            .into_iter()
            .map(|day| {
                if (1..=7).contains(&day) {
                    Ok(day)
                } else {
                    Err(WindowError::InvalidWeekday(day))
                }
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self {
            operating_days,
            operating_time_slots: slots.into_iter().collect(),
        })
    }

    /// A window with no days and no slots.
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn operating_days(&self) -> &BTreeSet<u8> {
        &self.operating_days
    }

    pub fn operating_time_slots(&self) -> &BTreeSet<MinuteOfDay> {
        &self.operating_time_slots
    }

    pub fn operates_on(&self, weekday: u8) -> bool {
        self.operating_days.contains(&weekday)
    }

    pub fn has_slot(&self, time: MinuteOfDay) -> bool {
        self.operating_time_slots.contains(&time)
    }

    pub fn is_configured(&self) -> bool {
        !self.operating_days.is_empty() && !self.operating_time_slots.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("weekday {0} is outside 1 (Monday) ..= 7 (Sunday)")]
    InvalidWeekday(u8),
}
