use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::window::{MinuteOfDay, TimeInput};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier wrapper for booked visits.
    AppointmentId
);
string_id!(
    /// Agency or agent account that owns an operating window.
    AgentId
);
string_id!(
    /// Authenticated user resolved by the identity collaborator.
    UserId
);
string_id!(PropertyId);
string_id!(SubPropertyId);

/// Catalog entry a visit targets. A visit may also target only the agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PropertyRef {
    Property(PropertyId),
    SubProperty(SubPropertyId),
}

/// Approval state of a visit. Reschedule is an operation, not a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppointmentStatus {
    Pending,
    Approved,
    Declined,
}

impl AppointmentStatus {
    pub const fn ordered() -> [Self; 3] {
        [Self::Pending, Self::Approved, Self::Declined]
    }

    pub const fn label(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Approved => "approved",
            AppointmentStatus::Declined => "declined",
        }
    }

    /// Pending and approved visits hold their slot; declined ones do not.
    pub const fn occupies_slot(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Approved)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AppointmentStatus {
    type Err = StatusParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        Self::ordered()
            .into_iter()
            .find(|status| status.label().eq_ignore_ascii_case(value))
            .ok_or_else(|| StatusParseError(value.to_string()))
    }
}

impl Serialize for AppointmentStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for AppointmentStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown appointment status '{0}' (expected pending, approved or declined)")]
pub struct StatusParseError(pub String);

/// Persisted visit record.
///
/// Read through accessors outside the scheduling engine. Only the state machine builds
/// changed copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub(super) id: AppointmentId,
    pub(super) agent_id: AgentId,
    pub(super) property: Option<PropertyRef>,
    pub(super) requested_by: Option<UserId>,
    pub(super) title: Option<String>,
    pub(super) client_name: String,
    pub(super) client_phone: String,
    pub(super) date: NaiveDate,
    pub(super) time: MinuteOfDay,
    pub(super) start: NaiveDateTime,
    pub(super) end: NaiveDateTime,
    pub(super) status: AppointmentStatus,
    /// Bumped on every write; repositories compare-and-set on it.
    pub(super) revision: u32,
    pub(super) created_at: DateTime<Utc>,
    pub(super) updated_at: DateTime<Utc>,
    pub(super) deleted_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn id(&self) -> &AppointmentId {
        &self.id
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn property(&self) -> Option<&PropertyRef> {
        self.property.as_ref()
    }

    pub fn requested_by(&self) -> Option<&UserId> {
        self.requested_by.as_ref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn client_phone(&self) -> &str {
        &self.client_phone
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn time(&self) -> MinuteOfDay {
        self.time
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn status(&self) -> AppointmentStatus {
        self.status
    }

    /// Revision repositories compare-and-set on.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn occupies_slot(&self) -> bool {
        self.is_live() && self.status.occupies_slot()
    }

    pub fn view(&self) -> AppointmentView {
        let (property_id, sub_property_id) = match &self.property {
            Some(PropertyRef::Property(id)) => (Some(id.clone()), None),
            Some(PropertyRef::SubProperty(id)) => (None, Some(id.clone())),
            None => (None, None),
        };

        AppointmentView {
            id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            property_id,
            sub_property_id,
            requested_by: self.requested_by.clone(),
            title: self.title.clone(),
            client_name: self.client_name.clone(),
            client_phone: self.client_phone.clone(),
            date: self.date,
            time: self.time,
            time_label: self.time.label(),
            start: self.start,
            end: self.end,
            status: self.status.label(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

/// Flattened representation returned by the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentView {
    pub id: AppointmentId,
    pub agent_id: AgentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<PropertyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_property_id: Option<SubPropertyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub client_name: String,
    pub client_phone: String,
    pub date: NaiveDate,
    pub time: MinuteOfDay,
    pub time_label: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Normalized booking handed to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitRequest {
    pub agent_id: AgentId,
    pub property: Option<PropertyRef>,
    pub requested_by: Option<UserId>,
    pub title: Option<String>,
    pub client_name: String,
    pub client_phone: String,
    pub date: NaiveDate,
    pub time: MinuteOfDay,
}

/// Booking payload as received from callers, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub property_id: Option<PropertyId>,
    #[serde(default)]
    pub sub_property_id: Option<SubPropertyId>,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub client_phone: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time: Option<TimeInput>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleRequest {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time: Option<TimeInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Approved,
    Declined,
    Rescheduled,
    Removed,
}

impl EventKind {
    pub const fn label(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Approved => "approved",
            EventKind::Declined => "declined",
            EventKind::Rescheduled => "rescheduled",
            EventKind::Removed => "removed",
        }
    }
}

/// Structured notice consumed by the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentEvent {
    pub appointment_id: AppointmentId,
    pub agent_id: AgentId,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

/// Result of a successful state machine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub appointment: Appointment,
    pub event: AppointmentEvent,
}
