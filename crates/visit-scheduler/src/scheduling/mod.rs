//! Visit booking against agent operating windows.
//!
//! The calendar answers "is this slot offered", the conflict index answers "is it taken", and
//! the state machine is the only code path that changes an appointment. The service layers
//! identity, catalog and notification collaborators on top; the router exposes it over HTTP.

pub mod calendar;
pub mod clock;
pub mod conflict;
pub mod directory;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod repository;
pub mod router;
pub mod service;
pub mod window;

#[cfg(test)]
mod tests;

pub use calendar::{Availability, Slot};
pub use clock::{Clock, SystemClock};
pub use conflict::{ConflictIndex, SlotConflict, SlotKey};
pub use directory::{
    AgencyDirectory, CatalogError, DirectoryError, Principal, PropertyCatalog, PropertySummary,
};
pub use domain::{
    AgentId, Appointment, AppointmentEvent, AppointmentId, AppointmentStatus, AppointmentView,
    BookingRequest, EventKind, PropertyId, PropertyRef, RescheduleRequest, StatusParseError,
    SubPropertyId, Transition, UserId, VisitRequest,
};
pub use error::{SchedulingError, ValidationError};
pub use lifecycle::AppointmentStateMachine;
pub use repository::{
    AppointmentRepository, NotificationError, NotificationPublisher, RepositoryError,
};
pub use router::{scheduling_router, USER_HEADER};
pub use service::{AppointmentFilter, AvailableSlots, SchedulingService, StatusSummary};
pub use window::{
    MinuteOfDay, OperatingWindow, TimeInput, TimeParseError, WindowError, MINUTES_PER_DAY,
};
