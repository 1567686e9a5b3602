use super::domain::{Appointment, AppointmentEvent, AppointmentId};

/// Storage abstraction so the state machine can be exercised in isolation.
pub trait AppointmentRepository: Send + Sync {
    fn insert(&self, appointment: Appointment) -> Result<Appointment, RepositoryError>;
    /// Replace a record only if its stored revision still equals `expected_revision`.
    fn update(
        &self,
        appointment: Appointment,
        expected_revision: u32,
    ) -> Result<Appointment, RepositoryError>;
    fn fetch(&self, id: &AppointmentId) -> Result<Option<Appointment>, RepositoryError>;
    /// Every stored record, soft-deleted ones included.
    fn all(&self) -> Result<Vec<Appointment>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record changed concurrently (expected revision {expected}, found {found})")]
    Stale { expected: u32, found: u32 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound hook for the notification collaborator (e-mail, SMS, push adapters).
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, event: AppointmentEvent) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
