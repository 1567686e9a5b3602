use chrono::NaiveDate;

use super::conflict::SlotConflict;
use super::directory::{CatalogError, DirectoryError};
use super::domain::{AppointmentId, AppointmentStatus, PropertyRef};
use super::repository::RepositoryError;
use super::window::{MinuteOfDay, TimeParseError};

/// Input problems the caller can fix by re-submitting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("invalid {field}: {source}")]
    InvalidTime {
        field: &'static str,
        source: TimeParseError,
    },
    #[error("a visit may reference a property or a sub-property, not both")]
    AmbiguousProperty,
    #[error("referenced {0:?} does not exist")]
    UnknownProperty(PropertyRef),
}

/// Every outcome the scheduling engine reports besides success.
#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{time} on {date} is not within the agent's operating window")]
    OutsideOperatingWindow { date: NaiveDate, time: MinuteOfDay },
    #[error(transparent)]
    SlotConflict(#[from] SlotConflict),
    #[error("cannot {action} an appointment that is {from}")]
    InvalidTransition {
        from: AppointmentStatus,
        action: &'static str,
    },
    #[error("appointment {0} not found")]
    NotFound(AppointmentId),
    #[error("caller may not manage these appointments")]
    Unauthorized,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl SchedulingError {
    /// Storage or collaborator failures, as opposed to business outcomes.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            SchedulingError::Repository(_)
                | SchedulingError::Directory(_)
                | SchedulingError::Catalog(_)
        )
    }

    /// Stable machine-readable kind for response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulingError::Validation(_) => "validation_error",
            SchedulingError::OutsideOperatingWindow { .. } => "outside_operating_window",
            SchedulingError::SlotConflict(_) => "slot_conflict",
            SchedulingError::InvalidTransition { .. } => "invalid_transition",
            SchedulingError::NotFound(_) => "not_found",
            SchedulingError::Unauthorized => "unauthorized",
            SchedulingError::Repository(_)
            | SchedulingError::Directory(_)
            | SchedulingError::Catalog(_) => "internal",
        }
    }
}
