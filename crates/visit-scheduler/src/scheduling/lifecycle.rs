use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, info};

use super::calendar;
use super::clock::Clock;
use super::conflict::{ConflictIndex, SlotKey};
use super::domain::{
    Appointment, AppointmentEvent, AppointmentId, AppointmentStatus, EventKind, Transition,
    VisitRequest,
};
use super::error::{SchedulingError, ValidationError};
use super::repository::{AppointmentRepository, RepositoryError};
use super::window::{MinuteOfDay, OperatingWindow};
use crate::config::SchedulingConfig;

const MAX_WRITE_ATTEMPTS: usize = 3;
const ID_PREFIX: &str = "apt-";
const TRANSITION_STRIPES: usize = 32;

/// Owns every status change of an appointment and keeps the conflict index in step.
///
/// Slot claims go through [`ConflictIndex::reserve`] before the row is written and are
/// compensated if the write fails. Record updates are compare-and-set on `revision`; a
/// stale write is retried from a fresh read so the transition rules are re-checked.
///
/// Transitions of one appointment are serialized: the row write and the slot release that
/// follows it form one unit, so a later transition never observes the row without the
/// matching occupancy.
pub struct AppointmentStateMachine<R> {
    repository: Arc<R>,
    index: ConflictIndex,
    transitions: TransitionLocks,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
    sequence: AtomicU64,
}

impl<R> AppointmentStateMachine<R>
where
    R: AppointmentRepository,
{
    /// Build the machine, rebuilding occupancy from whatever the repository already holds.
    pub fn new(
        repository: Arc<R>,
        clock: Arc<dyn Clock>,
        config: SchedulingConfig,
    ) -> Result<Self, RepositoryError> {
        let existing = repository.all()?;
        let index = ConflictIndex::from_records(&existing);
        let next_sequence = existing
            .iter()
            .filter_map(|appointment| sequence_number(&appointment.id))
            .max()
            .unwrap_or(0)
            + 1;

        info!(
            appointments = existing.len(),
            occupied_slots = index.len(),
            "conflict index hydrated"
        );

        Ok(Self {
            repository,
            index,
            transitions: TransitionLocks::new(),
            clock,
            config,
            sequence: AtomicU64::new(next_sequence),
        })
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    pub fn index(&self) -> &ConflictIndex {
        &self.index
    }

    pub fn today(&self) -> NaiveDate {
        self.config.today(self.clock.now())
    }

    pub fn records(&self) -> Result<Vec<Appointment>, SchedulingError> {
        Ok(self.repository.all()?)
    }

    /// Fetch a record that has not been soft-deleted.
    pub fn fetch_live(&self, id: &AppointmentId) -> Result<Appointment, SchedulingError> {
        match self.repository.fetch(id)? {
            Some(appointment) if appointment.is_live() => Ok(appointment),
            _ => Err(SchedulingError::NotFound(id.clone())),
        }
    }

    pub fn create(
        &self,
        request: VisitRequest,
        window: &OperatingWindow,
    ) -> Result<Transition, SchedulingError> {
        let client_name = required(&request.client_name, "client_name")?;
        let client_phone = required(&request.client_phone, "client_phone")?;
        self.ensure_bookable(window, request.date, request.time)?;
        let (start, end) = self.slot_bounds(request.date, request.time)?;

        let id = self.next_id();
        let key = SlotKey::new(request.agent_id.clone(), request.date, request.time);
        if let Err(conflict) = self.index.reserve(&key, &id) {
            debug!(agent_id = %key.agent_id, date = %key.date, time = %key.time, holder = %conflict.holder, "slot already taken");
            return Err(conflict.into());
        }

        let now = self.clock.now();
        let appointment = Appointment {
            id: id.clone(),
            agent_id: request.agent_id,
            property: request.property,
            requested_by: request.requested_by,
            title: request
                .title
                .map(|title| title.trim().to_string())
                .filter(|title| !title.is_empty()),
            client_name,
            client_phone,
            date: request.date,
            time: request.time,
            start,
            end,
            status: AppointmentStatus::Pending,
            revision: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let stored = match self.repository.insert(appointment) {
            Ok(stored) => stored,
            Err(err) => {
                self.index.release(&key, &id);
                return Err(err.into());
            }
        };

        info!(appointment_id = %stored.id, agent_id = %stored.agent_id, date = %stored.date, time = %stored.time, "visit booked");
        Ok(transition(stored, EventKind::Created, now))
    }

    pub fn approve(&self, id: &AppointmentId) -> Result<Transition, SchedulingError> {
        let _serialized = self.transitions.hold(id);
        self.retrying(|| {
            let current = self.fetch_live(id)?;
            if current.status != AppointmentStatus::Pending {
                return Err(SchedulingError::InvalidTransition {
                    from: current.status,
                    action: "approve",
                });
            }

            let now = self.clock.now();
            let next = Appointment {
                status: AppointmentStatus::Approved,
                ..current.clone()
            };
            let stored = self.persist(&current, next, now)?;
            info!(appointment_id = %stored.id, "visit approved");
            Ok(transition(stored, EventKind::Approved, now))
        })
    }

    pub fn decline(&self, id: &AppointmentId) -> Result<Transition, SchedulingError> {
        let _serialized = self.transitions.hold(id);
        self.retrying(|| {
            let current = self.fetch_live(id)?;
            if current.status == AppointmentStatus::Declined {
                return Err(SchedulingError::InvalidTransition {
                    from: current.status,
                    action: "decline",
                });
            }

            let now = self.clock.now();
            let next = Appointment {
                status: AppointmentStatus::Declined,
                ..current.clone()
            };
            let stored = self.persist(&current, next, now)?;
            self.index.release(&SlotKey::of(&current), &current.id);
            info!(appointment_id = %stored.id, "visit declined, slot released");
            Ok(transition(stored, EventKind::Declined, now))
        })
    }

    /// Move a visit to a new slot. Allowed from any status; always lands in `pending`.
    pub fn reschedule(
        &self,
        id: &AppointmentId,
        date: NaiveDate,
        time: MinuteOfDay,
        window: &OperatingWindow,
    ) -> Result<Transition, SchedulingError> {
        self.ensure_bookable(window, date, time)?;
        let (start, end) = self.slot_bounds(date, time)?;

        let _serialized = self.transitions.hold(id);
        self.retrying(|| {
            let current = self.fetch_live(id)?;
            let old_key = SlotKey::of(&current);
            let new_key = SlotKey::new(current.agent_id.clone(), date, time);
            let held_before = current.occupies_slot() && old_key == new_key;

            self.index.reserve(&new_key, &current.id)?;

            let now = self.clock.now();
            let next = Appointment {
                date,
                time,
                start,
                end,
                status: AppointmentStatus::Pending,
                ..current.clone()
            };

            match self.persist(&current, next, now) {
                Ok(stored) => {
                    if old_key != new_key {
                        self.index.release(&old_key, &current.id);
                    }
                    info!(
                        appointment_id = %stored.id,
                        from_date = %current.date,
                        from_time = %current.time,
                        to_date = %stored.date,
                        to_time = %stored.time,
                        "visit rescheduled, awaiting approval"
                    );
                    Ok(transition(stored, EventKind::Rescheduled, now))
                }
                Err(err) => {
                    if !held_before {
                        self.index.release(&new_key, &current.id);
                    }
                    Err(err)
                }
            }
        })
    }

    /// Soft-delete: the record stays in storage with `deleted_at` set and frees its slot.
    pub fn remove(&self, id: &AppointmentId) -> Result<Transition, SchedulingError> {
        let _serialized = self.transitions.hold(id);
        self.retrying(|| {
            let current = self.fetch_live(id)?;
            let now = self.clock.now();
            let next = Appointment {
                deleted_at: Some(now),
                ..current.clone()
            };
            let stored = self.persist(&current, next, now)?;
            self.index.release(&SlotKey::of(&current), &current.id);
            info!(appointment_id = %stored.id, "visit removed");
            Ok(transition(stored, EventKind::Removed, now))
        })
    }

    fn ensure_bookable(
        &self,
        window: &OperatingWindow,
        date: NaiveDate,
        time: MinuteOfDay,
    ) -> Result<(), SchedulingError> {
        if calendar::is_slot_in_window(window, date, time, self.today()) {
            Ok(())
        } else {
            Err(SchedulingError::OutsideOperatingWindow { date, time })
        }
    }

    fn slot_bounds(
        &self,
        date: NaiveDate,
        time: MinuteOfDay,
    ) -> Result<(NaiveDateTime, NaiveDateTime), SchedulingError> {
        let start = time.on(date);
        let end = start.and_then(|start| start.checked_add_signed(self.config.slot_duration()));
        match (start, end) {
            (Some(start), Some(end)) => Ok((start, end)),
            _ => Err(SchedulingError::OutsideOperatingWindow { date, time }),
        }
    }

    fn next_id(&self) -> AppointmentId {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        AppointmentId(format!("{ID_PREFIX}{id:06}"))
    }

    fn persist(
        &self,
        current: &Appointment,
        mut next: Appointment,
        now: DateTime<Utc>,
    ) -> Result<Appointment, SchedulingError> {
        next.revision = current.revision.wrapping_add(1);
        next.updated_at = now;
        Ok(self.repository.update(next, current.revision)?)
    }

    fn retrying<T>(
        &self,
        mut attempt: impl FnMut() -> Result<T, SchedulingError>,
    ) -> Result<T, SchedulingError> {
        let mut tries = 1;
        loop {
            match attempt() {
                Err(SchedulingError::Repository(RepositoryError::Stale { expected, found }))
                    if tries < MAX_WRITE_ATTEMPTS =>
                {
                    debug!(expected, found, attempt = tries, "stale appointment write, retrying");
                    tries += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

/// Fixed set of locks keyed by appointment id hash.
struct TransitionLocks {
    stripes: [Mutex<()>; TRANSITION_STRIPES],
}

impl TransitionLocks {
    fn new() -> Self {
        Self {
            stripes: std::array::from_fn(|_| Mutex::new(())),
        }
    }

    fn hold(&self, id: &AppointmentId) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let stripe = hasher.finish() as usize % TRANSITION_STRIPES;
        self.stripes[stripe]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn required(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(trimmed.to_string())
    }
}

fn sequence_number(id: &AppointmentId) -> Option<u64> {
    id.0.strip_prefix(ID_PREFIX)?.parse().ok()
}

fn transition(appointment: Appointment, kind: EventKind, now: DateTime<Utc>) -> Transition {
    let event = AppointmentEvent {
        appointment_id: appointment.id.clone(),
        agent_id: appointment.agent_id.clone(),
        kind,
        timestamp: now,
    };
    Transition { appointment, event }
}
