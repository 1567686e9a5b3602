use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;

use super::domain::{AgentId, Appointment, AppointmentId};
use super::window::MinuteOfDay;

/// Uniqueness key for live bookings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub agent_id: AgentId,
    pub date: NaiveDate,
    pub time: MinuteOfDay,
}

impl SlotKey {
    pub fn new(agent_id: AgentId, date: NaiveDate, time: MinuteOfDay) -> Self {
        Self {
            agent_id,
            date,
            time,
        }
    }

    pub fn of(appointment: &Appointment) -> Self {
        Self::new(
            appointment.agent_id.clone(),
            appointment.date,
            appointment.time,
        )
    }
}

/// Raised when a slot is already held by another live appointment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} on {} is already booked for agent {}", .key.time, .key.date, .key.agent_id)]
pub struct SlotConflict {
    pub key: SlotKey,
    pub holder: AppointmentId,
}

/// Occupancy map of (agent, date, time) to the appointment holding it.
///
/// `reserve` is a compare-and-set: the check and the claim happen under one lock, and the
/// lock is never held across storage calls.
#[derive(Debug, Default)]
pub struct ConflictIndex {
    slots: Mutex<BTreeMap<SlotKey, AppointmentId>>,
}

impl ConflictIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild occupancy from stored records; only live pending/approved rows count.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Appointment>) -> Self {
        let slots = records
            .into_iter()
            .filter(|appointment| appointment.occupies_slot())
            .map(|appointment| (SlotKey::of(appointment), appointment.id.clone()))
            .collect();

        Self {
            slots: Mutex::new(slots),
        }
    }

    // Every mutation is a single insert or remove, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<SlotKey, AppointmentId>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_occupied(&self, agent_id: &AgentId, date: NaiveDate, time: MinuteOfDay) -> bool {
        self.lock()
            .contains_key(&SlotKey::new(agent_id.clone(), date, time))
    }

    pub fn holder(&self, key: &SlotKey) -> Option<AppointmentId> {
        self.lock().get(key).cloned()
    }

    pub fn reserve(&self, key: &SlotKey, appointment_id: &AppointmentId) -> Result<(), SlotConflict> {
        let mut slots = self.lock();
        match slots.get(key) {
            Some(holder) if holder != appointment_id => Err(SlotConflict {
                key: key.clone(),
                holder: holder.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                slots.insert(key.clone(), appointment_id.clone());
                Ok(())
            }
        }
    }

    /// Returns whether the slot was held by `appointment_id` and is now free.
    pub fn release(&self, key: &SlotKey, appointment_id: &AppointmentId) -> bool {
        let mut slots = self.lock();
        if slots.get(key) == Some(appointment_id) {
            slots.remove(key);
            true
        } else {
            false
        }
    }

    pub fn occupied_times(&self, agent_id: &AgentId, date: NaiveDate) -> BTreeSet<MinuteOfDay> {
        let lower = SlotKey::new(agent_id.clone(), date, MinuteOfDay::MIDNIGHT);
        let upper = SlotKey::new(agent_id.clone(), date, MinuteOfDay::LAST);
        self.lock()
            .range(lower..=upper)
            .map(|(key, _)| key.time)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
