use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::calendar::{self, Availability};
use super::clock::{Clock, SystemClock};
use super::directory::{AgencyDirectory, Principal, PropertyCatalog};
use super::domain::{
    AgentId, Appointment, AppointmentId, AppointmentStatus, BookingRequest, PropertyRef,
    RescheduleRequest, Transition, UserId, VisitRequest,
};
use super::error::{SchedulingError, ValidationError};
use super::lifecycle::AppointmentStateMachine;
use super::repository::{AppointmentRepository, NotificationPublisher};
use super::window::{MinuteOfDay, OperatingWindow, TimeInput};
use crate::config::SchedulingConfig;

/// Façade composing the state machine with the identity, catalog and notification
/// collaborators.
pub struct SchedulingService<R, N> {
    machine: AppointmentStateMachine<R>,
    notifier: Arc<N>,
    directory: Box<dyn AgencyDirectory>,
    catalog: Box<dyn PropertyCatalog>,
}

/// Dashboard filters. Every field is optional; `search` matches client name or property name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl AppointmentFilter {
    pub fn for_agent(agent_id: AgentId) -> Self {
        Self {
            agent_id: Some(agent_id),
            ..Self::default()
        }
    }

    fn matches_fields(&self, appointment: &Appointment) -> bool {
        (self.include_deleted || appointment.is_live())
            && self
                .agent_id
                .as_ref()
                .map_or(true, |agent_id| &appointment.agent_id == agent_id)
            && self.status.map_or(true, |status| appointment.status == status)
            && self.from.map_or(true, |from| appointment.date >= from)
            && self.to.map_or(true, |to| appointment.date <= to)
    }
}

/// Per-status counts backing the dashboard tiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub pending: usize,
    pub approved: usize,
    pub declined: usize,
    pub total: usize,
}

/// Free slots for one agent and date. `configured = false` means the agent offers no window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableSlots {
    pub agent_id: AgentId,
    pub date: NaiveDate,
    pub configured: bool,
    pub slots: Vec<MinuteOfDay>,
}

impl<R, N> SchedulingService<R, N>
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(
        repository: Arc<R>,
        notifier: Arc<N>,
        directory: Box<dyn AgencyDirectory>,
        catalog: Box<dyn PropertyCatalog>,
        config: SchedulingConfig,
    ) -> Result<Self, SchedulingError> {
        Self::with_clock(
            repository,
            notifier,
            directory,
            catalog,
            Arc::new(SystemClock),
            config,
        )
    }

    pub fn with_clock(
        repository: Arc<R>,
        notifier: Arc<N>,
        directory: Box<dyn AgencyDirectory>,
        catalog: Box<dyn PropertyCatalog>,
        clock: Arc<dyn Clock>,
        config: SchedulingConfig,
    ) -> Result<Self, SchedulingError> {
        let machine = AppointmentStateMachine::new(repository, clock, config)?;
        Ok(Self {
            machine,
            notifier,
            directory,
            catalog,
        })
    }

    pub fn state_machine(&self) -> &AppointmentStateMachine<R> {
        &self.machine
    }

    /// Resolve the already-authenticated caller. No id means an anonymous visitor.
    pub fn principal(&self, user_id: Option<&UserId>) -> Result<Principal, SchedulingError> {
        let Some(user_id) = user_id else {
            return Ok(Principal::Visitor);
        };

        Ok(self
            .directory
            .resolve(user_id)?
            .unwrap_or_else(|| Principal::Member(user_id.clone())))
    }

    /// Book a visit. Open to visitors and authenticated callers alike.
    pub fn book(
        &self,
        caller: &Principal,
        request: BookingRequest,
    ) -> Result<Appointment, SchedulingError> {
        let visit = normalize_booking(caller, request)?;
        if let Some(reference) = &visit.property {
            self.ensure_property_exists(reference)?;
        }

        let window = self.window_for(&visit.agent_id)?;
        let transition = self.machine.create(visit, &window)?;
        Ok(self.dispatch(transition))
    }

    pub fn approve(
        &self,
        caller: &Principal,
        id: &AppointmentId,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.machine.fetch_live(id)?;
        self.authorize(caller, &current.agent_id)?;
        let transition = self.machine.approve(id)?;
        Ok(self.dispatch(transition))
    }

    pub fn decline(
        &self,
        caller: &Principal,
        id: &AppointmentId,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.machine.fetch_live(id)?;
        self.authorize(caller, &current.agent_id)?;
        let transition = self.machine.decline(id)?;
        Ok(self.dispatch(transition))
    }

    pub fn reschedule(
        &self,
        caller: &Principal,
        id: &AppointmentId,
        request: RescheduleRequest,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.machine.fetch_live(id)?;
        let originator = current.requested_by.is_some()
            && current.requested_by.as_ref() == caller.user_id();
        if !(originator && self.machine.config().originator_may_reschedule) {
            self.authorize(caller, &current.agent_id)?;
        }

        let date = request.date.ok_or(ValidationError::MissingField("date"))?;
        let time = normalize_time(request.time.as_ref())?;
        let window = self.window_for(&current.agent_id)?;
        let transition = self.machine.reschedule(id, date, time, &window)?;
        Ok(self.dispatch(transition))
    }

    pub fn remove(
        &self,
        caller: &Principal,
        id: &AppointmentId,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.machine.fetch_live(id)?;
        self.authorize(caller, &current.agent_id)?;
        let transition = self.machine.remove(id)?;
        Ok(self.dispatch(transition))
    }

    /// Visible to the agency that owns the visit and to the user who requested it.
    pub fn get(
        &self,
        caller: &Principal,
        id: &AppointmentId,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.machine.fetch_live(id)?;
        let originator = current.requested_by.is_some()
            && current.requested_by.as_ref() == caller.user_id();
        if !originator {
            self.authorize(caller, &current.agent_id)?;
        }
        Ok(current)
    }

    pub fn list(
        &self,
        caller: &Principal,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        self.authorize_listing(caller, filter.agent_id.as_ref())?;

        let needle = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|needle| !needle.is_empty())
            .map(str::to_lowercase);

        let mut matches = Vec::new();
        for appointment in self.machine.records()? {
            if !filter.matches_fields(&appointment) {
                continue;
            }
            if let Some(needle) = &needle {
                if !self.matches_text(&appointment, needle)? {
                    continue;
                }
            }
            matches.push(appointment);
        }

        matches.sort_by(|a, b| (a.date, a.time, &a.id).cmp(&(b.date, b.time, &b.id)));
        Ok(matches)
    }

    /// Status counts over the filter; any status filter is ignored so all three tiles fill.
    pub fn summary(
        &self,
        caller: &Principal,
        filter: &AppointmentFilter,
    ) -> Result<StatusSummary, SchedulingError> {
        let filter = AppointmentFilter {
            status: None,
            ..filter.clone()
        };

        let summary = self
            .list(caller, &filter)?
            .iter()
            .fold(StatusSummary::default(), |mut summary, appointment| {
                match appointment.status {
                    AppointmentStatus::Pending => summary.pending += 1,
                    AppointmentStatus::Approved => summary.approved += 1,
                    AppointmentStatus::Declined => summary.declined += 1,
                }
                summary.total += 1;
                summary
            });
        Ok(summary)
    }

    /// Operating-window slots for `date` that no live visit occupies. Never an error for
    /// an agent without a window: the answer is simply empty.
    pub fn available_slots(
        &self,
        agent_id: &AgentId,
        date: NaiveDate,
    ) -> Result<AvailableSlots, SchedulingError> {
        let window = self.window_for(agent_id)?;
        let occupied = self.machine.index().occupied_times(agent_id, date);
        let slots = calendar::slots_for_date(&window, date, self.machine.today())
            .filter(|time| !occupied.contains(time))
            .collect();

        Ok(AvailableSlots {
            agent_id: agent_id.clone(),
            date,
            configured: calendar::availability(&window) == Availability::Open,
            slots,
        })
    }

    /// Replace an agent's window. Existing bookings are left untouched.
    pub fn update_operating_window(
        &self,
        caller: &Principal,
        agent_id: &AgentId,
        window: OperatingWindow,
    ) -> Result<OperatingWindow, SchedulingError> {
        self.authorize(caller, agent_id)?;
        self.directory
            .store_operating_window(agent_id, window.clone())?;
        info!(
            agent_id = %agent_id,
            days = window.operating_days().len(),
            slots = window.operating_time_slots().len(),
            "operating window updated"
        );
        Ok(window)
    }

    fn window_for(&self, agent_id: &AgentId) -> Result<OperatingWindow, SchedulingError> {
        Ok(self
            .directory
            .operating_window(agent_id)?
            .unwrap_or_else(OperatingWindow::closed))
    }

    fn authorize(&self, caller: &Principal, agent_id: &AgentId) -> Result<(), SchedulingError> {
        if self.directory.can_manage(caller, agent_id)? {
            Ok(())
        } else {
            warn!(agent_id = %agent_id, caller = ?caller.user_id(), "rejected administrative action");
            Err(SchedulingError::Unauthorized)
        }
    }

    fn authorize_listing(
        &self,
        caller: &Principal,
        agent_id: Option<&AgentId>,
    ) -> Result<(), SchedulingError> {
        match agent_id {
            Some(agent_id) => self.authorize(caller, agent_id),
            None if matches!(caller, Principal::Administrator(_)) => Ok(()),
            None => Err(SchedulingError::Unauthorized),
        }
    }

    fn ensure_property_exists(&self, reference: &PropertyRef) -> Result<(), SchedulingError> {
        match self.catalog.lookup(reference)? {
            Some(_) => Ok(()),
            None => Err(ValidationError::UnknownProperty(reference.clone()).into()),
        }
    }

    fn matches_text(
        &self,
        appointment: &Appointment,
        needle: &str,
    ) -> Result<bool, SchedulingError> {
        if appointment.client_name.to_lowercase().contains(needle) {
            return Ok(true);
        }

        let Some(reference) = &appointment.property else {
            return Ok(false);
        };
        Ok(self
            .catalog
            .lookup(reference)?
            .is_some_and(|summary| summary.name.to_lowercase().contains(needle)))
    }

    /// Hand the event to the notification collaborator. Failures never undo the transition.
    fn dispatch(&self, transition: Transition) -> Appointment {
        let Transition { appointment, event } = transition;
        let kind = event.kind;
        if let Err(err) = self.notifier.publish(event) {
            warn!(
                appointment_id = %appointment.id,
                kind = kind.label(),
                error = %err,
                "notification hand-off failed; transition kept"
            );
        }
        appointment
    }
}

fn normalize_booking(
    caller: &Principal,
    request: BookingRequest,
) -> Result<VisitRequest, ValidationError> {
    let BookingRequest {
        agent_id,
        property_id,
        sub_property_id,
        client_name,
        client_phone,
        date,
        time,
        title,
    } = request;

    let agent_id = agent_id
        .filter(|agent_id| !agent_id.0.trim().is_empty())
        .or_else(|| caller.agent_id().cloned())
        .ok_or(ValidationError::MissingField("agent_id"))?;

    let property = match (property_id, sub_property_id) {
        (Some(_), Some(_)) => return Err(ValidationError::AmbiguousProperty),
        (Some(id), None) => Some(PropertyRef::Property(id)),
        (None, Some(id)) => Some(PropertyRef::SubProperty(id)),
        (None, None) => None,
    };

    let date = date.ok_or(ValidationError::MissingField("date"))?;
    let time = normalize_time(time.as_ref())?;

    Ok(VisitRequest {
        agent_id,
        property,
        requested_by: caller.user_id().cloned(),
        title,
        client_name,
        client_phone,
        date,
        time,
    })
}

fn normalize_time(input: Option<&TimeInput>) -> Result<MinuteOfDay, ValidationError> {
    input
        .ok_or(ValidationError::MissingField("time"))?
        .normalize()
        .map_err(|source| ValidationError::InvalidTime {
            field: "time",
            source,
        })
}
