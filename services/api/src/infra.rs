use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;
use visit_scheduler::scheduling::{
    AgencyDirectory, AgentId, Appointment, AppointmentEvent, AppointmentId,
    AppointmentRepository, CatalogError, DirectoryError, MinuteOfDay, NotificationError,
    NotificationPublisher, OperatingWindow, Principal, PropertyCatalog, PropertyId, PropertyRef,
    PropertySummary, RepositoryError, SubPropertyId, UserId,
};

pub(crate) const DEMO_AGENT: &str = "agent-harborview";
pub(crate) const DEMO_AGENT_USER: &str = "user-harborview";
pub(crate) const DEMO_ADMIN_USER: &str = "user-admin";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local appointment store with compare-and-set on `revision`.
#[derive(Default, Clone)]
pub(crate) struct InMemoryAppointmentRepository {
    records: Arc<Mutex<BTreeMap<AppointmentId, Appointment>>>,
}

impl AppointmentRepository for InMemoryAppointmentRepository {
    fn insert(&self, appointment: Appointment) -> Result<Appointment, RepositoryError> {
        let mut guard = lock(&self.records);
        if guard.contains_key(appointment.id()) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(appointment.id().clone(), appointment.clone());
        Ok(appointment)
    }

    fn update(
        &self,
        appointment: Appointment,
        expected_revision: u32,
    ) -> Result<Appointment, RepositoryError> {
        let mut guard = lock(&self.records);
        let stored = guard
            .get_mut(appointment.id())
            .ok_or(RepositoryError::NotFound)?;
        if stored.revision() != expected_revision {
            return Err(RepositoryError::Stale {
                expected: expected_revision,
                found: stored.revision(),
            });
        }
        *stored = appointment.clone();
        Ok(appointment)
    }

    fn fetch(&self, id: &AppointmentId) -> Result<Option<Appointment>, RepositoryError> {
        Ok(lock(&self.records).get(id).cloned())
    }

    fn all(&self) -> Result<Vec<Appointment>, RepositoryError> {
        Ok(lock(&self.records).values().cloned().collect())
    }
}

/// Identity and agency settings for the demo agency.
pub(crate) struct InMemoryAgencyDirectory {
    principals: HashMap<UserId, Principal>,
    windows: Mutex<HashMap<AgentId, OperatingWindow>>,
}

impl InMemoryAgencyDirectory {
    /// One agency open Monday, Wednesday and Friday at 08:00 and 10:00, plus an administrator.
    pub(crate) fn seeded() -> Self {
        let agent_id = AgentId::from(DEMO_AGENT);
        let principals = HashMap::from([
            (
                UserId::from(DEMO_AGENT_USER),
                Principal::Agent {
                    user_id: UserId::from(DEMO_AGENT_USER),
                    agent_id: agent_id.clone(),
                },
            ),
            (
                UserId::from(DEMO_ADMIN_USER),
                Principal::Administrator(UserId::from(DEMO_ADMIN_USER)),
            ),
        ]);

        let mut windows = HashMap::new();
        if let Some(window) = demo_window() {
            windows.insert(agent_id, window);
        }

        Self {
            principals,
            windows: Mutex::new(windows),
        }
    }
}

fn demo_window() -> Option<OperatingWindow> {
    let slots = [480, 600]
        .into_iter()
        .map(MinuteOfDay::new)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    OperatingWindow::new([1, 3, 5], slots).ok()
}

impl AgencyDirectory for InMemoryAgencyDirectory {
    fn resolve(&self, user_id: &UserId) -> Result<Option<Principal>, DirectoryError> {
        Ok(self.principals.get(user_id).cloned())
    }

    fn can_manage(&self, principal: &Principal, agent_id: &AgentId) -> Result<bool, DirectoryError> {
        Ok(match principal {
            Principal::Administrator(_) => true,
            Principal::Agent { agent_id: own, .. } => own == agent_id,
            Principal::Visitor | Principal::Member(_) => false,
        })
    }

    fn operating_window(
        &self,
        agent_id: &AgentId,
    ) -> Result<Option<OperatingWindow>, DirectoryError> {
        Ok(lock(&self.windows).get(agent_id).cloned())
    }

    fn store_operating_window(
        &self,
        agent_id: &AgentId,
        window: OperatingWindow,
    ) -> Result<(), DirectoryError> {
        lock(&self.windows).insert(agent_id.clone(), window);
        Ok(())
    }
}

/// Tiny fixed catalog of demo listings.
#[derive(Clone)]
pub(crate) struct InMemoryPropertyCatalog {
    names: HashMap<PropertyRef, String>,
}

impl Default for InMemoryPropertyCatalog {
    fn default() -> Self {
        let names = HashMap::from([
            (
                PropertyRef::Property(PropertyId::from("prop-harbor-loft")),
                "Harbor Loft".to_string(),
            ),
            (
                PropertyRef::Property(PropertyId::from("prop-elm-cottage")),
                "Elm Street Cottage".to_string(),
            ),
            (
                PropertyRef::SubProperty(SubPropertyId::from("unit-harbor-2b")),
                "Harbor Loft, unit 2B".to_string(),
            ),
        ]);
        Self { names }
    }
}

impl PropertyCatalog for InMemoryPropertyCatalog {
    fn lookup(&self, reference: &PropertyRef) -> Result<Option<PropertySummary>, CatalogError> {
        Ok(self.names.get(reference).map(|name| PropertySummary {
            reference: reference.clone(),
            name: name.clone(),
        }))
    }
}

/// Stands in for the e-mail/SMS adapters: logs every event and keeps a copy.
#[derive(Default, Clone)]
pub(crate) struct InMemoryNotifier {
    events: Arc<Mutex<Vec<AppointmentEvent>>>,
}

impl NotificationPublisher for InMemoryNotifier {
    fn publish(&self, event: AppointmentEvent) -> Result<(), NotificationError> {
        info!(
            appointment_id = %event.appointment_id,
            agent_id = %event.agent_id,
            kind = event.kind.label(),
            "appointment notification queued"
        );
        lock(&self.events).push(event);
        Ok(())
    }
}

impl InMemoryNotifier {
    pub(crate) fn events(&self) -> Vec<AppointmentEvent> {
        lock(&self.events).clone()
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

pub(crate) fn parse_time(raw: &str) -> Result<MinuteOfDay, String> {
    raw.parse::<MinuteOfDay>().map_err(|err| err.to_string())
}
