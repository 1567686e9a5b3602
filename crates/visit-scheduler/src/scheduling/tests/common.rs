use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use axum::Router;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::config::SchedulingConfig;
use crate::scheduling::clock::Clock;
use crate::scheduling::directory::{
    AgencyDirectory, CatalogError, DirectoryError, Principal, PropertyCatalog, PropertySummary,
};
use crate::scheduling::domain::{
    AgentId, Appointment, AppointmentEvent, AppointmentId, BookingRequest, PropertyId,
    PropertyRef, UserId, VisitRequest,
};
use crate::scheduling::repository::{
    AppointmentRepository, NotificationError, NotificationPublisher, RepositoryError,
};
use crate::scheduling::window::{MinuteOfDay, OperatingWindow, TimeInput};
use crate::scheduling::{scheduling_router, SchedulingService};

pub(super) const AGENT: &str = "agent-harbor";
pub(super) const AGENT_USER: &str = "user-harbor";
pub(super) const OTHER_AGENT_USER: &str = "user-elm";
pub(super) const ADMIN_USER: &str = "user-admin";
pub(super) const MEMBER_USER: &str = "user-guest";
pub(super) const LOFT: &str = "prop-loft";

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

// 2026-05-04 is a Monday, and the fixed clock sits on it.
pub(super) fn monday() -> NaiveDate {
    date(2026, 5, 4)
}

pub(super) fn tuesday() -> NaiveDate {
    date(2026, 5, 5)
}

pub(super) fn wednesday() -> NaiveDate {
    date(2026, 5, 6)
}

pub(super) fn time(minutes: u16) -> MinuteOfDay {
    MinuteOfDay::new(minutes).expect("in range")
}

pub(super) fn agent() -> AgentId {
    AgentId::from(AGENT)
}

pub(super) fn window() -> OperatingWindow {
    OperatingWindow::new([1, 3, 5], [time(480), time(600)]).expect("valid window")
}

pub(super) fn visit(date: NaiveDate, minutes: u16) -> VisitRequest {
    VisitRequest {
        agent_id: agent(),
        property: Some(PropertyRef::Property(PropertyId::from(LOFT))),
        requested_by: None,
        title: Some("Viewing".to_string()),
        client_name: "Ada Lovelace".to_string(),
        client_phone: "+1 555 0100".to_string(),
        date,
        time: time(minutes),
    }
}

pub(super) fn booking(date: NaiveDate, time: &str) -> BookingRequest {
    BookingRequest {
        agent_id: Some(agent()),
        property_id: Some(PropertyId::from(LOFT)),
        sub_property_id: None,
        client_name: "Ada Lovelace".to_string(),
        client_phone: "+1 555 0100".to_string(),
        date: Some(date),
        time: Some(TimeInput::Text(time.to_string())),
        title: None,
    }
}

pub(super) fn agent_principal() -> Principal {
    Principal::Agent {
        user_id: UserId::from(AGENT_USER),
        agent_id: agent(),
    }
}

pub(super) fn member_principal() -> Principal {
    Principal::Member(UserId::from(MEMBER_USER))
}

pub(super) fn config() -> SchedulingConfig {
    SchedulingConfig::default()
}

pub(super) struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub(super) fn monday_morning() -> Arc<dyn Clock> {
        Arc::new(Self(
            Utc.with_ymd_and_hms(2026, 5, 4, 6, 0, 0)
                .single()
                .expect("valid instant"),
        ))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Default)]
pub(super) struct MemoryRepository {
    records: Mutex<BTreeMap<AppointmentId, Appointment>>,
}

impl MemoryRepository {
    pub(super) fn stored(&self, id: &AppointmentId) -> Option<Appointment> {
        self.records.lock().expect("lock").get(id).cloned()
    }
}

impl AppointmentRepository for MemoryRepository {
    fn insert(&self, appointment: Appointment) -> Result<Appointment, RepositoryError> {
        let mut guard = self.records.lock().expect("lock");
        if guard.contains_key(&appointment.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(appointment.id.clone(), appointment.clone());
        Ok(appointment)
    }

    fn update(
        &self,
        appointment: Appointment,
        expected_revision: u32,
    ) -> Result<Appointment, RepositoryError> {
        let mut guard = self.records.lock().expect("lock");
        let stored = guard
            .get_mut(&appointment.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.revision != expected_revision {
            return Err(RepositoryError::Stale {
                expected: expected_revision,
                found: stored.revision,
            });
        }
        *stored = appointment.clone();
        Ok(appointment)
    }

    fn fetch(&self, id: &AppointmentId) -> Result<Option<Appointment>, RepositoryError> {
        Ok(self.records.lock().expect("lock").get(id).cloned())
    }

    fn all(&self) -> Result<Vec<Appointment>, RepositoryError> {
        Ok(self.records.lock().expect("lock").values().cloned().collect())
    }
}

/// Reports the first `stale_updates` writes as lost races before delegating.
pub(super) struct RacingRepository {
    pub inner: MemoryRepository,
    stale_updates: AtomicUsize,
    pub update_calls: AtomicUsize,
}

impl RacingRepository {
    pub(super) fn new(stale_updates: usize) -> Self {
        Self {
            inner: MemoryRepository::default(),
            stale_updates: AtomicUsize::new(stale_updates),
            update_calls: AtomicUsize::new(0),
        }
    }
}

impl AppointmentRepository for RacingRepository {
    fn insert(&self, appointment: Appointment) -> Result<Appointment, RepositoryError> {
        self.inner.insert(appointment)
    }

    fn update(
        &self,
        appointment: Appointment,
        expected_revision: u32,
    ) -> Result<Appointment, RepositoryError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.stale_updates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.stale_updates.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::Stale {
                expected: expected_revision,
                found: expected_revision + 1,
            });
        }
        self.inner.update(appointment, expected_revision)
    }

    fn fetch(&self, id: &AppointmentId) -> Result<Option<Appointment>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn all(&self) -> Result<Vec<Appointment>, RepositoryError> {
        self.inner.all()
    }
}

type UpdateHook = Box<dyn FnOnce() + Send>;

/// Runs a one-shot hook right after the next row write lands, before the caller regains
/// control.
#[derive(Default)]
pub(super) struct InterleavingRepository {
    pub inner: MemoryRepository,
    after_next_update: Mutex<Option<UpdateHook>>,
}

impl InterleavingRepository {
    pub(super) fn after_next_update(&self, hook: impl FnOnce() + Send + 'static) {
        *self.after_next_update.lock().expect("lock") = Some(Box::new(hook));
    }
}

impl AppointmentRepository for InterleavingRepository {
    fn insert(&self, appointment: Appointment) -> Result<Appointment, RepositoryError> {
        self.inner.insert(appointment)
    }

    fn update(
        &self,
        appointment: Appointment,
        expected_revision: u32,
    ) -> Result<Appointment, RepositoryError> {
        let stored = self.inner.update(appointment, expected_revision)?;
        let hook = self.after_next_update.lock().expect("lock").take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(stored)
    }

    fn fetch(&self, id: &AppointmentId) -> Result<Option<Appointment>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn all(&self) -> Result<Vec<Appointment>, RepositoryError> {
        self.inner.all()
    }
}

/// Accepts reads but refuses every write.
#[derive(Default)]
pub(super) struct ReadOnlyRepository {
    pub inner: MemoryRepository,
}

impl AppointmentRepository for ReadOnlyRepository {
    fn insert(&self, _appointment: Appointment) -> Result<Appointment, RepositoryError> {
        Err(RepositoryError::Unavailable("disk full".to_string()))
    }

    fn update(
        &self,
        _appointment: Appointment,
        _expected_revision: u32,
    ) -> Result<Appointment, RepositoryError> {
        Err(RepositoryError::Unavailable("disk full".to_string()))
    }

    fn fetch(&self, id: &AppointmentId) -> Result<Option<Appointment>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn all(&self) -> Result<Vec<Appointment>, RepositoryError> {
        self.inner.all()
    }
}

#[derive(Default)]
pub(super) struct MemoryNotifier {
    events: Mutex<Vec<AppointmentEvent>>,
}

impl MemoryNotifier {
    pub(super) fn events(&self) -> Vec<AppointmentEvent> {
        self.events.lock().expect("lock").clone()
    }
}

impl NotificationPublisher for MemoryNotifier {
    fn publish(&self, event: AppointmentEvent) -> Result<(), NotificationError> {
        self.events.lock().expect("lock").push(event);
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl NotificationPublisher for FailingNotifier {
    fn publish(&self, _event: AppointmentEvent) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp offline".to_string()))
    }
}

pub(super) struct StaticDirectory {
    principals: HashMap<UserId, Principal>,
    windows: Mutex<HashMap<AgentId, OperatingWindow>>,
}

impl StaticDirectory {
    pub(super) fn harbor() -> Self {
        let principals = [
            agent_principal(),
            Principal::Agent {
                user_id: UserId::from(OTHER_AGENT_USER),
                agent_id: AgentId::from("agent-elm"),
            },
            Principal::Administrator(UserId::from(ADMIN_USER)),
        ]
        .into_iter()
        .filter_map(|principal| principal.user_id().cloned().map(|id| (id, principal)))
        .collect();

        let windows = HashMap::from([(agent(), window())]);
        Self {
            principals,
            windows: Mutex::new(windows),
        }
    }
}

impl AgencyDirectory for StaticDirectory {
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
        Ok(self.windows.lock().expect("lock").get(agent_id).cloned())
    }

    fn store_operating_window(
        &self,
        agent_id: &AgentId,
        window: OperatingWindow,
    ) -> Result<(), DirectoryError> {
        self.windows
            .lock()
            .expect("lock")
            .insert(agent_id.clone(), window);
        Ok(())
    }
}

pub(super) struct StaticCatalog;

impl PropertyCatalog for StaticCatalog {
    fn lookup(&self, reference: &PropertyRef) -> Result<Option<PropertySummary>, CatalogError> {
        let name = match reference {
            PropertyRef::Property(id) if id.0 == LOFT => "Harbor Loft",
            PropertyRef::Property(id) if id.0 == "prop-cottage" => "Elm Cottage",
            _ => return Ok(None),
        };
        Ok(Some(PropertySummary {
            reference: reference.clone(),
            name: name.to_string(),
        }))
    }
}

pub(super) fn build_service_with<R, N>(
    repository: Arc<R>,
    notifier: Arc<N>,
    config: SchedulingConfig,
) -> SchedulingService<R, N>
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    SchedulingService::with_clock(
        repository,
        notifier,
        Box::new(StaticDirectory::harbor()),
        Box::new(StaticCatalog),
        FixedClock::monday_morning(),
        config,
    )
    .expect("service builds")
}

pub(super) fn build_service() -> (
    SchedulingService<MemoryRepository, MemoryNotifier>,
    Arc<MemoryRepository>,
    Arc<MemoryNotifier>,
) {
    let repository = Arc::new(MemoryRepository::default());
    let notifier = Arc::new(MemoryNotifier::default());
    let service = build_service_with(repository.clone(), notifier.clone(), config());
    (service, repository, notifier)
}

pub(super) fn router_with_service<R, N>(service: SchedulingService<R, N>) -> Router
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    scheduling_router(Arc::new(service))
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}
