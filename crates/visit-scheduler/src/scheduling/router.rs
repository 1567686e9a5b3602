use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::domain::{
    AgentId, Appointment, AppointmentId, AppointmentStatus, AppointmentView, BookingRequest,
    RescheduleRequest, UserId,
};
use super::error::{SchedulingError, ValidationError};
use super::repository::{AppointmentRepository, NotificationPublisher};
use super::service::{AppointmentFilter, SchedulingService};
use super::window::OperatingWindow;

/// Header carrying the already-authenticated caller id. Absent means anonymous visitor.
pub const USER_HEADER: &str = "x-user-id";

type SharedService<R, N> = Arc<SchedulingService<R, N>>;

/// Router builder exposing booking, approval and availability endpoints.
pub fn scheduling_router<R, N>(service: SharedService<R, N>) -> Router
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    Router::new()
        .route(
            "/api/v1/appointments",
            post(book_handler::<R, N>).get(list_handler::<R, N>),
        )
        .route(
            "/api/v1/appointments/summary",
            get(summary_handler::<R, N>),
        )
        .route(
            "/api/v1/appointments/:appointment_id",
            get(get_handler::<R, N>).delete(remove_handler::<R, N>),
        )
        .route(
            "/api/v1/appointments/:appointment_id/approve",
            post(approve_handler::<R, N>),
        )
        .route(
            "/api/v1/appointments/:appointment_id/decline",
            post(decline_handler::<R, N>),
        )
        .route(
            "/api/v1/appointments/:appointment_id/reschedule",
            post(reschedule_handler::<R, N>),
        )
        .route(
            "/api/v1/agents/:agent_id/slots",
            get(slots_handler::<R, N>),
        )
        .route(
            "/api/v1/agents/:agent_id/operating-window",
            put(operating_window_handler::<R, N>),
        )
        .with_state(service)
}

/// Raw dashboard query string. Parsed by hand so a bad status or date names the field.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct AppointmentQuery {
    agent_id: Option<String>,
    status: Option<String>,
    from: Option<String>,
    to: Option<String>,
    q: Option<String>,
    include_deleted: Option<bool>,
}

impl AppointmentQuery {
    fn into_filter(self) -> Result<AppointmentFilter, Response> {
        let status = non_empty(self.status)
            .map(|raw| raw.parse::<AppointmentStatus>())
            .transpose()
            .map_err(|err| bad_request(err.to_string()))?;

        Ok(AppointmentFilter {
            agent_id: non_empty(self.agent_id).map(AgentId),
            status,
            from: parse_query_date("from", self.from)?,
            to: parse_query_date("to", self.to)?,
            search: non_empty(self.q),
            include_deleted: self.include_deleted.unwrap_or(false),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SlotsQuery {
    date: Option<String>,
}

pub(crate) async fn book_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    headers: HeaderMap,
    Json(request): Json<BookingRequest>,
) -> Response
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let outcome = service
        .principal(caller_id(&headers).as_ref())
        .and_then(|caller| service.book(&caller, request));

    match outcome {
        Ok(appointment) => (StatusCode::CREATED, Json(appointment.view())).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn list_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    headers: HeaderMap,
    Query(query): Query<AppointmentQuery>,
) -> Response
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(response) => return response,
    };

    let outcome = service
        .principal(caller_id(&headers).as_ref())
        .and_then(|caller| service.list(&caller, &filter));

    match outcome {
        Ok(appointments) => {
            let views: Vec<AppointmentView> =
                appointments.iter().map(|appointment| appointment.view()).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn summary_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    headers: HeaderMap,
    Query(query): Query<AppointmentQuery>,
) -> Response
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(response) => return response,
    };

    match service
        .principal(caller_id(&headers).as_ref())
        .and_then(|caller| service.summary(&caller, &filter))
    {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn get_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    headers: HeaderMap,
    Path(appointment_id): Path<String>,
) -> Response
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let id = AppointmentId(appointment_id);
    respond(
        service
            .principal(caller_id(&headers).as_ref())
            .and_then(|caller| service.get(&caller, &id)),
    )
}

pub(crate) async fn approve_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    headers: HeaderMap,
    Path(appointment_id): Path<String>,
) -> Response
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let id = AppointmentId(appointment_id);
    respond(
        service
            .principal(caller_id(&headers).as_ref())
            .and_then(|caller| service.approve(&caller, &id)),
    )
}

pub(crate) async fn decline_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    headers: HeaderMap,
    Path(appointment_id): Path<String>,
) -> Response
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let id = AppointmentId(appointment_id);
    respond(
        service
            .principal(caller_id(&headers).as_ref())
            .and_then(|caller| service.decline(&caller, &id)),
    )
}

pub(crate) async fn reschedule_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    headers: HeaderMap,
    Path(appointment_id): Path<String>,
    Json(request): Json<RescheduleRequest>,
) -> Response
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let id = AppointmentId(appointment_id);
    respond(
        service
            .principal(caller_id(&headers).as_ref())
            .and_then(|caller| service.reschedule(&caller, &id, request)),
    )
}

pub(crate) async fn remove_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    headers: HeaderMap,
    Path(appointment_id): Path<String>,
) -> Response
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let id = AppointmentId(appointment_id);
    respond(
        service
            .principal(caller_id(&headers).as_ref())
            .and_then(|caller| service.remove(&caller, &id)),
    )
}

pub(crate) async fn slots_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    Path(agent_id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Response
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let date = match parse_query_date("date", query.date) {
        Ok(Some(date)) => date,
        Ok(None) => {
            return SchedulingError::from(ValidationError::MissingField("date")).into_response()
        }
        Err(response) => return response,
    };

    match service.available_slots(&AgentId(agent_id), date) {
        Ok(slots) => (StatusCode::OK, Json(slots)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn operating_window_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Json(window): Json<OperatingWindow>,
) -> Response
where
    R: AppointmentRepository + 'static,
    N: NotificationPublisher + 'static,
{
    let agent_id = AgentId(agent_id);
    match service
        .principal(caller_id(&headers).as_ref())
        .and_then(|caller| service.update_operating_window(&caller, &agent_id, window))
    {
        Ok(window) => (
            StatusCode::OK,
            Json(json!({
                "agent_id": agent_id,
                "operating_days": window.operating_days(),
                "operating_time_slots": window.operating_time_slots(),
            })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

impl IntoResponse for SchedulingError {
    fn into_response(self) -> Response {
        let status = match &self {
            SchedulingError::Validation(_) | SchedulingError::OutsideOperatingWindow { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            SchedulingError::SlotConflict(_) | SchedulingError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            SchedulingError::NotFound(_) => StatusCode::NOT_FOUND,
            SchedulingError::Unauthorized => StatusCode::FORBIDDEN,
            SchedulingError::Repository(_)
            | SchedulingError::Directory(_)
            | SchedulingError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if self.is_infrastructure() {
            error!(error = %self, "scheduling request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let payload = json!({
            "error": message,
            "kind": self.kind(),
        });
        (status, Json(payload)).into_response()
    }
}

fn respond(outcome: Result<Appointment, SchedulingError>) -> Response {
    match outcome {
        Ok(appointment) => (StatusCode::OK, Json(appointment.view())).into_response(),
        Err(err) => err.into_response(),
    }
}

fn caller_id(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(UserId::from)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_query_date(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<NaiveDate>, Response> {
    non_empty(value)
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map_err(|_| bad_request(format!("invalid {field} '{raw}' (expected YYYY-MM-DD)")))
        })
        .transpose()
}

fn bad_request(message: String) -> Response {
    let payload = json!({
        "error": message,
        "kind": "bad_request",
    });
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}
