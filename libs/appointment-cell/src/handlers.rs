// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{NaiveDate, Utc};
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Role, User};
use shared_models::error::AppError;

use crate::models::{
    AppointmentError, AppointmentSearchQuery, AppointmentStatus, AvailableSlotsResponse,
    BookAppointmentRequest, CancelAppointmentRequest, RejectAppointmentRequest,
};
use crate::services::booking::BookingService;
use crate::services::queue::QueueService;
use crate::services::schedule::ScheduleService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentQueryParams {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub date: Option<NaiveDate>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

// ==============================================================================
// ERROR MAPPING
// ==============================================================================

fn map_appointment_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::PastDate => {
            AppError::BadRequest("Appointment date is in the past".to_string())
        }
        // Deliberately silent about who holds the slot
        AppointmentError::SlotTaken => {
            AppError::Conflict("This slot is no longer available".to_string())
        }
        AppointmentError::InvalidSlot(msg) => AppError::BadRequest(format!("Invalid slot: {}", msg)),
        AppointmentError::InvalidTransition(status) => AppError::BadRequest(format!(
            "Appointment cannot change state from {}",
            status
        )),
        AppointmentError::NotAuthorized => {
            AppError::Forbidden("Not authorized to act on this appointment".to_string())
        }
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::DoctorNotApproved => {
            AppError::Forbidden("Doctor is not approved for consultations".to_string())
        }
        AppointmentError::Database(msg) => AppError::Database(msg),
    }
}

fn user_uuid(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id).map_err(|_| AppError::Auth("Invalid user id in token".to_string()))
}

// ==============================================================================
// HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<AvailableSlotsResponse>, AppError> {
    let service = ScheduleService::new(&state);

    let slots = service
        .available_slots_for(query.doctor_id, query.date, Utc::now(), Some(auth.token()))
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(AvailableSlotsResponse {
        doctor_id: query.doctor_id,
        date: query.date,
        slots,
    }))
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    // Patients book for themselves; admins may book on a patient's behalf.
    let caller = user_uuid(&user)?;
    if user.role != Role::Admin && caller != request.patient_id {
        return Err(AppError::Forbidden(
            "Not authorized to book an appointment for this patient".to_string(),
        ));
    }

    let service = BookingService::new(&state);
    let appointment = service
        .book(request, Utc::now(), Some(auth.token()))
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn accept_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    if user.role != Role::Doctor {
        return Err(AppError::Forbidden(
            "Only doctors can accept appointments".to_string(),
        ));
    }
    let doctor_id = user_uuid(&user)?;

    let service = BookingService::new(&state);
    let appointment = service
        .accept(appointment_id, doctor_id, Utc::now(), Some(auth.token()))
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn reject_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RejectAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    if user.role != Role::Doctor {
        return Err(AppError::Forbidden(
            "Only doctors can reject appointments".to_string(),
        ));
    }
    let doctor_id = user_uuid(&user)?;

    let service = BookingService::new(&state);
    let appointment = service
        .reject(appointment_id, doctor_id, request.reason, Some(auth.token()))
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let caller = user_uuid(&user)?;

    let service = BookingService::new(&state);
    let appointment = service
        .cancel(
            appointment_id,
            caller,
            user.role == Role::Admin,
            request.reason,
            Some(auth.token()),
        )
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = BookingService::new(&state);
    let appointment = service
        .get_appointment(appointment_id, Some(auth.token()))
        .await
        .map_err(map_appointment_error)?;

    // Visible to its own parties only
    let caller = user_uuid(&user)?;
    if user.role != Role::Admin
        && caller != appointment.patient_id
        && caller != appointment.doctor_id
    {
        return Err(AppError::Forbidden(
            "Not authorized to view this appointment".to_string(),
        ));
    }

    Ok(Json(json!({ "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(params): Query<AppointmentQueryParams>,
) -> Result<Json<Value>, AppError> {
    let caller = user_uuid(&user)?;

    // Non-admins only see their own side of the calendar.
    let mut query = AppointmentSearchQuery {
        patient_id: params.patient_id,
        doctor_id: params.doctor_id,
        status: params.status,
        date: params.date,
        from_date: params.from_date,
        to_date: params.to_date,
        limit: params.limit,
        offset: params.offset,
    };
    match user.role {
        Role::Admin => {}
        Role::Doctor => query.doctor_id = Some(caller),
        Role::Patient => query.patient_id = Some(caller),
    }

    let service = BookingService::new(&state);
    let appointments = service
        .search_appointments(query, Some(auth.token()))
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "count": appointments.len(),
        "appointments": appointments
    })))
}

#[axum::debug_handler]
pub async fn get_queue_info(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = QueueService::new(&state);
    let info = service
        .queue_info(doctor_id, Utc::now(), Some(auth.token()))
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!(info)))
}
