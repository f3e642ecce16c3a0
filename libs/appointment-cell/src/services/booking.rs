// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{SupabaseClient, SupabaseError};

use crate::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus,
    BookAppointmentRequest, NotificationKind, SchedulePolicy,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notify::NotificationService;
use crate::services::schedule;

/// Books slots and drives doctor-facing status transitions.
///
/// The storage layer owns the `(doctor_id, date, time)` uniqueness
/// constraint; booking is a single insert, so concurrent attempts on the
/// same slot resolve to one winner and `SlotTaken` for the rest. Status
/// transitions are conditional updates on the current status so a racing
/// sweep or second caller cannot silently overwrite them.
pub struct BookingService {
    supabase: Arc<SupabaseClient>,
    policy: SchedulePolicy,
    lifecycle: AppointmentLifecycleService,
    notifications: NotificationService,
}

impl BookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_policy(config, SchedulePolicy::default())
    }

    pub fn with_policy(config: &AppConfig, policy: SchedulePolicy) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let notifications = NotificationService::new(Arc::clone(&supabase));

        Self {
            supabase,
            policy,
            lifecycle: AppointmentLifecycleService::new(),
            notifications,
        }
    }

    /// Book a slot. The new appointment starts in `pending`, waiting for the
    /// doctor's decision.
    pub async fn book(
        &self,
        request: BookAppointmentRequest,
        now: DateTime<Utc>,
        auth_token: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        info!(
            "Booking appointment for patient {} with doctor {} at {} {}",
            request.patient_id, request.doctor_id, request.date, request.time
        );

        if request.date < now.date_naive() {
            return Err(AppointmentError::PastDate);
        }
        if !schedule::is_bookable_slot(&self.policy, request.time) {
            return Err(AppointmentError::InvalidSlot(format!(
                "{} is not on the booking grid",
                request.time
            )));
        }
        let start = request.date.and_time(request.time).and_utc();
        if start < now + self.policy.min_lead() {
            return Err(AppointmentError::InvalidSlot(
                "slot starts too soon to be booked".to_string(),
            ));
        }

        let appointment_data = json!({
            "doctor_id": request.doctor_id,
            "patient_id": request.patient_id,
            "date": request.date,
            "time": request.time.format("%H:%M:%S").to_string(),
            "duration_minutes": self.policy.slot_minutes,
            "status": AppointmentStatus::Pending,
            "reason": request.reason,
            "reminder_sent": false,
            "created_at": now.to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                auth_token,
                Some(appointment_data),
                Some(headers),
            )
            .await
            .map_err(|e| match e {
                // The unique index on (doctor_id, date, time) arbitrates
                // concurrent bookings; who holds the slot is not disclosed.
                SupabaseError::Conflict(_) => AppointmentError::SlotTaken,
                other => AppointmentError::Database(other.to_string()),
            })?;

        let appointment = parse_single(result)?;

        self.notifications
            .dispatch(NotificationKind::Created, &appointment);

        info!("Appointment {} booked", appointment.id);
        Ok(appointment)
    }

    /// Doctor confirms a pending appointment.
    pub async fn accept(
        &self,
        appointment_id: Uuid,
        by_doctor: Uuid,
        now: DateTime<Utc>,
        auth_token: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Doctor {} accepting appointment {}", by_doctor, appointment_id);

        self.verify_doctor_approved(by_doctor, auth_token).await?;

        let update = json!({
            "status": AppointmentStatus::Confirmed,
            "approved_at": now.to_rfc3339()
        });
        let appointment = self
            .transition(appointment_id, Some(by_doctor), AppointmentStatus::Pending, update, auth_token)
            .await?;

        self.notifications
            .dispatch(NotificationKind::Confirmed, &appointment);

        info!("Appointment {} confirmed", appointment_id);
        Ok(appointment)
    }

    /// Doctor turns a pending appointment down, recording why.
    pub async fn reject(
        &self,
        appointment_id: Uuid,
        by_doctor: Uuid,
        reason: String,
        auth_token: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Doctor {} rejecting appointment {}", by_doctor, appointment_id);

        let update = json!({
            "status": AppointmentStatus::Rejected,
            "reason": reason
        });
        let appointment = self
            .transition(appointment_id, Some(by_doctor), AppointmentStatus::Pending, update, auth_token)
            .await?;

        self.notifications
            .dispatch(NotificationKind::Cancelled, &appointment);

        info!("Appointment {} rejected", appointment_id);
        Ok(appointment)
    }

    /// Either party cancels before completion.
    pub async fn cancel(
        &self,
        appointment_id: Uuid,
        cancelled_by: Uuid,
        is_admin: bool,
        reason: Option<String>,
        auth_token: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Cancelling appointment {}", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;

        if !is_admin && cancelled_by != current.patient_id && cancelled_by != current.doctor_id {
            return Err(AppointmentError::NotAuthorized);
        }
        self.lifecycle
            .validate_status_transition(current.status, AppointmentStatus::Cancelled)?;

        let update = json!({
            "status": AppointmentStatus::Cancelled,
            "reason": reason
        });
        let appointment = self
            .transition(appointment_id, None, current.status, update, auth_token)
            .await?;

        self.notifications
            .dispatch(NotificationKind::Cancelled, &appointment);

        info!("Appointment {} cancelled", appointment_id);
        Ok(appointment)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(AppointmentError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| AppointmentError::Database(format!("failed to parse appointment: {}", e)))
    }

    pub async fn search_appointments(
        &self,
        query: AppointmentSearchQuery,
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        debug!("Searching appointments with filters: {:?}", query);

        let mut query_parts = Vec::new();

        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(doctor_id) = query.doctor_id {
            query_parts.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(date) = query.date {
            query_parts.push(format!("date=eq.{}", date));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!("date=gte.{}", from_date));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!("date=lte.{}", to_date));
        }

        let mut path = format!(
            "/rest/v1/appointments?{}&order=date.asc,time.asc",
            query_parts.join("&")
        );

        if let Some(limit) = query.limit {
            path.push_str(&format!("&limit={}", limit));
        }
        if let Some(offset) = query.offset {
            path.push_str(&format!("&offset={}", offset));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::Database(format!("failed to parse appointments: {}", e)))
    }

    // ==========================================================================
    // PRIVATE HELPERS
    // ==========================================================================

    /// Conditional status update guarded on the expected current status
    /// (and owning doctor, when the caller is doctor-scoped). An empty match
    /// means the row moved under us; re-read to say why.
    async fn transition(
        &self,
        appointment_id: Uuid,
        by_doctor: Option<Uuid>,
        expected_status: AppointmentStatus,
        update: Value,
        auth_token: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        let mut path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}",
            appointment_id, expected_status
        );
        if let Some(doctor_id) = by_doctor {
            path.push_str(&format!("&doctor_id=eq.{}", doctor_id));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, auth_token, Some(update), Some(headers))
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        if result.is_empty() {
            return Err(self
                .classify_failed_transition(appointment_id, by_doctor, auth_token)
                .await);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| AppointmentError::Database(format!("failed to parse appointment: {}", e)))
    }

    async fn classify_failed_transition(
        &self,
        appointment_id: Uuid,
        by_doctor: Option<Uuid>,
        auth_token: Option<&str>,
    ) -> AppointmentError {
        match self.get_appointment(appointment_id, auth_token).await {
            Err(e) => e,
            Ok(appointment) => {
                if let Some(doctor_id) = by_doctor {
                    if appointment.doctor_id != doctor_id {
                        return AppointmentError::NotAuthorized;
                    }
                }
                warn!(
                    "Transition refused for appointment {} in status {}",
                    appointment_id, appointment.status
                );
                AppointmentError::InvalidTransition(appointment.status)
            }
        }
    }

    /// Confirming requires an approved doctor.
    async fn verify_doctor_approved(
        &self,
        doctor_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<(), AppointmentError> {
        let path = format!("/rest/v1/doctors?id=eq.{}", doctor_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        let Some(doctor) = result.first() else {
            return Err(AppointmentError::NotAuthorized);
        };

        if !doctor["is_approved"].as_bool().unwrap_or(false) {
            return Err(AppointmentError::DoctorNotApproved);
        }

        Ok(())
    }
}

fn parse_single(mut rows: Vec<Value>) -> Result<Appointment, AppointmentError> {
    if rows.is_empty() {
        return Err(AppointmentError::Database(
            "storage returned no representation".to_string(),
        ));
    }
    serde_json::from_value(rows.remove(0))
        .map_err(|e| AppointmentError::Database(format!("failed to parse appointment: {}", e)))
}
