// libs/appointment-cell/src/services/sweep.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, SchedulePolicy, SweepReport,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notify::NotificationService;

/// Periodic reconciliation of appointment state against the clock.
///
/// Every pass is idempotent: each mutation is a conditional update on the
/// state it is advancing from, so running the sweep twice in a row changes
/// nothing the second time. Skipping or delaying a pass is safe, the next
/// one picks up whatever has elapsed since.
pub struct SweepService {
    supabase: Arc<SupabaseClient>,
    policy: SchedulePolicy,
    lifecycle: AppointmentLifecycleService,
    notifications: NotificationService,
}

impl SweepService {
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

    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepReport, AppointmentError> {
        debug!("Sweep pass starting at {}", now);

        let mut report = SweepReport::default();
        report.completed = self.complete_elapsed(now).await?;
        report.expired = self.expire_stale_pending(now).await?;
        report.reminders_sent = self.send_due_reminders(now).await?;

        if report.completed > 0 || report.expired > 0 || report.reminders_sent > 0 {
            info!(
                "Sweep pass done: {} completed, {} expired, {} reminders",
                report.completed, report.expired, report.reminders_sent
            );
        }
        Ok(report)
    }

    /// Confirmed appointments whose end time plus the grace window has
    /// elapsed become completed.
    async fn complete_elapsed(&self, now: DateTime<Utc>) -> Result<u32, AppointmentError> {
        let candidates = self
            .list_by_status(AppointmentStatus::Confirmed, now)
            .await?;

        let mut completed = 0;
        for appointment in candidates {
            let Some(AppointmentStatus::Completed) =
                self.lifecycle
                    .automatic_transition(&appointment, &self.policy, now)
            else {
                continue;
            };

            let update = json!({
                "status": AppointmentStatus::Completed,
                "completed_at": now.to_rfc3339()
            });
            if self
                .guarded_update(appointment.id, AppointmentStatus::Confirmed, update)
                .await?
            {
                completed += 1;
            }
        }

        Ok(completed)
    }

    /// Pending appointments whose start has passed were never confirmed;
    /// their slots are released.
    async fn expire_stale_pending(&self, now: DateTime<Utc>) -> Result<u32, AppointmentError> {
        let candidates = self.list_by_status(AppointmentStatus::Pending, now).await?;

        let mut expired = 0;
        for appointment in candidates {
            let Some(AppointmentStatus::Cancelled) =
                self.lifecycle
                    .automatic_transition(&appointment, &self.policy, now)
            else {
                continue;
            };

            let update = json!({
                "status": AppointmentStatus::Cancelled,
                "reason": "not confirmed before start time"
            });
            if self
                .guarded_update(appointment.id, AppointmentStatus::Pending, update)
                .await?
            {
                expired += 1;
            }
        }

        Ok(expired)
    }

    /// Notify both parties of confirmed appointments starting within the
    /// reminder window. The `reminder_sent` marker is flipped with a
    /// conditional update first, so overlapping passes cannot double-send.
    async fn send_due_reminders(&self, now: DateTime<Utc>) -> Result<u32, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?status=eq.{}&reminder_sent=eq.false&date=eq.{}&order=time.asc",
            AppointmentStatus::Confirmed,
            now.date_naive()
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        let candidates: Vec<Appointment> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::Database(format!("failed to parse appointments: {}", e)))?;

        let mut sent = 0;
        for appointment in candidates {
            let start = appointment.start();
            if start <= now || start - now > self.policy.reminder_lead() {
                continue;
            }

            if self.claim_reminder(appointment.id).await? {
                self.notifications.dispatch_reminder(&appointment);
                sent += 1;
            } else {
                debug!(
                    "Reminder for appointment {} already claimed",
                    appointment.id
                );
            }
        }

        Ok(sent)
    }

    // ==========================================================================
    // PRIVATE HELPERS
    // ==========================================================================

    /// Appointments in one status dated today or earlier.
    async fn list_by_status(
        &self,
        status: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?status=eq.{}&date=lte.{}&order=date.asc,time.asc",
            status,
            now.date_naive()
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::Database(format!("failed to parse appointments: {}", e)))
    }

    /// Conditional update on the expected current status. Returns whether a
    /// row matched; an empty match means another writer got there first,
    /// which the sweep treats as already done.
    async fn guarded_update(
        &self,
        appointment_id: Uuid,
        expected_status: AppointmentStatus,
        update: Value,
    ) -> Result<bool, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}",
            appointment_id, expected_status
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, None, Some(update), Some(headers))
            .await
            .map_err(|e| {
                warn!("Sweep update failed for appointment {}: {}", appointment_id, e);
                AppointmentError::Database(e.to_string())
            })?;

        Ok(!result.is_empty())
    }

    /// Flip the reminder marker; only the caller that wins the conditional
    /// update dispatches the notifications.
    async fn claim_reminder(&self, appointment_id: Uuid) -> Result<bool, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&reminder_sent=eq.false",
            appointment_id
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                None,
                Some(json!({ "reminder_sent": true })),
                Some(headers),
            )
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        Ok(!result.is_empty())
    }
}
