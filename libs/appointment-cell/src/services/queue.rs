// libs/appointment-cell/src/services/queue.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, QueueInfo, SchedulePolicy, SessionWindow,
};

/// Today's consultation load for one doctor, with the session window
/// currently in progress (or just wrapped up) if any.
///
/// An appointment counts as the current session while `now` falls inside
/// its slot window, looking back up to one slot width so a consultation
/// that ran slightly over is still reported.
pub fn current_session(
    appointments: &[Appointment],
    now: DateTime<Utc>,
    policy: &SchedulePolicy,
) -> Option<SessionWindow> {
    let lookback = now - policy.slot_width();

    appointments
        .iter()
        .filter(|apt| {
            matches!(
                apt.status,
                AppointmentStatus::Confirmed | AppointmentStatus::Completed
            )
        })
        .filter(|apt| apt.start() <= now && apt.end() > lookback)
        .max_by_key(|apt| apt.start())
        .map(|apt| SessionWindow {
            start: apt.time,
            end: apt.end().time(),
        })
}

pub struct QueueService {
    supabase: Arc<SupabaseClient>,
    policy: SchedulePolicy,
}

impl QueueService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_policy(config, SchedulePolicy::default())
    }

    pub fn with_policy(config: &AppConfig, policy: SchedulePolicy) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            policy,
        }
    }

    pub async fn queue_info(
        &self,
        doctor_id: Uuid,
        now: DateTime<Utc>,
        auth_token: Option<&str>,
    ) -> Result<QueueInfo, AppointmentError> {
        debug!("Computing queue info for doctor {}", doctor_id);

        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&date=eq.{}&status=in.(confirmed,completed)&order=time.asc",
            doctor_id,
            now.date_naive()
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::Database(e.to_string()))?;

        let appointments: Vec<Appointment> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::Database(format!("failed to parse appointments: {}", e)))?;

        let count = appointments.len() as i32;

        Ok(QueueInfo {
            doctor_id,
            appointments_today: count,
            estimated_wait_minutes: count * self.policy.slot_minutes as i32,
            current_session: current_session(&appointments, now, &self.policy),
        })
    }
}
