// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{Appointment, AppointmentError, AppointmentStatus, SchedulePolicy};

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed.
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!(
            "Validating status transition from {} to {}",
            current_status, new_status
        );

        if !self
            .valid_transitions(current_status)
            .contains(&new_status)
        {
            warn!(
                "Invalid status transition attempted: {} -> {}",
                current_status, new_status
            );
            return Err(AppointmentError::InvalidTransition(current_status));
        }

        Ok(())
    }

    /// All valid next statuses for a given current status.
    pub fn valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Pending => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Rejected,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            // Terminal states
            AppointmentStatus::Rejected
            | AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow => vec![],
        }
    }

    /// Time-driven transition the sweep should apply, if any.
    ///
    /// A confirmed appointment completes once its end time plus the grace
    /// window has elapsed. A pending appointment whose start has passed was
    /// never confirmed and expires to cancelled.
    pub fn automatic_transition(
        &self,
        appointment: &Appointment,
        policy: &SchedulePolicy,
        now: DateTime<Utc>,
    ) -> Option<AppointmentStatus> {
        match appointment.status {
            AppointmentStatus::Confirmed => {
                if appointment.end() + policy.grace() <= now {
                    return Some(AppointmentStatus::Completed);
                }
            }
            AppointmentStatus::Pending => {
                if appointment.start() <= now {
                    return Some(AppointmentStatus::Cancelled);
                }
            }
            _ => {}
        }

        None
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use uuid::Uuid;

    fn appointment(status: AppointmentStatus, h: u32, m: u32) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 11, 15).unwrap(),
            time: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
            duration_minutes: 30,
            status,
            reason: None,
            reminder_sent: false,
            created_at: Utc::now(),
            approved_at: None,
            completed_at: None,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2025, 11, 15)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap(),
        )
    }

    #[test]
    fn pending_can_be_confirmed_or_rejected() {
        let lifecycle = AppointmentLifecycleService::new();
        assert!(lifecycle
            .validate_status_transition(AppointmentStatus::Pending, AppointmentStatus::Confirmed)
            .is_ok());
        assert!(lifecycle
            .validate_status_transition(AppointmentStatus::Pending, AppointmentStatus::Rejected)
            .is_ok());
        assert!(lifecycle
            .validate_status_transition(AppointmentStatus::Pending, AppointmentStatus::Completed)
            .is_err());
    }

    #[test]
    fn terminal_states_allow_nothing() {
        let lifecycle = AppointmentLifecycleService::new();
        for terminal in [
            AppointmentStatus::Rejected,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ] {
            assert!(lifecycle.valid_transitions(terminal).is_empty());
        }
    }

    #[test]
    fn confirmed_completes_after_grace_window() {
        let lifecycle = AppointmentLifecycleService::new();
        let policy = SchedulePolicy::default();
        let apt = appointment(AppointmentStatus::Confirmed, 10, 0);

        // ends 10:30, grace until 11:00
        assert_eq!(lifecycle.automatic_transition(&apt, &policy, at(10, 59)), None);
        assert_eq!(
            lifecycle.automatic_transition(&apt, &policy, at(11, 0)),
            Some(AppointmentStatus::Completed)
        );
    }

    #[test]
    fn stale_pending_expires_at_start_time() {
        let lifecycle = AppointmentLifecycleService::new();
        let policy = SchedulePolicy::default();
        let apt = appointment(AppointmentStatus::Pending, 10, 0);

        assert_eq!(lifecycle.automatic_transition(&apt, &policy, at(9, 59)), None);
        assert_eq!(
            lifecycle.automatic_transition(&apt, &policy, at(10, 0)),
            Some(AppointmentStatus::Cancelled)
        );
    }

    #[test]
    fn terminal_states_never_transition_automatically() {
        let lifecycle = AppointmentLifecycleService::new();
        let policy = SchedulePolicy::default();

        for status in [
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Rejected,
            AppointmentStatus::NoShow,
        ] {
            let apt = appointment(status, 8, 0);
            assert_eq!(lifecycle.automatic_transition(&apt, &policy, at(23, 0)), None);
        }
    }
}
