// libs/appointment-cell/src/services/schedule.rs
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, AppointmentError, SchedulePolicy};

/// All slot starts on the fixed daily grid, in order.
pub fn day_slots(policy: &SchedulePolicy) -> Vec<NaiveTime> {
    let mut slots = Vec::new();
    let mut current = policy.work_start;

    while current < policy.work_end {
        slots.push(current);
        let next = current + policy.slot_width();
        // NaiveTime arithmetic wraps past midnight; the clinic day never
        // does, but a wrapped cursor must terminate the loop.
        if next <= current {
            break;
        }
        current = next;
    }

    slots
}

/// Free slots for one doctor-day, given the times still held by pending or
/// confirmed appointments. Pure function of its inputs; callers re-derive
/// it whenever the appointment set changes.
pub fn available_slots(
    policy: &SchedulePolicy,
    date: NaiveDate,
    now: DateTime<Utc>,
    held: &[NaiveTime],
) -> Vec<NaiveTime> {
    // Slots starting sooner than the minimum lead time are not bookable.
    // Compared as instants, so a late-evening `now` cannot leak already
    // past same-day slots back in.
    let cutoff = now + policy.min_lead();

    day_slots(policy)
        .into_iter()
        .filter(|slot| !held.contains(slot))
        .filter(|slot| date.and_time(*slot).and_utc() >= cutoff)
        .collect()
}

/// Whether a requested time sits on the slot grid inside working hours.
pub fn is_bookable_slot(policy: &SchedulePolicy, time: NaiveTime) -> bool {
    day_slots(policy).contains(&time)
}

pub struct ScheduleService {
    supabase: Arc<SupabaseClient>,
    policy: SchedulePolicy,
}

impl ScheduleService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            policy: SchedulePolicy::default(),
        }
    }

    pub fn with_policy(config: &AppConfig, policy: SchedulePolicy) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            policy,
        }
    }

    pub fn policy(&self) -> &SchedulePolicy {
        &self.policy
    }

    /// Free slots for a doctor on a date, from current appointment state.
    pub async fn available_slots_for(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        now: DateTime<Utc>,
        auth_token: Option<&str>,
    ) -> Result<Vec<NaiveTime>, AppointmentError> {
        debug!("Listing available slots for doctor {} on {}", doctor_id, date);

        if date < now.date_naive() {
            return Ok(vec![]);
        }

        let held = self.held_times(doctor_id, date, auth_token).await?;
        Ok(available_slots(&self.policy, date, now, &held))
    }

    /// Times still held by pending or confirmed appointments for a
    /// doctor-day.
    async fn held_times(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: Option<&str>,
    ) -> Result<Vec<NaiveTime>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&date=eq.{}&status=in.(pending,confirmed)&order=time.asc",
            doctor_id, date
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

        Ok(appointments.into_iter().map(|apt| apt.time).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn at(date: NaiveDate, h: u32, m: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(&date.and_time(t(h, m)))
    }

    #[test]
    fn grid_covers_working_hours() {
        let slots = day_slots(&SchedulePolicy::default());
        assert_eq!(slots.len(), 16);
        assert_eq!(slots[0], t(9, 0));
        assert_eq!(slots[1], t(9, 30));
        assert_eq!(*slots.last().unwrap(), t(16, 30));
    }

    #[test]
    fn held_slot_is_excluded_neighbors_are_not() {
        let date = d(2025, 11, 15);
        let now = at(d(2025, 11, 10), 12, 0);

        let slots = available_slots(&SchedulePolicy::default(), date, now, &[t(10, 0)]);

        assert!(!slots.contains(&t(10, 0)));
        assert!(slots.contains(&t(9, 0)));
        assert!(slots.contains(&t(10, 30)));
        assert_eq!(slots.len(), 15);
    }

    #[test]
    fn same_day_slots_respect_lead_time() {
        let date = d(2025, 11, 15);
        // 09:45 today: 10:00 is inside the 30-minute lead, 10:30 is not
        let now = at(date, 9, 45);

        let slots = available_slots(&SchedulePolicy::default(), date, now, &[]);

        assert!(!slots.contains(&t(9, 0)));
        assert!(!slots.contains(&t(10, 0)));
        assert!(slots.contains(&t(10, 30)));
    }

    #[test]
    fn lead_time_boundary_keeps_exact_cutoff_slot() {
        let date = d(2025, 11, 15);
        // 09:30 today: now + 30min lands exactly on 10:00, which stays bookable
        let now = at(date, 9, 30);

        let slots = available_slots(&SchedulePolicy::default(), date, now, &[]);

        assert!(slots.contains(&t(10, 0)));
        assert!(!slots.contains(&t(9, 30)));
    }

    #[test]
    fn future_day_is_unaffected_by_time_of_day() {
        let date = d(2025, 11, 16);
        let now = at(d(2025, 11, 15), 16, 59);

        let slots = available_slots(&SchedulePolicy::default(), date, now, &[]);
        assert_eq!(slots.len(), 16);
    }

    #[test]
    fn grid_membership_check() {
        let policy = SchedulePolicy::default();
        assert!(is_bookable_slot(&policy, t(9, 0)));
        assert!(is_bookable_slot(&policy, t(16, 30)));
        assert!(!is_bookable_slot(&policy, t(17, 0)));
        assert!(!is_bookable_slot(&policy, t(10, 15)));
        assert!(!is_bookable_slot(&policy, t(8, 30)));
    }
}
