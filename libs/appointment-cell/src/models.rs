// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// One booked slot on a doctor's calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub reminder_sent: bool,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Appointment {
    /// Scheduled start as an instant. Clinic times are stored in UTC.
    pub fn start(&self) -> DateTime<Utc> {
        self.date.and_time(self.time).and_utc()
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start() + Duration::minutes(self.duration_minutes as i64)
    }

    /// Whether this appointment still holds its slot against other bookings.
    pub fn holds_slot(&self) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Rejected,
    Completed,
    Cancelled,
    NoShow,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Rejected => write!(f, "rejected"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

// ==============================================================================
// SCHEDULING POLICY
// ==============================================================================

/// The clinic calendar and its timing rules. One fixed policy for every
/// doctor; per-doctor schedules are deliberately not modeled.
#[derive(Debug, Clone)]
pub struct SchedulePolicy {
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    pub slot_minutes: i64,
    pub min_lead_minutes: i64,
    pub grace_minutes: i64,
    pub reminder_lead_minutes: i64,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            work_start: NaiveTime::from_hms_opt(9, 0, 0).expect("valid clinic opening time"),
            work_end: NaiveTime::from_hms_opt(17, 0, 0).expect("valid clinic closing time"),
            slot_minutes: 30,
            min_lead_minutes: 30,
            grace_minutes: 30,
            reminder_lead_minutes: 30,
        }
    }
}

impl SchedulePolicy {
    pub fn slot_width(&self) -> Duration {
        Duration::minutes(self.slot_minutes)
    }

    pub fn min_lead(&self) -> Duration {
        Duration::minutes(self.min_lead_minutes)
    }

    pub fn grace(&self) -> Duration {
        Duration::minutes(self.grace_minutes)
    }

    pub fn reminder_lead(&self) -> Duration {
        Duration::minutes(self.reminder_lead_minutes)
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectAppointmentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentSearchQuery {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub date: Option<NaiveDate>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableSlotsResponse {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub slots: Vec<NaiveTime>,
}

/// Today's queue picture for one doctor.
#[derive(Debug, Clone, Serialize)]
pub struct QueueInfo {
    pub doctor_id: Uuid,
    pub appointments_today: i32,
    pub estimated_wait_minutes: i32,
    pub current_session: Option<SessionWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// What one sweep pass changed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub completed: u32,
    pub expired: u32,
    pub reminders_sent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Created,
    Confirmed,
    Cancelled,
    Reminder,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Created => write!(f, "created"),
            NotificationKind::Confirmed => write!(f, "confirmed"),
            NotificationKind::Cancelled => write!(f, "cancelled"),
            NotificationKind::Reminder => write!(f, "reminder"),
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("appointment date is in the past")]
    PastDate,

    #[error("slot is already taken")]
    SlotTaken,

    #[error("invalid slot time: {0}")]
    InvalidSlot(String),

    #[error("appointment cannot change state from {0}")]
    InvalidTransition(AppointmentStatus),

    #[error("not authorized to act on this appointment")]
    NotAuthorized,

    #[error("appointment not found")]
    NotFound,

    #[error("doctor is not approved for consultations")]
    DoctorNotApproved,

    #[error("database error: {0}")]
    Database(String),
}
