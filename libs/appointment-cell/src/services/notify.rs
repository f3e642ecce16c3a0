// libs/appointment-cell/src/services/notify.rs
use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, NotificationKind};

/// Fire-and-forget appointment notifications.
///
/// Dispatch happens on a spawned task: a failure here is logged and dropped,
/// it can never fail or delay the booking or verification that triggered it.
#[derive(Clone)]
pub struct NotificationService {
    supabase: Arc<SupabaseClient>,
}

impl NotificationService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub fn dispatch(&self, kind: NotificationKind, appointment: &Appointment) {
        self.enqueue(kind, appointment, appointment.patient_id);
    }

    /// Reminders go to both parties.
    pub fn dispatch_reminder(&self, appointment: &Appointment) {
        self.enqueue(NotificationKind::Reminder, appointment, appointment.patient_id);
        self.enqueue(NotificationKind::Reminder, appointment, appointment.doctor_id);
    }

    fn enqueue(&self, kind: NotificationKind, appointment: &Appointment, recipient_id: Uuid) {
        let supabase = Arc::clone(&self.supabase);
        let appointment_id = appointment.id;
        let payload = json!({
            "kind": kind.to_string(),
            "appointment_id": appointment_id,
            "recipient_id": recipient_id,
        });

        debug!(
            "Queueing {} notification for appointment {}",
            kind, appointment_id
        );

        tokio::spawn(async move {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                "Prefer",
                reqwest::header::HeaderValue::from_static("return=representation"),
            );
            if let Err(e) = supabase
                .request_with_headers::<Vec<Value>>(
                    Method::POST,
                    "/rest/v1/notifications",
                    None,
                    Some(payload),
                    Some(headers),
                )
                .await
            {
                warn!(
                    "Failed to queue notification for appointment {}: {}",
                    appointment_id, e
                );
            }
        });
    }
}
