// libs/appointment-cell/tests/booking_test.rs
//
// Booking and status transitions against a mocked PostgREST backend.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use assert_matches::assert_matches;

use appointment_cell::models::{
    AppointmentError, AppointmentStatus, BookAppointmentRequest,
};
use appointment_cell::services::booking::BookingService;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

struct TestSetup {
    service: BookingService,
    mock_server: MockServer,
    doctor_id: Uuid,
    patient_id: Uuid,
    now: DateTime<Utc>,
}

impl TestSetup {
    async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();

        Self {
            service: BookingService::new(&config),
            mock_server,
            doctor_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            now: Utc.with_ymd_and_hms(2025, 11, 10, 12, 0, 0).unwrap(),
        }
    }

    fn request(&self, date: NaiveDate, time: NaiveTime) -> BookAppointmentRequest {
        BookAppointmentRequest {
            doctor_id: self.doctor_id,
            patient_id: self.patient_id,
            date,
            time,
            reason: Some("Recurring headaches".to_string()),
        }
    }

    fn created_row(&self, date: &str, time: &str, status: &str) -> serde_json::Value {
        MockSupabaseResponses::appointment_row(
            &self.doctor_id.to_string(),
            &self.patient_id.to_string(),
            date,
            time,
            status,
        )
    }
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[tokio::test]
async fn booking_a_free_slot_creates_a_pending_appointment() {
    let setup = TestSetup::new().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(vec![
            setup.created_row("2025-11-15", "10:00:00", "pending"),
        ]))
        .mount(&setup.mock_server)
        .await;
    // fire-and-forget notification insert
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(vec![json!({})]))
        .mount(&setup.mock_server)
        .await;

    let appointment = setup
        .service
        .book(setup.request(d(2025, 11, 15), t(10, 0)), setup.now, None)
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.time, t(10, 0));
}

#[tokio::test]
async fn conflicting_booking_maps_to_slot_taken() {
    let setup = TestSetup::new().await;

    // PostgREST reports the unique-index violation as 409
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint"
        })))
        .mount(&setup.mock_server)
        .await;

    let err = setup
        .service
        .book(setup.request(d(2025, 11, 15), t(10, 0)), setup.now, None)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::SlotTaken);
}

#[tokio::test]
async fn second_booking_of_the_same_slot_loses() {
    let setup = TestSetup::new().await;

    // The storage uniqueness constraint arbitrates: the first insert wins,
    // every later one conflicts.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(vec![
            setup.created_row("2025-11-15", "10:00:00", "pending"),
        ]))
        .up_to_n_times(1)
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"code": "23505"})))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(vec![json!({})]))
        .mount(&setup.mock_server)
        .await;

    let first = setup
        .service
        .book(setup.request(d(2025, 11, 15), t(10, 0)), setup.now, None)
        .await;
    let second = setup
        .service
        .book(setup.request(d(2025, 11, 15), t(10, 0)), setup.now, None)
        .await;

    assert!(first.is_ok());
    assert_matches!(second.unwrap_err(), AppointmentError::SlotTaken);
}

#[tokio::test]
async fn past_date_is_rejected_before_any_write() {
    let setup = TestSetup::new().await;
    // no POST mock: a write attempt would fail the request

    let err = setup
        .service
        .book(setup.request(d(2025, 11, 9), t(10, 0)), setup.now, None)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::PastDate);
}

#[tokio::test]
async fn off_grid_time_is_rejected() {
    let setup = TestSetup::new().await;

    let err = setup
        .service
        .book(setup.request(d(2025, 11, 15), t(10, 15)), setup.now, None)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::InvalidSlot(_));
}

#[tokio::test]
async fn outside_working_hours_is_rejected() {
    let setup = TestSetup::new().await;

    let err = setup
        .service
        .book(setup.request(d(2025, 11, 15), t(18, 0)), setup.now, None)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::InvalidSlot(_));
}

#[tokio::test]
async fn same_day_slot_inside_lead_time_is_rejected() {
    let setup = TestSetup::new().await;
    // now is 12:00; 12:00 starts too soon, the lead time is 30 minutes

    let err = setup
        .service
        .book(
            setup.request(d(2025, 11, 10), t(12, 0)),
            setup.now,
            None,
        )
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::InvalidSlot(_));
}

// ==============================================================================
// ACCEPT / REJECT
// ==============================================================================

#[tokio::test]
async fn doctor_accepts_pending_appointment() {
    let setup = TestSetup::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            MockSupabaseResponses::doctor_row(&setup.doctor_id.to_string(), true),
        ]))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.pending"))
        .and(query_param("doctor_id", format!("eq.{}", setup.doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            setup.created_row("2025-11-15", "10:00:00", "confirmed"),
        ]))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(vec![json!({})]))
        .mount(&setup.mock_server)
        .await;

    let appointment = setup
        .service
        .accept(Uuid::new_v4(), setup.doctor_id, setup.now, None)
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn unapproved_doctor_cannot_accept() {
    let setup = TestSetup::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            MockSupabaseResponses::doctor_row(&setup.doctor_id.to_string(), false),
        ]))
        .mount(&setup.mock_server)
        .await;

    let err = setup
        .service
        .accept(Uuid::new_v4(), setup.doctor_id, setup.now, None)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::DoctorNotApproved);
}

#[tokio::test]
async fn wrong_doctor_is_not_authorized() {
    let setup = TestSetup::new().await;
    let other_doctor = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            MockSupabaseResponses::doctor_row(&other_doctor.to_string(), true),
        ]))
        .mount(&setup.mock_server)
        .await;
    // conditional update filtered on the acting doctor matches nothing
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;
    // the re-read shows the row belongs to somebody else
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            setup.created_row("2025-11-15", "10:00:00", "pending"),
        ]))
        .mount(&setup.mock_server)
        .await;

    let err = setup
        .service
        .accept(appointment_id, other_doctor, setup.now, None)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::NotAuthorized);
}

#[tokio::test]
async fn accepting_a_cancelled_appointment_is_an_invalid_transition() {
    let setup = TestSetup::new().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            MockSupabaseResponses::doctor_row(&setup.doctor_id.to_string(), true),
        ]))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            setup.created_row("2025-11-15", "10:00:00", "cancelled"),
        ]))
        .mount(&setup.mock_server)
        .await;

    let err = setup
        .service
        .accept(appointment_id, setup.doctor_id, setup.now, None)
        .await
        .unwrap_err();

    assert_matches!(
        err,
        AppointmentError::InvalidTransition(AppointmentStatus::Cancelled)
    );
}

#[tokio::test]
async fn reject_records_the_reason() {
    let setup = TestSetup::new().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![{
            let mut row = setup.created_row("2025-11-15", "10:00:00", "rejected");
            row["reason"] = json!("Fully booked that week");
            row
        }]))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(vec![json!({})]))
        .mount(&setup.mock_server)
        .await;

    let appointment = setup
        .service
        .reject(
            Uuid::new_v4(),
            setup.doctor_id,
            "Fully booked that week".to_string(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Rejected);
    assert_eq!(
        appointment.reason.as_deref(),
        Some("Fully booked that week")
    );
}

// ==============================================================================
// CANCEL
// ==============================================================================

#[tokio::test]
async fn patient_cancels_own_pending_appointment() {
    let setup = TestSetup::new().await;
    let appointment_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            setup.created_row("2025-11-15", "10:00:00", "pending"),
        ]))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            setup.created_row("2025-11-15", "10:00:00", "cancelled"),
        ]))
        .mount(&setup.mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(vec![json!({})]))
        .mount(&setup.mock_server)
        .await;

    let appointment = setup
        .service
        .cancel(appointment_id, setup.patient_id, false, None, None)
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn strangers_cannot_cancel() {
    let setup = TestSetup::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            setup.created_row("2025-11-15", "10:00:00", "pending"),
        ]))
        .mount(&setup.mock_server)
        .await;

    let err = setup
        .service
        .cancel(Uuid::new_v4(), Uuid::new_v4(), false, None, None)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::NotAuthorized);
}

#[tokio::test]
async fn completed_appointment_cannot_be_cancelled() {
    let setup = TestSetup::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            setup.created_row("2025-11-15", "10:00:00", "completed"),
        ]))
        .mount(&setup.mock_server)
        .await;

    let err = setup
        .service
        .cancel(Uuid::new_v4(), setup.patient_id, false, None, None)
        .await
        .unwrap_err();

    assert_matches!(
        err,
        AppointmentError::InvalidTransition(AppointmentStatus::Completed)
    );
}
