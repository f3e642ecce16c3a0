// libs/appointment-cell/tests/queue_test.rs

use chrono::{NaiveTime, TimeZone, Utc};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::services::queue::QueueService;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

#[tokio::test]
async fn queue_info_counts_todays_sessions_and_estimates_wait() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();

    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let row = |time: &str, status: &str| {
        MockSupabaseResponses::appointment_row(
            &doctor_id.to_string(),
            &patient_id.to_string(),
            "2025-11-15",
            time,
            status,
        )
    };

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("date", "eq.2025-11-15"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            row("09:00:00", "completed"),
            row("09:30:00", "completed"),
            row("10:00:00", "confirmed"),
        ]))
        .mount(&mock_server)
        .await;

    let service = QueueService::new(&config);
    let now = Utc.with_ymd_and_hms(2025, 11, 15, 10, 10, 0).unwrap();

    let info = service.queue_info(doctor_id, now, None).await.unwrap();

    assert_eq!(info.appointments_today, 3);
    assert_eq!(info.estimated_wait_minutes, 90);
    let session = info.current_session.unwrap();
    assert_eq!(session.start, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
}

#[tokio::test]
async fn empty_day_has_no_queue() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&mock_server)
        .await;

    let service = QueueService::new(&config);
    let now = Utc.with_ymd_and_hms(2025, 11, 15, 10, 0, 0).unwrap();

    let info = service.queue_info(Uuid::new_v4(), now, None).await.unwrap();

    assert_eq!(info.appointments_today, 0);
    assert_eq!(info.estimated_wait_minutes, 0);
    assert!(info.current_session.is_none());
}
