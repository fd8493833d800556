// libs/booking-cell/tests/conflict_test.rs
use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use booking_cell::services::conflict::ConflictService;
use schedule_cell::models::TimeSlot;
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::TestConfig;

// ==============================================================================
// TEST FIXTURES AND UTILITIES
// ==============================================================================

struct TestSetup {
    mock_server: MockServer,
    service: ConflictService,
}

impl TestSetup {
    async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let config = TestConfig::default()
            .with_supabase_url(&mock_server.uri())
            .to_app_config();
        let service = ConflictService::new(Arc::new(SupabaseClient::new(&config)));

        Self { mock_server, service }
    }
}

fn confirmed_json(email: &str, date: &str, slot: &str) -> serde_json::Value {
    serde_json::json!({
        "id": Uuid::new_v4(),
        "patient_name": "田中実",
        "phone": "070-5555-6666",
        "email": email,
        "age": 52,
        "notes": null,
        "treatment_name": "ホワイトニング",
        "fee": "¥16,500",
        "status": "confirmed",
        "appointment_date": date,
        "confirmed_date": date,
        "confirmed_time_slot": slot,
        "created_at": "2025-03-01T00:00:00Z",
        "updated_at": "2025-03-01T00:00:00Z"
    })
}

fn slot(s: &str) -> TimeSlot {
    s.parse().unwrap()
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

// ==============================================================================
// CONFLICT EVALUATOR
// ==============================================================================

#[tokio::test]
async fn same_email_same_slot_blocks_confirmation() {
    let setup = TestSetup::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("email", "eq.a@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![confirmed_json(
            "a@example.com",
            "2025-03-10",
            "14:00-14:30",
        )]))
        .mount(&setup.mock_server)
        .await;

    let check = setup
        .service
        .check_confirmed_conflict(
            "a@example.com",
            date("2025-03-10"),
            &slot("14:00-14:30"),
            None,
            None,
        )
        .await
        .unwrap();

    assert!(!check.can_confirm);
}

#[tokio::test]
async fn overlapping_slots_of_different_length_also_block() {
    let setup = TestSetup::new().await;

    // Held 14:00-15:00; candidate 14:30-15:00 overlaps without being equal.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![confirmed_json(
            "a@example.com",
            "2025-03-10",
            "14:00-15:00",
        )]))
        .mount(&setup.mock_server)
        .await;

    let check = setup
        .service
        .check_confirmed_conflict(
            "a@example.com",
            date("2025-03-10"),
            &slot("14:30-15:00"),
            None,
            None,
        )
        .await
        .unwrap();

    assert!(!check.can_confirm);
}

#[tokio::test]
async fn non_overlapping_slot_is_allowed() {
    let setup = TestSetup::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![confirmed_json(
            "a@example.com",
            "2025-03-10",
            "09:00-09:30",
        )]))
        .mount(&setup.mock_server)
        .await;

    let check = setup
        .service
        .check_confirmed_conflict(
            "a@example.com",
            date("2025-03-10"),
            &slot("14:00-14:30"),
            None,
            None,
        )
        .await
        .unwrap();

    assert!(check.can_confirm);
}

#[tokio::test]
async fn excluded_appointment_does_not_conflict_with_itself() {
    let setup = TestSetup::new().await;
    let own_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("neq.{}", own_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;

    let check = setup
        .service
        .check_confirmed_conflict(
            "a@example.com",
            date("2025-03-10"),
            &slot("14:00-14:30"),
            Some(own_id),
            None,
        )
        .await
        .unwrap();

    assert!(check.can_confirm);
}
