// libs/booking-cell/tests/booking_flow_test.rs
use assert_matches::assert_matches;
use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use booking_cell::models::{
    AppointmentStatus, BookingError, CancelAppointmentRequest, CancelledBy,
    ConfirmAppointmentRequest, CreateAppointmentRequest, ModifyAppointmentRequest, PreferenceInput,
};
use booking_cell::services::booking::BookingService;
use shared_config::AppConfig;
use shared_utils::test_utils::TestConfig;

// ==============================================================================
// TEST FIXTURES AND UTILITIES
// ==============================================================================

const CONSULTATION: &str = "初診の方【無料相談】";
const WHITENING: &str = "ホワイトニング";

struct TestSetup {
    mock_server: MockServer,
    config: AppConfig,
}

impl TestSetup {
    async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let config = TestConfig::default()
            .with_supabase_url(&mock_server.uri())
            .to_app_config();

        Self { mock_server, config }
    }

    fn service(&self) -> BookingService {
        BookingService::new(&self.config)
    }

    async fn mock_default_policy(&self) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/treatment_capacity_policies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
            .mount(&self.mock_server)
            .await;
    }

    async fn mock_no_pending_preferences(&self) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointment_preferences"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
            .mount(&self.mock_server)
            .await;
    }

    async fn mock_slot_lock_cycle(&self) {
        Mock::given(method("POST"))
            .and(path("/rest/v1/slot_locks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(vec![serde_json::json!({
                "lock_key": "test-lock"
            })]))
            .mount(&self.mock_server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/rest/v1/slot_locks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
            .mount(&self.mock_server)
            .await;
    }
}

fn appointment_json(
    id: Uuid,
    treatment: &str,
    status: &str,
    confirmed_date: Option<&str>,
    confirmed_time_slot: Option<&str>,
) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "patient_name": "山田太郎",
        "phone": "090-1234-5678",
        "email": "taro@example.com",
        "age": 34,
        "notes": null,
        "treatment_name": treatment,
        "fee": null,
        "status": status,
        "appointment_date": "2025-03-10",
        "confirmed_date": confirmed_date,
        "confirmed_time_slot": confirmed_time_slot,
        "created_at": "2025-03-01T00:00:00Z",
        "updated_at": "2025-03-01T00:00:00Z"
    })
}

fn preference(date: &str, slot: &str) -> PreferenceInput {
    PreferenceInput {
        preferred_date: date.parse().unwrap(),
        preferred_time_slot: slot.parse().unwrap(),
    }
}

fn create_request(preferences: Vec<PreferenceInput>) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        patient_name: "山田太郎".to_string(),
        phone: "090-1234-5678".to_string(),
        email: "taro@example.com".to_string(),
        age: Some(34),
        notes: None,
        treatment_name: CONSULTATION.to_string(),
        fee: None,
        preferences,
    }
}

fn confirm_request(date: &str, slot: &str) -> ConfirmAppointmentRequest {
    ConfirmAppointmentRequest {
        confirmed_date: date.parse().unwrap(),
        confirmed_time_slot: slot.parse().unwrap(),
    }
}

// ==============================================================================
// CREATE
// ==============================================================================

#[tokio::test]
async fn create_requires_at_least_one_preference() {
    let setup = TestSetup::new().await;

    let result = setup
        .service()
        .create_appointment(create_request(vec![]), None)
        .await;

    assert_matches!(result, Err(BookingError::ValidationError(_)));
}

#[tokio::test]
async fn create_rejects_malformed_email() {
    let setup = TestSetup::new().await;

    let mut request = create_request(vec![preference("2025-03-10", "10:00-10:30")]);
    request.email = "not-an-email".to_string();

    let result = setup.service().create_appointment(request, None).await;
    assert_matches!(result, Err(BookingError::ValidationError(_)));
}

#[tokio::test]
async fn create_rejects_malformed_phone() {
    let setup = TestSetup::new().await;

    let mut request = create_request(vec![preference("2025-03-10", "10:00-10:30")]);
    request.phone = "12345".to_string();

    let result = setup.service().create_appointment(request, None).await;
    assert_matches!(result, Err(BookingError::ValidationError(_)));
}

#[tokio::test]
async fn create_inserts_pending_appointment_with_preferences() {
    let setup = TestSetup::new().await;
    setup.mock_default_policy().await;
    setup.mock_no_pending_preferences().await;

    // Advisory capacity pass sees an empty ledger.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.confirmed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;

    let id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(vec![appointment_json(
            id,
            CONSULTATION,
            "pending",
            None,
            None,
        )]))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_preferences"))
        .respond_with(ResponseTemplate::new(201).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;

    let appointment = setup
        .service()
        .create_appointment(
            create_request(vec![
                preference("2025-03-10", "10:00-10:30"),
                preference("2025-03-11", "09:00-09:30"),
            ]),
            None,
        )
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert!(appointment.confirmed_date.is_none());
    assert!(appointment.confirmed_time_slot.is_none());
}

// ==============================================================================
// CONFIRM
// ==============================================================================

#[tokio::test]
async fn confirm_commits_pending_appointment() {
    let setup = TestSetup::new().await;
    setup.mock_default_policy().await;
    setup.mock_no_pending_preferences().await;
    setup.mock_slot_lock_cycle().await;

    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            id,
            CONSULTATION,
            "pending",
            None,
            None,
        )]))
        .mount(&setup.mock_server)
        .await;

    // Authoritative capacity: nothing occupies the slot.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.confirmed"))
        .and(query_param("treatment_name", format!("eq.{}", CONSULTATION)))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;

    // Conflict evaluator: no other confirmed booking for this email.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("email", "eq.taro@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;

    // Status-guarded write only touches a still-pending row.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            id,
            CONSULTATION,
            "confirmed",
            Some("2025-03-10"),
            Some("10:00-10:30"),
        )]))
        .mount(&setup.mock_server)
        .await;

    let confirmed = setup
        .service()
        .confirm_appointment(id, confirm_request("2025-03-10", "10:00-10:30"), "admin-token")
        .await
        .unwrap();

    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
    assert_eq!(confirmed.confirmed_date, Some("2025-03-10".parse::<NaiveDate>().unwrap()));
    assert!(confirmed.confirmed_time_slot.is_some());
}

#[tokio::test]
async fn confirm_rejects_full_slot_with_capacity_reason() {
    let setup = TestSetup::new().await;
    setup.mock_default_policy().await;
    setup.mock_no_pending_preferences().await;
    setup.mock_slot_lock_cycle().await;

    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            id,
            CONSULTATION,
            "pending",
            None,
            None,
        )]))
        .mount(&setup.mock_server)
        .await;

    // Another appointment already holds the capacity-1 slot.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.confirmed"))
        .and(query_param("treatment_name", format!("eq.{}", CONSULTATION)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            Uuid::new_v4(),
            CONSULTATION,
            "confirmed",
            Some("2025-03-10"),
            Some("10:00-10:30"),
        )]))
        .mount(&setup.mock_server)
        .await;

    let result = setup
        .service()
        .confirm_appointment(id, confirm_request("2025-03-10", "10:00-10:30"), "admin-token")
        .await;

    assert_matches!(
        result,
        Err(BookingError::CapacityExceeded {
            current_count: 1,
            max_capacity: 1
        })
    );
}

#[tokio::test]
async fn confirm_rejects_patient_double_booking_despite_open_capacity() {
    let setup = TestSetup::new().await;
    setup.mock_default_policy().await;
    setup.mock_no_pending_preferences().await;
    setup.mock_slot_lock_cycle().await;

    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            id,
            WHITENING,
            "pending",
            None,
            None,
        )]))
        .mount(&setup.mock_server)
        .await;

    // Whitening runs four chairs; capacity is not the problem.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.confirmed"))
        .and(query_param("treatment_name", format!("eq.{}", WHITENING)))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;

    // The same patient already sits in an overlapping confirmed slot.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("email", "eq.taro@example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            Uuid::new_v4(),
            CONSULTATION,
            "confirmed",
            Some("2025-03-10"),
            Some("14:00-14:30"),
        )]))
        .mount(&setup.mock_server)
        .await;

    let result = setup
        .service()
        .confirm_appointment(id, confirm_request("2025-03-10", "14:00-14:30"), "admin-token")
        .await;

    assert_matches!(result, Err(BookingError::PatientConflict));
}

#[tokio::test]
async fn confirm_rejects_cancelled_appointment_before_touching_the_slot() {
    let setup = TestSetup::new().await;

    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            id,
            CONSULTATION,
            "cancelled",
            None,
            None,
        )]))
        .mount(&setup.mock_server)
        .await;

    let result = setup
        .service()
        .confirm_appointment(id, confirm_request("2025-03-10", "10:00-10:30"), "admin-token")
        .await;

    assert_matches!(
        result,
        Err(BookingError::InvalidStatusTransition(AppointmentStatus::Cancelled))
    );
}

// ==============================================================================
// CANCEL
// ==============================================================================

#[tokio::test]
async fn cancel_keeps_confirmed_fields_as_audit_trail() {
    let setup = TestSetup::new().await;

    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            id,
            CONSULTATION,
            "confirmed",
            Some("2025-03-10"),
            Some("10:00-10:30"),
        )]))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "neq.cancelled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            id,
            CONSULTATION,
            "cancelled",
            Some("2025-03-10"),
            Some("10:00-10:30"),
        )]))
        .mount(&setup.mock_server)
        .await;

    let (cancelled, needs_phone_contact) = setup
        .service()
        .cancel_appointment(
            id,
            CancelAppointmentRequest {
                reason: Some("体調不良のため".to_string()),
                cancelled_by: CancelledBy::Patient,
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert!(cancelled.confirmed_date.is_some());
    assert!(cancelled.confirmed_time_slot.is_some());
    // 2025-03-10 is long gone relative to the cancellation date.
    assert!(!needs_phone_contact);
}

#[tokio::test]
async fn cancel_close_to_the_slot_flags_phone_contact() {
    let setup = TestSetup::new().await;

    let id = Uuid::new_v4();
    let soon = (Utc::now().date_naive() + Duration::days(2)).to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            id,
            CONSULTATION,
            "confirmed",
            Some(&soon),
            Some("10:00-10:30"),
        )]))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "neq.cancelled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            id,
            CONSULTATION,
            "cancelled",
            Some(&soon),
            Some("10:00-10:30"),
        )]))
        .mount(&setup.mock_server)
        .await;

    let (_, needs_phone_contact) = setup
        .service()
        .cancel_appointment(
            id,
            CancelAppointmentRequest {
                reason: None,
                cancelled_by: CancelledBy::Patient,
            },
            None,
        )
        .await
        .unwrap();

    assert!(needs_phone_contact);
}

#[tokio::test]
async fn cancelled_appointment_cannot_be_cancelled_again() {
    let setup = TestSetup::new().await;

    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            id,
            CONSULTATION,
            "cancelled",
            None,
            None,
        )]))
        .mount(&setup.mock_server)
        .await;

    let result = setup
        .service()
        .cancel_appointment(
            id,
            CancelAppointmentRequest {
                reason: None,
                cancelled_by: CancelledBy::Admin,
            },
            None,
        )
        .await;

    assert_matches!(
        result,
        Err(BookingError::InvalidStatusTransition(AppointmentStatus::Cancelled))
    );
}

// ==============================================================================
// MODIFY
// ==============================================================================

#[tokio::test]
async fn modify_regresses_confirmed_appointment_to_pending() {
    let setup = TestSetup::new().await;

    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            id,
            CONSULTATION,
            "confirmed",
            Some("2025-03-10"),
            Some("10:00-10:30"),
        )]))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "neq.cancelled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            id,
            CONSULTATION,
            "pending",
            None,
            None,
        )]))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointment_preferences"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_preferences"))
        .respond_with(ResponseTemplate::new(201).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;

    let updated = setup
        .service()
        .modify_appointment(
            id,
            ModifyAppointmentRequest {
                preferences: vec![preference("2025-03-12", "11:00-11:30")],
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(updated.status, AppointmentStatus::Pending);
    assert!(updated.confirmed_date.is_none());
    assert!(updated.confirmed_time_slot.is_none());
}

#[tokio::test]
async fn modify_requires_replacement_preferences() {
    let setup = TestSetup::new().await;

    let result = setup
        .service()
        .modify_appointment(
            Uuid::new_v4(),
            ModifyAppointmentRequest { preferences: vec![] },
            None,
        )
        .await;

    assert_matches!(result, Err(BookingError::ValidationError(_)));
}

// ==============================================================================
// AVAILABILITY VIEW
// ==============================================================================

#[tokio::test]
async fn availability_marks_full_slots_unavailable() {
    let setup = TestSetup::new().await;
    setup.mock_default_policy().await;
    setup.mock_no_pending_preferences().await;

    let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/v1/clinic_schedules"))
        .and(query_param("specific_date", format!("eq.{}", date)))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/clinic_schedules"))
        .and(query_param("specific_date", "is.null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![serde_json::json!({
            "id": Uuid::new_v4(),
            "year": 2025,
            "month": 3,
            "day_of_week": 1,
            "start_time": "10:00:00",
            "end_time": "11:00:00",
            "is_available": true,
            "specific_date": null,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        })]))
        .mount(&setup.mock_server)
        .await;

    // 10:00-10:30 already holds the one consultation allowed per slot.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.confirmed"))
        .and(query_param("confirmed_time_slot", "eq.10:00-10:30"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![appointment_json(
            Uuid::new_v4(),
            CONSULTATION,
            "confirmed",
            Some("2025-03-10"),
            Some("10:00-10:30"),
        )]))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.confirmed"))
        .and(query_param("confirmed_time_slot", "eq.10:30-11:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;

    let availability = setup
        .service()
        .slot_availability(date, CONSULTATION, None, None)
        .await
        .unwrap();

    assert_eq!(availability.len(), 2);
    assert!(!availability[0].is_available);
    assert!(availability[1].is_available);
}

#[tokio::test]
async fn availability_fails_closed_when_the_ledger_is_unreachable() {
    let setup = TestSetup::new().await;
    setup.mock_default_policy().await;

    let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/v1/clinic_schedules"))
        .and(query_param("specific_date", format!("eq.{}", date)))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/clinic_schedules"))
        .and(query_param("specific_date", "is.null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![serde_json::json!({
            "id": Uuid::new_v4(),
            "year": 2025,
            "month": 3,
            "day_of_week": 1,
            "start_time": "10:00:00",
            "end_time": "10:30:00",
            "is_available": true,
            "specific_date": null,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        })]))
        .mount(&setup.mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .mount(&setup.mock_server)
        .await;

    let availability = setup
        .service()
        .slot_availability(date, CONSULTATION, None, None)
        .await
        .unwrap();

    assert_eq!(availability.len(), 1);
    assert!(!availability[0].is_available);
}
