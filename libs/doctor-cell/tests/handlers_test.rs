// libs/doctor-cell/tests/handlers_test.rs

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use doctor_cell::router::{doctor_routes, schedule_routes};
use shared_utils::test_utils::{JwtTestUtils, TestClinic, TestUser};

fn app(clinic: &TestClinic) -> Router {
    let ctx = clinic.context();
    Router::new()
        .nest("/doctors", doctor_routes(ctx.clone()))
        .nest("/schedules", schedule_routes(ctx))
}

fn admin_token(clinic: &TestClinic) -> String {
    JwtTestUtils::create_test_token(
        &TestUser::admin("admin@clinic.mn"),
        &clinic.config.supabase_jwt_secret,
        None,
    )
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn admin_post(uri: &str, token: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn slots_endpoint_returns_schedule_grid() {
    let clinic = TestClinic::new().await;
    let uri = format!("/doctors/{}/slots?date={}", clinic.doctor.id, clinic.next_monday());

    let (status, body) = send(app(&clinic), get(&uri)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["doctor_id"], json!(clinic.doctor.id));
    assert_eq!(body["date"], json!(clinic.next_monday().to_string()));
    assert_eq!(body["slots"].as_array().unwrap().len(), 6);
    assert_eq!(body["slots"][0], json!({ "time": "09:00", "available": true }));
    assert!(body.get("message").is_none());
}

#[tokio::test]
async fn slots_endpoint_reports_day_off_with_message() {
    let clinic = TestClinic::new().await;
    let uri = format!("/doctors/{}/slots?date={}", clinic.doctor.id, clinic.next_sunday());

    let (status, body) = send(app(&clinic), get(&uri)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slots"], json!([]));
    assert_eq!(body["message"], "Doctor does not work on this day");
}

#[tokio::test]
async fn slots_endpoint_input_errors() {
    let clinic = TestClinic::new().await;

    let (status, _) = send(app(&clinic), get(&format!("/doctors/{}/slots?date=07-01-2030", clinic.doctor.id))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(app(&clinic), get(&format!("/doctors/{}/slots?date=2030-01-06", clinic.doctor.id))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(app(&clinic), get(&format!("/doctors/{}/slots?date=2030-01-14", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Doctor not found");
}

#[tokio::test]
async fn schedule_routes_require_admin() {
    let clinic = TestClinic::new().await;
    let patient_token = JwtTestUtils::create_test_token(
        &TestUser::default(),
        &clinic.config.supabase_jwt_secret,
        None,
    );

    let (status, _) = send(app(&clinic), get(&format!("/schedules/{}", clinic.doctor.id))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        app(&clinic),
        admin_post("/schedules/bulk", &patient_token, "{}"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn bulk_replace_accepts_camel_case_entries() {
    let clinic = TestClinic::new().await;
    let token = admin_token(&clinic);
    let body = json!({
        "doctorId": clinic.doctor.id,
        "schedules": [
            { "dayOfWeek": "MONDAY", "startTime": "10:00", "endTime": "13:00", "slotDuration": 20 },
            { "dayOfWeek": "SATURDAY", "startTime": "09:00", "endTime": "11:00" }
        ]
    })
    .to_string();

    let (status, response) = send(app(&clinic), admin_post("/schedules/bulk", &token, &body)).await;

    assert_eq!(status, StatusCode::OK);
    let schedules = response["schedules"].as_array().unwrap();
    assert_eq!(schedules.len(), 2);
    assert_eq!(schedules[0]["day_of_week"], "MONDAY");
    assert_eq!(schedules[0]["start_time"], "10:00");
    assert_eq!(schedules[0]["slot_duration"], 20);
    assert_eq!(schedules[1]["day_of_week"], "SATURDAY");
    assert_eq!(schedules[1]["slot_duration"], 30);
}

#[tokio::test]
async fn malformed_schedule_body_is_bad_request() {
    let clinic = TestClinic::new().await;
    let token = admin_token(&clinic);

    let (status, body) = send(app(&clinic), admin_post("/schedules", &token, "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let bad_time = json!({
        "doctor_id": clinic.doctor.id,
        "day_of_week": "MONDAY",
        "start_time": "9am",
        "end_time": "12:00"
    })
    .to_string();
    let (status, _) = send(app(&clinic), admin_post("/schedules", &token, &bad_time)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deactivated_day_stops_producing_slots() {
    let clinic = TestClinic::new().await;
    let token = admin_token(&clinic);

    let (_, listed) = send(
        app(&clinic),
        Request::builder()
            .uri(format!("/schedules/{}", clinic.doctor.id))
            .header("Authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let schedule_id = listed["schedules"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        app(&clinic),
        Request::builder()
            .method("DELETE")
            .uri(format!("/schedules/{}", schedule_id))
            .header("Authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schedule"]["is_active"], false);

    let uri = format!("/doctors/{}/slots?date={}", clinic.doctor.id, clinic.next_monday());
    let (_, slots) = send(app(&clinic), get(&uri)).await;
    assert_eq!(slots["slots"], json!([]));
}
