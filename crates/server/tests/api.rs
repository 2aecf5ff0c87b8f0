use std::collections::HashMap;
use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{App, test, web};
use serde_json::{Value, json};

use progress_core::model::{Enrollment, LessonProgress, UserId};
use progress_core::time::fixed_clock;
use server::{AppState, configure_routes};
use services::ProgressService;
use services::api::{Dashboard, FormationProgressView};
use storage::repository::Storage;
use storage::seed::seed_demo;

const TOKEN: &str = "learner-token";

async fn state() -> web::Data<AppState> {
    let storage = Storage::in_memory();
    seed_demo(&storage).await.unwrap();
    let service = Arc::new(ProgressService::new(fixed_clock(), storage));
    let tokens = HashMap::from([(TOKEN.to_string(), UserId::new(1))]);
    web::Data::new(AppState::new(service, tokens))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(App::new().app_data($state.clone()).configure(configure_routes)).await
    };
}

fn bearer() -> (&'static str, String) {
    ("Authorization", format!("Bearer {TOKEN}"))
}

#[actix_web::test]
async fn health_is_public() {
    let state = state().await;
    let app = app!(state);
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn catalog_needs_no_token() {
    let state = state().await;
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/formations/intro-to-rust")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["slug"], "intro-to-rust");
    assert_eq!(body["chapters"].as_array().unwrap().len(), 3);

    let req = test::TestRequest::get().uri("/chapters/2/lessons").to_request();
    let lessons: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(lessons.as_array().unwrap().len(), 4);

    let req = test::TestRequest::get().uri("/formations/unknown").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn progress_requires_a_known_token() {
    let state = state().await;
    let app = app!(state);

    let req = test::TestRequest::get().uri("/progress-dashboard").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get()
        .uri("/progress-dashboard")
        .insert_header(("Authorization", "Bearer nope"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unauthorized");
}

#[actix_web::test]
async fn upsert_is_monotonic_and_idempotent() {
    let state = state().await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/formations/intro-to-rust/enroll")
        .insert_header(bearer())
        .to_request();
    let enrollment: Enrollment = test::call_and_read_body_json(&app, req).await;
    assert_eq!(enrollment.progress_percentage, 0);

    let done = json!({
        "position_seconds": 400.0,
        "watch_time_seconds": 400,
        "completion_percentage": 95.2,
        "is_completed": true,
        "notes": "great intro"
    });
    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/lessons/1/progress")
            .insert_header(bearer())
            .set_json(&done)
            .to_request();
        let progress: LessonProgress = test::call_and_read_body_json(&app, req).await;
        assert_eq!(progress.watch_time_seconds, 400);
        assert!(progress.is_completed);
    }

    let rewind = json!({
        "position_seconds": 10.0,
        "watch_time_seconds": 12,
        "completion_percentage": 2.4,
        "is_completed": false
    });
    let req = test::TestRequest::post()
        .uri("/lessons/1/progress")
        .insert_header(bearer())
        .set_json(&rewind)
        .to_request();
    let progress: LessonProgress = test::call_and_read_body_json(&app, req).await;
    assert_eq!(progress.position_seconds, 10.0);
    assert_eq!(progress.watch_time_seconds, 400);
    assert_eq!(progress.completion_percentage, 95.2);
    assert!(progress.is_completed);
    assert_eq!(progress.notes, "great intro");

    let req = test::TestRequest::get()
        .uri("/formations/intro-to-rust/progress")
        .insert_header(bearer())
        .to_request();
    let view: FormationProgressView = test::call_and_read_body_json(&app, req).await;
    assert_eq!(view.enrollment.unwrap().progress_percentage, 8);
    assert_eq!(view.chapters_progress[0].progress.completed_lessons, 1);
}

#[actix_web::test]
async fn bad_bodies_are_rejected() {
    let state = state().await;
    let app = app!(state);

    let unknown_field = json!({
        "position_seconds": 1.0,
        "watch_time_seconds": 1,
        "completion_percentage": 1.0,
        "is_completed": false,
        "speed": 2
    });
    let req = test::TestRequest::post()
        .uri("/lessons/1/progress")
        .insert_header(bearer())
        .set_json(&unknown_field)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let out_of_range = json!({
        "position_seconds": 1.0,
        "watch_time_seconds": 1,
        "completion_percentage": 140.0,
        "is_completed": false
    });
    let req = test::TestRequest::post()
        .uri("/lessons/1/progress")
        .insert_header(bearer())
        .set_json(&out_of_range)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[actix_web::test]
async fn paid_lessons_are_locked_without_enrollment() {
    let state = state().await;
    let app = app!(state);

    let body = json!({
        "position_seconds": 5.0,
        "watch_time_seconds": 5,
        "completion_percentage": 1.0,
        "is_completed": false
    });
    let req = test::TestRequest::post()
        .uri("/lessons/2/progress")
        .insert_header(bearer())
        .set_json(&body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri("/lessons/2/progress")
        .insert_header(bearer())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn dashboard_sums_time_across_enrollments() {
    let state = state().await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/formations/intro-to-rust/enroll")
        .insert_header(bearer())
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::post()
        .uri("/lessons/1/progress")
        .insert_header(bearer())
        .set_json(json!({
            "position_seconds": 120.0,
            "watch_time_seconds": 120,
            "completion_percentage": 28.0,
            "is_completed": false
        }))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get()
        .uri("/progress-dashboard")
        .insert_header(bearer())
        .to_request();
    let dashboard: Dashboard = test::call_and_read_body_json(&app, req).await;
    assert_eq!(dashboard.total_time_spent_seconds, 120);
    assert_eq!(dashboard.enrollments.len(), 1);
    assert_eq!(dashboard.lessons_completed, 0);
    assert_eq!(dashboard.current_streak_days, 1);
}
