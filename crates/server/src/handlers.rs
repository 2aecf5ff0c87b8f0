use actix_web::{HttpResponse, web};
use serde::Serialize;

use progress_core::model::{ChapterId, FormationSlug, LessonId, ProgressDelta};

use crate::AppState;
use crate::auth::Learner;
use crate::error::ApiError;

type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

//
// ─── CATALOG ───────────────────────────────────────────────────────────────────
//

pub async fn get_formation(
    state: web::Data<AppState>,
    slug: web::Path<String>,
) -> Result<HttpResponse> {
    let slug = FormationSlug::parse(slug.into_inner())?;
    let formation = state.service.formation(&slug).await?;
    Ok(HttpResponse::Ok().json(formation))
}

pub async fn get_lesson(state: web::Data<AppState>, id: web::Path<u64>) -> Result<HttpResponse> {
    let lesson = state.service.lesson(LessonId::new(id.into_inner())).await?;
    Ok(HttpResponse::Ok().json(lesson))
}

pub async fn get_chapter_lessons(
    state: web::Data<AppState>,
    id: web::Path<u64>,
) -> Result<HttpResponse> {
    let lessons = state
        .service
        .chapter_lessons(ChapterId::new(id.into_inner()))
        .await?;
    Ok(HttpResponse::Ok().json(lessons))
}

//
// ─── PROGRESS ──────────────────────────────────────────────────────────────────
//

pub async fn get_formation_progress(
    state: web::Data<AppState>,
    Learner(user): Learner,
    slug: web::Path<String>,
) -> Result<HttpResponse> {
    let slug = FormationSlug::parse(slug.into_inner())?;
    let view = state.service.formation_progress(user, &slug).await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn get_lesson_progress(
    state: web::Data<AppState>,
    Learner(user): Learner,
    id: web::Path<u64>,
) -> Result<HttpResponse> {
    let lesson_id = LessonId::new(id.into_inner());
    let progress = state
        .service
        .lesson_progress(user, lesson_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no progress for lesson {lesson_id}")))?;
    Ok(HttpResponse::Ok().json(progress))
}

pub async fn upsert_lesson_progress(
    state: web::Data<AppState>,
    Learner(user): Learner,
    id: web::Path<u64>,
    delta: web::Json<ProgressDelta>,
) -> Result<HttpResponse> {
    let progress = state
        .service
        .upsert_progress(user, LessonId::new(id.into_inner()), &delta)
        .await?;
    Ok(HttpResponse::Ok().json(progress))
}

pub async fn enroll(
    state: web::Data<AppState>,
    Learner(user): Learner,
    slug: web::Path<String>,
) -> Result<HttpResponse> {
    let slug = FormationSlug::parse(slug.into_inner())?;
    let enrollment = state.service.enroll(user, &slug).await?;
    Ok(HttpResponse::Ok().json(enrollment))
}

pub async fn dashboard(state: web::Data<AppState>, Learner(user): Learner) -> Result<HttpResponse> {
    let dashboard = state.service.dashboard(user).await?;
    Ok(HttpResponse::Ok().json(dashboard))
}
