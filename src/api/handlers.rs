//! API handlers

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::ApiError;
use super::AppState;
use crate::content::{
    eligible_exercises, exercises_for_lesson, find_lesson, next_lesson, ContentError, Course,
    Exercise, Lesson,
};
use crate::core::Verdict;
use crate::verify::{AuditReport, CheckRequest};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Request body as a JSON object, or 400
fn object_body(
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Map<String, Value>, ApiError> {
    match payload {
        Ok(Json(Value::Object(map))) => Ok(map),
        Ok(_) => Err(ApiError::bad_request("Request body must be a JSON object.").as_verdict()),
        Err(rejection) => {
            warn!("Rejected request body: {}", rejection.body_text());
            Err(ApiError::bad_request("Invalid JSON payload.").as_verdict())
        }
    }
}

fn text_field(body: &Map<String, Value>, name: &str) -> Option<String> {
    match body.get(name)? {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Identifier field: JSON text or number, rendered as text
fn id_field(body: &Map<String, Value>, name: &str) -> Option<String> {
    match body.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Cancelled when the request future is dropped (client went away)
fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

pub async fn execute_code(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Verdict>, ApiError> {
    let body = object_body(payload)?;
    let code = text_field(&body, "code").ok_or_else(|| {
        ApiError::bad_request("Invalid payload: 'code' is required.").as_verdict()
    })?;

    let (cancel, _guard) = request_token();
    let verdict = state
        .verifier
        .execute(&code, &cancel)
        .await
        .map_err(|e| ApiError::from(e).as_verdict())?;

    info!("POST /api/execute-code - success={}", verdict.success);
    Ok(Json(verdict))
}

pub async fn check_exercise(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Verdict>, ApiError> {
    let body = object_body(payload)?;
    let (Some(course_id), Some(exercise_id), Some(code)) = (
        id_field(&body, "course_id"),
        id_field(&body, "exercise_id"),
        text_field(&body, "code"),
    ) else {
        return Err(ApiError::bad_request(
            "Invalid payload: 'course_id', 'exercise_id' and 'code' are required.",
        )
        .as_verdict());
    };

    run_check(
        &state,
        CheckRequest {
            course_id,
            exercise_id,
            code,
        },
    )
    .await
}

/// Legacy form: ids in the path, code in the body
pub async fn submit_exercise(
    State(state): State<AppState>,
    Path((course_id, exercise_id)): Path<(String, String)>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Verdict>, ApiError> {
    let body = object_body(payload)?;
    let code = text_field(&body, "code").ok_or_else(|| {
        ApiError::bad_request("Invalid payload: 'code' is required.").as_verdict()
    })?;

    run_check(
        &state,
        CheckRequest {
            course_id,
            exercise_id,
            code,
        },
    )
    .await
}

async fn run_check(state: &AppState, request: CheckRequest) -> Result<Json<Verdict>, ApiError> {
    let (cancel, _guard) = request_token();
    let verdict = state
        .verifier
        .check_exercise(&request, &cancel)
        .await
        .map_err(|e| ApiError::from(e).as_verdict())?;
    Ok(Json(verdict))
}

async fn load_course(state: &AppState, course_id: &str) -> Result<Course, ApiError> {
    state
        .verifier
        .content()
        .course(course_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Course '{}' not found.", course_id)))
}

pub async fn list_courses(State(state): State<AppState>) -> Result<Json<Vec<Course>>, ApiError> {
    Ok(Json(state.verifier.content().courses().await?))
}

pub async fn get_course(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<Course>, ApiError> {
    Ok(Json(load_course(&state, &course_id).await?))
}

pub async fn list_lessons(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<Lesson>>, ApiError> {
    let course = load_course(&state, &course_id).await?;
    Ok(Json(state.verifier.content().lessons(&course).await?))
}

#[derive(Debug, Serialize)]
pub struct LessonDetail {
    pub course: Course,
    pub lesson: Lesson,
    pub exercises: Vec<Exercise>,
    pub next_lesson: Option<Lesson>,
}

pub async fn get_lesson(
    State(state): State<AppState>,
    Path((course_id, lesson_id)): Path<(String, String)>,
) -> Result<Json<LessonDetail>, ApiError> {
    let content = state.verifier.content();
    let course = load_course(&state, &course_id).await?;
    let lessons = content.lessons(&course).await?;

    let found = find_lesson(&lessons, &lesson_id).ok_or_else(|| {
        ApiError::not_found(format!(
            "Lesson '{}' not found in course '{}'.",
            lesson_id, course_id
        ))
    })?;

    let all_exercises = match content.exercises(&course).await {
        Ok(exercises) => exercises,
        Err(ContentError::SourceNotConfigured { .. }) => {
            warn!("Course '{}' has no exercises file", course_id);
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };
    let exercises = exercises_for_lesson(&course, &all_exercises, &found.lesson.id.as_text())
        .into_iter()
        .cloned()
        .collect();

    Ok(Json(LessonDetail {
        lesson: found.lesson.clone(),
        next_lesson: next_lesson(&lessons, found.index).cloned(),
        exercises,
        course,
    }))
}

pub async fn list_exercises(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<Exercise>>, ApiError> {
    let course = load_course(&state, &course_id).await?;
    let exercises = state.verifier.content().exercises(&course).await?;
    Ok(Json(
        eligible_exercises(&course, &exercises)
            .into_iter()
            .cloned()
            .collect(),
    ))
}

/// Editor access: 404 for unknown or level-incompatible exercises
pub async fn get_exercise(
    State(state): State<AppState>,
    Path((course_id, exercise_id)): Path<(String, String)>,
) -> Result<Json<Exercise>, ApiError> {
    let (_, exercise) = state.verifier.resolve(&course_id, &exercise_id).await?;
    Ok(Json(exercise))
}

pub async fn audit_course(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<AuditReport>, ApiError> {
    let (cancel, _guard) = request_token();
    Ok(Json(state.verifier.audit_course(&course_id, &cancel).await?))
}
