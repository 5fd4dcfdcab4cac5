use super::{ApiError, App, ImagePayload};
use attendance_sql::{AttendanceListing, AttendanceRecord};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

const DEFAULT_LIST_LIMIT: i64 = 500;
const MAX_LIST_LIMIT: i64 = 1000;

#[derive(Debug, serde::Serialize)]
pub struct Registered {
    pub attendance: AttendanceRecord,
    pub recognition: face_api::Recognition,
}

/// Recognize the student pictured in a submitted image, and record their attendance.
#[tracing::instrument(skip_all)]
pub async fn register_attendance(
    State(app): State<Arc<App>>,
    ImagePayload(image): ImagePayload,
) -> Result<(StatusCode, Json<Registered>), ApiError> {
    if image.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            anyhow::anyhow!("no image provided"),
        ));
    }

    let recognition = app.face_api.recognize(&image).await?;

    let student_id = match &recognition {
        face_api::Recognition {
            recognized: true,
            student_id: Some(student_id),
            ..
        } => *student_id,
        _ => {
            metrics::counter!("attendance_registrations_total", "outcome" => "unrecognized")
                .increment(1);
            tracing::info!(reason = ?recognition.message, "face was not recognized");

            return Err(ApiError::not_found(
                recognition
                    .message
                    .as_deref()
                    .unwrap_or("face not recognized"),
            ));
        }
    };

    let attendance =
        attendance_sql::attendance::insert_attendance(&app.pg_pool, student_id, true).await?;

    metrics::counter!("attendance_registrations_total", "outcome" => "recorded").increment(1);
    tracing::info!(
        student_id,
        attendance_id = attendance.id,
        confidence = recognition.confidence,
        "recorded attendance"
    );

    Ok((
        StatusCode::CREATED,
        Json(Registered {
            attendance,
            recognition,
        }),
    ))
}

#[derive(Debug, serde::Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

/// List recorded attendance, newest first.
#[tracing::instrument(skip_all)]
pub async fn list_attendance(
    State(app): State<Arc<App>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<AttendanceListing>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let rows = attendance_sql::attendance::fetch_attendance(&app.pg_pool, limit).await?;
    Ok(Json(rows))
}
