use super::{ApiError, App};
use axum::{extract::State, Json};
use std::sync::Arc;

#[tracing::instrument(skip_all)]
pub async fn list_students(
    State(app): State<Arc<App>>,
) -> Result<Json<Vec<attendance_sql::Student>>, ApiError> {
    let students = attendance_sql::students::fetch_students(&app.pg_pool).await?;
    Ok(Json(students))
}
