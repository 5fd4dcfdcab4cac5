use chrono::prelude::*;
use serde::Serialize;
use sqlx::FromRow;

/// AttendanceRecord is a single attendance row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AttendanceRecord {
    pub id: i32,
    pub student_id: i32,
    pub timestamp: DateTime<Utc>,
    pub recognized: bool,
}

/// AttendanceListing is an attendance row joined with its student.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AttendanceListing {
    pub id: i32,
    pub timestamp: DateTime<Utc>,
    pub recognized: bool,
    pub student_id: i32,
    pub name: String,
    pub registration_number: String,
}

#[tracing::instrument(level = "debug", skip(pool))]
pub async fn insert_attendance(
    pool: &sqlx::PgPool,
    student_id: i32,
    recognized: bool,
) -> sqlx::Result<AttendanceRecord> {
    sqlx::query_as::<_, AttendanceRecord>(
        r#"insert into attendance (student_id, recognized)
        values ($1, $2)
        returning id, student_id, "timestamp", recognized;
        "#,
    )
    .bind(student_id)
    .bind(recognized)
    .fetch_one(pool)
    .await
}

/// Fetch up to `limit` attendance records, newest first.
#[tracing::instrument(level = "debug", skip(pool))]
pub async fn fetch_attendance(
    pool: &sqlx::PgPool,
    limit: i64,
) -> sqlx::Result<Vec<AttendanceListing>> {
    sqlx::query_as::<_, AttendanceListing>(
        r#"select
            a.id,
            a."timestamp",
            a.recognized,
            s.id as student_id,
            s.name,
            s.registration_number
        from attendance as a
        join students as s on s.id = a.student_id
        order by a."timestamp" desc
        limit $1;
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
