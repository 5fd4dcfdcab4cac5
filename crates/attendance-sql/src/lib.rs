//! Postgres persistence of students and their attendance records.
pub mod attendance;
pub mod students;

pub use attendance::{AttendanceListing, AttendanceRecord};
pub use students::Student;

/// Apply embedded schema migrations which haven't yet been applied to the database.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
