use chrono::prelude::*;
use serde::Serialize;
use sqlx::FromRow;

/// Student is a registered student. Face encodings are owned by the face
/// recognition service and are not selected here.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Student {
    pub id: i32,
    pub name: String,
    pub registration_number: String,
    pub created_at: DateTime<Utc>,
}

/// Fetch all active students, most recently registered first.
#[tracing::instrument(level = "debug", skip(pool))]
pub async fn fetch_students(pool: &sqlx::PgPool) -> sqlx::Result<Vec<Student>> {
    sqlx::query_as::<_, Student>(
        r#"select
            id,
            name,
            registration_number,
            created_at
        from students
        where active
        order by created_at desc;
        "#,
    )
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_student_serialization() {
        let student = Student {
            id: 3,
            name: "Alice".to_string(),
            registration_number: "2024-0003".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
        };

        insta::assert_json_snapshot!(student, @r###"
        {
          "id": 3,
          "name": "Alice",
          "registration_number": "2024-0003",
          "created_at": "2024-03-01T08:30:00Z"
        }
        "###);
    }
}
