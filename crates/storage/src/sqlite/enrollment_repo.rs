use progress_core::model::{Enrollment, FormationId, UserId};

use super::SqliteRepository;
use super::mapping::{
    conn, formation_id_to_i64, lesson_id_to_i64, map_enrollment_row, to_i64, user_id_to_i64,
};
use crate::repository::{EnrollmentRepository, StorageError};

const ENROLLMENT_COLUMNS: &str = r"
    user_id, formation_id, progress_percentage, current_lesson_id,
    total_time_spent_seconds, is_completed, completed_at, enrolled_at
";

#[async_trait::async_trait]
impl EnrollmentRepository for SqliteRepository {
    async fn get_enrollment(
        &self,
        user_id: UserId,
        formation_id: FormationId,
    ) -> Result<Option<Enrollment>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = ?1 AND formation_id = ?2"
        ))
        .bind(user_id_to_i64(user_id)?)
        .bind(formation_id_to_i64(formation_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;
        row.as_ref().map(map_enrollment_row).transpose()
    }

    async fn upsert_enrollment(&self, enrollment: &Enrollment) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO enrollments (
                user_id, formation_id, progress_percentage, current_lesson_id,
                total_time_spent_seconds, is_completed, completed_at, enrolled_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id, formation_id) DO UPDATE SET
                -- enrolled_at keeps the original enroll action, completion is sticky
                progress_percentage = excluded.progress_percentage,
                current_lesson_id = excluded.current_lesson_id,
                total_time_spent_seconds = excluded.total_time_spent_seconds,
                is_completed = MAX(enrollments.is_completed, excluded.is_completed),
                completed_at = COALESCE(enrollments.completed_at, excluded.completed_at)
            ",
        )
        .bind(user_id_to_i64(enrollment.user_id)?)
        .bind(formation_id_to_i64(enrollment.formation_id)?)
        .bind(i64::from(enrollment.progress_percentage))
        .bind(
            enrollment
                .current_lesson_id
                .map(lesson_id_to_i64)
                .transpose()?,
        )
        .bind(to_i64(
            "total_time_spent_seconds",
            enrollment.total_time_spent_seconds,
        )?)
        .bind(enrollment.is_completed)
        .bind(enrollment.completed_at)
        .bind(enrollment.enrolled_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn list_enrollments(&self, user_id: UserId) -> Result<Vec<Enrollment>, StorageError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {ENROLLMENT_COLUMNS}
            FROM enrollments
            WHERE user_id = ?1
            ORDER BY enrolled_at ASC, formation_id ASC
            "
        ))
        .bind(user_id_to_i64(user_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_enrollment_row(&row)?);
        }
        Ok(out)
    }
}
