use chrono::{DateTime, Utc};
use progress_core::model::{LessonId, LessonProgress, ProgressDelta, UserId};

use super::SqliteRepository;
use super::mapping::{conn, lesson_id_to_i64, map_progress_row, placeholders, to_i64, user_id_to_i64};
use crate::repository::{ProgressRepository, StorageError};

const PROGRESS_COLUMNS: &str = r"
    user_id, lesson_id, position_seconds, watch_time_seconds,
    completion_percentage, is_completed, notes, updated_at
";

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM lesson_progress WHERE user_id = ?1 AND lesson_id = ?2"
        ))
        .bind(user_id_to_i64(user_id)?)
        .bind(lesson_id_to_i64(lesson_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;
        row.as_ref().map(map_progress_row).transpose()
    }

    async fn upsert_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        delta: &ProgressDelta,
        now: DateTime<Utc>,
    ) -> Result<LessonProgress, StorageError> {
        delta.validate()?;

        // Same merge as `LessonProgress::merge`, done in one statement so
        // concurrent writers cannot interleave a read-modify-write.
        let row = sqlx::query(&format!(
            r"
            INSERT INTO lesson_progress (
                user_id, lesson_id, position_seconds, watch_time_seconds,
                completion_percentage, is_completed, notes, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, COALESCE(?7, ''), ?8)
            ON CONFLICT(user_id, lesson_id) DO UPDATE SET
                position_seconds = excluded.position_seconds,
                watch_time_seconds = MAX(lesson_progress.watch_time_seconds, excluded.watch_time_seconds),
                completion_percentage = MAX(lesson_progress.completion_percentage, excluded.completion_percentage),
                is_completed = MAX(lesson_progress.is_completed, excluded.is_completed),
                notes = COALESCE(?7, lesson_progress.notes),
                updated_at = excluded.updated_at
            RETURNING {PROGRESS_COLUMNS}
            "
        ))
        .bind(user_id_to_i64(user_id)?)
        .bind(lesson_id_to_i64(lesson_id)?)
        .bind(delta.position_seconds)
        .bind(to_i64("watch_time_seconds", delta.watch_time_seconds)?)
        .bind(delta.completion_percentage)
        .bind(delta.is_completed)
        .bind(delta.notes.as_deref())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;

        map_progress_row(&row)
    }

    async fn list_progress(
        &self,
        user_id: UserId,
        lesson_ids: &[LessonId],
    ) -> Result<Vec<LessonProgress>, StorageError> {
        if lesson_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM lesson_progress WHERE user_id = ?1 AND lesson_id IN ({})",
            placeholders(2, lesson_ids.len())
        );
        let mut q = sqlx::query(&sql).bind(user_id_to_i64(user_id)?);
        for id in lesson_ids {
            q = q.bind(lesson_id_to_i64(*id)?);
        }

        let rows = q.fetch_all(&self.pool).await.map_err(conn)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_progress_row(&row)?);
        }
        Ok(out)
    }

    async fn list_user_progress(
        &self,
        user_id: UserId,
    ) -> Result<Vec<LessonProgress>, StorageError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {PROGRESS_COLUMNS}
            FROM lesson_progress
            WHERE user_id = ?1
            ORDER BY updated_at DESC, lesson_id ASC
            "
        ))
        .bind(user_id_to_i64(user_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_progress_row(&row)?);
        }
        Ok(out)
    }
}
