use std::collections::HashMap;

use progress_core::model::{
    Chapter, ChapterId, Formation, FormationId, FormationSlug, Lesson, LessonId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{
    chapter_id_from_i64, chapter_id_to_i64, conn, content_columns, formation_id_from_i64,
    formation_id_to_i64, lesson_id_to_i64, map_lesson_row, ser,
};
use crate::repository::{CatalogRepository, StorageError};

const LESSON_COLUMNS: &str = r"
    l.id, l.chapter_id, l.title, l.position, l.kind,
    l.duration_seconds, l.url, l.question_count, l.body, l.is_free
";

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

impl SqliteRepository {
    async fn load_formation(&self, row: SqliteRow) -> Result<Formation, StorageError> {
        let id = formation_id_from_i64(row.try_get("id").map_err(ser)?)?;
        let slug = FormationSlug::parse(row.try_get::<String, _>("slug").map_err(ser)?)
            .map_err(ser)?;
        let title: String = row.try_get("title").map_err(ser)?;
        let fid = formation_id_to_i64(id)?;

        let chapter_rows = sqlx::query(
            r"
            SELECT id, title, position
            FROM chapters
            WHERE formation_id = ?1
            ORDER BY position ASC, id ASC
            ",
        )
        .bind(fid)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let lesson_rows = sqlx::query(&format!(
            r"
            SELECT {LESSON_COLUMNS}
            FROM lessons l
            JOIN chapters c ON c.id = l.chapter_id
            WHERE c.formation_id = ?1
            ORDER BY l.position ASC, l.id ASC
            "
        ))
        .bind(fid)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut by_chapter: HashMap<ChapterId, Vec<Lesson>> = HashMap::new();
        for row in &lesson_rows {
            let lesson = map_lesson_row(row)?;
            by_chapter.entry(lesson.chapter_id).or_default().push(lesson);
        }

        let mut chapters = Vec::with_capacity(chapter_rows.len());
        for row in chapter_rows {
            let chapter_id = chapter_id_from_i64(row.try_get("id").map_err(ser)?)?;
            let position: i64 = row.try_get("position").map_err(ser)?;
            chapters.push(
                Chapter::new(
                    chapter_id,
                    id,
                    row.try_get::<String, _>("title").map_err(ser)?,
                    u32::try_from(position).map_err(ser)?,
                    by_chapter.remove(&chapter_id).unwrap_or_default(),
                )
                .map_err(ser)?,
            );
        }

        Formation::new(id, slug, title, chapters).map_err(ser)
    }
}

#[async_trait::async_trait]
impl CatalogRepository for SqliteRepository {
    async fn upsert_formation(&self, formation: &Formation) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let fid = formation_id_to_i64(formation.id)?;

        sqlx::query(
            r"
            INSERT INTO formations (id, slug, title)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                title = excluded.title
            ",
        )
        .bind(fid)
        .bind(formation.slug.as_str())
        .bind(&formation.title)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Conflict
            } else {
                conn(e)
            }
        })?;

        for chapter in &formation.chapters {
            sqlx::query(
                r"
                INSERT INTO chapters (id, formation_id, title, position)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    position = excluded.position
                ",
            )
            .bind(chapter_id_to_i64(chapter.id)?)
            .bind(fid)
            .bind(&chapter.title)
            .bind(i64::from(chapter.position))
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

            for lesson in &chapter.lessons {
                let cols = content_columns(&lesson.content);
                sqlx::query(
                    r"
                    INSERT INTO lessons (
                        id, chapter_id, title, position, kind,
                        duration_seconds, url, question_count, body, is_free
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    ON CONFLICT(id) DO UPDATE SET
                        chapter_id = excluded.chapter_id,
                        title = excluded.title,
                        position = excluded.position,
                        kind = excluded.kind,
                        duration_seconds = excluded.duration_seconds,
                        url = excluded.url,
                        question_count = excluded.question_count,
                        body = excluded.body,
                        is_free = excluded.is_free
                    ",
                )
                .bind(lesson_id_to_i64(lesson.id)?)
                .bind(chapter_id_to_i64(chapter.id)?)
                .bind(&lesson.title)
                .bind(i64::from(lesson.position))
                .bind(lesson.kind().as_str())
                .bind(cols.duration_seconds)
                .bind(cols.url)
                .bind(cols.question_count)
                .bind(cols.body)
                .bind(lesson.is_free)
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            }
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_formation(&self, slug: &FormationSlug) -> Result<Option<Formation>, StorageError> {
        let row = sqlx::query("SELECT id, slug, title FROM formations WHERE slug = ?1")
            .bind(slug.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        match row {
            Some(row) => Ok(Some(self.load_formation(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_formation_by_id(
        &self,
        id: FormationId,
    ) -> Result<Option<Formation>, StorageError> {
        let row = sqlx::query("SELECT id, slug, title FROM formations WHERE id = ?1")
            .bind(formation_id_to_i64(id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        match row {
            Some(row) => Ok(Some(self.load_formation(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {LESSON_COLUMNS} FROM lessons l WHERE l.id = ?1"
        ))
        .bind(lesson_id_to_i64(id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;
        row.as_ref().map(map_lesson_row).transpose()
    }

    async fn chapter_lessons(&self, chapter_id: ChapterId) -> Result<Vec<Lesson>, StorageError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {LESSON_COLUMNS}
            FROM lessons l
            WHERE l.chapter_id = ?1
            ORDER BY l.position ASC, l.id ASC
            "
        ))
        .bind(chapter_id_to_i64(chapter_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut lessons = Vec::with_capacity(rows.len());
        for row in rows {
            lessons.push(map_lesson_row(&row)?);
        }
        Ok(lessons)
    }

    async fn formation_of_lesson(
        &self,
        id: LessonId,
    ) -> Result<Option<FormationId>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT c.formation_id
            FROM lessons l
            JOIN chapters c ON c.id = l.chapter_id
            WHERE l.id = ?1
            ",
        )
        .bind(lesson_id_to_i64(id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.map(|r| formation_id_from_i64(r.try_get("formation_id").map_err(ser)?))
            .transpose()
    }
}
