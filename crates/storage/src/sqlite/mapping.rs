use chrono::{DateTime, Utc};
use progress_core::model::{
    ChapterId, Enrollment, FormationId, Lesson, LessonContent, LessonId, LessonKind,
    LessonProgress, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn user_id_to_i64(id: UserId) -> Result<i64, StorageError> {
    to_i64("user_id", id.value())
}

pub(crate) fn formation_id_to_i64(id: FormationId) -> Result<i64, StorageError> {
    to_i64("formation_id", id.value())
}

pub(crate) fn chapter_id_to_i64(id: ChapterId) -> Result<i64, StorageError> {
    to_i64("chapter_id", id.value())
}

pub(crate) fn lesson_id_to_i64(id: LessonId) -> Result<i64, StorageError> {
    to_i64("lesson_id", id.value())
}

pub(crate) fn formation_id_from_i64(v: i64) -> Result<FormationId, StorageError> {
    Ok(FormationId::new(i64_to_u64("formation_id", v)?))
}

pub(crate) fn chapter_id_from_i64(v: i64) -> Result<ChapterId, StorageError> {
    Ok(ChapterId::new(i64_to_u64("chapter_id", v)?))
}

pub(crate) fn lesson_id_from_i64(v: i64) -> Result<LessonId, StorageError> {
    Ok(LessonId::new(i64_to_u64("lesson_id", v)?))
}

pub(crate) fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

/// Flattened columns of a [`LessonContent`]; only the columns of the
/// variant's kind are populated.
#[derive(Debug, Default)]
pub(crate) struct ContentColumns {
    pub duration_seconds: Option<i64>,
    pub url: Option<String>,
    pub question_count: Option<i64>,
    pub body: Option<String>,
}

pub(crate) fn content_columns(content: &LessonContent) -> ContentColumns {
    match content {
        LessonContent::Video { duration_seconds } => ContentColumns {
            duration_seconds: Some(i64::from(*duration_seconds)),
            ..ContentColumns::default()
        },
        LessonContent::Exercise { url } => ContentColumns {
            url: Some(url.to_string()),
            ..ContentColumns::default()
        },
        LessonContent::Quiz { question_count } => ContentColumns {
            question_count: Some(i64::from(*question_count)),
            ..ContentColumns::default()
        },
        LessonContent::Text { body } => ContentColumns {
            body: Some(body.clone()),
            ..ContentColumns::default()
        },
    }
}

fn missing(column: &'static str, kind: LessonKind) -> StorageError {
    StorageError::Serialization(format!("{kind} lesson without {column}"))
}

fn map_content(row: &SqliteRow) -> Result<LessonContent, StorageError> {
    let kind: LessonKind = row
        .try_get::<String, _>("kind")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;

    match kind {
        LessonKind::Video => {
            let raw: i64 = row
                .try_get::<Option<i64>, _>("duration_seconds")
                .map_err(ser)?
                .ok_or_else(|| missing("duration_seconds", kind))?;
            LessonContent::video(u32_from_i64("duration_seconds", raw)?).map_err(ser)
        }
        LessonKind::Exercise => {
            let url: String = row
                .try_get::<Option<String>, _>("url")
                .map_err(ser)?
                .ok_or_else(|| missing("url", kind))?;
            LessonContent::exercise(url).map_err(ser)
        }
        LessonKind::Quiz => {
            let raw: i64 = row
                .try_get::<Option<i64>, _>("question_count")
                .map_err(ser)?
                .ok_or_else(|| missing("question_count", kind))?;
            LessonContent::quiz(u32_from_i64("question_count", raw)?).map_err(ser)
        }
        LessonKind::Text => Ok(LessonContent::text(
            row.try_get::<Option<String>, _>("body")
                .map_err(ser)?
                .unwrap_or_default(),
        )),
    }
}

pub(crate) fn map_lesson_row(row: &SqliteRow) -> Result<Lesson, StorageError> {
    Lesson::new(
        lesson_id_from_i64(row.try_get("id").map_err(ser)?)?,
        chapter_id_from_i64(row.try_get("chapter_id").map_err(ser)?)?,
        row.try_get::<String, _>("title").map_err(ser)?,
        u32_from_i64("position", row.try_get("position").map_err(ser)?)?,
        map_content(row)?,
        row.try_get("is_free").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_progress_row(row: &SqliteRow) -> Result<LessonProgress, StorageError> {
    let watch_time: i64 = row.try_get("watch_time_seconds").map_err(ser)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(ser)?;
    Ok(LessonProgress {
        lesson_id: lesson_id_from_i64(row.try_get("lesson_id").map_err(ser)?)?,
        user_id: user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
        position_seconds: row.try_get("position_seconds").map_err(ser)?,
        watch_time_seconds: i64_to_u64("watch_time_seconds", watch_time)?,
        completion_percentage: row.try_get("completion_percentage").map_err(ser)?,
        is_completed: row.try_get("is_completed").map_err(ser)?,
        notes: row.try_get("notes").map_err(ser)?,
        updated_at,
    })
}

pub(crate) fn map_enrollment_row(row: &SqliteRow) -> Result<Enrollment, StorageError> {
    let pct: i64 = row.try_get("progress_percentage").map_err(ser)?;
    let time_spent: i64 = row.try_get("total_time_spent_seconds").map_err(ser)?;
    Ok(Enrollment {
        user_id: user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
        formation_id: formation_id_from_i64(row.try_get("formation_id").map_err(ser)?)?,
        progress_percentage: u8::try_from(pct)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| StorageError::Serialization(format!("invalid percentage: {pct}")))?,
        current_lesson_id: row
            .try_get::<Option<i64>, _>("current_lesson_id")
            .map_err(ser)?
            .map(lesson_id_from_i64)
            .transpose()?,
        total_time_spent_seconds: i64_to_u64("total_time_spent_seconds", time_spent)?,
        is_completed: row.try_get("is_completed").map_err(ser)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
        enrolled_at: row.try_get("enrolled_at").map_err(ser)?,
    })
}

/// `?n, ?n+1, ...` placeholders for an `IN (...)` list starting at `first`.
pub(crate) fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
