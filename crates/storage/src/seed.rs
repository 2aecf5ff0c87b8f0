//! Demo catalog used by the seeding binary, the CLI and tests.

use progress_core::model::{
    Chapter, ChapterId, Formation, FormationId, FormationSlug, Lesson, LessonContent, LessonId,
};

use crate::repository::{Storage, StorageError};

/// Slug of the demo formation.
pub const DEMO_SLUG: &str = "intro-to-rust";

/// Id of the demo formation.
pub const DEMO_FORMATION_ID: FormationId = FormationId::new(1);

const CHAPTERS: [(&str, [(&str, Kind); 4]); 3] = [
    (
        "Getting started",
        [
            ("Why Rust", Kind::Video(420)),
            ("Installing the toolchain", Kind::Video(600)),
            ("Hello, cargo", Kind::Exercise("https://example.com/exercises/hello-cargo")),
            ("Checkpoint", Kind::Quiz(5)),
        ],
    ),
    (
        "Ownership",
        [
            ("Moves and copies", Kind::Video(900)),
            ("Borrowing", Kind::Video(1_080)),
            ("Lifetimes in practice", Kind::Text("Lifetimes name the region a borrow is valid for.")),
            ("Borrow checker kata", Kind::Exercise("https://example.com/exercises/borrowck")),
        ],
    ),
    (
        "Error handling",
        [
            ("Result and the ? operator", Kind::Video(750)),
            ("Library errors with thiserror", Kind::Video(660)),
            ("Reading: error design", Kind::Text("Prefer typed errors in libraries.")),
            ("Final quiz", Kind::Quiz(10)),
        ],
    ),
];

#[derive(Clone, Copy)]
enum Kind {
    Video(u32),
    Exercise(&'static str),
    Quiz(u32),
    Text(&'static str),
}

impl Kind {
    fn content(self) -> Result<LessonContent, progress_core::Error> {
        Ok(match self {
            Kind::Video(duration) => LessonContent::video(duration)?,
            Kind::Exercise(url) => LessonContent::exercise(url)?,
            Kind::Quiz(count) => LessonContent::quiz(count)?,
            Kind::Text(body) => LessonContent::text(body),
        })
    }
}

/// Three chapters of four lessons (12 in total). Only the first lesson is free.
///
/// # Errors
///
/// Returns `progress_core::Error` if the static catalog fails validation.
pub fn demo_formation() -> Result<Formation, progress_core::Error> {
    let mut next_lesson = 1_u64;
    let mut chapters = Vec::with_capacity(CHAPTERS.len());

    for (chapter_idx, (chapter_title, lessons)) in (0_u32..).zip(CHAPTERS) {
        let chapter_id = ChapterId::new(u64::from(chapter_idx) + 1);
        let mut built = Vec::with_capacity(lessons.len());
        for (position, (title, kind)) in (0_u32..).zip(lessons) {
            let id = LessonId::new(next_lesson);
            built.push(Lesson::new(
                id,
                chapter_id,
                title,
                position,
                kind.content()?,
                next_lesson == 1,
            )?);
            next_lesson += 1;
        }
        chapters.push(Chapter::new(
            chapter_id,
            DEMO_FORMATION_ID,
            chapter_title,
            chapter_idx,
            built,
        )?);
    }

    Ok(Formation::new(
        DEMO_FORMATION_ID,
        FormationSlug::parse(DEMO_SLUG)?,
        "Introduction to Rust",
        chapters,
    )?)
}

/// Errors raised while seeding.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SeedError {
    #[error(transparent)]
    Domain(#[from] progress_core::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Insert (or refresh) the demo formation.
///
/// # Errors
///
/// Returns `SeedError` if the catalog is invalid or cannot be stored.
pub async fn seed_demo(storage: &Storage) -> Result<Formation, SeedError> {
    let formation = demo_formation()?;
    storage.catalog.upsert_formation(&formation).await?;
    Ok(formation)
}
