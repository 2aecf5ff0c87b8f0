//! Persistence for the formation catalog, lesson progress and enrollments.

pub mod repository;
pub mod seed;
pub mod sqlite;
