//! Application services: like toggling, follow admission, notes and background jobs.

pub mod error;
pub mod follows;
pub mod jobs;
pub mod likes;
pub mod notes;
pub mod repos;
