//! Application services: read path, mutation path and background jobs.

pub mod counters;
pub mod engagement;
pub mod error;
pub mod jobs;
pub mod recipes;
pub mod repos;
