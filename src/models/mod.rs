//! Core data models for the expiring file-sharing service.
//!
//! Records map to database rows via `sqlx::FromRow`; the projections in
//! `summary` are what the HTTP layer serializes.

pub mod caller;
pub mod object;
pub mod summary;
