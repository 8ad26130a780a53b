//! Expiring, password-gated temporary file sharing.

pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
