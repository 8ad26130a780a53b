//! Storage layers and the rules that govern a shared object's lifecycle.

pub mod object_store;
pub mod ownership;
pub mod password;
pub mod registry;
pub mod share_service;
pub mod sweeper;

#[cfg(test)]
pub mod fake;
