//! Data layer module
//!
//! Handles all data persistence:
//! - Federation identity records
//! - Local users, guilds, channels and messages (including remote shadows)

mod database;
mod models;

pub use database::Database;
pub use models::*;

#[cfg(test)]
mod database_test;
