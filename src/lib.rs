//! USB configuration database
//!
//! Bootstraps the PostgreSQL schema used by the universal service broker
//! (Config, Dials, Instances, Plans, Services), seeds the default broker
//! configuration, and serves typed access to it over an admin API.

pub mod api;
pub mod config;
pub mod error;
pub mod pool;
pub mod schema;
pub mod security;
pub mod store;
