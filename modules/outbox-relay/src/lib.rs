//! Outbox relay service
//!
//! Runs the outbox processor and retention sweeper against one database and
//! one event stream, and serves `/api/health` and `/metrics`.

pub mod bus;
pub mod config;
pub mod db;
pub mod metrics;
pub mod routes;
