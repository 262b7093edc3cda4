//! # huddle-server
//!
//! WebSocket and HTTP front end for the Huddle chat coordinator.
//!
//! The binary wires [`huddle_core::Dispatcher`] to axum: a WebSocket route
//! for the realtime protocol, JSON routes for membership and history, a
//! health check, and an optional Prometheus exporter.

pub mod api;
pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;

pub use crate::auth::JwtVerifier;
pub use crate::config::Config;
pub use crate::handlers::{build_app, run_server, seed_store, AppState};
