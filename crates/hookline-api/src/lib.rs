//! HTTP server for hookline.
//!
//! Receives signed source-control webhooks, turns them into pipeline runs,
//! executes runs through the job queue and exposes queue administration
//! plus a WebSocket stream of run events.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;
pub mod ws;

pub use state::AppState;
