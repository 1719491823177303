//! Screen verification workflow
//!
//! Captures screenshots of a web application across viewports, asks a human
//! and an automated reviewer to judge them, waits (bounded) for both verdicts
//! and writes a PASSED/FAILED summary. All state lives in a file-backed store
//! so a run can be resumed by a later process.

pub mod app_state;
pub mod config;
pub mod models;
pub mod services;
pub mod store;
pub mod telemetry;
