//! Pacing CLI - command line tools for the pacing engine.
//!
//! This crate provides the CLI binaries:
//! - solve_route: offline plan (or reoptimization) from a route file
//! - replay_telemetry: streams a plan back to a running server as telemetry

pub mod client;
pub mod replay;

pub use client::PacingClient;
pub use replay::{DriftProfile, TelemetryReplay};
