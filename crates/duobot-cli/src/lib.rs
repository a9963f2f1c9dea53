//! `duobot-cli` – process wiring for the `duobot` binary.
//!
//! # Modules
//!
//! - [`config`] – `~/.duobot/config.toml` loading, saving and `DUOBOT_*`
//!   environment overrides.
//! - [`telemetry`] – global `tracing` subscriber setup.
//! - [`hardware`] – builds the configured pin backend.

pub mod config;
pub mod hardware;
pub mod telemetry;
