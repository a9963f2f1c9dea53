//! `duobot-server` – the robot's command endpoints.
//!
//! Two independent HTTP/1.1 listeners, one per device, so a long-running
//! chassis stream never delays an arm command:
//!
//! | Endpoint | Request | Response |
//! |---|---|---|
//! | arm (`:8080`) | `GET /<action>` | `{"message": "..."}` |
//! | arm (`:8080`) | `GET /state` | `{"shoulder": .., "elbow": .., "gripper": ..}` |
//! | chassis (`:8081`) | `GET /move?direction=..&speed=..` | NDJSON stream of cycle reports |
//!
//! Errors are `{"status": "error", "message": "..."}` with 400 / 404 / 409 /
//! 500 according to the error class.
//!
//! # Modules
//!
//! - [`http`] – minimal request parsing and response writing.
//! - [`server`] – [`CommandServer`]: listeners and per-connection handlers.

pub mod http;
pub mod server;

pub use server::{CommandServer, DEFAULT_ARM_PORT, DEFAULT_CHASSIS_PORT};
