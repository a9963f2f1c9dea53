//! `duobot-kernel` – command orchestration.
//!
//! Sits between the command endpoints and the controllers.  It does not move
//! anything itself; it decides which controller runs a command and makes
//! sure each device executes at most one command at a time.
//!
//! # Modules
//!
//! - [`dispatcher`] – [`CommandDispatcher`][dispatcher::CommandDispatcher]:
//!   validates, routes and serializes arm and chassis commands, and forces
//!   the chassis to a stop on supersession and shutdown.

pub mod dispatcher;

pub use dispatcher::{ArmOutcome, CommandDispatcher, Dispatched, DriveSession};
