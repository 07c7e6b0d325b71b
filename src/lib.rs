//! VM hosting console
//!
//! Client-side session handling for the hosting dashboard: configuration,
//! tracing setup and the [`Console`] composition root. The building blocks
//! live in the workspace crates and are re-exported here.

#![warn(missing_docs)]

pub mod config;
pub mod console;
pub mod telemetry;

pub use api_client;
pub use app_state;
pub use storage;

pub use config::ConsoleConfig;
pub use console::Console;
pub use telemetry::init_tracing;
