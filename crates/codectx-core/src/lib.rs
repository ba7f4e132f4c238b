//! Host-facing layer: configuration, the command boundary, engine wiring and
//! health checks.

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;

pub use command::{Command, CommandResponse};
pub use config::{Config, resolve_config_path};
pub use engine::Engine;
pub use error::{CoreError, Result};
pub use health::{ComponentHealth, HealthReport};
