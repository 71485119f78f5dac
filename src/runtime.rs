//! Runtime glue: collaborator interfaces, configuration, health and telemetry, fatal
//! error capture and the watcher orchestration.

pub mod chain;
pub mod config;
pub mod fatal;
pub mod health;
pub mod runner;
pub(crate) mod supervisor;
pub mod telemetry;
pub mod watcher;
