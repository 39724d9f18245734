pub mod cc;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod postman;
pub mod salt;
pub mod store;
pub mod svn;
pub mod systems;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use config::{Env, Opts};
pub use error::{Failure, TaskError};
pub use models::*;
pub use orchestrator::{Orchestrator, TaskOutcome};
pub use postman::{Postman, PostmanRegistry};
pub use salt::Salt;
pub use store::{ConfigStore, PostgresStore, YamlStore};
pub use systems::{System, SystemRegistry};
pub use tasks::{Task, TaskRegistry};
