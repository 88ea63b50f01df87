// Kandalf server library
// Configuration loading, startup helpers and the relay worker used by the `kandalf` binary

pub mod model; // Configuration model
pub mod startup; // Logging and shutdown setup
pub mod worker; // Relay command worker

pub use model::config::{Cli, Configuration};
pub use worker::CommandWorker;
