// Node module - THE RUNNING PARTICIPANT
// Configuration, logging, the vote node service and its HTTP API

mod api;
mod config;
mod logging;
mod service;

pub use api::router;
pub use config::{ConfigError, NodeConfig};
pub use logging::{init_logging, LogFormat};
pub use service::{NodeError, Validity, VoteNode};
