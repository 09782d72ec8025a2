// Workflow MQ Core - Domain Logic & Ports
// NO broker client dependencies (ports & adapters)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{MqError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
