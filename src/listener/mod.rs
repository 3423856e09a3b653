pub mod client;
pub mod config;
pub mod error_handler;

mod runtime;

pub use client::{run_with_reconnect, ClientError};
pub use config::{ConfigError, RuntimeConfig};
pub use runtime::run;
