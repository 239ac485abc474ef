//! KDL configuration parsing for the isoforge server.
//!
//! Configuration comes from an optional `isoforge.kdl` file, then
//! environment overrides are applied on top.

pub mod error;
pub mod server;

pub use error::{ConfigError, ConfigResult};
pub use server::{DEFAULT_CONFIG_FILE, ExecutorConfig, LogFormat, ServerConfig, parse_server_config};
