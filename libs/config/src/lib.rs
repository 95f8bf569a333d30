//! # Actor Node Configuration
//!
//! Layered configuration for actor nodes and clients, plus the logging
//! setup every binary shares.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use runtime_config::{init_logging, RuntimeConfig};
//!
//! let config = RuntimeConfig::load(Some("config/node.toml".as_ref())).unwrap();
//! init_logging(&config.logging).unwrap();
//! let policy = config.transport_policy();
//! ```

pub mod logging;
pub mod runtime;

pub use logging::init_logging;
pub use runtime::{
    ClientConfig, LoggingConfig, NodeConfig, RuntimeConfig, SecurityConfig, StreamsConfig,
    TransportConfig, ENV_PREFIX,
};
