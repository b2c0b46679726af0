//! KDL configuration for hookline.
//!
//! The server reads one `hookline.kdl` document describing the HTTP bind
//! address, database, queue policies and maintenance schedules. Every section
//! is optional; selected values can be overridden from the environment.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DatabaseConfig, ExecutorConfig, LogConfig, LogFormat, MaintenanceSchedule, SecurityConfig,
    ServerConfig, SystemConfig, WorkerConfig, parse_system_config,
};
