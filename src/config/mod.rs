//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → schema.rs resolves one ProxyConfig per [[proxies]] entry
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; changes require a restart
//! - All sections have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{AppConfig, LoggingConfig, MetricsConfig, ProxyEntry, TransportConfig};
pub use validation::ValidationError;
