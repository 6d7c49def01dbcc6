//! dapmux-config — configuration loading and validation.

pub mod config;
pub mod error;
pub mod load;

pub use config::{AdapterConfig, DapmuxConfig, TimeoutConfig, TraceConfig};
pub use error::ConfigError;
pub use load::load_config;
