pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, validate_config};
pub use schema::{Config, DocumentConfig, LoggingConfig, MediaConfig, QueueConfig};
