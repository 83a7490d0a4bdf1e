//! Application configuration
//!
//! Configuration is read once at startup from an optional TOML file.

mod schema;
mod store;

pub use schema::{AppConfig, GadgetConfig, KeyboardConfig, WriterConfig};
