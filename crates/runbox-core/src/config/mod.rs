//! runbox configuration layer.
//!
//! All environment reads live here; the rest of the workspace consumes
//! structured config instead of calling `std::env::var` directly.
//!
//! - `loader`: env_or, env_optional, env_bool helpers and `.env` loading
//! - `schema`: RuntimeConfig, ObservabilityConfig, ServerConfig
//! - `env_keys`: key constants and their aliases

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, env_parse, load_dotenv, load_dotenv_from_dir};
pub use schema::{ObservabilityConfig, RuntimeConfig, ServerConfig};
