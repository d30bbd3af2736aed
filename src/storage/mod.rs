//! Storage for configuration, the session credential, and cycle results.

pub mod cache;
pub mod config;
pub mod history;
pub mod paths;
pub mod session_store;

pub use cache::{LastGoodCache, Staleness};
pub use config::{
    Config, ConfigSource, ConfigSources, ENV_CONFIG, ENV_HEADLESS, ENV_INTERVAL, ENV_TIMEOUT,
    ENV_WEBDRIVER_URL, ResolvedConfig,
};
pub use history::{CapPoint, HistoryStore, StoredCycle, run_migrations};
pub use paths::AppPaths;
pub use session_store::SessionStore;
