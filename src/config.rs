//! Deployment configuration.
//!
//! Only deployment-tunable knobs live here. Domain thresholds (validity
//! durations, merge distances, the debounce) are fixed constants in their
//! owning modules: they are user-visible behaviour, not configuration.

/// Library configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
}

impl Config {
    pub fn from_env() -> Self {
        let database_path = std::env::var("TRAILKEEPER_DATABASE_PATH")
            .unwrap_or_else(|_| "./trailkeeper.db".to_string());
        Self { database_path }
    }
}
