//! Runtime settings: built-in defaults, then an optional `tipline.{toml,yaml,json}`
//! in the working directory, then `TIPLINE__*` environment variables
//! (e.g. `TIPLINE__SERVER__BIND_ADDRESS`, `TIPLINE__ENGINE__LEADS__MAX_ATTEMPTS`).

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tl_core::EngineConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
    pub database_url: String,
    /// Salt for tipster identity hashing. Changing it re-keys every tipster.
    pub identity_salt: String,
    /// Base URL of the case-management service. Unset runs with the
    /// in-process case directory.
    pub casebook_url: Option<String>,
    pub casebook_timeout_ms: u64,
    /// Comma-separated in the environment. Empty allows any origin.
    pub cors_origins: Vec<String>,
    pub workers: Option<usize>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            database_url: "sqlite:tipline.db".into(),
            identity_salt: String::new(),
            casebook_url: None,
            casebook_timeout_ms: 2_000,
            cors_origins: Vec::new(),
            workers: None,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name("tipline").required(false))
                .add_source(
                    Environment::with_prefix("TIPLINE")
                        .prefix_separator("__")
                        .separator("__")
                        .list_separator(",")
                        .with_list_parse_key("server.cors_origins")
                        .try_parsing(true),
                ),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sources_yield_defaults() {
        let settings = Settings::from_builder(Config::builder()).unwrap();
        assert_eq!(settings.server.bind_address, "127.0.0.1:8080");
        assert!(settings.server.casebook_url.is_none());
        assert_eq!(settings.engine.leads.max_attempts, 4);
        settings.engine.validate().unwrap();
    }

    #[test]
    fn overrides_reach_nested_engine_config() {
        let builder = Config::builder()
            .set_override("server.bind_address", "0.0.0.0:9000")
            .unwrap()
            .set_override("engine.leads.max_attempts", 7)
            .unwrap()
            .set_override("engine.monitor.sweep_interval_secs", 5)
            .unwrap();
        let settings = Settings::from_builder(builder).unwrap();
        assert_eq!(settings.server.bind_address, "0.0.0.0:9000");
        assert_eq!(settings.engine.leads.max_attempts, 7);
        assert_eq!(settings.engine.monitor.sweep_interval_secs, 5);
        assert_eq!(settings.engine.leads.base_backoff_ms, 500);
    }
}
