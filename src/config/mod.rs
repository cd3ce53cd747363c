//! # Configuration Management
//!
//! Configuration is layered, later sources winning:
//!
//! 1. built-in defaults ([`AppConfig::default`])
//! 2. an optional TOML file
//! 3. `SNIPLANE_*` environment variables, nested with `__`
//!    (for example `SNIPLANE_REGISTRY__RECORDS_DIR=/srv/certs`)
//! 4. command-line overrides applied by the binary

pub mod settings;

pub use settings::{
    AppConfig, IngestConfig, IssuanceConfig, ObservabilityConfig, ProxyConfig, ReconcilerConfig,
    RegistryConfig, SignerKind,
};

use crate::Result;
use std::path::Path;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "SNIPLANE";

impl AppConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// The result is not validated; call [`AppConfig::validate`] once every
    /// override has been applied.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&AppConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml).required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize::<AppConfig>()?)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::config(e.to_string()))
    }
}
