//! Config loading: TOML file, then environment overrides.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::ConvoyConfig;
use crate::validate;

/// Load configuration from `path`, apply `CONVOY_*` environment
/// overrides, and validate.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, or when the
/// resulting configuration fails validation.
pub fn load(path: impl AsRef<Path>) -> ConfigResult<ConvoyConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut config: ConvoyConfig = toml::from_str(&text)?;
    apply_env_overrides(&mut config);
    validate::validate(&config)?;
    info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Load from `path` if it exists, otherwise start from defaults. Env
/// overrides and validation apply either way.
///
/// # Errors
///
/// Returns an error when an existing file cannot be parsed or the
/// result fails validation.
pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<ConvoyConfig> {
    let path = path.as_ref();
    if path.exists() {
        load(path)
    } else {
        debug!(path = %path.display(), "No config file, using defaults");
        let mut config = ConvoyConfig::default();
        apply_env_overrides(&mut config);
        validate::validate(&config)?;
        Ok(config)
    }
}

/// Overrides for the values that commonly differ between environments.
/// Secrets in particular should come from the environment, not the file.
fn apply_env_overrides(config: &mut ConvoyConfig) {
    if let Ok(bind) = std::env::var("CONVOY_BIND") {
        config.server.bind = bind;
    }
    if let Ok(secret) = std::env::var("CONVOY_AUTH_SECRET") {
        config.auth.secret = secret;
    }
    if let Ok(url) = std::env::var("CONVOY_AI_BASE_URL") {
        config.ai.base_url = url;
    }
    if let Ok(key) = std::env::var("CONVOY_AI_API_KEY") {
        config.ai.api_key = key;
    }
    if let Ok(level) = std::env::var("CONVOY_LOG_LEVEL") {
        config.log.level = level;
    }
}
