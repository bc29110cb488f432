use crate::constants::{
    DEFAULT_BIND_ADDR, DEFAULT_ENCODING, DEFAULT_LOG_DIR, DEFAULT_LOG_PREFIX,
    DEFAULT_MAX_BODY_BYTES, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};
use crate::error::ConfigError;
use crate::pipeline::follow::FollowSpec;
use crate::pipeline::schema::FieldSchema;
use crate::pipeline::selector::FieldSpec;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level shape of `config.toml`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
    #[serde(default = "default_encoding")]
    pub default_encoding: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            max_body_bytes: default_max_body_bytes(),
            default_encoding: default_encoding(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub directory: String,
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            file_prefix: default_log_prefix(),
        }
    }
}

/// One named extraction profile: where records live in the page, how each
/// field is pulled out, and the schema the fields must satisfy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Default source used when a request does not name one
    pub source: Option<String>,
    /// Record boundary selector
    pub record: String,
    /// Case-insensitive regex the record element's text must match
    pub text_matches: Option<String>,
    pub follow: Option<FollowSpec>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub schema: Vec<FieldSchema>,
}

impl AppConfig {
    /// Load and deserialize a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        if config.fetch.timeout_secs == 0 {
            return Err(ConfigError::Setting(
                "fetch.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}

fn default_bind() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_max_body_bytes() -> u64 {
    DEFAULT_MAX_BODY_BYTES
}

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

fn default_log_dir() -> String {
    DEFAULT_LOG_DIR.to_string()
}

fn default_log_prefix() -> String {
    DEFAULT_LOG_PREFIX.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.bind, DEFAULT_BIND_ADDR);
        assert_eq!(config.fetch.timeout_secs, 10);
        assert_eq!(config.fetch.default_encoding, "utf-8");
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_profile_tables_deserialize() {
        let toml = r#"
            [fetch]
            timeout_secs = 3

            [[profiles]]
            name = "products"
            record = "tr.row"

            [[profiles.fields]]
            name = "price"
            selector = "td.price"

            [[profiles.schema]]
            name = "price"
            type = "number"
            required = true
            exclusive_min = 0
        "#;
        let config = AppConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.fetch.timeout_secs, 3);
        let profile = &config.profiles[0];
        assert_eq!(profile.name, "products");
        assert_eq!(profile.fields[0].selector, "td.price");
        assert_eq!(profile.schema[0].exclusive_min, Some(0.0));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result = AppConfig::from_toml_str("[fetch]\ntimeout = 5\n");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let result = AppConfig::from_toml_str("[fetch]\ntimeout_secs = 0\n");
        assert!(matches!(result, Err(ConfigError::Setting(_))));
    }
}
