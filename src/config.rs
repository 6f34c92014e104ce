//! Configuration manager for passcore.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::AppState;
use crate::error::PasswordError;
use crate::provider::ProviderKind;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
/// Overrides the configuration file path.
pub const CONFIG_PATH_ENV: &str = "PASSCORE_CONFIG";
/// Overrides the top-level `provider` key.
pub const PROVIDER_ENV: &str = "PASSCORE_PROVIDER";
/// Overrides `AppSettings.ldapPassword`.
pub const LDAP_PASSWORD_ENV: &str = "LDAP_PASSWORD";
/// Highest zxcvbn score.
const MAX_SCORE: u8 = 4;

/// Errors raised while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<ConfigError> for PasswordError {
    fn from(err: ConfigError) -> Self {
        PasswordError::Configuration(err.to_string())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Password change provider built at startup.
    #[serde(default)]
    pub provider: ProviderKind,
    /// Settings sent to the web client.
    #[serde(rename = "ClientSettings", default)]
    pub client_settings: ClientSettings,
    #[serde(rename = "WebSettings", default)]
    pub web_settings: WebSettings,
    /// Raw provider section, bound by [`Configuration::app_settings`].
    #[serde(rename = "AppSettings", default, skip_serializing)]
    app_settings: Value,
    #[serde(skip)]
    path: PathBuf,
}

/// Public settings of the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    pub application_title: String,
    pub change_password_title: String,
    pub show_password_meter: bool,
    pub use_email: bool,
    pub use_password_generation: bool,
    /// Length of generated passwords.
    pub password_entropy: usize,
    /// Minimum Levenshtein distance between current and new password.
    /// 0 disables the check.
    pub minimum_distance: usize,
    /// Minimum zxcvbn score of the new password. 0 disables the check.
    pub minimum_score: u8,
    pub validation_regex: ValidationRegex,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            application_title:
                "Change Account Password | Self-Service Password Change".into(),
            change_password_title: "Change Account Password".into(),
            show_password_meter: false,
            use_email: false,
            use_password_generation: false,
            password_entropy: 16,
            minimum_distance: 0,
            minimum_score: 0,
            validation_regex: ValidationRegex::default(),
        }
    }
}

/// Patterns applied to the username. Empty patterns are not checked.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationRegex {
    pub email_regex: String,
    pub username_regex: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSettings {
    /// Redirect plain HTTP requests, as seen by the reverse proxy, to
    /// HTTPS.
    pub enable_https_redirect: bool,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies the environment overrides.
    pub fn read(self) -> Result<Arc<Self>, ConfigError> {
        let file_path = if self.path.is_file() {
            self.path.as_path()
        } else {
            Path::new(DEFAULT_CONFIG_PATH)
        };

        let mut config = match std::fs::read_to_string(file_path) {
            Ok(content) => Self::parse(&content)?.path(file_path),
            Err(err) => self.error(err),
        };

        config.apply_env(
            std::env::var(PROVIDER_ENV).ok(),
            std::env::var(LDAP_PASSWORD_ENV).ok(),
        )?;

        Ok(Arc::new(config))
    }

    /// Parse and check a YAML document. An empty document yields the
    /// defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str::<Self>(content)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Bind the `AppSettings` section. A missing section binds as empty.
    pub fn app_settings<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let section = match &self.app_settings {
            Value::Null => Value::Mapping(Mapping::new()),
            section => section.clone(),
        };

        Ok(serde_yaml::from_value(section)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let client = &self.client_settings;

        if client.minimum_score > MAX_SCORE {
            return Err(ConfigError::Invalid {
                field: "minimumScore",
                reason: format!("must be between 0 and {MAX_SCORE}"),
            });
        }

        for (field, pattern) in [
            ("emailRegex", &client.validation_regex.email_regex),
            ("usernameRegex", &client.validation_regex.username_regex),
        ] {
            if let Err(err) = regex_lite::Regex::new(pattern) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: err.to_string(),
                });
            }
        }

        Ok(())
    }

    fn apply_env(
        &mut self,
        provider: Option<String>,
        ldap_password: Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(provider) = provider.filter(|p| !p.trim().is_empty()) {
            self.provider = provider.parse().map_err(|err: PasswordError| {
                ConfigError::Invalid {
                    field: PROVIDER_ENV,
                    reason: err.to_string(),
                }
            })?;
        }

        if let Some(password) = ldap_password {
            if self.app_settings.is_null() {
                self.app_settings = Value::Mapping(Mapping::new());
            }

            let Value::Mapping(section) = &mut self.app_settings else {
                return Err(ConfigError::Invalid {
                    field: "AppSettings",
                    reason: "expected a mapping".into(),
                });
            };
            section.insert(Value::from("ldapPassword"), Value::from(password));
        }

        Ok(())
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, path = %self.path.display(), "configuration file not found, using defaults");
        Self::default()
    }
}
