use serde::{Deserialize, Serialize};

use crate::upstream::Credentials;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub upstream: UpstreamConfig,
    pub provision: ProvisionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    /// Process-local store; data is lost on restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub connection_string: Option<String>,
    pub max_connections: Option<u32>,
}

/// Connection settings for the external time-tracking service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub host: Option<String>,
    /// API user for the `X-AUTH-USER`/`X-AUTH-TOKEN` pair
    pub user: Option<String>,
    pub token: Option<String>,
    /// Basic auth pair, used when no API token is configured
    pub username: Option<String>,
    pub password: Option<String>,
    pub page_size: u32,
    pub max_scan_pages: u32,
    pub max_refresh_pages: u32,
    pub timeout_secs: Option<u64>,
}

/// Display names for entities provisioned by an ad hoc sync run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionConfig {
    pub customer_name: Option<String>,
    pub project_name: Option<String>,
    pub activity_name: Option<String>,
    pub tag_name: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            upstream: UpstreamConfig::default(),
            provision: ProvisionConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Postgres,
            connection_string: None,
            max_connections: Some(20),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            token: None,
            username: None,
            password: None,
            page_size: 50,
            max_scan_pages: 20,
            max_refresh_pages: 1000,
            timeout_secs: Some(30),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("config").required(false));

        // TIMEBOARD_UPSTREAM__HOST, TIMEBOARD_SERVER__PORT, ...
        config = config.add_source(
            config::Environment::with_prefix("TIMEBOARD")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// Get the database URL from config or environment
    pub fn database_url(&self) -> anyhow::Result<String> {
        if let Some(connection_string) = &self.database.connection_string {
            return Ok(connection_string.clone());
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            return Ok(url);
        }

        Err(ConfigError::Missing("database.connection_string").into())
    }

    /// Get the server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl UpstreamConfig {
    pub fn host(&self) -> Result<String, ConfigError> {
        let host = non_empty(&self.host).ok_or(ConfigError::Missing("upstream.host"))?;
        if !(host.starts_with("http://") || host.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "upstream.host",
                reason: format!("expected an http(s) URL, got `{}`", host),
            });
        }
        Ok(host.to_string())
    }

    /// API token pair wins over basic credentials; a half-configured pair is an error
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        match (non_empty(&self.user), non_empty(&self.token)) {
            (Some(user), Some(token)) => {
                return Ok(Credentials::ApiToken {
                    user: user.to_string(),
                    token: token.to_string(),
                })
            }
            (Some(_), None) => return Err(ConfigError::Missing("upstream.token")),
            (None, Some(_)) => return Err(ConfigError::Missing("upstream.user")),
            (None, None) => {}
        }

        match (non_empty(&self.username), non_empty(&self.password)) {
            (Some(username), Some(password)) => Ok(Credentials::Basic {
                username: username.to_string(),
                password: password.to_string(),
            }),
            (Some(_), None) => Err(ConfigError::Missing("upstream.password")),
            _ => Err(ConfigError::Missing("upstream.user")),
        }
    }

    /// Fail fast before any upstream call is made
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.host()?;
        self.credentials()?;
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "upstream.page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl ProvisionConfig {
    pub fn require(value: &Option<String>, key: &'static str) -> Result<String, ConfigError> {
        non_empty(value)
            .map(str::to_string)
            .ok_or(ConfigError::Missing(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream() -> UpstreamConfig {
        UpstreamConfig {
            host: Some("https://tracker.example.com".to_string()),
            ..UpstreamConfig::default()
        }
    }

    #[test]
    fn token_pair_is_preferred_over_basic_auth() {
        let config = UpstreamConfig {
            user: Some("api".into()),
            token: Some("t0ken".into()),
            username: Some("basic".into()),
            password: Some("pw".into()),
            ..upstream()
        };

        assert_eq!(
            config.credentials(),
            Ok(Credentials::ApiToken {
                user: "api".into(),
                token: "t0ken".into()
            })
        );
    }

    #[test]
    fn basic_auth_is_used_without_token() {
        let config = UpstreamConfig {
            username: Some("basic".into()),
            password: Some("pw".into()),
            ..upstream()
        };

        assert!(matches!(config.credentials(), Ok(Credentials::Basic { .. })));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn half_configured_pairs_are_rejected() {
        let config = UpstreamConfig {
            user: Some("api".into()),
            ..upstream()
        };
        assert_eq!(config.credentials(), Err(ConfigError::Missing("upstream.token")));

        let config = UpstreamConfig {
            username: Some("basic".into()),
            password: Some("  ".into()),
            ..upstream()
        };
        assert_eq!(config.credentials(), Err(ConfigError::Missing("upstream.password")));
    }

    #[test]
    fn host_must_be_present_and_http() {
        let missing = UpstreamConfig::default();
        assert_eq!(missing.host(), Err(ConfigError::Missing("upstream.host")));

        let bad = UpstreamConfig {
            host: Some("tracker.example.com".into()),
            ..UpstreamConfig::default()
        };
        assert!(matches!(bad.host(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn provision_names_are_required() {
        assert_eq!(
            ProvisionConfig::require(&None, "provision.customer_name"),
            Err(ConfigError::Missing("provision.customer_name"))
        );
        assert_eq!(
            ProvisionConfig::require(&Some(" Acme ".into()), "provision.customer_name"),
            Ok("Acme".to_string())
        );
    }
}
