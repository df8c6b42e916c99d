use chrono::Duration;

use crate::auth::parse_expiration;
use crate::error::ConfigError;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    pub email_client: EmailClientSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Public base URL used in links sent by email.
    pub api_host_url: String,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    /// Server-level connection, used to create throwaway test databases.
    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// JWT settings. Each token kind has its own secret and lifetime.
///
/// Lifetimes are duration strings: `"15m"` for minutes, `"7d"` for days.
#[derive(serde::Deserialize, Clone, Debug)]
pub struct JwtSettings {
    pub issuer: String,
    pub access_token_secret: String,
    pub access_token_expiration: String,
    pub refresh_token_secret: String,
    pub refresh_token_expiration: String,
    pub reset_password_token_secret: String,
    pub reset_password_token_expiration: String,
}

impl JwtSettings {
    /// Checks every secret is present and every lifetime parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secrets = [
            ("jwt.access_token_secret", &self.access_token_secret),
            ("jwt.refresh_token_secret", &self.refresh_token_secret),
            ("jwt.reset_password_token_secret", &self.reset_password_token_secret),
        ];
        for (key, value) in secrets {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired(key.to_string()));
            }
        }

        self.access_token_lifetime()?;
        self.refresh_token_lifetime()?;
        self.reset_password_token_lifetime()?;
        Ok(())
    }

    pub fn access_token_lifetime(&self) -> Result<Duration, ConfigError> {
        parse_expiration(&self.access_token_expiration)
    }

    pub fn refresh_token_lifetime(&self) -> Result<Duration, ConfigError> {
        parse_expiration(&self.refresh_token_expiration)
    }

    pub fn reset_password_token_lifetime(&self) -> Result<Duration, ConfigError> {
        parse_expiration(&self.reset_password_token_expiration)
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jwt.validate()
    }
}

/// Loads `configuration.yaml` (optional) overlaid with `APP__*` environment
/// variables, e.g. `APP__JWT__ACCESS_TOKEN_SECRET`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}
