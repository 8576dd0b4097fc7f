//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Smallest RSA modulus accepted for actor signing keys
pub const MIN_KEY_BITS: usize = 4096;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    pub cdn: CdnConfig,
    pub register: RegisterConfig,
    pub defaults: DefaultsConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 3003)
    pub port: u16,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Federation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Serve federation endpoints at all
    pub enabled: bool,
    /// Public host that federation URLs are built on (e.g., "chat.example.com")
    pub host: String,
    /// Domain local accounts live on (e.g., "example.com")
    pub account_domain: String,
    /// RSA modulus size for generated actor keys
    pub key_bits: usize,
}

/// CDN configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CdnConfig {
    /// Public CDN endpoint (e.g., "https://cdn.example.com")
    pub endpoint_public: String,
}

/// Registration settings
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterConfig {
    /// Registration closed
    pub disabled: bool,
    /// Rights bitmask given to new users (including remote shadows)
    pub default_rights: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    pub user: UserDefaults,
}

/// Account defaults applied to newly created users
#[derive(Debug, Clone, Deserialize)]
pub struct UserDefaults {
    pub premium: bool,
    pub premium_type: i32,
    pub verified: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
    /// Status codes whose requests get logged, e.g. "404,500".
    /// A leading `-` logs every status except the listed ones.
    pub log_requests: Option<String>,
}

/// Configuration values the federation transforms are allowed to see.
///
/// Passed explicitly into every transform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederationContext {
    pub host: String,
    pub account_domain: String,
    pub cdn_public_endpoint: String,
}

impl FederationContext {
    /// Base URL of every federation endpoint, e.g. "https://chat.example.com/federation"
    pub fn federation_url(&self) -> String {
        format!("https://{}/federation", self.host)
    }

    /// Canonical URL of a local actor
    pub fn actor_url(&self, actor_type: crate::data::ActorType, actor_id: &str) -> String {
        format!("{}/{}/{}", self.federation_url(), actor_type, actor_id)
    }

    pub fn cdn_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.cdn_public_endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (CHATFED__*)
    /// 5. `LOG_REQUESTS` overrides `logging.log_requests`
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3003)?
            .set_default("database.path", "data/chatfed.db")?
            .set_default("federation.enabled", false)?
            .set_default("federation.host", "localhost")?
            .set_default("federation.account_domain", "localhost")?
            .set_default("federation.key_bits", MIN_KEY_BITS as i64)?
            .set_default("cdn.endpoint_public", "http://localhost:3003")?
            .set_default("register.disabled", false)?
            .set_default("register.default_rights", "875069521787904")?
            .set_default("defaults.user.premium", true)?
            .set_default("defaults.user.premium_type", 2)?
            .set_default("defaults.user.verified", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (CHATFED__*)
            .add_source(
                Environment::with_prefix("CHATFED")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("logging.log_requests", std::env::var("LOG_REQUESTS").ok())?
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Build the value object handed to federation transforms
    pub fn federation_context(&self) -> FederationContext {
        FederationContext {
            host: self.federation.host.clone(),
            account_domain: self.federation.account_domain.clone(),
            cdn_public_endpoint: self.cdn.endpoint_public.clone(),
        }
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.federation.key_bits < MIN_KEY_BITS {
            return Err(crate::error::AppError::Config(format!(
                "federation.key_bits must be at least {}",
                MIN_KEY_BITS
            )));
        }

        if self.federation.host.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "federation.host must not be empty".to_string(),
            ));
        }

        if self.federation.account_domain.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "federation.account_domain must not be empty".to_string(),
            ));
        }

        if url::Url::parse(&self.cdn.endpoint_public).is_err() {
            return Err(crate::error::AppError::Config(format!(
                "cdn.endpoint_public is not a valid URL: {}",
                self.cdn.endpoint_public
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3003,
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/chatfed-test.db"),
            },
            federation: FederationConfig {
                enabled: true,
                host: "chat.example.com".to_string(),
                account_domain: "example.com".to_string(),
                key_bits: MIN_KEY_BITS,
            },
            cdn: CdnConfig {
                endpoint_public: "https://cdn.example.com/".to_string(),
            },
            register: RegisterConfig {
                disabled: false,
                default_rights: "0".to_string(),
            },
            defaults: DefaultsConfig {
                user: UserDefaults {
                    premium: false,
                    premium_type: 0,
                    verified: true,
                },
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                log_requests: None,
            },
        }
    }

    #[test]
    fn validate_accepts_default_key_size() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_small_keys() {
        let mut config = valid_config();
        config.federation.key_bits = 2048;

        let error = config
            .validate()
            .expect_err("2048-bit keys must be rejected");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("federation.key_bits")
        ));
    }

    #[test]
    fn validate_rejects_empty_host() {
        let mut config = valid_config();
        config.federation.host = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn federation_context_builds_urls() {
        let ctx = valid_config().federation_context();

        assert_eq!(
            ctx.actor_url(crate::data::ActorType::Guilds, "7"),
            "https://chat.example.com/federation/guilds/7"
        );
        assert_eq!(
            ctx.cdn_url("/avatars/1/abc"),
            "https://cdn.example.com/avatars/1/abc"
        );
    }
}
