use std::env;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Startup configuration, read once and handed to the components that need it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub static_root: String,
    pub media_root: String,
    pub seed_lookups: bool,
    pub admin: AdminBootstrap,
}

/// Credentials for the superuser created on an empty database.
#[derive(Debug, Clone)]
pub struct AdminBootstrap {
    pub username: String,
    pub password: String,
    pub email: String,
}

impl AdminBootstrap {
    pub fn uses_default_password(&self) -> bool {
        self.password == DEFAULT_ADMIN_PASSWORD
    }
}

const DEFAULT_ADMIN_PASSWORD: &str = "admin";

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let port = parse_port(&var("PORT", "8080"))?;
        let seed_lookups = parse_bool("SEED_LOOKUPS", &var("SEED_LOOKUPS", "true"))?;

        Ok(Self {
            host: var("HOST", "0.0.0.0"),
            port,
            database_url: var("DATABASE_URL", "sqlite://./data/agenda.db"),
            static_root: var("STATIC_ROOT", "./static"),
            media_root: var("MEDIA_ROOT", "./media"),
            seed_lookups,
            admin: AdminBootstrap {
                username: var("ADMIN_USER", "admin"),
                password: var("ADMIN_PASSWORD", DEFAULT_ADMIN_PASSWORD),
                email: var("ADMIN_EMAIL", "admin@example.com"),
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name: "PORT",
        value: value.to_string(),
    })
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}
