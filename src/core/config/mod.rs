use anyhow::{anyhow, Context};

use crate::security::sql_guard::validate_tenant;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub whatsapp: Option<WhatsAppConfig>,
    pub crm: Option<CrmDirectoryConfig>,
    pub default_tenant: String,
    pub mock_fallback: bool,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Messaging provider credentials. Present only when every variable is set.
#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub api_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub phone_number_id: String,
}

#[derive(Clone, Debug)]
pub struct CrmDirectoryConfig {
    pub base_url: String,
    pub api_key: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests need not touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("SERVER_PORT") {
            Some(p) => p
                .parse::<u16>()
                .with_context(|| format!("Invalid SERVER_PORT: {p}"))?,
            None => 8080,
        };
        let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(v) => v
                .parse::<u32>()
                .with_context(|| format!("Invalid DATABASE_MAX_CONNECTIONS: {v}"))?,
            None => 10,
        };
        let timeout_secs = match get("DATABASE_TIMEOUT_SECS") {
            Some(v) => v
                .parse::<u64>()
                .with_context(|| format!("Invalid DATABASE_TIMEOUT_SECS: {v}"))?,
            None => 5,
        };
        let mock_fallback = match get("MOCK_FALLBACK") {
            Some(v) => parse_bool(&v).ok_or_else(|| anyhow!("Invalid MOCK_FALLBACK: {v}"))?,
            None => true,
        };

        let whatsapp = match (
            get("WHATSAPP_API_URL"),
            get("WHATSAPP_TOKEN_URL"),
            get("WHATSAPP_CLIENT_ID"),
            get("WHATSAPP_CLIENT_SECRET"),
            get("WHATSAPP_PHONE_NUMBER_ID"),
        ) {
            (Some(api_url), Some(token_url), Some(client_id), Some(client_secret), Some(phone)) => {
                Some(WhatsAppConfig {
                    api_url: api_url.trim_end_matches('/').to_string(),
                    token_url,
                    client_id,
                    client_secret,
                    phone_number_id: phone,
                })
            }
            _ => None,
        };

        let crm = match (get("CRM_API_URL"), get("CRM_API_KEY")) {
            (Some(base_url), Some(api_key)) => Some(CrmDirectoryConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key,
            }),
            _ => None,
        };

        let default_tenant = match get("DEFAULT_TENANT") {
            Some(t) => {
                validate_tenant(&t).with_context(|| format!("Invalid DEFAULT_TENANT: {t}"))?
            }
            None => "public".to_string(),
        };

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(AppConfig {
            server: ServerConfig {
                host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port,
            },
            database: DatabaseConfig {
                url: get("DATABASE_URL").unwrap_or_default(),
                max_connections,
                timeout_secs,
            },
            whatsapp,
            crm,
            default_tenant,
            mock_fallback,
            cors_allowed_origins,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, anyhow::Error> {
        if self.database.url.is_empty() {
            return Err(anyhow!("DATABASE_URL is not set"));
        }
        Ok(&self.database.url)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
