use crate::error::{ConfigError, Result as AppResult};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Required; gates the catalog refresh endpoint.
    pub admin_api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoomsConfig {
    /// Global cap on simultaneously open rooms.
    pub max_rooms: usize,
    /// Per-room member cap.
    pub max_players: usize,
    /// Length of the last-impostor guess window.
    pub guess_seconds: u64,
    /// Rooms with no client activity for this long are expired.
    pub inactivity_seconds: u64,
    /// Bound on room-code generation retries before giving up.
    pub code_attempts: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentSourceType {
    Embedded,
    File,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    pub source_type: ContentSourceType,
    pub file_path: Option<String>,
    pub http_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Allowed events per kind per window on one connection.
    pub events_per_window: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct AppSettings {
    pub server: ServerConfig,
    pub rooms: RoomsConfig,
    pub content: ContentConfig,
    pub limits: LimitsConfig,
}

pub fn load_settings() -> AppResult<AppSettings> {
    let builder = Config::builder()
        .add_source(
            Environment::with_prefix("ORDSPION")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        )
        .add_source(File::with_name("config").required(false))
        .set_default("server.port", 8080_i64)
        .and_then(|b| b.set_default("server.cors_origins", Vec::<String>::new()))
        .and_then(|b| b.set_default("rooms.max_rooms", 200_i64))
        .and_then(|b| b.set_default("rooms.max_players", 10_i64))
        .and_then(|b| b.set_default("rooms.guess_seconds", 30_i64))
        .and_then(|b| b.set_default("rooms.inactivity_seconds", 1800_i64))
        .and_then(|b| b.set_default("rooms.code_attempts", 100_i64))
        .and_then(|b| b.set_default("content.source_type", "embedded"))
        .and_then(|b| b.set_default("limits.events_per_window", 30_i64))
        .and_then(|b| b.set_default("limits.window_seconds", 10_i64))
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let settings = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let settings: AppSettings = settings
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &AppSettings) -> Result<(), ConfigError> {
    if settings.server.admin_api_key.trim().is_empty() {
        return Err(ConfigError::Missing(
            "server.admin_api_key (set ORDSPION__SERVER__ADMIN_API_KEY)".to_string(),
        ));
    }
    if settings.rooms.max_players < 3 {
        return Err(ConfigError::InvalidValue(
            "rooms.max_players must be at least 3".to_string(),
        ));
    }
    if settings.rooms.max_rooms == 0 {
        return Err(ConfigError::InvalidValue(
            "rooms.max_rooms must be positive".to_string(),
        ));
    }
    if settings.rooms.code_attempts == 0 {
        return Err(ConfigError::InvalidValue(
            "rooms.code_attempts must be positive".to_string(),
        ));
    }
    Ok(())
}
