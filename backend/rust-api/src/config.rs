use serde::Deserialize;
use std::env;

const DEFAULT_LOCK_TTL_MS: u64 = 30_000;

/// Destination of analytics events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSink {
    /// The `events` collection.
    Mongo,
    /// Structured log lines only.
    Log,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: Option<String>,
    pub jwt_secret: String,
    pub grade_passback_url: Option<String>,
    pub lock_ttl_ms: u64,
    pub event_sink: EventSink,
    pub bind_addr: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml, then APP__* overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let setting = |key: &str, var: &str| -> Option<String> {
            settings
                .get_string(key)
                .ok()
                .or_else(|| env::var(var).ok())
                .filter(|value| !value.trim().is_empty())
        };

        let mongo_uri = setting("database.mongo_uri", "MONGO_URI")
            .unwrap_or_else(|| "mongodb://localhost:27017".to_string());

        let mongo_database = setting("database.mongo_database", "MONGO_DATABASE")
            .unwrap_or_else(|| "assessments".to_string());

        let redis_uri = setting("redis.uri", "REDIS_URI");

        let jwt_secret = match setting("auth.jwt_secret", "JWT_SECRET") {
            Some(secret) => secret,
            None if env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            None => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let grade_passback_url = setting("grade_passback.url", "GRADE_PASSBACK_URL");

        let lock_ttl_ms = match setting("locks.ttl_ms", "ATTEMPT_LOCK_TTL_MS") {
            Some(raw) => parse_lock_ttl(&raw)?,
            None => DEFAULT_LOCK_TTL_MS,
        };

        let event_sink = match setting("events.sink", "EVENT_SINK") {
            Some(raw) => parse_event_sink(&raw)?,
            None => EventSink::Mongo,
        };

        let bind_addr = setting("server.bind_addr", "BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8081".to_string());

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            jwt_secret,
            grade_passback_url,
            lock_ttl_ms,
            event_sink,
            bind_addr,
        })
    }

    /// Configuration for an in-process engine with no external services.
    pub fn local(jwt_secret: impl Into<String>) -> Self {
        Config {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "assessments".to_string(),
            redis_uri: None,
            jwt_secret: jwt_secret.into(),
            grade_passback_url: None,
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
            event_sink: EventSink::Log,
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }
}

fn parse_lock_ttl(raw: &str) -> Result<u64, config::ConfigError> {
    raw.parse::<u64>().map_err(|e| {
        let message = format!("invalid ATTEMPT_LOCK_TTL_MS '{}': {}", raw, e);
        config::ConfigError::Message(message)
    })
}

fn parse_event_sink(raw: &str) -> Result<EventSink, config::ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "mongo" => Ok(EventSink::Mongo),
        "log" => Ok(EventSink::Log),
        other => {
            let message = format!("invalid EVENT_SINK '{}', expected mongo or log", other);
            Err(config::ConfigError::Message(message))
        }
    }
}
