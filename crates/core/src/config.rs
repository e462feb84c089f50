use std::{fmt, str::FromStr, time::Duration};

use serde::Deserialize;

use crate::error::ConfigError;

/// Variables a deployment must set explicitly, even though every one of them
/// has a development default.
pub const REQUIRED_VARS: &[&str] = &["DATABASE_URL", "PORT", "APP_ENV", "FRONTEND_URL"];

/// Global application settings loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Database connection and pool settings.
    pub db: DbSettings,

    /// Port for the API server.
    pub api_port: u16,

    /// Origin allowed by CORS.
    pub frontend_url: String,

    /// Deployment environment name (`development`, `production`, ...).
    pub environment: String,

    /// Run the schema bootstrap when the API starts.
    pub auto_init_schema: bool,
}

/// Connection target and pool bounds. Immutable once the pool is built.
#[derive(Clone, Deserialize)]
pub struct DbSettings {
    /// Full connection URL. Overrides the individual connection fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,

    pub min_connections: u32,
    pub max_connections: u32,

    /// Idle connections older than this are closed.
    pub idle_timeout: Duration,

    /// Upper bound on waiting for a pooled connection.
    pub acquire_timeout: Duration,

    /// Upper bound on draining checked-out connections during shutdown.
    pub close_timeout: Duration,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: String::new(),
            database: "vibe_dash".into(),
            min_connections: 2,
            max_connections: 20,
            idle_timeout: Duration::from_millis(30_000),
            acquire_timeout: Duration::from_millis(2_000),
            close_timeout: Duration::from_millis(5_000),
        }
    }
}

impl fmt::Debug for DbSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSettings")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("min_connections", &self.min_connections)
            .field("max_connections", &self.max_connections)
            .field("idle_timeout", &self.idle_timeout)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("close_timeout", &self.close_timeout)
            .finish()
    }
}

impl DbSettings {
    /// Check the pool bounds: both > 0 and `min <= max`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_connections == 0
            || self.max_connections == 0
            || self.min_connections > self.max_connections
        {
            return Err(ConfigError::PoolBounds {
                min: self.min_connections,
                max: self.max_connections,
            });
        }
        Ok(())
    }

    /// `host:port/database`, safe to log.
    pub fn target(&self) -> String {
        match &self.url {
            Some(_) => "<DATABASE_URL>".to_string(),
            None => format!("{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

impl Settings {
    /// Load settings from environment variables (with optional `.env` file).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Unset and empty values
    /// fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = DbSettings::default();

        let db = DbSettings {
            url: get("DATABASE_URL"),
            host: get("DB_HOST").unwrap_or(defaults.host),
            port: parse_or(&get, "DB_PORT", defaults.port)?,
            user: get("DB_USER").unwrap_or(defaults.user),
            // An empty password is a legitimate value.
            password: lookup("DB_PASSWORD").unwrap_or(defaults.password),
            database: get("DB_NAME").unwrap_or(defaults.database),
            min_connections: parse_or(&get, "DB_POOL_MIN", defaults.min_connections)?,
            max_connections: parse_or(&get, "DB_POOL_MAX", defaults.max_connections)?,
            idle_timeout: millis_or(&get, "DB_IDLE_TIMEOUT_MS", defaults.idle_timeout)?,
            acquire_timeout: millis_or(&get, "DB_ACQUIRE_TIMEOUT_MS", defaults.acquire_timeout)?,
            close_timeout: millis_or(&get, "DB_CLOSE_TIMEOUT_MS", defaults.close_timeout)?,
        };
        db.validate()?;

        Ok(Self {
            db,
            api_port: parse_or(&get, "PORT", 3001)?,
            frontend_url: get("FRONTEND_URL").unwrap_or_else(|| "http://localhost:3000".into()),
            environment: get("APP_ENV").unwrap_or_else(|| "development".into()),
            auto_init_schema: bool_or(&get, "DB_AUTO_INIT", true)?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Report every deployment-required variable that is unset or empty.
    pub fn check_required<F>(lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let missing: Vec<String> = REQUIRED_VARS
            .iter()
            .filter(|key| lookup(**key).is_none_or(|v| v.trim().is_empty()))
            .map(|key| key.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingRequired(missing))
        }
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

fn millis_or<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let ms: u64 = parse_or(get, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}

fn bool_or<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected a boolean".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.db.port, 5432);
        assert_eq!(settings.db.password, "");
        assert_eq!(settings.db.min_connections, 2);
        assert_eq!(settings.db.max_connections, 20);
        assert_eq!(settings.db.idle_timeout, Duration::from_millis(30_000));
        assert_eq!(settings.db.acquire_timeout, Duration::from_millis(2_000));
        assert!(settings.db.url.is_none());
        assert_eq!(settings.api_port, 3001);
        assert!(settings.auto_init_schema);
        assert!(!settings.is_production());
    }

    #[test]
    fn overrides_are_parsed() {
        let settings = Settings::from_lookup(lookup(&[
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "6543"),
            ("DB_POOL_MIN", "1"),
            ("DB_POOL_MAX", "2"),
            ("DB_ACQUIRE_TIMEOUT_MS", "250"),
            ("DB_AUTO_INIT", "off"),
            ("APP_ENV", "Production"),
        ]))
        .unwrap();
        assert_eq!(settings.db.host, "db.internal");
        assert_eq!(settings.db.port, 6543);
        assert_eq!(settings.db.max_connections, 2);
        assert_eq!(settings.db.acquire_timeout, Duration::from_millis(250));
        assert!(!settings.auto_init_schema);
        assert!(settings.is_production());
    }

    #[test]
    fn bad_number_names_the_key() {
        let err = Settings::from_lookup(lookup(&[("DB_PORT", "five")])).unwrap_err();
        match err {
            ConfigError::Invalid { key, value, .. } => {
                assert_eq!(key, "DB_PORT");
                assert_eq!(value, "five");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn pool_bounds_are_enforced() {
        let err = Settings::from_lookup(lookup(&[("DB_POOL_MIN", "5"), ("DB_POOL_MAX", "2")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::PoolBounds { min: 5, max: 2 });

        let err = Settings::from_lookup(lookup(&[("DB_POOL_MIN", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::PoolBounds { min: 0, .. }));
    }

    #[test]
    fn debug_output_hides_credentials() {
        let settings = Settings::from_lookup(lookup(&[
            ("DB_PASSWORD", "hunter2"),
            ("DATABASE_URL", "postgres://u:hunter2@h/db"),
        ]))
        .unwrap();
        let printed = format!("{:?}", settings.db);
        assert!(!printed.contains("hunter2"));
        assert_eq!(settings.db.target(), "<DATABASE_URL>");
    }

    #[test]
    fn check_required_lists_every_missing_key() {
        let err = Settings::check_required(lookup(&[("PORT", "3001"), ("APP_ENV", " ")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired(vec![
                "DATABASE_URL".into(),
                "APP_ENV".into(),
                "FRONTEND_URL".into(),
            ])
        );

        let all = lookup(&[
            ("DATABASE_URL", "postgres://localhost/vibe_dash"),
            ("PORT", "3001"),
            ("APP_ENV", "production"),
            ("FRONTEND_URL", "https://dash.example.com"),
        ]);
        assert!(Settings::check_required(all).is_ok());
    }
}
