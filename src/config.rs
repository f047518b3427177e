use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::crypto::PBKDF2_ITERATIONS;

/// Application-level constants
pub const APP_NAME: &str = "Medschedule";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_CLIENT_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_TOKEN_TTL_HOURS: u64 = 24;
/// One year.
pub const MAX_TOKEN_TTL_HOURS: u64 = 24 * 365;
pub const DB_FILE_NAME: &str = "medschedule.db";

/// 100 requests per 15 minutes per client.
pub const DEFAULT_RATE_LIMIT_MAX: u32 = 100;
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Get the application data directory
/// ~/Medschedule/ on all platforms
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_NAME))
}

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "medschedule_lib=info,medschedule=info,tower_http=warn"
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Cannot determine home directory; set MEDSCHEDULE_DB_PATH")]
    NoHomeDirectory,

    #[error("MEDSCHEDULE_ADMIN_EMAIL and MEDSCHEDULE_ADMIN_PASSWORD must be set together")]
    IncompleteAdmin,
}

/// Administrator account created at startup when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Runtime settings, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Only origin allowed by CORS.
    pub client_origin: String,
    pub token_ttl: Duration,
    pub password_iterations: u32,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub admin: Option<AdminBootstrap>,
}

fn parse_number<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key: key.to_string(),
        reason: e.to_string(),
        value,
    })
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = get("MEDSCHEDULE_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port_var = get("MEDSCHEDULE_PORT")
            .map(|v| ("MEDSCHEDULE_PORT", v))
            .or_else(|| get("PORT").map(|v| ("PORT", v)));
        let port = match port_var {
            Some((key, value)) => parse_number::<u16>(key, value)?,
            None => DEFAULT_PORT,
        };

        let db_path = match get("MEDSCHEDULE_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => app_data_dir()
                .ok_or(ConfigError::NoHomeDirectory)?
                .join(DB_FILE_NAME),
        };

        let client_origin = get("MEDSCHEDULE_CLIENT_ORIGIN")
            .unwrap_or_else(|| DEFAULT_CLIENT_ORIGIN.to_string());

        let ttl_hours = match get("MEDSCHEDULE_TOKEN_TTL_HOURS") {
            Some(v) => parse_number::<u64>("MEDSCHEDULE_TOKEN_TTL_HOURS", v)?,
            None => DEFAULT_TOKEN_TTL_HOURS,
        };
        if ttl_hours == 0 || ttl_hours > MAX_TOKEN_TTL_HOURS {
            return Err(ConfigError::Invalid {
                key: "MEDSCHEDULE_TOKEN_TTL_HOURS".into(),
                value: ttl_hours.to_string(),
                reason: format!("must be between 1 and {MAX_TOKEN_TTL_HOURS}"),
            });
        }

        let password_iterations = match get("MEDSCHEDULE_PASSWORD_ITERATIONS") {
            Some(v) => parse_number::<u32>("MEDSCHEDULE_PASSWORD_ITERATIONS", v)?,
            None => PBKDF2_ITERATIONS,
        };
        if password_iterations == 0 {
            return Err(ConfigError::Invalid {
                key: "MEDSCHEDULE_PASSWORD_ITERATIONS".into(),
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        let admin = match (get("MEDSCHEDULE_ADMIN_EMAIL"), get("MEDSCHEDULE_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminBootstrap {
                email: email.trim().to_string(),
                password,
                name: get("MEDSCHEDULE_ADMIN_NAME").unwrap_or_else(|| "Administrator".into()),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteAdmin),
        };

        Ok(Self {
            host,
            port,
            db_path,
            client_origin,
            token_ttl: Duration::from_secs(ttl_hours * 3600),
            password_iterations,
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
            admin,
        })
    }

    /// Settings for tests: given database file, fast hashing, no admin.
    pub fn for_tests(db_path: &Path) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: 0,
            db_path: db_path.to_path_buf(),
            client_origin: DEFAULT_CLIENT_ORIGIN.to_string(),
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_HOURS * 3600),
            password_iterations: 1_000,
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
            admin: None,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
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
    fn defaults_apply() {
        let settings =
            Settings::from_lookup(lookup(&[("MEDSCHEDULE_DB_PATH", "/tmp/m.db")])).unwrap();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.client_origin, "http://localhost:3000");
        assert_eq!(settings.token_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(settings.password_iterations, PBKDF2_ITERATIONS);
        assert_eq!(settings.rate_limit_max, 100);
        assert!(settings.admin.is_none());
        assert_eq!(settings.bind_address(), "127.0.0.1:5000");
    }

    #[test]
    fn port_prefers_prefixed_variable() {
        let settings = Settings::from_lookup(lookup(&[
            ("MEDSCHEDULE_DB_PATH", "/tmp/m.db"),
            ("PORT", "8080"),
        ]))
        .unwrap();
        assert_eq!(settings.port, 8080);

        let settings = Settings::from_lookup(lookup(&[
            ("MEDSCHEDULE_DB_PATH", "/tmp/m.db"),
            ("PORT", "8080"),
            ("MEDSCHEDULE_PORT", "9090"),
        ]))
        .unwrap();
        assert_eq!(settings.port, 9090);
    }

    #[test]
    fn malformed_port_is_rejected() {
        let err = Settings::from_lookup(lookup(&[
            ("MEDSCHEDULE_DB_PATH", "/tmp/m.db"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "PORT"));
    }

    #[test]
    fn token_ttl_is_bounded() {
        let settings = Settings::from_lookup(lookup(&[
            ("MEDSCHEDULE_DB_PATH", "/tmp/m.db"),
            ("MEDSCHEDULE_TOKEN_TTL_HOURS", "8760"),
        ]))
        .unwrap();
        assert_eq!(settings.token_ttl, Duration::from_secs(8760 * 3600));

        for value in ["0", "8761", "1000000000000", "18446744073709551615"] {
            let err = Settings::from_lookup(lookup(&[
                ("MEDSCHEDULE_DB_PATH", "/tmp/m.db"),
                ("MEDSCHEDULE_TOKEN_TTL_HOURS", value),
            ]))
            .unwrap_err();
            let rejected = matches!(
                err,
                ConfigError::Invalid { ref key, .. } if key == "MEDSCHEDULE_TOKEN_TTL_HOURS"
            );
            assert!(rejected, "{value} should be rejected");
        }
    }

    #[test]
    fn admin_requires_email_and_password() {
        let err = Settings::from_lookup(lookup(&[
            ("MEDSCHEDULE_DB_PATH", "/tmp/m.db"),
            ("MEDSCHEDULE_ADMIN_EMAIL", "root@example.com"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::IncompleteAdmin);

        let settings = Settings::from_lookup(lookup(&[
            ("MEDSCHEDULE_DB_PATH", "/tmp/m.db"),
            ("MEDSCHEDULE_ADMIN_EMAIL", "root@example.com"),
            ("MEDSCHEDULE_ADMIN_PASSWORD", "supersecret"),
        ]))
        .unwrap();
        let admin = settings.admin.unwrap();
        assert_eq!(admin.email, "root@example.com");
        assert_eq!(admin.name, "Administrator");
    }

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir().unwrap();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("Medschedule"));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }
}
