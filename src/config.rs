// Runtime configuration loaded from the environment
// Values come from process env (optionally seeded by a .env file via dotenv)

use std::fmt;
use std::time::Duration;

/// Length in bytes of the symmetric token key
pub const TOKEN_KEY_LENGTH: usize = 32;

pub const DEFAULT_ACCESS_TOKEN_TTL_MINUTES: i64 = 60;
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 7;

/// One year, expressed in each TTL's unit
pub const MAX_ACCESS_TOKEN_TTL_MINUTES: i64 = 365 * 24 * 60;
pub const MAX_REFRESH_TOKEN_TTL_DAYS: i64 = 365;
pub const DEFAULT_ROLE: &str = "guest";

/// Configuration errors. Any of these aborts startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Argon2 work factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

/// Authentication settings
#[derive(Clone)]
pub struct AuthConfig {
    pub token_secret: [u8; TOKEN_KEY_LENGTH],
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    /// Role assigned at registration, None disables the assignment
    pub default_role: Option<String>,
    pub password: PasswordConfig,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_secret", &"<redacted>")
            .field("access_token_ttl_minutes", &self.access_token_ttl_minutes)
            .field("refresh_token_ttl_days", &self.refresh_token_ttl_days)
            .field("default_role", &self.default_role)
            .field("password", &self.password)
            .finish()
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub session_purge_interval: Duration,
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Load configuration from process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or(&lookup, "PORT", 8080u16)?;
        let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?;
        let purge_secs = parse_or(&lookup, "SESSION_PURGE_INTERVAL_SECS", 3600u64)?;
        if purge_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "SESSION_PURGE_INTERVAL_SECS",
                reason: "must be positive".to_string(),
            });
        }

        let secret_hex = lookup("TOKEN_SECRET").ok_or(ConfigError::Missing("TOKEN_SECRET"))?;
        let token_secret = parse_token_secret(&secret_hex)?;

        let access_token_ttl_minutes =
            parse_or(&lookup, "ACCESS_TOKEN_TTL_MINUTES", DEFAULT_ACCESS_TOKEN_TTL_MINUTES)?;
        let refresh_token_ttl_days =
            parse_or(&lookup, "REFRESH_TOKEN_TTL_DAYS", DEFAULT_REFRESH_TOKEN_TTL_DAYS)?;
        check_ttl("ACCESS_TOKEN_TTL_MINUTES", access_token_ttl_minutes, MAX_ACCESS_TOKEN_TTL_MINUTES)?;
        check_ttl("REFRESH_TOKEN_TTL_DAYS", refresh_token_ttl_days, MAX_REFRESH_TOKEN_TTL_DAYS)?;

        let default_role = match lookup("DEFAULT_ROLE") {
            Some(role) if role.trim().is_empty() => None,
            Some(role) => Some(role.trim().to_string()),
            None => Some(DEFAULT_ROLE.to_string()),
        };

        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            memory_kib: parse_or(&lookup, "PASSWORD_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_or(&lookup, "PASSWORD_ITERATIONS", defaults.iterations)?,
            parallelism: parse_or(&lookup, "PASSWORD_PARALLELISM", defaults.parallelism)?,
        };

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            session_purge_interval: Duration::from_secs(purge_secs),
            auth: AuthConfig {
                token_secret,
                access_token_ttl_minutes,
                refresh_token_ttl_days,
                default_role,
                password,
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
pub(crate) fn test_auth_config() -> AuthConfig {
    AuthConfig {
        token_secret: [7u8; TOKEN_KEY_LENGTH],
        access_token_ttl_minutes: DEFAULT_ACCESS_TOKEN_TTL_MINUTES,
        refresh_token_ttl_days: DEFAULT_REFRESH_TOKEN_TTL_DAYS,
        default_role: Some(DEFAULT_ROLE.to_string()),
        // Lowest legal Argon2 cost
        password: PasswordConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        },
    }
}

/// Decode a hex-encoded symmetric key of exactly TOKEN_KEY_LENGTH bytes
pub fn parse_token_secret(value: &str) -> Result<[u8; TOKEN_KEY_LENGTH], ConfigError> {
    let bytes = hex::decode(value.trim()).map_err(|e| ConfigError::Invalid {
        name: "TOKEN_SECRET",
        reason: format!("not valid hex: {e}"),
    })?;

    <[u8; TOKEN_KEY_LENGTH]>::try_from(bytes.as_slice()).map_err(|_| ConfigError::Invalid {
        name: "TOKEN_SECRET",
        reason: format!("expected {} bytes, got {}", TOKEN_KEY_LENGTH, bytes.len()),
    })
}

fn check_ttl(name: &'static str, value: i64, max: i64) -> Result<(), ConfigError> {
    if !(1..=max).contains(&value) {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("must be between 1 and {max}"),
        });
    }
    Ok(())
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/warehouse"),
            ("TOKEN_SECRET", SECRET),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.auth.access_token_ttl_minutes, 60);
        assert_eq!(config.auth.refresh_token_ttl_days, 7);
        assert_eq!(config.auth.default_role.as_deref(), Some("guest"));
        assert_eq!(config.auth.token_secret[31], 0x1f);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_missing_secret_is_rejected() {
        let result = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x")]));
        assert!(matches!(result, Err(ConfigError::Missing("TOKEN_SECRET"))));
    }

    #[test]
    fn test_short_secret_is_rejected() {
        let result = parse_token_secret("abcd");
        assert!(matches!(result, Err(ConfigError::Invalid { name: "TOKEN_SECRET", .. })));
    }

    #[test]
    fn test_non_hex_secret_is_rejected() {
        let result = parse_token_secret(&"zz".repeat(32));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_ttl_is_rejected() {
        let result = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("TOKEN_SECRET", SECRET),
            ("ACCESS_TOKEN_TTL_MINUTES", "0"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { name: "ACCESS_TOKEN_TTL_MINUTES", .. })));

        let result = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("TOKEN_SECRET", SECRET),
            ("PORT", "not-a-port"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { name: "PORT", .. })));
    }

    #[test]
    fn test_oversized_ttl_is_rejected() {
        for (name, value) in [
            ("REFRESH_TOKEN_TTL_DAYS", "100000000"),
            ("REFRESH_TOKEN_TTL_DAYS", "366"),
            ("ACCESS_TOKEN_TTL_MINUTES", "9223372036854775807"),
            ("ACCESS_TOKEN_TTL_MINUTES", "525601"),
        ] {
            let result = AppConfig::from_lookup(lookup_from(&[
                ("DATABASE_URL", "postgres://x"),
                ("TOKEN_SECRET", SECRET),
                (name, value),
            ]));
            assert!(
                matches!(result, Err(ConfigError::Invalid { name: n, .. }) if n == name),
                "{name}={value}"
            );
        }

        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("TOKEN_SECRET", SECRET),
            ("REFRESH_TOKEN_TTL_DAYS", "365"),
            ("ACCESS_TOKEN_TTL_MINUTES", "525600"),
        ]))
        .unwrap();
        assert_eq!(config.auth.refresh_token_ttl_days, MAX_REFRESH_TOKEN_TTL_DAYS);
        assert_eq!(config.auth.access_token_ttl_minutes, MAX_ACCESS_TOKEN_TTL_MINUTES);
    }

    #[test]
    fn test_empty_default_role_disables_assignment() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("TOKEN_SECRET", SECRET),
            ("DEFAULT_ROLE", ""),
        ]))
        .unwrap();
        assert_eq!(config.auth.default_role, None);
    }
}
