use crate::models::UserEntry;
use axum::http::HeaderValue;
use reqwest::Url;
use std::collections::HashSet;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Minimum secret length before a startup warning is logged.
const RECOMMENDED_SECRET_BYTES: usize = 32;

#[derive(Clone)]
pub struct Config {
    // Server
    pub bind_addr: SocketAddr,
    pub static_dir: PathBuf,

    // Upstream
    pub backend_url: Url,
    pub upstream_timeout_secs: u64,
    pub max_body_bytes: usize,

    // Session signing
    pub jwt_secret: String,
    pub token_ttl_secs: u64,

    // Cookie
    pub cookie_name: String,
    pub cookie_secure: bool,
    pub cookie_max_age_secs: u64,

    // Static credential table
    pub users: Vec<UserEntry>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let usernames: Vec<&str> = self.users.iter().map(|u| u.username.as_str()).collect();
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("static_dir", &self.static_dir)
            .field("backend_url", &self.backend_url.as_str())
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("jwt_secret", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("cookie_name", &self.cookie_name)
            .field("cookie_secure", &self.cookie_secure)
            .field("cookie_max_age_secs", &self.cookie_max_age_secs)
            .field("users", &usernames)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),

    #[error("Failed to read {0}: {1}")]
    ReadError(String, String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Attempt to load .env file, but don't fail if it doesn't exist
        // (env vars may be set directly in production)
        let _ = dotenvy::dotenv();

        // Server
        let bind_addr_str = env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_addr = bind_addr_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::ParseError("LISTEN_ADDR".to_string(), e.to_string()))?;

        let static_dir = PathBuf::from(env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string()));

        // Upstream
        let backend_url_str =
            env::var("BACKEND_URL").map_err(|_| ConfigError::MissingVar("BACKEND_URL".to_string()))?;
        let backend_url = parse_backend_url(&backend_url_str)?;
        let upstream_timeout_secs = parse_env_or_default("UPSTREAM_TIMEOUT_SECS", 30)?;
        let max_body_bytes = parse_env_or_default("MAX_BODY_BYTES", 10_485_760)?;

        // Signing secret - required, rotating it invalidates every issued token
        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| ConfigError::MissingVar("JWT_SECRET".to_string()))?;
        if jwt_secret.is_empty() {
            return Err(ConfigError::InvalidValue(
                "JWT_SECRET".to_string(),
                "cannot be empty".to_string(),
            ));
        }
        if jwt_secret.len() < RECOMMENDED_SECRET_BYTES {
            tracing::warn!(
                len = jwt_secret.len(),
                recommended = RECOMMENDED_SECRET_BYTES,
                "JWT_SECRET is shorter than recommended"
            );
        }

        let token_ttl_secs = parse_env_or_default("TOKEN_TTL_SECS", 86_400)?;
        require_positive("TOKEN_TTL_SECS", token_ttl_secs)?;

        // Cookie
        let cookie_name = env::var("COOKIE_NAME").unwrap_or_else(|_| "auth_token".to_string());
        validate_cookie_name(&cookie_name)?;
        let cookie_secure = parse_env_or_default("COOKIE_SECURE", false)?;
        let cookie_max_age_secs = parse_env_or_default("COOKIE_MAX_AGE_SECS", 86_400)?;
        require_positive("COOKIE_MAX_AGE_SECS", cookie_max_age_secs)?;

        // Users: inline list first, then the optional JSON file
        let mut users = match env::var("AUTH_USERS") {
            Ok(list) => parse_user_list(&list)?,
            Err(_) => Vec::new(),
        };
        if let Ok(path) = env::var("AUTH_USERS_FILE") {
            users.extend(load_users_file(&path)?);
        }
        check_unique_usernames(&users)?;
        if users.is_empty() {
            tracing::warn!("No users configured; every login attempt will fail");
        }

        Ok(Config {
            bind_addr,
            static_dir,
            backend_url,
            upstream_timeout_secs,
            max_body_bytes,
            jwt_secret,
            token_ttl_secs,
            cookie_name,
            cookie_secure,
            cookie_max_age_secs,
            users,
        })
    }
}

/// Helper function to parse environment variable with a default value
fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| ConfigError::ParseError(key.to_string(), format!("{}: {}", e, val))),
        Err(_) => Ok(default),
    }
}

fn require_positive(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn parse_backend_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::ParseError("BACKEND_URL".to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue(
            "BACKEND_URL".to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidValue(
            "BACKEND_URL".to_string(),
            "missing host".to_string(),
        ));
    }
    Ok(url)
}

/// Cookie names must be RFC 6265 tokens.
fn validate_cookie_name(name: &str) -> Result<(), ConfigError> {
    const SEPARATORS: &str = "()<>@,;:\\\"/[]?={}";
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_graphic() && !SEPARATORS.contains(c))
    {
        return Err(ConfigError::InvalidValue(
            "COOKIE_NAME".to_string(),
            "must be a non-empty token without separators".to_string(),
        ));
    }
    Ok(())
}

/// Parse `AUTH_USERS`: `alice:<phc>;bob:<phc>`.
///
/// PHC strings contain `$`, `,` and `=` but never `:` or `;`. Quote the value
/// with single quotes in `.env` files so `$` is not expanded.
fn parse_user_list(raw: &str) -> Result<Vec<UserEntry>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            let (username, hash) = item.split_once(':').ok_or_else(|| {
                ConfigError::InvalidValue(
                    "AUTH_USERS".to_string(),
                    "expected entries of the form username:password_hash".to_string(),
                )
            })?;
            let username = username.trim();
            validate_username("AUTH_USERS", username)?;
            Ok(UserEntry::new(username, hash.trim()))
        })
        .collect()
}

fn load_users_file(path: &str) -> Result<Vec<UserEntry>, ConfigError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError("AUTH_USERS_FILE".to_string(), e.to_string()))?;
    let users: Vec<UserEntry> = serde_json::from_str(&data)
        .map_err(|e| ConfigError::ParseError("AUTH_USERS_FILE".to_string(), e.to_string()))?;
    for user in &users {
        validate_username("AUTH_USERS_FILE", &user.username)?;
        validate_roles("AUTH_USERS_FILE", user)?;
    }
    Ok(users)
}

/// Usernames are sent upstream as a header value and must be valid as one.
fn validate_username(key: &str, username: &str) -> Result<(), ConfigError> {
    if username.is_empty()
        || username.chars().any(|c| c.is_whitespace() || c.is_control())
        || HeaderValue::from_str(username).is_err()
    {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("invalid username {:?}", username),
        ));
    }
    Ok(())
}

/// Roles are joined with `,` into a header value upstream.
fn validate_roles(key: &str, user: &UserEntry) -> Result<(), ConfigError> {
    for role in &user.roles {
        if role.is_empty()
            || role.contains(',')
            || role.chars().any(|c| c.is_whitespace() || c.is_control())
            || HeaderValue::from_str(role).is_err()
        {
            return Err(ConfigError::InvalidValue(
                key.to_string(),
                format!("invalid role {:?} for user '{}'", role, user.username),
            ));
        }
    }
    Ok(())
}

fn check_unique_usernames(users: &[UserEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for user in users {
        if !seen.insert(user.username.as_str()) {
            return Err(ConfigError::InvalidValue(
                "AUTH_USERS".to_string(),
                format!("duplicate username '{}'", user.username),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Use a mutex to ensure tests run serially since they modify global env vars.
    // unwrap_or_else handles poison from prior panics.
    static TEST_MUTEX: Mutex<()> = Mutex::new(());

    fn lock_test() -> std::sync::MutexGuard<'static, ()> {
        TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn clear_test_env() {
        for key in [
            "LISTEN_ADDR",
            "STATIC_DIR",
            "BACKEND_URL",
            "UPSTREAM_TIMEOUT_SECS",
            "MAX_BODY_BYTES",
            "JWT_SECRET",
            "TOKEN_TTL_SECS",
            "COOKIE_NAME",
            "COOKIE_SECURE",
            "COOKIE_MAX_AGE_SECS",
            "AUTH_USERS",
            "AUTH_USERS_FILE",
        ] {
            env::remove_var(key);
        }
    }

    fn set_required() {
        env::set_var("BACKEND_URL", "http://127.0.0.1:9000");
        env::set_var("JWT_SECRET", "0123456789abcdef0123456789abcdef");
    }

    const ALICE_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHRzYWx0$aGFzaA";

    #[test]
    fn test_parse_env_or_default() {
        let _guard = lock_test();

        env::set_var("TEST_AUTHGATE_U64", "12345");
        let result: Result<u64, ConfigError> = parse_env_or_default("TEST_AUTHGATE_U64", 100);
        assert_eq!(result.unwrap(), 12345);

        env::remove_var("TEST_AUTHGATE_U64");
        let result: Result<u64, ConfigError> = parse_env_or_default("TEST_AUTHGATE_U64", 100);
        assert_eq!(result.unwrap(), 100);
    }

    #[test]
    fn test_config_defaults() {
        let _guard = lock_test();
        clear_test_env();
        set_required();

        let config = Config::from_env().unwrap();

        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.backend_url.as_str(), "http://127.0.0.1:9000/");
        assert_eq!(config.cookie_name, "auth_token");
        assert!(!config.cookie_secure);
        assert_eq!(config.cookie_max_age_secs, 86_400);
        assert_eq!(config.token_ttl_secs, 86_400);
        assert_eq!(config.upstream_timeout_secs, 30);
        assert_eq!(config.max_body_bytes, 10_485_760);
        assert_eq!(config.static_dir, PathBuf::from("static"));
        assert!(config.users.is_empty());

        clear_test_env();
    }

    #[test]
    fn test_missing_backend_url() {
        let _guard = lock_test();
        clear_test_env();
        env::set_var("JWT_SECRET", "secret");

        let result = Config::from_env();
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::MissingVar(ref s) if s == "BACKEND_URL"
        ));

        clear_test_env();
    }

    #[test]
    fn test_empty_jwt_secret() {
        let _guard = lock_test();
        clear_test_env();
        env::set_var("BACKEND_URL", "http://127.0.0.1:9000");
        env::set_var("JWT_SECRET", "");

        let result = Config::from_env();
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue(ref s, _) if s == "JWT_SECRET"
        ));

        clear_test_env();
    }

    #[test]
    fn test_backend_url_scheme_rejected() {
        let _guard = lock_test();
        clear_test_env();
        set_required();
        env::set_var("BACKEND_URL", "ftp://files.internal");

        let result = Config::from_env();
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue(ref s, _) if s == "BACKEND_URL"
        ));

        clear_test_env();
    }

    #[test]
    fn test_invalid_listen_addr() {
        let _guard = lock_test();
        clear_test_env();
        set_required();
        env::set_var("LISTEN_ADDR", ":8080");

        let result = Config::from_env();
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_, _)));

        clear_test_env();
    }

    #[test]
    fn test_zero_token_ttl_rejected() {
        let _guard = lock_test();
        clear_test_env();
        set_required();
        env::set_var("TOKEN_TTL_SECS", "0");

        let result = Config::from_env();
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue(ref s, _) if s == "TOKEN_TTL_SECS"
        ));

        clear_test_env();
    }

    #[test]
    fn test_cookie_settings() {
        let _guard = lock_test();
        clear_test_env();
        set_required();
        env::set_var("COOKIE_NAME", "gate_session");
        env::set_var("COOKIE_SECURE", "true");
        env::set_var("COOKIE_MAX_AGE_SECS", "3600");
        env::set_var("TOKEN_TTL_SECS", "1800");

        let config = Config::from_env().unwrap();
        assert_eq!(config.cookie_name, "gate_session");
        assert!(config.cookie_secure);
        assert_eq!(config.cookie_max_age_secs, 3600);
        assert_eq!(config.token_ttl_secs, 1800);

        env::set_var("COOKIE_NAME", "bad;name");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::InvalidValue(ref s, _) if s == "COOKIE_NAME"
        ));

        clear_test_env();
    }

    #[test]
    fn test_auth_users_inline() {
        let _guard = lock_test();
        clear_test_env();
        set_required();
        env::set_var("AUTH_USERS", format!("alice:{} ; bob:{};", ALICE_HASH, ALICE_HASH));

        let config = Config::from_env().unwrap();
        assert_eq!(config.users.len(), 2);
        assert_eq!(config.users[0].username, "alice");
        assert_eq!(config.users[0].password_hash, ALICE_HASH);
        assert_eq!(config.users[0].roles, vec!["user"]);
        assert_eq!(config.users[1].username, "bob");

        clear_test_env();
    }

    #[test]
    fn test_auth_users_malformed_entry() {
        let _guard = lock_test();
        clear_test_env();
        set_required();
        env::set_var("AUTH_USERS", "alice-without-hash");

        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::InvalidValue(ref s, _) if s == "AUTH_USERS"
        ));

        clear_test_env();
    }

    #[test]
    fn test_auth_users_file_merged_and_duplicates_rejected() {
        let _guard = lock_test();
        clear_test_env();
        set_required();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"username":"carol","password_hash":"{}","roles":["admin"]}}]"#,
            ALICE_HASH
        )
        .unwrap();

        env::set_var("AUTH_USERS", format!("alice:{}", ALICE_HASH));
        env::set_var("AUTH_USERS_FILE", file.path());

        let config = Config::from_env().unwrap();
        assert_eq!(config.users.len(), 2);
        assert_eq!(config.users[1].username, "carol");
        assert_eq!(config.users[1].roles, vec!["admin"]);

        env::set_var("AUTH_USERS", format!("carol:{}", ALICE_HASH));
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::InvalidValue(_, ref msg) if msg.contains("duplicate")
        ));

        clear_test_env();
    }

    #[test]
    fn test_usernames_and_roles_must_be_header_safe() {
        let _guard = lock_test();
        clear_test_env();
        set_required();

        for entry in [
            r#"{"username":"ali\u0001ce","password_hash":"HASH"}"#,
            r#"{"username":"bob\u007f","password_hash":"HASH"}"#,
            r#"{"username":"carol","password_hash":"HASH","roles":["admin,root"]}"#,
            r#"{"username":"carol","password_hash":"HASH","roles":["ad\nmin"]}"#,
            r#"{"username":"carol","password_hash":"HASH","roles":[""]}"#,
        ] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            write!(file, "[{}]", entry.replace("HASH", ALICE_HASH)).unwrap();
            env::set_var("AUTH_USERS_FILE", file.path());

            assert!(
                matches!(
                    Config::from_env().unwrap_err(),
                    ConfigError::InvalidValue(ref s, _) if s == "AUTH_USERS_FILE"
                ),
                "{}",
                entry
            );
        }

        env::remove_var("AUTH_USERS_FILE");
        env::set_var("AUTH_USERS", format!("ali\x07ce:{}", ALICE_HASH));
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::InvalidValue(ref s, _) if s == "AUTH_USERS"
        ));

        clear_test_env();
    }

    #[test]
    fn test_debug_redacts_secret() {
        let _guard = lock_test();
        clear_test_env();
        set_required();
        env::set_var("AUTH_USERS", format!("alice:{}", ALICE_HASH));

        let config = Config::from_env().unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("0123456789abcdef"));
        assert!(!debug.contains("argon2id"));
        assert!(debug.contains("alice"));

        clear_test_env();
    }
}
