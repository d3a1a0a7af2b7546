use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub aws: AwsConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    /// Deadline for receiving a request body.
    pub read_timeout: Duration,
    /// Deadline for producing a response; cancels the handler when hit.
    pub write_timeout: Duration,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
    pub ssl_mode: String,
    pub name: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub addr: String,
    pub password: Secret,
    pub db: i64,
}

#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Secret,
    pub secret_access_key: Secret,
    pub bucket: String,
    /// Custom endpoint for MinIO/LocalStack; switches to path-style URLs.
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Server-side pepper mixed into password hashes.
    pub token_secret: Secret,
    pub token_expiration_min: i64,
}

impl AuthConfig {
    /// Session lifetime, `None` when the minute count overflows a `TimeDelta`.
    pub fn token_ttl(&self) -> Option<chrono::TimeDelta> {
        chrono::TimeDelta::try_minutes(self.token_expiration_min)
    }
}

impl ServerConfig {
    /// `SERVER_ADDR` may be a bare port such as `:8080`.
    pub fn bind_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }
}

/// A string that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("\"***\"")
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Photo hosting API")]
pub struct Args {
    /// Address to bind to (overrides SERVER_ADDR)
    #[arg(long)]
    pub addr: Option<String>,

    /// Postgres host (overrides DB_HOST)
    #[arg(long)]
    pub db_host: Option<String>,

    /// Redis address (overrides REDIS_ADDR)
    #[arg(long)]
    pub redis_addr: Option<String>,

    /// S3 bucket for photo content (overrides AWS_S3_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Merge already-parsed CLI args over the process environment.
    pub fn from_env_and_args(args: &Args) -> Result<Self> {
        Self::from_sources(args, |key| env::var(key).ok())
    }

    /// Build the config from parsed args and a variable lookup.
    pub fn from_sources<F>(args: &Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let server = ServerConfig {
            addr: args
                .addr
                .clone()
                .unwrap_or_else(|| get("SERVER_ADDR", "0.0.0.0:8080")),
            read_timeout: duration_var(&lookup, "SERVER_READ_TIMEOUT", Duration::from_secs(15))?,
            write_timeout: duration_var(&lookup, "SERVER_WRITE_TIMEOUT", Duration::from_secs(15))?,
            cors_allowed_origins: get("CORS_ALLOWED_ORIGINS", "http://localhost:3000")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        };

        let database = DatabaseConfig {
            host: args
                .db_host
                .clone()
                .unwrap_or_else(|| get("DB_HOST", "localhost")),
            port: parsed_var(&lookup, "DB_PORT", 5432)?,
            user: get("DB_USER", "postgres"),
            password: Secret::new(get("DB_PASSWORD", "password")),
            ssl_mode: get("DB_SSLMODE", "disable"),
            name: get("DB_NAME", "photos"),
            max_connections: parsed_var(&lookup, "DB_MAX_CONNECTIONS", 25)?,
        };

        let redis = RedisConfig {
            addr: args
                .redis_addr
                .clone()
                .unwrap_or_else(|| get("REDIS_ADDR", "localhost:6379")),
            password: Secret::new(get("REDIS_PASSWORD", "")),
            db: parsed_var(&lookup, "REDIS_DB", 0)?,
        };

        let aws = AwsConfig {
            region: get("AWS_REGION", "us-east-1"),
            access_key_id: Secret::new(get("AWS_ACCESS_KEY_ID", "")),
            secret_access_key: Secret::new(get("AWS_SECRET_ACCESS_KEY", "")),
            bucket: args
                .bucket
                .clone()
                .unwrap_or_else(|| get("AWS_S3_BUCKET", "photo-store-images")),
            endpoint_url: lookup("AWS_ENDPOINT_URL").filter(|s| !s.is_empty()),
        };
        if aws.access_key_id.is_empty() || aws.secret_access_key.is_empty() {
            bail!("AWS credentials are required (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY)");
        }

        let auth = AuthConfig {
            token_secret: Secret::new(get("AUTH_TOKEN_SECRET", "secret-key")),
            token_expiration_min: parsed_var(&lookup, "AUTH_TOKEN_EXPIRATION_MIN", 60)?,
        };
        if auth.token_expiration_min <= 0 {
            bail!("AUTH_TOKEN_EXPIRATION_MIN must be positive");
        }
        if auth.token_ttl().is_none() {
            bail!("AUTH_TOKEN_EXPIRATION_MIN is out of range");
        }
        if auth.token_secret.is_empty() {
            bail!("AUTH_TOKEN_SECRET must not be empty");
        }

        Ok(Self {
            server,
            database,
            redis,
            aws,
            auth,
        })
    }
}

fn parsed_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {key} value `{value}`")),
        _ => Ok(default),
    }
}

fn duration_var<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => {
            parse_duration(&value).with_context(|| format!("parsing {key} value `{value}`"))
        }
        _ => Ok(default),
    }
}

/// Accepts humantime durations (`500ms`, `15s`, `1m30s`, `1h 15m`) or a bare
/// number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).with_context(|| format!("invalid duration `{raw}`"))
}
