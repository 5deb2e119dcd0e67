use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Local backing-file root, used when `backend_url` is unset.
    pub storage_dir: String,
    /// Storage gateway base URL probed with HEAD for backing files.
    pub backend_url: Option<String>,
    /// Base of the signed URLs handed to clients.
    pub public_url: String,
    pub token_secret: String,
    pub token_issuer: String,
    pub token_ttl: Duration,
    pub default_plan: String,
    pub default_quota_bytes: i64,
    /// Deadline for each metadata, quota and backend call.
    pub call_timeout: Duration,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("storage_dir", &self.storage_dir)
            .field("backend_url", &self.backend_url)
            .field("public_url", &self.public_url)
            .field("token_secret", &"<redacted>")
            .field("token_issuer", &self.token_issuer)
            .field("token_ttl", &self.token_ttl)
            .field("default_plan", &self.default_plan)
            .field("default_quota_bytes", &self.default_quota_bytes)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Fleet object store control plane")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides OBJECT_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Local backing-file directory (overrides OBJECT_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Storage gateway URL for existence probes (overrides OBJECT_STORE_BACKEND_URL)
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Public base URL for signed URLs (overrides OBJECT_STORE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Signed URL lifetime in seconds (overrides OBJECT_STORE_TOKEN_TTL_SECS)
    #[arg(long)]
    pub token_ttl_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Source of `OBJECT_STORE_*` variables; the process environment in production.
pub trait EnvSource {
    fn get(&self, key: &str) -> Result<Option<String>>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", key)),
        }
    }
}

fn parsed<T>(env: &dyn EnvSource, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env.get(key)? {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, &ProcessEnv)?;
        Ok((cfg, migrate))
    }

    /// CLI flags win over environment, environment over defaults.
    pub fn merge(args: Args, env: &dyn EnvSource) -> Result<Self> {
        let env_host = env.get("OBJECT_STORE_HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parsed(env, "OBJECT_STORE_PORT", 3000u16)?;
        let env_db = env
            .get("OBJECT_STORE_DATABASE_URL")?
            .unwrap_or_else(|| "sqlite://./data/meta/object_store.db".into());
        let env_storage = env
            .get("OBJECT_STORE_STORAGE_DIR")?
            .unwrap_or_else(|| "./data/objects".into());
        let env_backend = env.get("OBJECT_STORE_BACKEND_URL")?;
        let env_public = env
            .get("OBJECT_STORE_PUBLIC_URL")?
            .unwrap_or_else(|| "http://127.0.0.1:9000".into());
        let env_ttl = parsed(env, "OBJECT_STORE_TOKEN_TTL_SECS", 30u64)?;

        let Some(token_secret) = env.get("OBJECT_STORE_TOKEN_SECRET")? else {
            bail!("OBJECT_STORE_TOKEN_SECRET is required");
        };
        let token_issuer = env
            .get("OBJECT_STORE_TOKEN_ISSUER")?
            .unwrap_or_else(|| "fleet-object-store".into());
        let default_plan = env
            .get("OBJECT_STORE_DEFAULT_PLAN")?
            .unwrap_or_else(|| "free".into());
        let default_quota_bytes =
            parsed(env, "OBJECT_STORE_DEFAULT_QUOTA_BYTES", 100 * 1024 * 1024i64)?;
        let call_timeout_ms = parsed(env, "OBJECT_STORE_CALL_TIMEOUT_MS", 5_000u64)?;

        let token_ttl_secs = args.token_ttl_secs.unwrap_or(env_ttl);
        if token_ttl_secs == 0 {
            bail!("token TTL must be at least one second");
        }
        if default_quota_bytes < 0 {
            bail!("default quota must not be negative");
        }

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            backend_url: args.backend_url.or(env_backend),
            public_url: args.public_url.unwrap_or(env_public),
            token_secret,
            token_issuer,
            token_ttl: Duration::from_secs(token_ttl_secs),
            default_plan,
            default_quota_bytes,
            call_timeout: Duration::from_millis(call_timeout_ms),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapEnv(HashMap<&'static str, &'static str>);

    impl EnvSource for MapEnv {
        fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.0.get(key).map(|v| v.to_string()))
        }
    }

    fn env(pairs: &[(&'static str, &'static str)]) -> MapEnv {
        let mut map: HashMap<_, _> = pairs.iter().copied().collect();
        map.entry("OBJECT_STORE_TOKEN_SECRET")
            .or_insert("a-secret-long-enough-for-hs256-signing");
        MapEnv(map)
    }

    #[test]
    fn defaults_apply() {
        let cfg = AppConfig::merge(Args::default(), &env(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.token_ttl, Duration::from_secs(30));
        assert_eq!(cfg.default_plan, "free");
        assert_eq!(cfg.default_quota_bytes, 100 * 1024 * 1024);
        assert!(cfg.backend_url.is_none());
        assert!(!format!("{:?}", cfg).contains("a-secret"));
    }

    #[test]
    fn args_override_env() {
        let args = Args {
            port: Some(8080),
            token_ttl_secs: Some(10),
            ..Default::default()
        };
        let cfg = AppConfig::merge(
            args,
            &env(&[
                ("OBJECT_STORE_PORT", "9090"),
                ("OBJECT_STORE_HOST", "127.0.0.1"),
                ("OBJECT_STORE_TOKEN_TTL_SECS", "60"),
                ("OBJECT_STORE_DEFAULT_QUOTA_BYTES", "1024"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:8080");
        assert_eq!(cfg.token_ttl, Duration::from_secs(10));
        assert_eq!(cfg.default_quota_bytes, 1024);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(AppConfig::merge(Args::default(), &env(&[("OBJECT_STORE_PORT", "http")])).is_err());
        assert!(
            AppConfig::merge(Args::default(), &env(&[("OBJECT_STORE_TOKEN_TTL_SECS", "0")]))
                .is_err()
        );
        assert!(AppConfig::merge(Args::default(), &MapEnv(HashMap::new())).is_err());
    }
}
