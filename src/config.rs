use std::env;
use std::path::PathBuf;

/// Object-store settings; present only when a bucket is configured.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub public_base_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub upload_dir: PathBuf,
    pub s3: Option<S3Settings>,
    pub rate_limit_enabled: bool,
    pub trust_forwarded: bool,
}

fn opt_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

pub(crate) fn bool_env(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

impl S3Settings {
    pub fn from_env() -> Option<Self> {
        let bucket = opt_env("S3_BUCKET_NAME")?;
        Some(Self {
            bucket,
            region: opt_env("AWS_REGION").unwrap_or_else(|| "us-east-1".into()),
            endpoint: opt_env("S3_ENDPOINT"),
            access_key_id: opt_env("AWS_ACCESS_KEY_ID"),
            secret_access_key: opt_env("AWS_SECRET_ACCESS_KEY"),
            public_base_url: opt_env("S3_PUBLIC_BASE_URL"),
        })
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: opt_env("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".into()),
            database_url: opt_env("DATABASE_URL"),
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 5),
            upload_dir: opt_env("UPLOAD_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("uploads")),
            s3: S3Settings::from_env(),
            rate_limit_enabled: bool_env("RATE_LIMIT_ENABLED", true),
            trust_forwarded: bool_env("TRUST_FORWARDED_FOR", false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn defaults_and_overrides() {
        for v in ["BIND_ADDR", "DATABASE_URL", "DB_MAX_CONNECTIONS", "UPLOAD_DIR", "S3_BUCKET_NAME", "RATE_LIMIT_ENABLED", "TRUST_FORWARDED_FOR"] {
            env::remove_var(v);
        }
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8000");
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.db_max_connections, 5);
        assert!(cfg.s3.is_none());
        assert!(cfg.rate_limit_enabled);
        assert!(!cfg.trust_forwarded);

        env::set_var("S3_BUCKET_NAME", "dumps-media");
        env::set_var("AWS_REGION", "eu-central-1");
        env::set_var("DB_MAX_CONNECTIONS", "not-a-number");
        env::set_var("RATE_LIMIT_ENABLED", "false");
        let cfg = AppConfig::from_env();
        let s3 = cfg.s3.unwrap();
        assert_eq!(s3.bucket, "dumps-media");
        assert_eq!(s3.region, "eu-central-1");
        assert_eq!(cfg.db_max_connections, 5);
        assert!(!cfg.rate_limit_enabled);

        for v in ["S3_BUCKET_NAME", "AWS_REGION", "DB_MAX_CONNECTIONS", "RATE_LIMIT_ENABLED"] {
            env::remove_var(v);
        }
    }
}
