use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";

/// Placeholder JWT secrets that must not reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", DEFAULT_JWT_SECRET];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub uploads_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// First non-empty value among `keys` wins, so the short hosting-platform
    /// names (`PORT`, `JWT_SECRET`) override the prefixed ones.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(key))
                .find(|value| !value.trim().is_empty())
        };

        let port = match var(&["PORT", "THREADS_PORT"]) {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("invalid port '{raw}'"))?,
            None => 5001,
        };

        let jwt_secret = var(&["JWT_SECRET", "THREADS_JWT_SECRET"])
            .unwrap_or_else(|| DEFAULT_JWT_SECRET.into());
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("JWT secret is unset or still a placeholder; set JWT_SECRET before deploying");
        }

        Ok(Self {
            host: var(&["THREADS_HOST"]).unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: var(&["THREADS_DB_PATH"])
                .unwrap_or_else(|| "threads.db".into())
                .into(),
            jwt_secret,
            uploads_dir: var(&["THREADS_UPLOADS_DIR"])
                .unwrap_or_else(|| "uploads".into())
                .into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config(&[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5001);
        assert_eq!(config.db_path, PathBuf::from("threads.db"));
        assert_eq!(config.jwt_secret, DEFAULT_JWT_SECRET);
        assert_eq!(config.uploads_dir, PathBuf::from("uploads"));
    }

    #[test]
    fn short_names_win_over_prefixed_ones() {
        let config = config(&[
            ("PORT", "8080"),
            ("THREADS_PORT", "9090"),
            ("THREADS_JWT_SECRET", "prefixed"),
            ("JWT_SECRET", ""),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.jwt_secret, "prefixed");
    }

    #[test]
    fn bad_port_is_an_error() {
        assert!(config(&[("THREADS_PORT", "not-a-port")]).is_err());
    }
}
