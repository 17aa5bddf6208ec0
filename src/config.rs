use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// PEM files for the pgwire TLS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Server settings, read from `BERTH_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub tls: Option<TlsPaths>,
    pub metrics_port: Option<u16>,
    /// Logins granted every capability. Empty grants them to everyone.
    pub admins: Vec<String>,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tls = match (lookup("BERTH_TLS_CERT"), lookup("BERTH_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::TlsHalfConfigured),
        };

        let admins = lookup("BERTH_ADMINS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            port: parse_or(&lookup, "BERTH_PORT", 5433)?,
            bind: lookup("BERTH_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("BERTH_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            password: lookup("BERTH_PASSWORD").unwrap_or_else(|| "berth".into()),
            max_connections: parse_or(&lookup, "BERTH_MAX_CONNECTIONS", 256)?,
            compact_threshold: parse_or(&lookup, "BERTH_COMPACT_THRESHOLD", 1000)?,
            tls,
            metrics_port: lookup("BERTH_METRICS_PORT")
                .map(|v| parse_var("BERTH_METRICS_PORT", v))
                .transpose()?,
            admins,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("berth.wal")
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}

fn parse_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => parse_var(var, value),
        None => Ok(default),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    TlsHalfConfigured,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "{var}: invalid value {value:?}"),
            ConfigError::TlsHalfConfigured => {
                write!(f, "both BERTH_TLS_CERT and BERTH_TLS_KEY must be set, or neither")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_env_missing() {
        let config = load(&[]).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.wal_path(), PathBuf::from("./data/berth.wal"));
        assert_eq!(config.password, "berth");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.tls, None);
        assert_eq!(config.metrics_port, None);
        assert!(config.admins.is_empty());
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("BERTH_PORT", "6543"),
            ("BERTH_BIND", "127.0.0.1"),
            ("BERTH_METRICS_PORT", "9100"),
            ("BERTH_ADMINS", "facilities, ops ,,"),
            ("BERTH_TLS_CERT", "/etc/berth/tls.crt"),
            ("BERTH_TLS_KEY", "/etc/berth/tls.key"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:6543");
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.admins, vec!["facilities".to_string(), "ops".to_string()]);
        assert_eq!(
            config.tls.map(|t| t.key),
            Some(PathBuf::from("/etc/berth/tls.key"))
        );
    }

    #[test]
    fn rejects_bad_numbers() {
        assert_eq!(
            load(&[("BERTH_PORT", "70000")]),
            Err(ConfigError::Invalid {
                var: "BERTH_PORT",
                value: "70000".into(),
            })
        );
        assert!(load(&[("BERTH_COMPACT_THRESHOLD", "-1")]).is_err());
    }

    #[test]
    fn tls_needs_both_files() {
        assert_eq!(
            load(&[("BERTH_TLS_CERT", "/etc/berth/tls.crt")]),
            Err(ConfigError::TlsHalfConfigured)
        );
    }
}
