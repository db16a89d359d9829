//! Host-level database configuration.
//!
//! Loaded through figment (YAML file merged with prefixed environment
//! variables) under the `database` key:
//!
//! ```yaml
//! database:
//!   auto_provision: true
//!   connections:
//!     Default: "sqlite://data/crm.db"
//!     ProductsDb: "postgres://crm:${CRM_DB_PASSWORD}@db:5432/products"
//!   pool:
//!     max_conns: 10
//!     acquire_timeout: 30s
//! ```
//!
//! `${VAR}` placeholders in connection strings are expanded from the
//! process environment when the resolver is built.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use figment::Figment;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::resolver::ConnectionResolver;
use crate::{ComposeError, ConnectOpts, Result};

/// Pool tuning knobs, durations in humantime notation (`30s`, `5m`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PoolCfg {
    pub max_conns: Option<u32>,
    pub min_conns: Option<u32>,
    #[serde(default, with = "humantime_serde::option")]
    pub acquire_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub idle_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub max_lifetime: Option<Duration>,
}

impl From<&PoolCfg> for ConnectOpts {
    fn from(cfg: &PoolCfg) -> Self {
        let defaults = ConnectOpts::default();
        ConnectOpts {
            max_conns: cfg.max_conns.or(defaults.max_conns),
            min_conns: cfg.min_conns.or(defaults.min_conns),
            acquire_timeout: cfg.acquire_timeout.or(defaults.acquire_timeout),
            idle_timeout: cfg.idle_timeout.or(defaults.idle_timeout),
            max_lifetime: cfg.max_lifetime.or(defaults.max_lifetime),
            create_sqlite_dirs: defaults.create_sqlite_dirs,
        }
    }
}

/// The `database` section of the host configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection-string keys to connection strings. The `"Default"` key is
    /// the designated fallback for modules without a dedicated entry.
    #[serde(default)]
    pub connections: HashMap<String, String>,
    /// Apply composed DDL eagerly at startup instead of on first access.
    #[serde(default)]
    pub auto_provision: bool,
    #[serde(default)]
    pub pool: PoolCfg,
}

impl DatabaseConfig {
    /// Extract the `database` section; a missing section yields the default
    /// (empty) configuration, matching the lenient loading used everywhere
    /// else in the host config.
    ///
    /// # Errors
    /// Returns `ComposeError::Configuration` when the section is present
    /// but malformed.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        if figment.find_value("database").is_err() {
            return Ok(Self::default());
        }
        figment
            .extract_inner("database")
            .map_err(|e| ComposeError::Configuration(format!("database section: {e}")))
    }

    /// Build the connection resolver, expanding `${VAR}` placeholders.
    ///
    /// # Errors
    /// Returns `ComposeError::Configuration` when a referenced environment
    /// variable is unset.
    pub fn resolver(&self) -> Result<ConnectionResolver> {
        let mut expanded = HashMap::with_capacity(self.connections.len());
        for (key, value) in &self.connections {
            expanded.insert(key.clone(), expand_env(value)?);
        }
        Ok(ConnectionResolver::new(expanded))
    }

    #[must_use]
    pub fn connect_opts(&self) -> ConnectOpts {
        ConnectOpts::from(&self.pool)
    }
}

/// Expand `${VAR}` placeholders from the process environment.
fn expand_env(value: &str) -> Result<String> {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // the pattern is a literal
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap()
    });

    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for caps in re.captures_iter(value) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let name = &caps[1];
        let resolved = std::env::var(name).map_err(|_| {
            ComposeError::Configuration(format!(
                "connection string references unset environment variable '{name}'"
            ))
        })?;
        out.push_str(&value[last..whole.start]);
        out.push_str(&resolved);
        last = whole.end;
    }
    out.push_str(&value[last..]);
    Ok(out)
}

/// Strip credentials from a DSN for logging. Non-URL DSNs (e.g.
/// `sqlite::memory:`) pass through unchanged.
#[must_use]
pub fn redact_credentials_in_dsn(dsn: &str) -> String {
    match url::Url::parse(dsn) {
        Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
            let _ = url.set_username("redacted");
            let _ = url.set_password(None);
            url.to_string()
        }
        _ => dsn.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::providers::Serialized;
    use serde_json::json;

    #[test]
    fn missing_section_yields_defaults() {
        let cfg = DatabaseConfig::from_figment(&Figment::new()).unwrap();
        assert!(cfg.connections.is_empty());
        assert!(!cfg.auto_provision);
    }

    #[test]
    fn section_roundtrip() {
        let figment = Figment::new().merge(Serialized::defaults(json!({
            "database": {
                "auto_provision": true,
                "connections": {
                    "Default": "sqlite::memory:",
                    "ProductsDb": "postgres://db:5432/products"
                },
                "pool": {
                    "max_conns": 5,
                    "acquire_timeout": "10s"
                }
            }
        })));
        let cfg = DatabaseConfig::from_figment(&figment).unwrap();
        assert!(cfg.auto_provision);
        assert_eq!(cfg.connections.len(), 2);
        assert_eq!(cfg.pool.max_conns, Some(5));
        assert_eq!(cfg.pool.acquire_timeout, Some(Duration::from_secs(10)));

        let opts = cfg.connect_opts();
        assert_eq!(opts.max_conns, Some(5));
        assert_eq!(opts.acquire_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn env_placeholders_expand() {
        temp_env::with_var("CRM_TEST_DB_PASSWORD", Some("s3cret"), || {
            let expanded =
                expand_env("postgres://crm:${CRM_TEST_DB_PASSWORD}@db/products").unwrap();
            assert_eq!(expanded, "postgres://crm:s3cret@db/products");
        });
    }

    #[test]
    fn unset_env_placeholder_is_fatal() {
        temp_env::with_var_unset("CRM_TEST_MISSING_VAR", || {
            let err = expand_env("postgres://crm:${CRM_TEST_MISSING_VAR}@db/x").unwrap_err();
            assert!(matches!(err, ComposeError::Configuration(_)));
        });
    }

    #[test]
    fn redaction_strips_credentials() {
        let redacted = redact_credentials_in_dsn("postgres://crm:hunter2@db:5432/products");
        assert!(!redacted.contains("hunter2"));
        assert!(redacted.contains("db:5432"));
        assert_eq!(redact_credentials_in_dsn("sqlite::memory:"), "sqlite::memory:");
    }
}
