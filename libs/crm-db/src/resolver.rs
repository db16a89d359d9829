//! Connection-string key resolution.
//!
//! Modules bind to named keys; the host maps keys to physical connection
//! strings. A key without a dedicated entry falls back to the reserved
//! `"Default"` key — never to an empty string.

use std::collections::HashMap;

use crate::{ComposeError, Result};

/// The reserved fallback key.
pub const DEFAULT_CONNECTION: &str = "Default";

/// Maps connection-string keys to resolved connection strings.
///
/// Key lookup is ASCII case-insensitive: environment-based configuration
/// layers lowercase their keys, and `ProductsDb` vs `productsdb` should
/// not silently split into two bindings.
#[derive(Clone, Debug, Default)]
pub struct ConnectionResolver {
    connections: HashMap<String, String>,
}

impl ConnectionResolver {
    #[must_use]
    pub fn new(connections: HashMap<String, String>) -> Self {
        Self::from_iter(connections)
    }

    pub fn from_iter<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            connections: entries
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
        }
    }

    /// Resolve `key` to a connection string, falling back to `"Default"`.
    ///
    /// Absence of a non-default key is not an error; absence of the default
    /// key (when needed) is fatal.
    ///
    /// # Errors
    /// Returns `ComposeError::Configuration` when neither `key` nor the
    /// default key is configured, or when the configured value is empty.
    pub fn resolve(&self, key: &str) -> Result<&str> {
        let value = match self.connections.get(&key.to_ascii_lowercase()) {
            Some(v) => v,
            None => self
                .connections
                .get(&DEFAULT_CONNECTION.to_ascii_lowercase())
                .ok_or_else(|| {
                    ComposeError::Configuration(format!(
                        "no connection string for key '{key}' and no '{DEFAULT_CONNECTION}' fallback"
                    ))
                })?,
        };
        if value.trim().is_empty() {
            return Err(ComposeError::Configuration(format!(
                "connection string for key '{key}' is empty"
            )));
        }
        Ok(value)
    }

    /// Whether `key` has a dedicated (non-fallback) entry.
    #[must_use]
    pub fn has_dedicated(&self, key: &str) -> bool {
        self.connections.contains_key(&key.to_ascii_lowercase())
    }
}
