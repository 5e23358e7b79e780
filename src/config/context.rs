//! The rebuildable application context.
//!
//! Everything a schema cache build reads besides the metadata document lives
//! here: feature flags and the captured process environment. Changing the
//! context forces a rebuild.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Experimental features gated at build time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub native_queries: bool,
    pub logical_models: bool,
    pub remote_schema_permissions: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            native_queries: true,
            logical_models: true,
            remote_schema_permissions: false,
        }
    }
}

/// A snapshot of environment variables, used for `*_from_env` settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(BTreeMap<String, String>);

impl Environment {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Self(std::env::vars().collect())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppContext {
    /// Identifies this engine instance in logs and catalog-sync bookkeeping.
    pub instance_id: uuid::Uuid,
    pub features: FeatureFlags,
    pub environment: Environment,
}

impl AppContext {
    pub fn new(features: FeatureFlags, environment: Environment) -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4(),
            features,
            environment,
        }
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new(FeatureFlags::default(), Environment::default())
    }
}
