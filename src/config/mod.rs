//! Configuration for the schema cache engine.
//!
//! Handles the settings file, environment variables and the rebuildable
//! application context.

mod context;
mod settings;

pub use context::{AppContext, Environment, FeatureFlags};
pub use settings::{
    expand_env_vars, LoggingSettings, MetadataSettings, Settings, SettingsError, StoreKind,
};
