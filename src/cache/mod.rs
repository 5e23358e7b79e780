//! The schema cache: resolved metadata, its build, and the shared handle
//! readers go through.
//!
//! # Layout
//!
//! ```text
//! types         SchemaCache and the resolved *Info types
//! build         Metadata ─▶ SchemaCache (+ inconsistency ledger, dependency graph)
//! reference     SchemaCacheRef: snapshot reads, serialised swaps
//! invalidation  what a rebuild refetches and why it runs
//! hash          content hashes and fingerprints
//! ```

pub mod build;
pub mod hash;
pub mod invalidation;
pub mod reference;
pub mod types;

pub use build::{build_schema_cache, BuildArtifacts, BuildContext, BuildInputs, BuildOutput};
pub use hash::{compute_hash, fingerprint, metadata_hash};
pub use invalidation::{BuildReason, CacheInvalidations};
pub use reference::{CacheSnapshot, MetadataVersionGauge, Rebuilt, SchemaCacheRef, SchemaCacheVer};
pub use types::SchemaCache;
