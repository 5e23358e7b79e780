//! What a rebuild must refetch, and why it is running.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::metadata::names::*;

/// Cached state a rebuild must throw away.
///
/// Combines by union; [`CacheInvalidations::default`] invalidates nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheInvalidations {
    /// Re-read the metadata document from the store before building.
    pub metadata: bool,
    pub remote_schemas: BTreeSet<RemoteSchemaName>,
    pub sources: BTreeSet<SourceName>,
    pub data_connectors: BTreeSet<DataConnectorName>,
}

impl CacheInvalidations {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !self.metadata
            && self.remote_schemas.is_empty()
            && self.sources.is_empty()
            && self.data_connectors.is_empty()
    }

    pub fn union(mut self, other: CacheInvalidations) -> Self {
        self.metadata |= other.metadata;
        self.remote_schemas.extend(other.remote_schemas);
        self.sources.extend(other.sources);
        self.data_connectors.extend(other.data_connectors);
        self
    }

    pub fn with_source(mut self, source: SourceName) -> Self {
        self.sources.insert(source);
        self
    }

    pub fn with_remote_schema(mut self, name: RemoteSchemaName) -> Self {
        self.remote_schemas.insert(name);
        self
    }

    pub fn with_data_connector(mut self, name: DataConnectorName) -> Self {
        self.data_connectors.insert(name);
        self
    }
}

impl std::iter::Sum for CacheInvalidations {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Self::union)
    }
}

/// Why a build runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildReason {
    /// This instance changed the catalog. Database side effects (event
    /// trigger installation) run for the listed sources, or for every
    /// source when `None`.
    CatalogUpdate(Option<BTreeSet<SourceName>>),
    /// Another instance changed the catalog; this build must not touch the
    /// databases.
    CatalogSync,
}

impl BuildReason {
    /// An update affecting every source.
    pub fn update_all() -> Self {
        BuildReason::CatalogUpdate(None)
    }

    pub fn update_source(source: &SourceName) -> Self {
        BuildReason::CatalogUpdate(Some(BTreeSet::from([source.clone()])))
    }

    /// Whether database side effects run for `source`.
    pub fn affects(&self, source: &SourceName) -> bool {
        match self {
            BuildReason::CatalogUpdate(None) => true,
            BuildReason::CatalogUpdate(Some(sources)) => sources.contains(source),
            BuildReason::CatalogSync => false,
        }
    }

    pub fn is_sync(&self) -> bool {
        matches!(self, BuildReason::CatalogSync)
    }
}
