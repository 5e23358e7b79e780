//! Schema object identity and the dependency graph.

pub mod dependency;
pub mod object;

pub use dependency::{DependencyGraph, DependencyReason, MetadataDependency, SchemaDependency};
pub use object::{
    LogicalModelMetadataObjId, LogicalModelObjId, MetadataObjId, MetadataObject, SchemaObjId,
    SourceMetadataObjId, SourceObjId, TableMetadataObjId, TableObjId,
};
