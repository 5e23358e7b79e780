//! Typed "depends on" edges between schema objects.
//!
//! Edges point from the dependent object to the object it depends on. The
//! graph is rebuilt from scratch on every schema cache build.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;

use super::object::{MetadataObjId, MetadataObject, SchemaObjId};

/// Why one schema object depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyReason {
    Table,
    Column,
    RemoteTable,
    LeftColumn,
    RightColumn,
    UsingColumn,
    Fkey,
    RemoteFkey,
    Untyped,
    OnType,
    Payload,
    Parent,
    SessionVariable,
    Function,
    RemoteSchema,
    LogicalModel,
    ReferencedLogicalModel,
    DataConnector,
    Query,
}

impl fmt::Display for DependencyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DependencyReason::Table => "table",
            DependencyReason::Column => "column",
            DependencyReason::RemoteTable => "remote_table",
            DependencyReason::LeftColumn => "left_column",
            DependencyReason::RightColumn => "right_column",
            DependencyReason::UsingColumn => "using_col",
            DependencyReason::Fkey => "fkey",
            DependencyReason::RemoteFkey => "remote_fkey",
            DependencyReason::Untyped => "untyped",
            DependencyReason::OnType => "on_type",
            DependencyReason::Payload => "payload",
            DependencyReason::Parent => "parent",
            DependencyReason::SessionVariable => "session_variable",
            DependencyReason::Function => "function",
            DependencyReason::RemoteSchema => "remote_schema",
            DependencyReason::LogicalModel => "logical_model",
            DependencyReason::ReferencedLogicalModel => "referenced_logical_model",
            DependencyReason::DataConnector => "data_connector",
            DependencyReason::Query => "query",
        };
        f.write_str(s)
    }
}

/// One outgoing edge: the object depended on and why.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SchemaDependency {
    pub target: SchemaObjId,
    pub reason: DependencyReason,
}

impl SchemaDependency {
    pub fn new(target: SchemaObjId, reason: DependencyReason) -> Self {
        Self { target, reason }
    }
}

/// A dependency recorded while resolving a metadata object.
///
/// `schema_obj` is the resolved entity that owns the edge; `owner` is the
/// metadata object to blame if the dependency turns out to be missing.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataDependency {
    pub owner: MetadataObject,
    pub schema_obj: SchemaObjId,
    pub dependency: SchemaDependency,
}

/// The dependency index of a schema cache.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<SchemaObjId, DependencyReason>,

    /// Index: schema object → NodeIndex
    node_index: HashMap<SchemaObjId, NodeIndex>,

    /// Which metadata object produced each dependent schema object.
    owners: HashMap<SchemaObjId, MetadataObjId>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold recorded dependencies into a graph.
    pub fn from_dependencies<'a>(deps: impl IntoIterator<Item = &'a MetadataDependency>) -> Self {
        let mut graph = Self::new();
        for dep in deps {
            graph.add_dependency(&dep.schema_obj, &dep.dependency);
            graph
                .owners
                .entry(dep.schema_obj.clone())
                .or_insert_with(|| dep.owner.id.clone());
        }
        graph
    }

    fn node(&mut self, id: &SchemaObjId) -> NodeIndex {
        if let Some(idx) = self.node_index.get(id) {
            return *idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.node_index.insert(id.clone(), idx);
        idx
    }

    /// Record that `dependent` depends on `dependency.target`.
    pub fn add_dependency(&mut self, dependent: &SchemaObjId, dependency: &SchemaDependency) {
        let from = self.node(dependent);
        let to = self.node(&dependency.target);
        let exists = self
            .graph
            .edges_connecting(from, to)
            .any(|e| *e.weight() == dependency.reason);
        if !exists {
            self.graph.add_edge(from, to, dependency.reason);
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Metadata object that owns the edges leaving `id`.
    pub fn owner_of(&self, id: &SchemaObjId) -> Option<&MetadataObjId> {
        self.owners.get(id)
    }

    /// Outgoing edges of `id`, sorted.
    pub fn dependencies_of(&self, id: &SchemaObjId) -> Vec<SchemaDependency> {
        let Some(&idx) = self.node_index.get(id) else {
            return Vec::new();
        };
        let mut deps: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| SchemaDependency::new(self.graph[e.target()].clone(), *e.weight()))
            .collect();
        deps.sort();
        deps
    }

    /// Objects with an edge pointing directly at `id`.
    pub fn direct_dependents(&self, id: &SchemaObjId) -> Vec<(SchemaObjId, DependencyReason)> {
        let Some(&idx) = self.node_index.get(id) else {
            return Vec::new();
        };
        let mut deps: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (self.graph[e.source()].clone(), *e.weight()))
            .collect();
        deps.sort();
        deps
    }

    /// Every object that would be left dangling if `target` were dropped.
    ///
    /// An object depends on `target` when it has an edge to `target` or to any
    /// object nested in it (a column of a dropped table, say). The search is
    /// transitive. Objects nested in `target` go away with it and are never
    /// reported.
    pub fn dependents_of(&self, target: &SchemaObjId) -> BTreeSet<SchemaObjId> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::from([target.clone()]);
        let mut visited = BTreeSet::new();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for (idx, node) in self.graph.node_indices().map(|i| (i, &self.graph[i])) {
                if !node.is_within(&current) {
                    continue;
                }
                for edge in self.graph.edges_directed(idx, Direction::Incoming) {
                    let dependent = &self.graph[edge.source()];
                    if dependent.is_within(target) || dependent.is_within(&current) {
                        continue;
                    }
                    if found.insert(dependent.clone()) {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }

        found
    }

    /// Dependents of `target` grouped by the metadata object that owns them.
    pub fn dependent_metadata_objects(&self, target: &SchemaObjId) -> BTreeMap<MetadataObjId, Vec<SchemaObjId>> {
        let mut grouped: BTreeMap<MetadataObjId, Vec<SchemaObjId>> = BTreeMap::new();
        for dependent in self.dependents_of(target) {
            if let Some(owner) = self.owner_of(&dependent) {
                grouped.entry(owner.clone()).or_default().push(dependent);
            }
        }
        grouped
    }

    /// All edges, as (dependent, dependency) pairs in sorted order.
    pub fn edges(&self) -> Vec<(SchemaObjId, SchemaDependency)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].clone(),
                    SchemaDependency::new(self.graph[e.target()].clone(), *e.weight()),
                )
            })
            .collect();
        edges.sort();
        edges
    }
}
