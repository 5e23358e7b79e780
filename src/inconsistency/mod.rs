//! The inconsistency ledger.
//!
//! A schema cache build never aborts because one object fails to resolve.
//! The failure is written to the ledger, the object is left out of the cache,
//! and the build moves on. The ledger is grow-only and keeps insertion order.

use std::collections::{BTreeSet, HashSet};

use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::schema::{MetadataObjId, MetadataObject};

/// Why a single object could not be resolved.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("{reason}")]
    Failed {
        reason: String,
        context: Option<Value>,
    },

    /// A failure that must not show up in the ledger at all.
    #[error("object is hidden")]
    Hidden,
}

pub type ResolveResult<T> = Result<T, ResolveError>;

impl ResolveError {
    pub fn new(reason: impl Into<String>) -> Self {
        ResolveError::Failed {
            reason: reason.into(),
            context: None,
        }
    }

    pub fn with_context(reason: impl Into<String>, context: Value) -> Self {
        ResolveError::Failed {
            reason: reason.into(),
            context: Some(context),
        }
    }

    /// `no such <kind> exists: <name>`
    pub fn not_exists(kind: &str, name: impl std::fmt::Display) -> Self {
        Self::new(format!("no such {} exists: {}", kind, name))
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub enum InconsistentMetadata {
    /// A single object failed to resolve.
    Object {
        object: MetadataObject,
        reason: String,
        context: Option<Value>,
    },
    /// Several objects claim the same name (GraphQL root field, REST route).
    Conflicting {
        objects: Vec<MetadataObject>,
        reason: String,
    },
    /// The same object id is defined more than once.
    Duplicate { objects: Vec<MetadataObject> },
}

impl InconsistentMetadata {
    pub fn reason(&self) -> String {
        match self {
            InconsistentMetadata::Object { reason, .. } => reason.clone(),
            InconsistentMetadata::Conflicting { reason, .. } => reason.clone(),
            InconsistentMetadata::Duplicate { objects } => match objects.first() {
                Some(obj) => format!("multiple definitions for {}", obj.id),
                None => "multiple definitions".to_string(),
            },
        }
    }

    pub fn objects(&self) -> Vec<&MetadataObject> {
        match self {
            InconsistentMetadata::Object { object, .. } => vec![object],
            InconsistentMetadata::Conflicting { objects, .. }
            | InconsistentMetadata::Duplicate { objects } => objects.iter().collect(),
        }
    }

    pub fn object_ids(&self) -> Vec<MetadataObjId> {
        let mut ids: Vec<_> = self.objects().into_iter().map(|o| o.id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn involves(&self, id: &MetadataObjId) -> bool {
        self.objects().iter().any(|o| &o.id == id)
    }

    fn key(&self) -> (Vec<MetadataObjId>, String) {
        (self.object_ids(), self.reason())
    }

    /// The report entry, as returned by `get_inconsistent_metadata`.
    pub fn to_json(&self) -> Value {
        fn describe(object: &MetadataObject) -> Value {
            json!({
                "definition": object.definition,
                "name": object.id.name(),
                "type": object.id.object_type(),
            })
        }

        match self {
            InconsistentMetadata::Object {
                object,
                reason,
                context,
            } => {
                let mut value = describe(object);
                if let Value::Object(map) = &mut value {
                    map.insert("reason".to_string(), Value::String(reason.clone()));
                    if let Some(context) = context {
                        map.insert("context".to_string(), context.clone());
                    }
                }
                value
            }
            InconsistentMetadata::Conflicting { objects, reason } => json!({
                "reason": reason,
                "type": "conflicting_objects",
                "objects": objects.iter().map(describe).collect::<Vec<_>>(),
            }),
            InconsistentMetadata::Duplicate { objects } => json!({
                "reason": self.reason(),
                "type": "duplicate_objects",
                "objects": objects.iter().map(describe).collect::<Vec<_>>(),
            }),
        }
    }
}

impl Serialize for InconsistentMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Per-build accumulator of inconsistencies.
#[derive(Debug, Clone, Default)]
pub struct InconsistencyLedger {
    entries: Vec<InconsistentMetadata>,
    seen: HashSet<(Vec<MetadataObjId>, String)>,
}

impl InconsistencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry unless an identical (ids, reason) entry exists.
    pub fn push(&mut self, entry: InconsistentMetadata) {
        if self.seen.insert(entry.key()) {
            if let Some(first) = entry.objects().first() {
                tracing::debug!(object = %first.id, reason = %entry.reason(), "recorded inconsistency");
            }
            self.entries.push(entry);
        }
    }

    pub fn record(&mut self, object: MetadataObject, reason: impl Into<String>, context: Option<Value>) {
        self.push(InconsistentMetadata::Object {
            object,
            reason: reason.into(),
            context,
        });
    }

    /// One failure that invalidates several sibling objects.
    pub fn record_many(&mut self, objects: impl IntoIterator<Item = MetadataObject>, reason: &str) {
        for object in objects {
            self.record(object, reason, None);
        }
    }

    pub fn record_conflict(&mut self, objects: Vec<MetadataObject>, reason: impl Into<String>) {
        self.push(InconsistentMetadata::Conflicting {
            objects,
            reason: reason.into(),
        });
    }

    pub fn record_duplicate(&mut self, objects: Vec<MetadataObject>) {
        self.push(InconsistentMetadata::Duplicate { objects });
    }

    /// Record a resolution failure against `object` and yield `None`, or
    /// pass a success through.
    pub fn with_record<T>(&mut self, object: &MetadataObject, result: ResolveResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(ResolveError::Hidden) => None,
            Err(ResolveError::Failed { reason, context }) => {
                self.record(object.clone(), reason, context);
                None
            }
        }
    }

    /// As [`with_record`](Self::with_record), blaming every object in `objects`.
    pub fn with_record_many<T>(&mut self, objects: &[MetadataObject], result: ResolveResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(ResolveError::Hidden) => None,
            Err(ResolveError::Failed { reason, context }) => {
                for object in objects {
                    self.record(object.clone(), reason.clone(), context.clone());
                }
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InconsistentMetadata> {
        self.entries.iter()
    }

    pub fn is_inconsistent(&self, id: &MetadataObjId) -> bool {
        self.entries.iter().any(|e| e.involves(id))
    }

    pub fn into_entries(self) -> Vec<InconsistentMetadata> {
        self.entries
    }
}

/// Every object id mentioned by a set of entries.
pub fn inconsistent_ids(entries: &[InconsistentMetadata]) -> BTreeSet<MetadataObjId> {
    entries.iter().flat_map(|e| e.object_ids()).collect()
}

/// Entries of `new` that mention an object id absent from `old`.
pub fn new_inconsistencies<'a>(
    old: &[InconsistentMetadata],
    new: &'a [InconsistentMetadata],
) -> Vec<&'a InconsistentMetadata> {
    let old_ids = inconsistent_ids(old);
    new.iter()
        .filter(|e| e.object_ids().iter().any(|id| !old_ids.contains(id)))
        .collect()
}

/// Reasons recorded against `id`, in ledger order.
pub fn reasons_for(entries: &[InconsistentMetadata], id: &MetadataObjId) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.involves(id))
        .map(|e| e.reason())
        .collect()
}

/// Whether two ledgers record different sets of (ids, reason).
pub fn ledger_changed(old: &[InconsistentMetadata], new: &[InconsistentMetadata]) -> bool {
    let keys = |entries: &[InconsistentMetadata]| -> BTreeSet<(Vec<MetadataObjId>, String)> {
        entries.iter().map(|e| e.key()).collect()
    };
    keys(old) != keys(new)
}

/// Response of `get_inconsistent_metadata`.
#[derive(Debug, Clone, Serialize)]
pub struct InconsistencyReport {
    pub is_consistent: bool,
    pub inconsistent_objects: Vec<InconsistentMetadata>,
}

impl InconsistencyReport {
    pub fn new(entries: &[InconsistentMetadata]) -> Self {
        Self {
            is_consistent: entries.is_empty(),
            inconsistent_objects: entries.to_vec(),
        }
    }
}
