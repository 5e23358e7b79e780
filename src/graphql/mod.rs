//! The GraphQL surface of a schema cache: root fields, saved-query checks and
//! remote schema permission documents.
//!
//! Building the full GraphQL schema is not done here. The build only needs to
//! know which root fields exist, who owns them, and whether a saved query
//! asks for fields that are gone.

pub mod document;

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::cache::types::{AnalyzedOperation, TableInfo};
use crate::schema::MetadataObjId;
use document::{parse_document, Document, OperationKind, Selection};

/// Fields every root type answers.
const INTROSPECTION_FIELDS: [&str; 3] = ["__typename", "__schema", "__type"];

// ============================================================================
// Root fields
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootType {
    Query,
    Mutation,
}

impl RootType {
    pub fn type_name(self) -> &'static str {
        match self {
            RootType::Query => "query_root",
            RootType::Mutation => "mutation_root",
        }
    }
}

/// Root field name to the metadata object serving it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RootFields {
    pub query: BTreeMap<String, MetadataObjId>,
    pub mutation: BTreeMap<String, MetadataObjId>,
}

impl RootFields {
    pub fn root(&self, root: RootType) -> &BTreeMap<String, MetadataObjId> {
        match root {
            RootType::Query => &self.query,
            RootType::Mutation => &self.mutation,
        }
    }

    pub fn has_field(&self, root: RootType, name: &str) -> bool {
        INTROSPECTION_FIELDS.contains(&name) || self.root(root).contains_key(name)
    }
}

/// A root field as claimed by one object, before conflicts are resolved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RootFieldClaim {
    pub root: RootType,
    pub name: String,
    pub owner: MetadataObjId,
}

/// Claims that could not all be honoured: several owners for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct RootFieldConflict {
    pub root: RootType,
    pub name: String,
    pub owners: Vec<MetadataObjId>,
}

impl RootFieldConflict {
    pub fn reason(&self) -> String {
        format!(
            "conflicting definitions for field \"{}\" of type \"{}\"",
            self.name,
            self.root.type_name()
        )
    }
}

/// Root fields generated for a table, custom names applied.
pub fn table_root_fields(table: &TableInfo) -> Vec<(RootType, String)> {
    let base = &table.graphql_name;
    let custom = &table.custom_root_fields;
    let has_pk = table.primary_key.is_some();
    let pick = |custom: &Option<String>, default: String| custom.clone().unwrap_or(default);

    let mut fields = vec![
        (RootType::Query, pick(&custom.select, base.clone())),
        (
            RootType::Query,
            pick(&custom.select_aggregate, format!("{}_aggregate", base)),
        ),
        (RootType::Mutation, pick(&custom.insert, format!("insert_{}", base))),
        (
            RootType::Mutation,
            pick(&custom.insert_one, format!("insert_{}_one", base)),
        ),
        (RootType::Mutation, pick(&custom.update, format!("update_{}", base))),
        (RootType::Mutation, pick(&custom.delete, format!("delete_{}", base))),
    ];
    if has_pk {
        fields.push((
            RootType::Query,
            pick(&custom.select_by_pk, format!("{}_by_pk", base)),
        ));
        fields.push((
            RootType::Mutation,
            pick(&custom.update_by_pk, format!("update_{}_by_pk", base)),
        ));
        fields.push((
            RootType::Mutation,
            pick(&custom.delete_by_pk, format!("delete_{}_by_pk", base)),
        ));
    }
    fields
}

/// Fold claims into root fields, separating out every contested name.
pub fn resolve_root_fields(claims: Vec<RootFieldClaim>) -> (RootFields, Vec<RootFieldConflict>) {
    let mut by_name: BTreeMap<(RootType, String), Vec<MetadataObjId>> = BTreeMap::new();
    for claim in claims {
        let owners = by_name.entry((claim.root, claim.name)).or_default();
        if !owners.contains(&claim.owner) {
            owners.push(claim.owner);
        }
    }

    let mut fields = RootFields::default();
    let mut conflicts = Vec::new();
    for ((root, name), mut owners) in by_name {
        if owners.len() == 1 {
            let owner = owners.remove(0);
            match root {
                RootType::Query => fields.query.insert(name, owner),
                RootType::Mutation => fields.mutation.insert(name, owner),
            };
        } else {
            conflicts.push(RootFieldConflict { root, name, owners });
        }
    }
    (fields, conflicts)
}

// ============================================================================
// Saved queries
// ============================================================================

/// Check a saved query against the root fields.
///
/// Fails when the document does not parse, is ambiguous, uses an undefined
/// fragment, or selects a root field that does not exist.
pub fn analyze_query(query: &str, roots: &RootFields) -> Result<Vec<AnalyzedOperation>, String> {
    let doc = parse_document(query).map_err(|e| format!("query parse error: {}", e))?;

    check_unambiguous(&doc)?;

    let fragments = doc.fragment_map();
    let mut analyzed = Vec::with_capacity(doc.operations.len());
    for op in &doc.operations {
        let root = match op.kind {
            OperationKind::Mutation => RootType::Mutation,
            OperationKind::Query | OperationKind::Subscription => RootType::Query,
        };

        let mut root_fields = BTreeSet::new();
        let mut visiting = Vec::new();
        collect_top_level(&op.selection_set, &fragments, &mut visiting, &mut root_fields)?;

        for field in &root_fields {
            if !roots.has_field(root, field) {
                return Err(format!(
                    "field \"{}\" not found in type: '{}'",
                    field,
                    root.type_name()
                ));
            }
        }

        analyzed.push(AnalyzedOperation {
            name: op.name.clone(),
            kind: op.kind,
            root_fields,
        });
    }
    Ok(analyzed)
}

fn check_unambiguous(doc: &Document) -> Result<(), String> {
    if doc.operations.is_empty() {
        return Err("the query contains no operations".to_string());
    }
    if doc.operations.len() > 1 && doc.operations.iter().any(|op| op.name.is_none()) {
        return Err(
            "ambiguous query: an anonymous operation must be the only operation in the document"
                .to_string(),
        );
    }

    let mut names = BTreeSet::new();
    for name in doc.operations.iter().filter_map(|op| op.name.as_deref()) {
        if !names.insert(name) {
            return Err(format!("ambiguous query: operation \"{}\" is defined more than once", name));
        }
    }

    let mut fragment_names = BTreeSet::new();
    for fragment in &doc.fragments {
        if !fragment_names.insert(fragment.name.as_str()) {
            return Err(format!("fragment \"{}\" is defined more than once", fragment.name));
        }
    }
    Ok(())
}

/// Gather the field names selected at the top level of an operation,
/// looking through fragment spreads and inline fragments. Every spread in
/// the operation, nested ones included, must name a defined fragment.
fn collect_top_level<'a>(
    selections: &'a [Selection],
    fragments: &BTreeMap<&str, &'a document::Fragment>,
    visiting: &mut Vec<&'a str>,
    out: &mut BTreeSet<String>,
) -> Result<(), String> {
    for selection in selections {
        match selection {
            Selection::Field {
                name, selection_set, ..
            } => {
                out.insert(name.clone());
                check_nested_spreads(selection_set, fragments, visiting)?;
            }
            Selection::InlineFragment { selection_set, .. } => {
                collect_top_level(selection_set, fragments, visiting, out)?;
            }
            Selection::FragmentSpread { name } => {
                let fragment = resolve_spread(name, fragments, visiting)?;
                visiting.push(fragment.name.as_str());
                collect_top_level(&fragment.selection_set, fragments, visiting, out)?;
                visiting.pop();
            }
        }
    }
    Ok(())
}

fn check_nested_spreads<'a>(
    selections: &'a [Selection],
    fragments: &BTreeMap<&str, &'a document::Fragment>,
    visiting: &mut Vec<&'a str>,
) -> Result<(), String> {
    for selection in selections {
        match selection {
            Selection::Field { selection_set, .. }
            | Selection::InlineFragment { selection_set, .. } => {
                check_nested_spreads(selection_set, fragments, visiting)?;
            }
            Selection::FragmentSpread { name } => {
                let fragment = resolve_spread(name, fragments, visiting)?;
                visiting.push(fragment.name.as_str());
                check_nested_spreads(&fragment.selection_set, fragments, visiting)?;
                visiting.pop();
            }
        }
    }
    Ok(())
}

fn resolve_spread<'a>(
    name: &str,
    fragments: &BTreeMap<&str, &'a document::Fragment>,
    visiting: &[&str],
) -> Result<&'a document::Fragment, String> {
    if visiting.contains(&name) {
        return Err(format!("fragment \"{}\" spreads itself", name));
    }
    fragments
        .get(name)
        .copied()
        .ok_or_else(|| format!("fragment \"{}\" is not defined", name))
}

// ============================================================================
// Remote schema permission documents
// ============================================================================

/// Root fields declared by a schema document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SdlRoots {
    pub query: BTreeSet<String>,
    pub mutation: BTreeSet<String>,
}

static SCHEMA_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"schema\s*\{([^}]*)\}").expect("static schema block pattern")
});

static ROOT_OPERATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(query|mutation|subscription)\s*:\s*([_A-Za-z][_0-9A-Za-z]*)")
        .expect("static root operation pattern")
});

static TYPE_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\btype\s+([_A-Za-z][_0-9A-Za-z]*)[^{]*\{")
        .expect("static type header pattern")
});

static FIELD_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([_A-Za-z][_0-9A-Za-z]*)\s*:\s*[\[_A-Za-z]").expect("static field pattern")
});

static STRINGS_AND_COMMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)"""(.*?)"""|"(?:[^"\\]|\\.)*"|#[^\n]*"#).expect("static string pattern")
});

/// Read the query and mutation root fields out of a schema document.
///
/// Only object type definitions are interpreted; everything else in the
/// document is ignored. Root type names come from a `schema { ... }` block
/// when present, else `Query` and `Mutation`.
pub fn parse_sdl_roots(sdl: &str) -> Result<SdlRoots, String> {
    let cleaned = STRINGS_AND_COMMENTS.replace_all(sdl, " ");
    let cleaned = cleaned.as_ref();

    let mut query_type = "Query".to_string();
    let mut mutation_type = "Mutation".to_string();
    if let Some(block) = SCHEMA_BLOCK.captures(cleaned) {
        for op in ROOT_OPERATION.captures_iter(&block[1]) {
            match &op[1] {
                "query" => query_type = op[2].to_string(),
                "mutation" => mutation_type = op[2].to_string(),
                _ => {}
            }
        }
    }

    let mut roots = SdlRoots::default();
    let mut saw_query = false;
    for header in TYPE_HEADER.captures_iter(cleaned) {
        let type_name = &header[1];
        let Some(whole) = header.get(0) else {
            continue;
        };
        let body = type_body(&cleaned[whole.end()..])
            .ok_or_else(|| format!("unterminated definition of type \"{}\"", type_name))?;
        let body = strip_arguments(body);
        let fields = FIELD_DEF
            .captures_iter(&body)
            .map(|c| c[1].to_string());

        if type_name == query_type {
            saw_query = true;
            roots.query.extend(fields);
        } else if type_name == mutation_type {
            roots.mutation.extend(fields);
        }
    }

    if !saw_query {
        return Err(format!("the schema document does not define the query type \"{}\"", query_type));
    }
    Ok(roots)
}

/// Text up to the brace closing an already opened block.
fn type_body(rest: &str) -> Option<&str> {
    let mut depth = 1usize;
    for (idx, c) in rest.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[..idx]);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_arguments(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut depth = 0usize;
    for c in body.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}
