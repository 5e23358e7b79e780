//! Structural validation of a metadata document.
//!
//! These checks need nothing but the document itself. Anything that requires
//! database introspection is left to the schema cache build, where a failure
//! quarantines one object instead of rejecting the whole document.

use std::collections::HashSet;
use std::hash::Hash;

use super::Metadata;

/// Validation error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Two objects of the same kind share a name within one scope.
    #[error("Duplicate {entity_type} name '{name}'{}", .scope.as_ref().map(|s| format!(" in {}", s)).unwrap_or_default())]
    DuplicateName {
        entity_type: String,
        name: String,
        scope: Option<String>,
    },
    /// A definition is malformed in a way no database state could fix.
    #[error("{entity_type} '{name}' is invalid: {issue}")]
    InvalidDefinition {
        entity_type: String,
        name: String,
        issue: String,
    },
}

/// Validate a metadata document.
pub fn validate(metadata: &Metadata) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_unique_names(metadata, &mut errors);
    validate_definitions(metadata, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_unique<'a, T, I>(
    names: I,
    entity_type: &str,
    scope: Option<String>,
    errors: &mut Vec<ValidationError>,
) where
    T: Eq + Hash + std::fmt::Display + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            errors.push(ValidationError::DuplicateName {
                entity_type: entity_type.to_string(),
                name: name.to_string(),
                scope: scope.clone(),
            });
        }
    }
}

fn validate_unique_names(metadata: &Metadata, errors: &mut Vec<ValidationError>) {
    check_unique(metadata.sources.iter().map(|s| &s.name), "source", None, errors);

    for source in &metadata.sources {
        let scope = Some(format!("source {}", source.name));
        check_unique(source.tables.iter().map(|t| &t.table), "table", scope.clone(), errors);
        check_unique(
            source.functions.iter().map(|f| &f.function),
            "function",
            scope.clone(),
            errors,
        );
        check_unique(
            source.logical_models.iter().map(|m| &m.name),
            "logical model",
            scope.clone(),
            errors,
        );
        check_unique(
            source.native_queries.iter().map(|q| &q.root_field_name),
            "native query",
            scope.clone(),
            errors,
        );
        check_unique(
            source
                .tables
                .iter()
                .flat_map(|t| t.event_triggers.iter().map(|e| &e.name)),
            "event trigger",
            scope.clone(),
            errors,
        );

        for table in &source.tables {
            let scope = Some(format!("table {} in source {}", table.table, source.name));
            check_unique(table.relationship_names(), "relationship", scope.clone(), errors);
            check_unique(
                table.computed_fields.iter().map(|c| &c.name),
                "computed field",
                scope.clone(),
                errors,
            );
            check_unique(
                table.select_permissions.iter().map(|p| &p.role),
                "select permission",
                scope.clone(),
                errors,
            );
            check_unique(
                table.insert_permissions.iter().map(|p| &p.role),
                "insert permission",
                scope.clone(),
                errors,
            );
            check_unique(
                table.update_permissions.iter().map(|p| &p.role),
                "update permission",
                scope.clone(),
                errors,
            );
            check_unique(
                table.delete_permissions.iter().map(|p| &p.role),
                "delete permission",
                scope,
                errors,
            );
        }

        for model in &source.logical_models {
            let scope = Some(format!("logical model {}", model.name));
            check_unique(model.fields.iter().map(|f| &f.name), "field", scope.clone(), errors);
            check_unique(
                model.select_permissions.iter().map(|p| &p.role),
                "select permission",
                scope,
                errors,
            );
        }
    }

    check_unique(
        metadata.remote_schemas.iter().map(|r| &r.name),
        "remote schema",
        None,
        errors,
    );
    for remote in &metadata.remote_schemas {
        check_unique(
            remote.permissions.iter().map(|p| &p.role),
            "remote schema permission",
            Some(format!("remote schema {}", remote.name)),
            errors,
        );
    }

    check_unique(
        metadata.query_collections.iter().map(|c| &c.name),
        "query collection",
        None,
        errors,
    );
    for collection in &metadata.query_collections {
        check_unique(
            collection.definition.queries.iter().map(|q| &q.name),
            "query",
            Some(format!("collection {}", collection.name)),
            errors,
        );
    }

    check_unique(
        metadata.allowlist.iter().map(|a| &a.collection),
        "allowlist entry",
        None,
        errors,
    );
    check_unique(
        metadata.rest_endpoints.iter().map(|e| &e.name),
        "rest endpoint",
        None,
        errors,
    );
}

fn validate_definitions(metadata: &Metadata, errors: &mut Vec<ValidationError>) {
    for remote in &metadata.remote_schemas {
        let def = &remote.definition;
        if def.url.is_some() == def.url_from_env.is_some() {
            errors.push(ValidationError::InvalidDefinition {
                entity_type: "Remote schema".to_string(),
                name: remote.name.to_string(),
                issue: "exactly one of url / url_from_env is expected".to_string(),
            });
        }
    }

    for source in &metadata.sources {
        for table in &source.tables {
            for trigger in &table.event_triggers {
                if trigger.webhook.is_some() == trigger.webhook_from_env.is_some() {
                    errors.push(ValidationError::InvalidDefinition {
                        entity_type: "Event trigger".to_string(),
                        name: trigger.name.to_string(),
                        issue: "exactly one of webhook / webhook_from_env is expected".to_string(),
                    });
                }
                if trigger.definition.is_empty() {
                    errors.push(ValidationError::InvalidDefinition {
                        entity_type: "Event trigger".to_string(),
                        name: trigger.name.to_string(),
                        issue: "at least one operation must be subscribed".to_string(),
                    });
                }
            }
        }
    }

    for endpoint in &metadata.rest_endpoints {
        if endpoint.methods.is_empty() {
            errors.push(ValidationError::InvalidDefinition {
                entity_type: "REST endpoint".to_string(),
                name: endpoint.name.to_string(),
                issue: "at least one method is expected".to_string(),
            });
        }
    }
}
