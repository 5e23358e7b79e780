//! Logical models, their permissions, and native queries.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::Builder;
use crate::backend::BackendMetadata;
use crate::cache::types::{AnnBoolExp, LogicalModelInfo, LogicalModelPermInfo, NativeQueryInfo};
use crate::inconsistency::{ResolveError, ResolveResult};
use crate::metadata::logical::{
    LogicalModelMetadata, LogicalModelSelectPermission, LogicalModelType, NativeQueryMetadata,
};
use crate::metadata::names::*;
use crate::metadata::source::{PermColumns, PermDef, SourceMetadata};
use crate::schema::{
    DependencyReason, LogicalModelMetadataObjId, MetadataObjId, MetadataObject, SchemaDependency,
    SchemaObjId, SourceMetadataObjId,
};

/// `{{name}}` argument references in native query code.
static ARGUMENT_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([_A-Za-z][_0-9A-Za-z]*)\s*\}\}").expect("static argument pattern")
});

fn model_permission_id(source: &SourceName, model: &LogicalModelName, role: &RoleName) -> MetadataObjId {
    MetadataObjId::SourceObj {
        source: source.clone(),
        object: SourceMetadataObjId::LogicalModelObj {
            name: model.clone(),
            object: LogicalModelMetadataObjId::Permission { role: role.clone() },
        },
    }
}

impl<'a> Builder<'a> {
    pub(super) fn resolve_logical_models(&mut self, source: &'a SourceMetadata) {
        let enabled = self.ctx.app.features.logical_models;
        let models = self.unique(
            &source.logical_models,
            |m| m.name.clone(),
            |m| MetadataObjId::logical_model(&source.name, &m.name),
        );
        let declared: BTreeSet<&LogicalModelName> = models.iter().map(|m| &m.name).collect();

        let mut resolved = Vec::new();
        for model in &models {
            let object = MetadataObject::from_def(
                MetadataObjId::logical_model(&source.name, &model.name),
                *model,
            );
            let result = if enabled {
                self.build_logical_model(&source.name, model, &declared)
            } else {
                Err(ResolveError::new("logical models are disabled"))
            };
            if let Some((info, deps)) = self.record(&object, result) {
                self.depend_all(&object, deps);
                if let Some(s) = self.cache.sources.get_mut(&source.name) {
                    s.logical_models.insert(info.name.clone(), info);
                }
                resolved.push(*model);
            }
        }

        for model in resolved {
            self.resolve_logical_model_permissions(source, model);
        }
    }

    fn build_logical_model(
        &self,
        source: &SourceName,
        model: &LogicalModelMetadata,
        declared: &BTreeSet<&LogicalModelName>,
    ) -> ResolveResult<(LogicalModelInfo, Vec<SchemaDependency>)> {
        let mut fields = BTreeMap::new();
        let mut deps = Vec::new();

        for field in &model.fields {
            if fields.contains_key(&field.name) {
                return Err(ResolveError::new(format!(
                    "field \"{}\" is defined more than once",
                    field.name
                )));
            }
            if let Some(scalar) = field.field_type.scalar_type() {
                if !self.known_scalar(source, scalar) {
                    return Err(ResolveError::new(format!(
                        "field \"{}\" has unknown scalar type \"{}\"",
                        field.name, scalar
                    )));
                }
            }
            if let Some(referenced) = field.field_type.referenced_model() {
                if !declared.contains(referenced) {
                    return Err(ResolveError::not_exists(
                        "logical model",
                        format!("\"{}\"", referenced),
                    ));
                }
                deps.push(SchemaDependency::new(
                    SchemaObjId::logical_model(source, referenced),
                    DependencyReason::ReferencedLogicalModel,
                ));
            }
            fields.insert(field.name.clone(), field.field_type.clone());
        }

        Ok((
            LogicalModelInfo {
                name: model.name.clone(),
                fields,
                permissions: BTreeMap::new(),
                description: model.description.clone(),
            },
            deps,
        ))
    }

    fn resolve_logical_model_permissions(&mut self, source: &'a SourceMetadata, model: &'a LogicalModelMetadata) {
        let perms = self.unique(
            &model.select_permissions,
            |p| p.role.clone(),
            |p| model_permission_id(&source.name, &model.name, &p.role),
        );

        for perm in perms {
            let object = MetadataObject::from_def(
                model_permission_id(&source.name, &model.name, &perm.role),
                perm,
            );
            let result = self.build_logical_model_permission(&source.name, &model.name, perm);
            if let Some((info, deps)) = self.record(&object, result) {
                self.depend_all(&object, deps);
                if let Some(m) = self
                    .cache
                    .sources
                    .get_mut(&source.name)
                    .and_then(|s| s.logical_models.get_mut(&model.name))
                {
                    m.permissions.insert(perm.role.clone(), info);
                }
            }
        }
    }

    fn build_logical_model_permission(
        &self,
        source: &SourceName,
        model: &LogicalModelName,
        perm: &PermDef<LogicalModelSelectPermission>,
    ) -> ResolveResult<(LogicalModelPermInfo, Vec<SchemaDependency>)> {
        if perm.role.is_admin() {
            return Err(ResolveError::new(
                "the admin role has full access and cannot be given permissions",
            ));
        }
        let (backend, source_info) = self.source_parts(source)?;
        let info = source_info
            .logical_models
            .get(model)
            .ok_or_else(|| ResolveError::not_exists("logical model", model))?;

        let mut deps = Vec::new();
        let columns = match &perm.permission.columns {
            PermColumns::All => info.fields.keys().cloned().collect(),
            PermColumns::Columns(list) => {
                let mut granted = BTreeSet::new();
                for column in list {
                    if !info.fields.contains_key(column) {
                        return Err(ResolveError::new(format!(
                            "no such field exists: \"{}\" on logical model \"{}\"",
                            column, model
                        )));
                    }
                    deps.push(SchemaDependency::new(
                        SchemaObjId::logical_model_field(source, model, column),
                        DependencyReason::Column,
                    ));
                    granted.insert(column.clone());
                }
                granted
            }
        };

        let filter = resolve_model_bool_exp(
            backend.as_ref(),
            source,
            info,
            &perm.permission.filter.0,
            &mut deps,
        )?;

        Ok((LogicalModelPermInfo { columns, filter }, deps))
    }

    pub(super) fn resolve_native_queries(&mut self, source: &'a SourceMetadata) {
        let queries = self.unique(
            &source.native_queries,
            |q| q.root_field_name.clone(),
            |q| MetadataObjId::native_query(&source.name, &q.root_field_name),
        );

        for query in queries {
            let object = MetadataObject::from_def(
                MetadataObjId::native_query(&source.name, &query.root_field_name),
                query,
            );
            let result = self.build_native_query(&source.name, query);
            if let Some((info, deps)) = self.record(&object, result) {
                self.depend_all(&object, deps);
                if let Some(s) = self.cache.sources.get_mut(&source.name) {
                    s.native_queries.insert(info.root_field_name.clone(), info);
                }
            }
        }
    }

    fn build_native_query(
        &self,
        source: &SourceName,
        query: &NativeQueryMetadata,
    ) -> ResolveResult<(NativeQueryInfo, Vec<SchemaDependency>)> {
        if !self.ctx.app.features.native_queries {
            return Err(ResolveError::new("native queries are disabled"));
        }
        let (_, source_info) = self.source_parts(source)?;
        if !source_info.config.capabilities.native_queries {
            return Err(ResolveError::new(format!(
                "source \"{}\" does not support native queries",
                source
            )));
        }
        if !is_graphql_name(query.root_field_name.as_str()) {
            return Err(ResolveError::new(format!(
                "the root field name \"{}\" is not a valid GraphQL name",
                query.root_field_name
            )));
        }
        if !source_info.logical_models.contains_key(&query.returns) {
            return Err(ResolveError::not_exists(
                "logical model",
                format!("\"{}\"", query.returns),
            ));
        }

        let mut arguments = BTreeMap::new();
        for (name, arg) in &query.arguments {
            if !self.known_scalar(source, &arg.arg_type) {
                return Err(ResolveError::new(format!(
                    "argument \"{}\" has unknown scalar type \"{}\"",
                    name, arg.arg_type
                )));
            }
            arguments.insert(name.clone(), arg.arg_type.clone());
        }

        let undeclared = undeclared_arguments(&query.code, &arguments);
        if !undeclared.is_empty() {
            return Err(ResolveError::new(format!(
                "undeclared arguments: {}",
                undeclared
                    .iter()
                    .map(|a| format!("\"{}\"", a))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let deps = vec![SchemaDependency::new(
            SchemaObjId::logical_model(source, &query.returns),
            DependencyReason::LogicalModel,
        )];
        Ok((
            NativeQueryInfo {
                root_field_name: query.root_field_name.clone(),
                code: query.code.clone(),
                returns: query.returns.clone(),
                arguments,
                description: query.description.clone(),
            },
            deps,
        ))
    }
}

/// Argument names referenced by `code` but not declared, in order of first use.
fn undeclared_arguments(code: &str, declared: &BTreeMap<String, ScalarType>) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for capture in ARGUMENT_REF.captures_iter(code) {
        let name = &capture[1];
        if !declared.contains_key(name) && !missing.iter().any(|m| m == name) {
            missing.push(name.to_string());
        }
    }
    missing
}

/// A logical model filter may only compare scalar fields.
fn resolve_model_bool_exp(
    backend: &dyn BackendMetadata,
    source: &SourceName,
    model: &LogicalModelInfo,
    exp: &Value,
    deps: &mut Vec<SchemaDependency>,
) -> ResolveResult<AnnBoolExp> {
    let Value::Object(map) = exp else {
        return Err(ResolveError::new(format!(
            "expecting an object for boolean expression, found {}",
            exp
        )));
    };

    let mut items = Vec::with_capacity(map.len());
    for (key, value) in map {
        let item = match key.as_str() {
            "_and" | "_or" => {
                let Value::Array(list) = value else {
                    return Err(ResolveError::new(format!("\"{}\" expects an array", key)));
                };
                let parts = list
                    .iter()
                    .map(|v| resolve_model_bool_exp(backend, source, model, v, deps))
                    .collect::<ResolveResult<Vec<_>>>()?;
                if key == "_and" {
                    AnnBoolExp::And(parts)
                } else {
                    AnnBoolExp::Or(parts)
                }
            }
            "_not" => AnnBoolExp::Not(Box::new(resolve_model_bool_exp(
                backend, source, model, value, deps,
            )?)),
            field => {
                let column = ColumnName::new(field);
                let scalar = match model.fields.get(&column) {
                    Some(LogicalModelType::Scalar { scalar, .. }) => scalar,
                    Some(_) => {
                        return Err(ResolveError::new(format!(
                            "field \"{}\" of logical model \"{}\" is not a scalar and cannot be filtered on",
                            field, model.name
                        )))
                    }
                    None => {
                        return Err(ResolveError::new(format!(
                            "no such field exists: \"{}\" on logical model \"{}\"",
                            field, model.name
                        )))
                    }
                };
                let ops = backend.parse_bool_exp_operations(scalar, value)?;
                deps.push(SchemaDependency::new(
                    SchemaObjId::logical_model_field(source, &model.name, &column),
                    DependencyReason::Column,
                ));
                AnnBoolExp::Column { column, ops }
            }
        };
        items.push(item);
    }

    Ok(if items.len() == 1 {
        items.remove(0)
    } else {
        AnnBoolExp::And(items)
    })
}
