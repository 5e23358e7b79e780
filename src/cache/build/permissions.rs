//! Table permissions and the boolean expressions inside them.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use super::Builder;
use crate::backend::{BackendMetadata, FunctionReturnType};
use crate::cache::types::{
    AnnBoolExp, DelPermInfo, InsPermInfo, SelPermInfo, SourceInfo, TableInfo, UpdPermInfo,
};
use crate::inconsistency::{ResolveError, ResolveResult};
use crate::metadata::names::*;
use crate::metadata::source::{
    BoolExp, DeletePermission, InsertPermission, PermColumns, PermDef, PermType, SelectPermission,
    SourceMetadata, TableMetadata, UpdatePermission,
};
use crate::schema::{
    DependencyReason, MetadataObjId, MetadataObject, SchemaDependency, SchemaObjId, TableObjId,
};

/// A resolved permission of any of the four kinds.
enum PermInfo {
    Select(SelPermInfo),
    Insert(InsPermInfo),
    Update(UpdPermInfo),
    Delete(DelPermInfo),
}

/// What a boolean expression is resolved against.
pub(super) struct BoolExpScope<'s> {
    pub source: &'s SourceInfo,
    pub backend: &'s dyn BackendMetadata,
}

impl<'a> Builder<'a> {
    pub(super) fn resolve_permissions(&mut self, source: &'a SourceMetadata) {
        for table in &source.tables {
            if self.cache.table(&source.name, &table.table).is_none() {
                continue;
            }
            self.resolve_perm_kind(source, table, PermType::Select, &table.select_permissions, |b, s, t, p| {
                b.build_select(s, t, p).map(|(i, d)| (PermInfo::Select(i), d))
            });
            self.resolve_perm_kind(source, table, PermType::Insert, &table.insert_permissions, |b, s, t, p| {
                b.build_insert(s, t, p).map(|(i, d)| (PermInfo::Insert(i), d))
            });
            self.resolve_perm_kind(source, table, PermType::Update, &table.update_permissions, |b, s, t, p| {
                b.build_update(s, t, p).map(|(i, d)| (PermInfo::Update(i), d))
            });
            self.resolve_perm_kind(source, table, PermType::Delete, &table.delete_permissions, |b, s, t, p| {
                b.build_delete(s, t, p).map(|(i, d)| (PermInfo::Delete(i), d))
            });
        }
    }

    fn resolve_perm_kind<P: Serialize>(
        &mut self,
        source: &'a SourceMetadata,
        table: &'a TableMetadata,
        perm_type: PermType,
        defs: &'a [PermDef<P>],
        build: impl Fn(&Self, &SourceName, &TableName, &P) -> ResolveResult<(PermInfo, Vec<SchemaDependency>)>,
    ) {
        let defs = self.unique(
            defs,
            |p| p.role.clone(),
            |p| MetadataObjId::permission(&source.name, &table.table, &p.role, perm_type),
        );

        for def in defs {
            let object = MetadataObject::from_def(
                MetadataObjId::permission(&source.name, &table.table, &def.role, perm_type),
                def,
            );
            let result = if def.role.is_admin() {
                Err(ResolveError::new(
                    "the admin role has full access and cannot be given permissions",
                ))
            } else {
                build(self, &source.name, &table.table, &def.permission)
            };

            let Some((info, deps)) = self.record(&object, result) else {
                continue;
            };
            self.depend_all(&object, deps);

            let Some(t) = self
                .cache
                .sources
                .get_mut(&source.name)
                .and_then(|s| s.tables.get_mut(&table.table))
            else {
                continue;
            };
            let role = t.permissions.entry(def.role.clone()).or_default();
            match info {
                PermInfo::Select(i) => role.select = Some(i),
                PermInfo::Insert(i) => role.insert = Some(i),
                PermInfo::Update(i) => role.update = Some(i),
                PermInfo::Delete(i) => role.delete = Some(i),
            }
        }
    }

    /// Run `f` with the scope of `table`, collecting the dependencies it records.
    fn with_scope<T>(
        &self,
        source: &SourceName,
        table: &TableName,
        f: impl FnOnce(&BoolExpScope<'_>, &TableInfo, &mut Vec<SchemaDependency>) -> ResolveResult<T>,
    ) -> ResolveResult<(T, Vec<SchemaDependency>)> {
        let (backend, source_info) = self.source_parts(source)?;
        let table_info = source_info
            .table(table)
            .ok_or_else(|| ResolveError::not_exists("table", table))?;
        let scope = BoolExpScope {
            source: source_info,
            backend: backend.as_ref(),
        };
        let mut deps = Vec::new();
        let value = f(&scope, table_info, &mut deps)?;
        Ok((value, deps))
    }

    fn build_select(
        &self,
        source: &SourceName,
        table: &TableName,
        perm: &SelectPermission,
    ) -> ResolveResult<(SelPermInfo, Vec<SchemaDependency>)> {
        self.with_scope(source, table, |scope, info, deps| {
            let columns = perm_columns(scope, info, &perm.columns, deps)?;
            let filter = resolve_bool_exp(scope, info, &perm.filter, deps)?;

            let mut computed_fields = BTreeSet::new();
            for name in &perm.computed_fields {
                if !info.computed_fields.contains_key(name) {
                    return Err(ResolveError::new(format!(
                        "no such computed field exists: \"{}\" on table \"{}\"",
                        name, info.name
                    )));
                }
                deps.push(SchemaDependency::new(
                    SchemaObjId::table_obj(
                        &scope.source.name,
                        &info.name,
                        TableObjId::ComputedField { name: name.clone() },
                    ),
                    DependencyReason::Untyped,
                ));
                computed_fields.insert(name.clone());
            }

            Ok(SelPermInfo {
                columns,
                computed_fields,
                filter,
                limit: perm.limit,
                allow_aggregations: perm.allow_aggregations,
            })
        })
    }

    fn build_insert(
        &self,
        source: &SourceName,
        table: &TableName,
        perm: &InsertPermission,
    ) -> ResolveResult<(InsPermInfo, Vec<SchemaDependency>)> {
        self.with_scope(source, table, |scope, info, deps| {
            Ok(InsPermInfo {
                columns: perm_columns(scope, info, &perm.columns, deps)?,
                check: resolve_bool_exp(scope, info, &perm.check, deps)?,
                set: preset_columns(scope, info, &perm.set, deps)?,
            })
        })
    }

    fn build_update(
        &self,
        source: &SourceName,
        table: &TableName,
        perm: &UpdatePermission,
    ) -> ResolveResult<(UpdPermInfo, Vec<SchemaDependency>)> {
        self.with_scope(source, table, |scope, info, deps| {
            let check = match &perm.check {
                Some(check) => Some(resolve_bool_exp(scope, info, check, deps)?),
                None => None,
            };
            Ok(UpdPermInfo {
                columns: perm_columns(scope, info, &perm.columns, deps)?,
                filter: resolve_bool_exp(scope, info, &perm.filter, deps)?,
                check,
                set: preset_columns(scope, info, &perm.set, deps)?,
            })
        })
    }

    fn build_delete(
        &self,
        source: &SourceName,
        table: &TableName,
        perm: &DeletePermission,
    ) -> ResolveResult<(DelPermInfo, Vec<SchemaDependency>)> {
        self.with_scope(source, table, |scope, info, deps| {
            Ok(DelPermInfo {
                filter: resolve_bool_exp(scope, info, &perm.filter, deps)?,
            })
        })
    }
}

fn column_dep(scope: &BoolExpScope<'_>, table: &TableName, column: &ColumnName) -> SchemaDependency {
    SchemaDependency::new(
        SchemaObjId::column(&scope.source.name, table, column),
        DependencyReason::Column,
    )
}

/// The columns a permission grants. `"*"` grants every column and records
/// no column dependency.
fn perm_columns(
    scope: &BoolExpScope<'_>,
    table: &TableInfo,
    columns: &PermColumns,
    deps: &mut Vec<SchemaDependency>,
) -> ResolveResult<BTreeSet<ColumnName>> {
    match columns {
        PermColumns::All => Ok(table.columns.keys().cloned().collect()),
        PermColumns::Columns(list) => {
            let mut granted = BTreeSet::new();
            for column in list {
                if table.column(column).is_none() {
                    return Err(missing_field(column.as_str(), &table.name));
                }
                deps.push(column_dep(scope, &table.name, column));
                granted.insert(column.clone());
            }
            Ok(granted)
        }
    }
}

fn preset_columns(
    scope: &BoolExpScope<'_>,
    table: &TableInfo,
    set: &BTreeMap<ColumnName, Value>,
    deps: &mut Vec<SchemaDependency>,
) -> ResolveResult<BTreeMap<ColumnName, Value>> {
    for column in set.keys() {
        if table.column(column).is_none() {
            return Err(missing_field(column.as_str(), &table.name));
        }
        deps.push(column_dep(scope, &table.name, column));
    }
    Ok(set.clone())
}

fn missing_field(field: &str, table: &TableName) -> ResolveError {
    ResolveError::new(format!(
        "no such column exists: \"{}\" on table \"{}\"",
        field, table
    ))
}

/// Resolve a permission boolean expression against `table`.
///
/// Keys are `_and`, `_or`, `_not`, `_exists`, or the name of a column,
/// relationship or computed field. Several keys in one object are a
/// conjunction; `{}` is true.
pub(super) fn resolve_bool_exp(
    scope: &BoolExpScope<'_>,
    table: &TableInfo,
    exp: &BoolExp,
    deps: &mut Vec<SchemaDependency>,
) -> ResolveResult<AnnBoolExp> {
    resolve_value(scope, table, &exp.0, deps)
}

fn resolve_value(
    scope: &BoolExpScope<'_>,
    table: &TableInfo,
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
                    .map(|v| resolve_value(scope, table, v, deps))
                    .collect::<ResolveResult<Vec<_>>>()?;
                if key == "_and" {
                    AnnBoolExp::And(parts)
                } else {
                    AnnBoolExp::Or(parts)
                }
            }
            "_not" => AnnBoolExp::Not(Box::new(resolve_value(scope, table, value, deps)?)),
            "_exists" => resolve_exists(scope, value, deps)?,
            field => resolve_field(scope, table, field, value, deps)?,
        };
        items.push(item);
    }

    Ok(if items.len() == 1 {
        items.remove(0)
    } else {
        AnnBoolExp::And(items)
    })
}

fn resolve_exists(
    scope: &BoolExpScope<'_>,
    value: &Value,
    deps: &mut Vec<SchemaDependency>,
) -> ResolveResult<AnnBoolExp> {
    let table_value = value
        .get("_table")
        .ok_or_else(|| ResolveError::new("\"_exists\" expects a \"_table\" key"))?;
    let table_name: TableName = serde_json::from_value(table_value.clone())
        .map_err(|e| ResolveError::new(format!("invalid \"_table\" in \"_exists\": {}", e)))?;
    let other = scope
        .source
        .table(&table_name)
        .ok_or_else(|| ResolveError::not_exists("table", format!("\"{}\"", table_name)))?;

    deps.push(SchemaDependency::new(
        SchemaObjId::table(&scope.source.name, &table_name),
        DependencyReason::Table,
    ));

    let filter = match value.get("_where") {
        Some(w) => resolve_value(scope, other, w, deps)?,
        None => AnnBoolExp::true_(),
    };
    Ok(AnnBoolExp::Exists {
        table: table_name,
        filter: Box::new(filter),
    })
}

fn resolve_field(
    scope: &BoolExpScope<'_>,
    table: &TableInfo,
    field: &str,
    value: &Value,
    deps: &mut Vec<SchemaDependency>,
) -> ResolveResult<AnnBoolExp> {
    let column = ColumnName::new(field);
    if let Some(info) = table.column(&column) {
        let ops = scope
            .backend
            .parse_bool_exp_operations(&info.column_type, value)?;
        deps.push(column_dep(scope, &table.name, &column));
        return Ok(AnnBoolExp::Column { column, ops });
    }

    let rel_name = RelName::new(field);
    if let Some(rel) = table.relationships.get(&rel_name) {
        let remote = scope
            .source
            .table(&rel.remote_table)
            .ok_or_else(|| ResolveError::not_exists("table", format!("\"{}\"", rel.remote_table)))?;
        deps.push(SchemaDependency::new(
            SchemaObjId::relationship(&scope.source.name, &table.name, &rel_name),
            DependencyReason::Untyped,
        ));
        let filter = resolve_value(scope, remote, value, deps)?;
        return Ok(AnnBoolExp::Relationship {
            rel: rel_name,
            remote_table: rel.remote_table.clone(),
            filter: Box::new(filter),
        });
    }

    let cf_name = ComputedFieldName::new(field);
    if let Some(cf) = table.computed_fields.get(&cf_name) {
        deps.push(SchemaDependency::new(
            SchemaObjId::table_obj(
                &scope.source.name,
                &table.name,
                TableObjId::ComputedField {
                    name: cf_name.clone(),
                },
            ),
            DependencyReason::Untyped,
        ));
        return match &cf.returns {
            FunctionReturnType::Scalar(scalar) => Ok(AnnBoolExp::ComputedField {
                name: cf_name,
                ops: scope.backend.parse_bool_exp_operations(scalar, value)?,
            }),
            FunctionReturnType::Table(returned) => {
                let remote = scope.source.table(returned).ok_or_else(|| {
                    ResolveError::not_exists("table", format!("\"{}\"", returned))
                })?;
                let filter = resolve_value(scope, remote, value, deps)?;
                Ok(AnnBoolExp::Exists {
                    table: returned.clone(),
                    filter: Box::new(filter),
                })
            }
        };
    }

    Err(ResolveError::new(format!(
        "\"{}\" is not a column, relationship or computed field of table \"{}\"",
        field, table.name
    )))
}
