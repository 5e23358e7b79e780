//! Tables, tracked functions and computed fields.

use std::collections::{BTreeMap, BTreeSet};

use super::Builder;
use crate::backend::{ComputedFieldInfo, DatabaseMetadata, FunctionInfo, FunctionReturnType};
use crate::cache::types::{ColumnInfo, TableInfo};
use crate::inconsistency::{ResolveError, ResolveResult};
use crate::metadata::names::*;
use crate::metadata::source::{
    ComputedFieldMetadata, CustomRootFields, FunctionMetadata, SourceMetadata, TableMetadata,
};
use crate::schema::{
    DependencyReason, MetadataObjId, MetadataObject, SchemaDependency, SchemaObjId,
    TableMetadataObjId,
};

impl<'a> Builder<'a> {
    pub(super) async fn resolve_tables(&mut self, source: &'a SourceMetadata, db: &DatabaseMetadata) {
        let tables = self.unique(
            &source.tables,
            |t| t.table.clone(),
            |t| MetadataObjId::table(&source.name, &t.table),
        );

        for table in tables {
            let object = MetadataObject::from_def(MetadataObjId::table(&source.name, &table.table), table);
            let result = self.build_table_info(&source.name, db, table).await;
            if let Some(info) = self.record(&object, result) {
                if let Some(s) = self.cache.sources.get_mut(&source.name) {
                    s.tables.insert(info.name.clone(), info);
                }
            }
        }
    }

    async fn build_table_info(
        &self,
        source: &SourceName,
        db: &DatabaseMetadata,
        table: &TableMetadata,
    ) -> ResolveResult<TableInfo> {
        let raw = db.table(&table.table).ok_or_else(|| {
            ResolveError::new(format!(
                "no such table/view exists in source: \"{}\"",
                table.table
            ))
        })?;
        let config = &table.configuration;

        let graphql_name = config
            .custom_name
            .clone()
            .unwrap_or_else(|| table.table.graphql_name());
        if !is_graphql_name(&graphql_name) {
            return Err(ResolveError::new(format!(
                "cannot track table \"{}\" because its name \"{}\" is not a valid GraphQL name",
                table.table, graphql_name
            )));
        }

        for column in config.column_config.keys() {
            if raw.column(column).is_none() {
                return Err(ResolveError::new(format!(
                    "the column \"{}\" in the column configuration does not exist on table \"{}\"",
                    column, table.table
                )));
            }
        }

        let mut columns = BTreeMap::new();
        let mut seen_names: BTreeMap<String, ColumnName> = BTreeMap::new();
        for raw_column in &raw.columns {
            let column_config = config.column_config.get(&raw_column.name);

            let column_type = match column_config.and_then(|c| c.custom_type.as_ref()) {
                Some(custom) if !self.known_scalar(source, custom) => {
                    return Err(ResolveError::new(format!(
                        "the custom type \"{}\" of column \"{}\" is not a scalar type known to source \"{}\"",
                        custom, raw_column.name, source
                    )));
                }
                Some(custom) => custom.clone(),
                None => raw_column.column_type.clone(),
            };

            let column_name = column_config
                .and_then(|c| c.custom_name.clone())
                .unwrap_or_else(|| raw_column.name.to_string());
            if !is_graphql_name(&column_name) {
                return Err(ResolveError::new(format!(
                    "the column \"{}\" of table \"{}\" is exposed as \"{}\", which is not a valid GraphQL name",
                    raw_column.name, table.table, column_name
                )));
            }
            if let Some(other) = seen_names.insert(column_name.clone(), raw_column.name.clone()) {
                return Err(ResolveError::new(format!(
                    "the columns \"{}\" and \"{}\" of table \"{}\" are both exposed as \"{}\"",
                    other, raw_column.name, table.table, column_name
                )));
            }

            columns.insert(
                raw_column.name.clone(),
                ColumnInfo {
                    name: raw_column.name.clone(),
                    graphql_name: column_name,
                    column_type,
                    is_nullable: raw_column.is_nullable,
                    position: raw_column.position,
                    description: column_config
                        .and_then(|c| c.comment.clone())
                        .or_else(|| raw_column.description.clone()),
                },
            );
        }

        check_custom_root_fields(&config.custom_root_fields)?;

        let enum_values = if table.is_enum {
            let backend = self
                .backend(source)
                .ok_or_else(|| ResolveError::not_exists("source", source))?;
            let source_config = &self
                .cache
                .source(source)
                .ok_or_else(|| ResolveError::not_exists("source", source))?
                .config;
            if !source_config.capabilities.enum_tables {
                return Err(ResolveError::new(format!(
                    "source \"{}\" does not support enum tables",
                    source
                )));
            }
            let values = backend
                .fetch_and_validate_enum_values(source, source_config, raw)
                .await
                .map_err(|e| {
                    ResolveError::new(format!("the table \"{}\" cannot be used as an enum: {}", table.table, e))
                })?;
            Some(values)
        } else {
            None
        };

        Ok(TableInfo {
            name: table.table.clone(),
            graphql_name,
            description: raw.description.clone(),
            columns,
            primary_key: raw.primary_key.clone(),
            foreign_keys: raw.foreign_keys.clone(),
            relationships: BTreeMap::new(),
            computed_fields: BTreeMap::new(),
            permissions: BTreeMap::new(),
            event_triggers: BTreeMap::new(),
            enum_values,
            custom_root_fields: config.custom_root_fields.clone(),
        })
    }

    pub(super) fn resolve_functions(&mut self, source: &'a SourceMetadata, db: &DatabaseMetadata) {
        let functions = self.unique(
            &source.functions,
            |f| f.function.clone(),
            |f| MetadataObjId::function(&source.name, &f.function),
        );

        for function in functions {
            let object = MetadataObject::from_def(
                MetadataObjId::function(&source.name, &function.function),
                function,
            );
            let result = self.build_function(&source.name, db, function);
            if let Some((info, deps)) = self.record(&object, result) {
                self.depend_all(&object, deps);
                if let Some(s) = self.cache.sources.get_mut(&source.name) {
                    s.functions.insert(info.name.clone(), info);
                }
            }
        }
    }

    fn build_function(
        &self,
        source: &SourceName,
        db: &DatabaseMetadata,
        function: &FunctionMetadata,
    ) -> ResolveResult<(FunctionInfo, Vec<SchemaDependency>)> {
        let (backend, source_info) = self.source_parts(source)?;
        if !source_info.config.capabilities.functions {
            return Err(ResolveError::new(format!(
                "source \"{}\" does not support tracking functions",
                source
            )));
        }

        let raw = db
            .function(&function.function)
            .ok_or_else(|| ResolveError::not_exists("function", format!("\"{}\"", function.function)))?;
        let info = backend.build_function_info(function, raw)?;

        let mut deps = Vec::new();
        if let FunctionReturnType::Table(table) = &info.returns {
            if source_info.table(table).is_none() {
                return Err(ResolveError::new(format!(
                    "the function \"{}\" returns rows of table \"{}\", which is not tracked",
                    function.function, table
                )));
            }
            deps.push(SchemaDependency::new(
                SchemaObjId::table(source, table),
                DependencyReason::Table,
            ));
        }
        Ok((info, deps))
    }

    pub(super) fn resolve_computed_fields(&mut self, source: &'a SourceMetadata, db: &DatabaseMetadata) {
        for table in &source.tables {
            if self.cache.table(&source.name, &table.table).is_none() {
                continue;
            }
            let fields = self.unique(
                &table.computed_fields,
                |c| c.name.clone(),
                |c| computed_field_id(&source.name, &table.table, &c.name),
            );

            for field in fields {
                let object = MetadataObject::from_def(
                    computed_field_id(&source.name, &table.table, &field.name),
                    field,
                );
                let result = self.build_computed_field(&source.name, &table.table, db, field);
                if let Some((info, deps)) = self.record(&object, result) {
                    self.depend_all(&object, deps);
                    if let Some(t) = self
                        .cache
                        .sources
                        .get_mut(&source.name)
                        .and_then(|s| s.tables.get_mut(&table.table))
                    {
                        t.computed_fields.insert(info.name.clone(), info);
                    }
                }
            }
        }
    }

    fn build_computed_field(
        &self,
        source: &SourceName,
        table: &TableName,
        db: &DatabaseMetadata,
        field: &ComputedFieldMetadata,
    ) -> ResolveResult<(ComputedFieldInfo, Vec<SchemaDependency>)> {
        let (backend, source_info) = self.source_parts(source)?;
        if !source_info.config.capabilities.computed_fields {
            return Err(ResolveError::new(format!(
                "source \"{}\" does not support computed fields",
                source
            )));
        }
        let table_info = source_info
            .table(table)
            .ok_or_else(|| ResolveError::not_exists("table", table))?;

        if table_info
            .column(&ColumnName::new(field.name.as_str()))
            .is_some()
        {
            return Err(ResolveError::new(format!(
                "the computed field \"{}\" conflicts with an existing column",
                field.name
            )));
        }

        let function = &field.definition.function;
        let raw = db
            .function(function)
            .ok_or_else(|| ResolveError::not_exists("function", format!("\"{}\"", function)))?;
        let info = backend.build_computed_field_info(table, field, raw)?;

        let mut deps = Vec::new();
        if let FunctionReturnType::Table(returned) = &info.returns {
            if source_info.table(returned).is_none() {
                return Err(ResolveError::new(format!(
                    "the computed field \"{}\" returns rows of table \"{}\", which is not tracked",
                    field.name, returned
                )));
            }
            deps.push(SchemaDependency::new(
                SchemaObjId::table(source, returned),
                DependencyReason::Table,
            ));
        }
        Ok((info, deps))
    }
}

pub(super) fn computed_field_id(
    source: &SourceName,
    table: &TableName,
    name: &ComputedFieldName,
) -> MetadataObjId {
    MetadataObjId::table_obj(
        source,
        table,
        TableMetadataObjId::ComputedField { name: name.clone() },
    )
}

/// Custom root field names must be valid and distinct.
fn check_custom_root_fields(fields: &CustomRootFields) -> ResolveResult<()> {
    let names = [
        &fields.select,
        &fields.select_by_pk,
        &fields.select_aggregate,
        &fields.insert,
        &fields.insert_one,
        &fields.update,
        &fields.update_by_pk,
        &fields.delete,
        &fields.delete_by_pk,
    ];

    let mut seen = BTreeSet::new();
    let mut duplicated = BTreeSet::new();
    for name in names.into_iter().flatten() {
        if !is_graphql_name(name) {
            return Err(ResolveError::new(format!(
                "the custom root field \"{}\" is not a valid GraphQL name",
                name
            )));
        }
        if !seen.insert(name.as_str()) {
            duplicated.insert(name.as_str());
        }
    }

    if duplicated.is_empty() {
        Ok(())
    } else {
        Err(ResolveError::new(format!(
            "the following custom root field names are duplicated: {}",
            duplicated.into_iter().collect::<Vec<_>>().join(", ")
        )))
    }
}
