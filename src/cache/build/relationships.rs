//! Object and array relationships.
//!
//! A relationship is joined either through a foreign key constraint (on this
//! table, or on the remote table pointing back) or through an explicit column
//! mapping. Every form records dependencies on the join columns, the remote
//! table, and the constraint when there is one.

use std::collections::{BTreeMap, BTreeSet};

use super::Builder;
use crate::backend::{DatabaseMetadata, ForeignKeyMetadata};
use crate::cache::types::{RelInfo, SourceInfo, TableInfo};
use crate::inconsistency::{ResolveError, ResolveResult};
use crate::metadata::names::*;
use crate::metadata::source::{
    ArrRelUsing, Columns, ObjRelFkUsing, ObjRelUsing, RelManualConfig, RelType, SourceMetadata,
};
use crate::schema::{DependencyReason, MetadataObjId, MetadataObject, SchemaDependency, SchemaObjId};

/// The join a relationship definition asks for, before it is checked.
enum Join<'d> {
    LocalForeignKey(&'d Columns),
    RemoteForeignKey { table: &'d TableName, columns: &'d Columns },
    Manual(&'d RelManualConfig),
}

impl<'a> Builder<'a> {
    pub(super) fn resolve_relationships(&mut self, source: &'a SourceMetadata, db: &DatabaseMetadata) {
        for table in &source.tables {
            if self.cache.table(&source.name, &table.table).is_none() {
                continue;
            }

            let object_rels = self.unique(
                &table.object_relationships,
                |r| r.name.clone(),
                |r| MetadataObjId::relationship(&source.name, &table.table, &r.name, RelType::Object),
            );
            let array_rels = self.unique(
                &table.array_relationships,
                |r| r.name.clone(),
                |r| MetadataObjId::relationship(&source.name, &table.table, &r.name, RelType::Array),
            );

            let mut defs = Vec::with_capacity(object_rels.len() + array_rels.len());
            for rel in object_rels {
                let join = match &rel.using {
                    ObjRelUsing::ForeignKeyConstraintOn(ObjRelFkUsing::Local(columns)) => {
                        Join::LocalForeignKey(columns)
                    }
                    ObjRelUsing::ForeignKeyConstraintOn(ObjRelFkUsing::Remote { table, columns }) => {
                        Join::RemoteForeignKey { table, columns }
                    }
                    ObjRelUsing::ManualConfiguration(manual) => Join::Manual(manual),
                };
                let id = MetadataObjId::relationship(&source.name, &table.table, &rel.name, RelType::Object);
                defs.push((MetadataObject::from_def(id, rel), &rel.name, RelType::Object, join));
            }
            for rel in array_rels {
                let join = match &rel.using {
                    ArrRelUsing::ForeignKeyConstraintOn(fk) => Join::RemoteForeignKey {
                        table: &fk.table,
                        columns: &fk.columns,
                    },
                    ArrRelUsing::ManualConfiguration(manual) => Join::Manual(manual),
                };
                let id = MetadataObjId::relationship(&source.name, &table.table, &rel.name, RelType::Array);
                defs.push((MetadataObject::from_def(id, rel), &rel.name, RelType::Array, join));
            }

            for (object, name, rel_type, join) in defs {
                let result = self.build_relationship(&source.name, &table.table, db, name, rel_type, &join);
                if let Some((info, deps)) = self.record(&object, result) {
                    self.depend_all(&object, deps);
                    if let Some(t) = self
                        .cache
                        .sources
                        .get_mut(&source.name)
                        .and_then(|s| s.tables.get_mut(&table.table))
                    {
                        t.relationships.insert(info.name.clone(), info);
                    }
                }
            }
        }
    }

    fn build_relationship(
        &self,
        source: &SourceName,
        table: &TableName,
        db: &DatabaseMetadata,
        name: &RelName,
        rel_type: RelType,
        join: &Join<'_>,
    ) -> ResolveResult<(RelInfo, Vec<SchemaDependency>)> {
        let (backend, source_info) = self.source_parts(source)?;
        if !source_info.config.capabilities.relationships {
            return Err(ResolveError::new(format!(
                "source \"{}\" does not support relationships",
                source
            )));
        }
        let local = source_info
            .table(table)
            .ok_or_else(|| ResolveError::not_exists("table", table))?;

        if local.relationships.contains_key(name) {
            return Err(ResolveError::new(format!(
                "relationship \"{}\" is defined more than once on table \"{}\"",
                name, table
            )));
        }
        if local.column(&ColumnName::new(name.as_str())).is_some() {
            return Err(ResolveError::new(format!(
                "relationship name \"{}\" conflicts with an existing column of table \"{}\"",
                name, table
            )));
        }

        let mut deps = Vec::new();
        let (remote_table, column_mapping, constraint) = match join {
            Join::LocalForeignKey(columns) => {
                let wanted = columns.to_set();
                check_columns(local, &wanted)?;
                let fk = single_foreign_key(
                    local
                        .foreign_keys
                        .iter()
                        .filter(|fk| fk.local_columns() == wanted),
                )?;
                tracked(source_info, &fk.foreign_table)?;

                for column in &wanted {
                    deps.push(SchemaDependency::new(
                        SchemaObjId::column(source, table, column),
                        DependencyReason::UsingColumn,
                    ));
                }
                deps.push(SchemaDependency::new(
                    SchemaObjId::foreign_key(source, table, &fk.constraint),
                    DependencyReason::Fkey,
                ));
                deps.push(SchemaDependency::new(
                    SchemaObjId::table(source, &fk.foreign_table),
                    DependencyReason::RemoteTable,
                ));

                (
                    fk.foreign_table.clone(),
                    fk.column_mapping.clone(),
                    Some(fk.constraint.clone()),
                )
            }

            Join::RemoteForeignKey {
                table: remote,
                columns,
            } => {
                let remote_info = tracked(source_info, remote)?;
                let wanted = columns.to_set();
                check_columns(remote_info, &wanted)?;
                let fk = single_foreign_key(
                    remote_info
                        .foreign_keys
                        .iter()
                        .filter(|fk| &fk.foreign_table == table && fk.local_columns() == wanted),
                )?;

                deps.push(SchemaDependency::new(
                    SchemaObjId::table(source, remote),
                    DependencyReason::RemoteTable,
                ));
                deps.push(SchemaDependency::new(
                    SchemaObjId::foreign_key(source, remote, &fk.constraint),
                    DependencyReason::RemoteFkey,
                ));
                for column in &wanted {
                    deps.push(SchemaDependency::new(
                        SchemaObjId::column(source, remote, column),
                        DependencyReason::RightColumn,
                    ));
                }

                (
                    (*remote).clone(),
                    inverted(&fk.column_mapping),
                    Some(fk.constraint.clone()),
                )
            }

            Join::Manual(manual) => {
                if manual.column_mapping.is_empty() {
                    return Err(ResolveError::new("column_mapping must not be empty"));
                }
                let remote_info = tracked(source_info, &manual.remote_table)?;
                let left: BTreeSet<ColumnName> = manual.column_mapping.keys().cloned().collect();
                let right: BTreeSet<ColumnName> = manual.column_mapping.values().cloned().collect();
                check_columns(local, &left)?;
                check_columns(remote_info, &right)?;

                for (left, right) in &manual.column_mapping {
                    deps.push(SchemaDependency::new(
                        SchemaObjId::column(source, table, left),
                        DependencyReason::LeftColumn,
                    ));
                    deps.push(SchemaDependency::new(
                        SchemaObjId::column(source, &manual.remote_table, right),
                        DependencyReason::RightColumn,
                    ));
                }
                deps.push(SchemaDependency::new(
                    SchemaObjId::table(source, &manual.remote_table),
                    DependencyReason::RemoteTable,
                ));

                (manual.remote_table.clone(), manual.column_mapping.clone(), None)
            }
        };

        let info = RelInfo {
            name: name.clone(),
            rel_type,
            remote_table,
            column_mapping,
            constraint,
        };
        backend.validate_relationship(db, table, &info)?;

        Ok((info, deps))
    }
}

fn check_columns(table: &TableInfo, columns: &BTreeSet<ColumnName>) -> ResolveResult<()> {
    match columns.iter().find(|c| table.column(c).is_none()) {
        Some(missing) => Err(ResolveError::new(format!(
            "no such column exists: \"{}\" on table \"{}\"",
            missing, table.name
        ))),
        None => Ok(()),
    }
}

/// Exactly one constraint must match the requested columns.
fn single_foreign_key<'f>(
    candidates: impl Iterator<Item = &'f ForeignKeyMetadata>,
) -> ResolveResult<&'f ForeignKeyMetadata> {
    let matching: Vec<_> = candidates.collect();
    match matching.as_slice() {
        [fk] => Ok(*fk),
        [] => Err(ResolveError::new(
            "no foreign key constraint exists on the given column(s)",
        )),
        _ => Err(ResolveError::new(
            "more than one foreign key constraint exists on the given column(s)",
        )),
    }
}

fn tracked<'s>(source: &'s SourceInfo, table: &TableName) -> ResolveResult<&'s TableInfo> {
    source
        .table(table)
        .ok_or_else(|| ResolveError::not_exists("table", format!("\"{}\"", table)))
}

/// Local column to remote column for a foreign key joined from the remote side.
fn inverted(mapping: &BTreeMap<ColumnName, ColumnName>) -> BTreeMap<ColumnName, ColumnName> {
    mapping.iter().map(|(k, v)| (v.clone(), k.clone())).collect()
}
