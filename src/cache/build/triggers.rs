//! Event triggers.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::Builder;
use crate::backend::EventTriggerInfo;
use crate::inconsistency::{ResolveError, ResolveResult};
use crate::metadata::names::*;
use crate::metadata::source::{EventTriggerConf, SourceMetadata};
use crate::schema::{
    DependencyReason, MetadataObjId, MetadataObject, SchemaDependency, SchemaObjId,
    TableMetadataObjId,
};

/// Trigger names end up in database object names, so they are restricted.
const MAX_TRIGGER_NAME_LEN: usize = 42;

static TRIGGER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static trigger name pattern"));

fn trigger_id(source: &SourceName, table: &TableName, name: &TriggerName) -> MetadataObjId {
    MetadataObjId::table_obj(source, table, TableMetadataObjId::EventTrigger { name: name.clone() })
}

impl<'a> Builder<'a> {
    /// Resolve the event triggers of every table in a source. Triggers are
    /// only installed in the database when this build was caused by a change
    /// to the source.
    pub(super) async fn resolve_event_triggers(&mut self, source: &'a SourceMetadata) {
        let install = self.reason.affects(&source.name);

        for table in &source.tables {
            if self.cache.table(&source.name, &table.table).is_none() {
                continue;
            }
            let triggers = self.unique(
                &table.event_triggers,
                |t| t.name.clone(),
                |t| trigger_id(&source.name, &table.table, &t.name),
            );

            for conf in triggers {
                let object = MetadataObject::from_def(trigger_id(&source.name, &table.table, &conf.name), conf);
                let result = self.build_event_trigger(&source.name, &table.table, conf);
                let Some((info, deps)) = self.record(&object, result) else {
                    continue;
                };

                if install {
                    let installed = match self.source_parts(&source.name) {
                        Ok((backend, source_info)) => backend
                            .create_table_event_trigger(&source.name, &source_info.config, &info)
                            .await
                            .map_err(ResolveError::from),
                        Err(e) => Err(e),
                    };
                    if self.record(&object, installed).is_none() {
                        continue;
                    }
                    tracing::debug!(trigger = %info.name, table = %table.table, "installed event trigger");
                }

                self.depend_all(&object, deps);
                if let Some(t) = self
                    .cache
                    .sources
                    .get_mut(&source.name)
                    .and_then(|s| s.tables.get_mut(&table.table))
                {
                    t.event_triggers.insert(info.name.clone(), info);
                }
            }
        }
    }

    fn build_event_trigger(
        &self,
        source: &SourceName,
        table: &TableName,
        conf: &EventTriggerConf,
    ) -> ResolveResult<(EventTriggerInfo, Vec<SchemaDependency>)> {
        let (backend, source_info) = self.source_parts(source)?;
        if !source_info.config.capabilities.event_triggers {
            return Err(ResolveError::new(format!(
                "source \"{}\" does not support event triggers",
                source
            )));
        }
        check_trigger_name(&conf.name)?;
        if conf.definition.is_empty() {
            return Err(ResolveError::new(format!(
                "event trigger \"{}\" must define at least one operation",
                conf.name
            )));
        }

        let table_info = source_info
            .table(table)
            .ok_or_else(|| ResolveError::not_exists("table", table))?;
        let columns: BTreeSet<ColumnName> = table_info.columns.keys().cloned().collect();
        let info = backend.build_event_trigger_info(&self.ctx.app.environment, table, &columns, conf)?;

        let deps = info
            .columns
            .iter()
            .map(|c| SchemaDependency::new(SchemaObjId::column(source, table, c), DependencyReason::Column))
            .collect();
        Ok((info, deps))
    }
}

fn check_trigger_name(name: &TriggerName) -> ResolveResult<()> {
    if name.as_str().len() > MAX_TRIGGER_NAME_LEN {
        return Err(ResolveError::new(format!(
            "event trigger name \"{}\" is longer than {} characters",
            name, MAX_TRIGGER_NAME_LEN
        )));
    }
    if !TRIGGER_NAME.is_match(name.as_str()) {
        return Err(ResolveError::new(format!(
            "event trigger name \"{}\" may only contain letters, digits, '_' and '-'",
            name
        )));
    }
    Ok(())
}
