//! Dependency pruning.
//!
//! A stage may resolve an object whose dependency is later taken out of the
//! cache (a root field conflict evicts a table, say). Pruning removes the
//! owners of such dangling dependencies, which can strand further owners, so
//! it runs until nothing changes.

use std::mem;

use super::Builder;
use crate::schema::MetadataObjId;

impl<'a> Builder<'a> {
    pub(super) fn prune(&mut self) {
        let mut rounds = 0;
        loop {
            rounds += 1;
            let mut changed = false;
            let mut kept = Vec::with_capacity(self.dependencies.len());

            for dep in mem::take(&mut self.dependencies) {
                if !self.cache.contains(&dep.schema_obj) {
                    continue;
                }
                if self.cache.contains(&dep.dependency.target) {
                    kept.push(dep);
                    continue;
                }

                tracing::debug!(
                    object = %dep.owner.id,
                    missing = %dep.dependency.target,
                    reason = %dep.dependency.reason,
                    "pruning object with a missing dependency"
                );
                self.cache.remove_object(&dep.owner.id);
                let reason = format!("no such {} exists", dep.dependency.target.describe());
                self.ledger.record(dep.owner, reason, None);
                changed = true;
            }

            self.dependencies = kept;
            if !changed {
                break;
            }
        }

        let mut fields = mem::take(&mut self.cache.root_fields);
        let cache = &self.cache;
        let contained = |owner: &MetadataObjId| {
            owner.schema_obj_id().map(|id| cache.contains(&id)).unwrap_or(true)
        };
        fields.query.retain(|_, owner| contained(owner));
        fields.mutation.retain(|_, owner| contained(owner));
        self.cache.root_fields = fields;

        tracing::debug!(rounds, dependencies = self.dependencies.len(), "pruned dependencies");
    }
}
