//! Remote schemas and their role permissions.

use std::collections::BTreeSet;

use futures::future::join_all;

use super::{Builder, Fingerprinted};
use crate::backend::RemoteIntrospection;
use crate::cache::hash::fingerprint;
use crate::cache::types::{RemoteSchemaInfo, RemoteSchemaPermInfo};
use crate::graphql::parse_sdl_roots;
use crate::inconsistency::{ResolveError, ResolveResult};
use crate::metadata::names::*;
use crate::metadata::remote::{RemoteSchemaMetadata, RemoteSchemaPermissionMetadata};
use crate::schema::{DependencyReason, MetadataObjId, MetadataObject, SchemaObjId};

fn permission_id(remote: &RemoteSchemaName, role: &RoleName) -> MetadataObjId {
    MetadataObjId::RemoteSchemaPermission {
        name: remote.clone(),
        role: role.clone(),
    }
}

impl<'a> Builder<'a> {
    /// Introspect every remote schema, concurrently, then check the role
    /// permissions of the ones that answered.
    pub(super) async fn resolve_remote_schemas(&mut self) {
        let metadata = self.metadata;
        let ctx = self.ctx;
        let remotes = self.unique(
            &metadata.remote_schemas,
            |r| r.name.clone(),
            |r| MetadataObjId::remote_schema(&r.name),
        );

        let mut pending = Vec::new();
        for remote in remotes {
            let object = MetadataObject::from_def(MetadataObjId::remote_schema(&remote.name), remote);
            let url = self.remote_url(remote);
            let Some(url) = self.record(&object, url) else {
                self.record_remote_permissions_failed(remote);
                continue;
            };

            let fp = fingerprint(&(&remote.definition, &url));
            let reusable = !self.invalidations.remote_schemas.contains(&remote.name);
            match self.previous.remote_schemas.get(&remote.name) {
                Some(prev) if reusable && prev.fingerprint == fp => {
                    self.artifacts.remote_schemas.insert(remote.name.clone(), prev.clone());
                    self.insert_remote_schema(remote, url, prev.value.clone());
                }
                _ => pending.push((remote, object, url, fp)),
            }
        }

        let fetched = join_all(
            pending
                .iter()
                .map(|(remote, _, url, _)| ctx.remote_schemas.introspect(&remote.name, url, &remote.definition)),
        )
        .await;

        for ((remote, object, url, fp), result) in pending.into_iter().zip(fetched) {
            match result {
                Ok(introspection) => {
                    tracing::debug!(remote_schema = %remote.name, "introspected remote schema");
                    self.artifacts.remote_schemas.insert(
                        remote.name.clone(),
                        Fingerprinted {
                            fingerprint: fp,
                            value: introspection.clone(),
                        },
                    );
                    self.insert_remote_schema(remote, url, introspection);
                }
                Err(e) => {
                    let reason = format!("inconsistent remote schema: {}", e);
                    self.ledger.record(object, reason.clone(), None);
                    self.record_remote_permissions_failed_with(remote, &reason);
                }
            }
        }
    }

    fn remote_url(&self, remote: &RemoteSchemaMetadata) -> ResolveResult<String> {
        let def = &remote.definition;
        match (&def.url, &def.url_from_env) {
            (Some(url), None) => Ok(url.clone()),
            (None, Some(var)) => self
                .ctx
                .app
                .environment
                .get(var)
                .map(str::to_string)
                .ok_or_else(|| ResolveError::new(format!("environment variable \"{}\" is not set", var))),
            (Some(_), Some(_)) => Err(ResolveError::new(
                "only one of url and url_from_env may be set",
            )),
            (None, None) => Err(ResolveError::new("either url or url_from_env is required")),
        }
    }

    fn insert_remote_schema(
        &mut self,
        remote: &'a RemoteSchemaMetadata,
        url: String,
        introspection: RemoteIntrospection,
    ) {
        self.cache.remote_schemas.insert(
            remote.name.clone(),
            RemoteSchemaInfo {
                name: remote.name.clone(),
                url,
                introspection,
                permissions: Default::default(),
            },
        );
        self.resolve_remote_permissions(remote);
    }

    fn record_remote_permissions_failed(&mut self, remote: &RemoteSchemaMetadata) {
        self.record_remote_permissions_failed_with(
            remote,
            &format!("remote schema \"{}\" is inconsistent", remote.name),
        );
    }

    /// Permissions of a remote schema that did not resolve share its failure.
    fn record_remote_permissions_failed_with(&mut self, remote: &RemoteSchemaMetadata, reason: &str) {
        if !self.ctx.app.features.remote_schema_permissions {
            return;
        }
        let objects = remote
            .permissions
            .iter()
            .map(|p| MetadataObject::from_def(permission_id(&remote.name, &p.role), p));
        self.ledger.record_many(objects, reason);
    }

    fn resolve_remote_permissions(&mut self, remote: &'a RemoteSchemaMetadata) {
        let perms = self.unique(
            &remote.permissions,
            |p| p.role.clone(),
            |p| permission_id(&remote.name, &p.role),
        );

        for perm in perms {
            let object = MetadataObject::from_def(permission_id(&remote.name, &perm.role), perm);
            let result = self.build_remote_permission(&remote.name, perm);
            if let Some(info) = self.record(&object, result) {
                self.depend(
                    &object,
                    SchemaObjId::RemoteSchema {
                        name: remote.name.clone(),
                    },
                    DependencyReason::RemoteSchema,
                );
                if let Some(r) = self.cache.remote_schemas.get_mut(&remote.name) {
                    r.permissions.insert(perm.role.clone(), info);
                }
            }
        }
    }

    fn build_remote_permission(
        &self,
        remote: &RemoteSchemaName,
        perm: &RemoteSchemaPermissionMetadata,
    ) -> ResolveResult<RemoteSchemaPermInfo> {
        if !self.ctx.app.features.remote_schema_permissions {
            return Err(ResolveError::Hidden);
        }
        if perm.role.is_admin() {
            return Err(ResolveError::new(
                "the admin role has full access and cannot be given permissions",
            ));
        }
        let info = self
            .cache
            .remote_schemas
            .get(remote)
            .ok_or_else(|| ResolveError::not_exists("remote schema", remote))?;

        let roots = parse_sdl_roots(&perm.definition.schema).map_err(|e| {
            ResolveError::new(format!("invalid permission schema for role \"{}\": {}", perm.role, e))
        })?;

        check_subset("query_root", &roots.query, &info.introspection.query_root)?;
        check_subset("mutation_root", &roots.mutation, &info.introspection.mutation_root)?;

        Ok(RemoteSchemaPermInfo {
            query_root: roots.query,
            mutation_root: roots.mutation,
        })
    }
}

fn check_subset(root: &str, requested: &BTreeSet<String>, available: &BTreeSet<String>) -> ResolveResult<()> {
    let missing: Vec<&str> = requested
        .difference(available)
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ResolveError::new(format!(
            "the following fields of \"{}\" do not exist in the remote schema: {}",
            root,
            missing.join(", ")
        )))
    }
}
