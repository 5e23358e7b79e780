//! Remote schema introspection and data connector agent discovery.
//!
//! Both are network calls in a deployed engine. The static providers answer
//! from a fixed table and count their calls, which is what the CLI and the
//! tests use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::types::{AgentInfo, RemoteIntrospection};
use super::{BackendError, BackendResult};
use crate::metadata::collections::DataConnectorOptions;
use crate::metadata::names::*;
use crate::metadata::remote::RemoteSchemaDef;

/// Fetches the root fields of a remote GraphQL schema.
#[async_trait]
pub trait RemoteSchemaProvider: Send + Sync {
    async fn introspect(
        &self,
        name: &RemoteSchemaName,
        url: &str,
        definition: &RemoteSchemaDef,
    ) -> BackendResult<RemoteIntrospection>;
}

/// Fetches the description of a data connector agent.
#[async_trait]
pub trait DataConnectorAgentProvider: Send + Sync {
    async fn fetch_agent_info(
        &self,
        name: &DataConnectorName,
        options: &DataConnectorOptions,
    ) -> BackendResult<AgentInfo>;
}

/// Remote schemas keyed by URL.
#[derive(Debug, Default)]
pub struct StaticRemoteSchemaProvider {
    schemas: RwLock<HashMap<String, RemoteIntrospection>>,
    calls: AtomicUsize,
}

impl StaticRemoteSchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(self, url: impl Into<String>, schema: RemoteIntrospection) -> Self {
        self.set_schema(url, schema);
        self
    }

    pub fn set_schema(&self, url: impl Into<String>, schema: RemoteIntrospection) {
        self.schemas
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.into(), schema);
    }

    pub fn remove_schema(&self, url: &str) {
        self.schemas
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(url);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSchemaProvider for StaticRemoteSchemaProvider {
    async fn introspect(
        &self,
        name: &RemoteSchemaName,
        url: &str,
        _definition: &RemoteSchemaDef,
    ) -> BackendResult<RemoteIntrospection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.schemas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
            .ok_or_else(|| {
                BackendError::Connection(format!(
                    "introspection of remote schema \"{}\" at {} failed",
                    name, url
                ))
            })
    }
}

/// Agents keyed by URI.
#[derive(Debug, Default)]
pub struct StaticAgentProvider {
    agents: RwLock<HashMap<String, AgentInfo>>,
    calls: AtomicUsize,
}

impl StaticAgentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(self, uri: impl Into<String>, agent: AgentInfo) -> Self {
        self.agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uri.into(), agent);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataConnectorAgentProvider for StaticAgentProvider {
    async fn fetch_agent_info(
        &self,
        name: &DataConnectorName,
        options: &DataConnectorOptions,
    ) -> BackendResult<AgentInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        let mut agent = agents.get(&options.uri).cloned().ok_or_else(|| {
            BackendError::Connection(format!(
                "data connector agent \"{}\" is not reachable at {}",
                name, options.uri
            ))
        })?;
        agent.name = name.clone();
        if options.display_name.is_some() {
            agent.display_name = options.display_name.clone();
        }
        Ok(agent)
    }
}
