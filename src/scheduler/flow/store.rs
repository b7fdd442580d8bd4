// SPDX-License-Identifier: MIT

//! Stores consumed by the execution controller
//!
//! - [`FlowDefinitionStore`] - where flow definitions come from
//! - [`InstanceStore`] - the single-flight cache of dag instances

use crate::core::error::FlowError;
use crate::scheduler::flow::dag::Dag;
use crate::scheduler::flow::loader::FlowLoader;
use crate::scheduler::flow::types::{JobKey, NodeDefinition};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Source of flow definitions keyed by workflow identity
#[async_trait]
pub trait FlowDefinitionStore: Send + Sync {
    async fn get_flow_definition(&self, key: &JobKey) -> Result<NodeDefinition, FlowError>;
}

/// Flow definitions held in memory
#[derive(Clone, Default)]
pub struct InMemoryFlowStore {
    flows: Arc<RwLock<HashMap<JobKey, NodeDefinition>>>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, key: JobKey, def: NodeDefinition) {
        let mut flows = self.flows.write().await;
        flows.insert(key, def);
    }
}

#[async_trait]
impl FlowDefinitionStore for InMemoryFlowStore {
    async fn get_flow_definition(&self, key: &JobKey) -> Result<NodeDefinition, FlowError> {
        let flows = self.flows.read().await;
        flows
            .get(key)
            .cloned()
            .ok_or_else(|| FlowError::definition_not_found(key.to_string()))
    }
}

/// Flow definitions read from `<root>/<group>/<name>.yaml`
pub struct FileFlowStore {
    root: PathBuf,
}

impl FileFlowStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &JobKey) -> PathBuf {
        self.root
            .join(&key.group_name)
            .join(format!("{}.yaml", key.job_name))
    }
}

#[async_trait]
impl FlowDefinitionStore for FileFlowStore {
    async fn get_flow_definition(&self, key: &JobKey) -> Result<NodeDefinition, FlowError> {
        let path = self.path_for(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FlowError::definition_not_found(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        FlowLoader::parse_yaml(&content)
    }
}

/// Single-flight cache of dag instances keyed by workflow identity
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Latest instance registered for the workflow, terminal or not
    async fn get(&self, key: &JobKey) -> Option<Arc<Dag>>;

    /// Register `dag` under its workflow identity unless a non-terminal
    /// instance is already registered. The check and the insert are one
    /// atomic step. On conflict the live instance is returned.
    async fn try_register(&self, dag: Arc<Dag>) -> Result<(), Arc<Dag>>;

    /// Every registered instance
    async fn list(&self) -> Vec<Arc<Dag>>;
}

/// Process-local instance store
#[derive(Clone, Default)]
pub struct InMemoryInstanceStore {
    instances: Arc<RwLock<HashMap<JobKey, Arc<Dag>>>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn get(&self, key: &JobKey) -> Option<Arc<Dag>> {
        let instances = self.instances.read().await;
        instances.get(key).cloned()
    }

    async fn try_register(&self, dag: Arc<Dag>) -> Result<(), Arc<Dag>> {
        let mut instances = self.instances.write().await;
        if let Some(existing) = instances.get(dag.job_key()) {
            if !existing.status().is_terminal() {
                return Err(existing.clone());
            }
        }
        instances.insert(dag.job_key().clone(), dag);
        Ok(())
    }

    async fn list(&self) -> Vec<Arc<Dag>> {
        let instances = self.instances.read().await;
        instances.values().cloned().collect()
    }
}
