// SPDX-License-Identifier: MIT

//! Flow definition types
//!
//! A flow is authored as a tree of [`NodeDefinition`]s. The document root is
//! a container whose `nodes` are the steps; any step may itself carry
//! `nodes`, which makes it a sub-flow that is inlined at build time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Stable identity of a job or workflow: group plus name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub group_name: String,
    pub job_name: String,
}

impl JobKey {
    pub fn new(group_name: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            job_name: job_name.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_name, self.job_name)
    }
}

impl FromStr for JobKey {
    type Err = String;

    /// Parses `group/name`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((group, name)) if !group.is_empty() && !name.is_empty() => {
                Ok(JobKey::new(group, name))
            }
            _ => Err(format!("Invalid job key '{}', expected group/name", s)),
        }
    }
}

/// Concrete job description carried by a node and shipped to the actuator.
///
/// Opaque to the engine: the actuator picks an executor from `job_type`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct JobDesc {
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub job_name: String,
    /// Executor tag understood by the actuator (e.g. "shell", "java", "http")
    #[serde(default)]
    pub job_type: String,
    pub job_path: Option<String>,
    pub job_command: Option<String>,
    pub job_parameters: Option<String>,
    #[serde(default)]
    pub extensible_parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub retry_count: u32,
}

/// A step in a flow definition
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NodeDefinition {
    /// Group of this node; inherited from the enclosing flow when absent
    pub group_name: Option<String>,
    /// Name of this node, unique within the flattened flow
    pub node_name: String,
    /// Dependencies - nodes that must complete before this runs
    #[serde(default)]
    pub depends_on: DependsOn,
    /// Job to execute; defaults to a job named after the node
    pub job: Option<JobDesc>,
    /// Child steps. A node with children is a sub-flow, not a job.
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
}

impl NodeDefinition {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = Some(group_name.into());
        self
    }

    pub fn with_depends_on<S: Into<String>>(mut self, deps: impl IntoIterator<Item = S>) -> Self {
        self.depends_on = DependsOn::Multiple(deps.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_job(mut self, job: JobDesc) -> Self {
        self.job = Some(job);
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<NodeDefinition>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn is_sub_flow(&self) -> bool {
        !self.nodes.is_empty()
    }
}

/// Dependencies of a node
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(untagged)]
pub enum DependsOn {
    /// No dependencies (entry node)
    #[default]
    None,
    /// Single dependency
    Single(String),
    /// Multiple dependencies
    Multiple(Vec<String>),
}

impl DependsOn {
    /// Convert to a vector of dependency names
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            DependsOn::None => vec![],
            DependsOn::Single(s) => vec![s.clone()],
            DependsOn::Multiple(v) => v.clone(),
        }
    }

    /// Check if this node has no dependencies (is an entry node)
    pub fn is_empty(&self) -> bool {
        match self {
            DependsOn::None => true,
            DependsOn::Single(_) => false,
            DependsOn::Multiple(v) => v.is_empty(),
        }
    }
}
