// SPDX-License-Identifier: MIT

//! Typed error handling for layerflow-rs
//!
//! Build-time graph errors abort a submission before anything runs.
//! Dispatch errors never escape the engine: they are absorbed into the
//! node status machine as `FAILURE`.

use thiserror::Error;

/// Top-level error type for layerflow-rs
#[derive(Debug, Error)]
pub enum FlowError {
    /// Flow definition could not be compiled into a dag
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// No flow definition is registered for the workflow
    #[error("Flow definition not found: {0}")]
    DefinitionNotFound(String),

    /// Configuration errors (invalid values, unreadable files)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors raised while compiling a definition tree into a dag
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// No progress could be made while layering; the listed nodes form or
    /// depend on a cycle
    #[error("Circular dependency detected among nodes: {unresolved:?}")]
    Cycle { unresolved: Vec<String> },

    /// A `depends_on` entry names a node that does not exist in the flow
    #[error("Node '{node}' depends on unknown node '{missing}'")]
    DanglingReference { node: String, missing: String },

    /// Two nodes in the flattened flow share a name
    #[error("Duplicate node name: {0}")]
    DuplicateNode(String),
}

/// Errors raised while sending work to an actuator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Send failed before any remote response was obtained
    #[error("Transport error talking to {host}: {message}")]
    Transport { host: String, message: String },

    /// Host provider returned no candidates
    #[error("No available actuator host for job {0}")]
    NoAvailableHost(String),

    /// Actuator reported that the job failed
    #[error("Remote execution failed: {0}")]
    RemoteFailure(String),
}

impl FlowError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a definition-not-found error
    pub fn definition_not_found(key: impl Into<String>) -> Self {
        Self::DefinitionNotFound(key.into())
    }
}

impl DispatchError {
    pub fn transport(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            host: host.into(),
            message: message.into(),
        }
    }
}
