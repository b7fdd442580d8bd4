// SPDX-License-Identifier: MIT

//! Lifecycle status shared by nodes, layers and dags

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution status of a node, a layer or a whole dag.
///
/// `Ready` and `Running` are live; `Success`, `Failure` and `Killed` are
/// terminal and never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created, not yet submitted
    #[default]
    Ready,
    /// Submitted, awaiting completion
    Running,
    Success,
    Failure,
    Killed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Failure | Status::Killed)
    }

    pub fn is_ready(&self) -> bool {
        *self == Status::Ready
    }

    pub fn is_running(&self) -> bool {
        *self == Status::Running
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ready => "READY",
            Status::Running => "RUNNING",
            Status::Success => "SUCCESS",
            Status::Failure => "FAILURE",
            Status::Killed => "KILLED",
        };
        f.write_str(s)
    }
}
