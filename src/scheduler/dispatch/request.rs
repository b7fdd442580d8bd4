// SPDX-License-Identifier: MIT

//! Wire shapes exchanged with actuators

use crate::core::status::Status;
use crate::scheduler::flow::types::{JobDesc, JobKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Remote execution request built from a node's job payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Unique per dispatch, used to correlate replies and kills
    pub request_id: u64,
    /// Dag instance the node belongs to
    pub dag_id: Uuid,
    pub scheduler_name: String,
    pub group_name: String,
    pub job_name: String,
    pub job_type: String,
    pub job_path: Option<String>,
    pub job_command: Option<String>,
    pub job_parameters: Option<String>,
    #[serde(default)]
    pub extensible_parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub retry_count: u32,
}

impl ExecuteRequest {
    pub fn from_job(request_id: u64, dag_id: Uuid, scheduler_name: &str, job: &JobDesc) -> Self {
        Self {
            request_id,
            dag_id,
            scheduler_name: scheduler_name.to_string(),
            group_name: job.group_name.clone(),
            job_name: job.job_name.clone(),
            job_type: job.job_type.clone(),
            job_path: job.job_path.clone(),
            job_command: job.job_command.clone(),
            job_parameters: job.job_parameters.clone(),
            extensible_parameters: job.extensible_parameters.clone(),
            retry_count: job.retry_count,
        }
    }

    pub fn job_key(&self) -> JobKey {
        JobKey::new(&self.group_name, &self.job_name)
    }
}

/// Actuator verdict for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecuteResponse {
    Succeeded {
        #[serde(default)]
        result: Option<String>,
    },
    Failed {
        reason: String,
    },
    Killed,
}

impl ExecuteResponse {
    /// Node status this verdict maps to
    pub fn status(&self) -> Status {
        match self {
            ExecuteResponse::Succeeded { .. } => Status::Success,
            ExecuteResponse::Failed { .. } => Status::Failure,
            ExecuteResponse::Killed => Status::Killed,
        }
    }
}
