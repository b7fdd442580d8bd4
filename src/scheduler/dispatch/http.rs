// SPDX-License-Identifier: MIT

//! HTTP transport to actuators
//!
//! Posts an [`ExecuteRequest`] as JSON to `<host>/api/jobs/execute` and
//! reads an [`ExecuteResponse`] back.

use super::request::{ExecuteRequest, ExecuteResponse};
use super::RemoteExecutor;
use crate::core::error::{DispatchError, FlowError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Actuator client over HTTP/JSON
pub struct HttpRemoteExecutor {
    client: Client,
}

impl HttpRemoteExecutor {
    /// Create a client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, FlowError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn execute_url(host: &str) -> String {
        format!("{}/api/jobs/execute", host.trim_end_matches('/'))
    }
}

#[async_trait]
impl RemoteExecutor for HttpRemoteExecutor {
    async fn execute(
        &self,
        host: &str,
        request: &ExecuteRequest,
    ) -> Result<ExecuteResponse, DispatchError> {
        let response = self
            .client
            .post(Self::execute_url(host))
            .json(request)
            .send()
            .await
            .map_err(|e| DispatchError::transport(host, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::transport(
                host,
                format!("actuator returned {}: {}", status, body),
            ));
        }

        response
            .json::<ExecuteResponse>()
            .await
            .map_err(|e| DispatchError::transport(host, format!("invalid response body: {}", e)))
    }
}
