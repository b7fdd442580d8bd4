// SPDX-License-Identifier: MIT

//! Remote dispatch of node work
//!
//! [`JobDispatcher`] is the only component that crosses the process
//! boundary. `dispatch` never blocks the caller: the send runs on its own
//! task and the outcome is handed to a completion callback.

pub mod http;
pub mod request;

pub use http::HttpRemoteExecutor;
pub use request::{ExecuteRequest, ExecuteResponse};

use crate::core::error::DispatchError;
use crate::scheduler::flow::types::JobKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

/// Transport to an actuator host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Send one request to `host` and wait for its verdict.
    ///
    /// Return `DispatchError::Transport` when no verdict could be obtained;
    /// the dispatcher then fails over to the next host.
    async fn execute(
        &self,
        host: &str,
        request: &ExecuteRequest,
    ) -> Result<ExecuteResponse, DispatchError>;
}

/// Candidate actuator hosts for a job
pub trait HostProvider: Send + Sync {
    fn available_hosts(&self, job: &JobKey) -> Vec<String>;
}

/// The same fixed host list for every job
#[derive(Debug, Clone, Default)]
pub struct StaticHosts {
    hosts: Vec<String>,
}

impl StaticHosts {
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts }
    }
}

impl HostProvider for StaticHosts {
    fn available_hosts(&self, _job: &JobKey) -> Vec<String> {
        self.hosts.clone()
    }
}

/// Sends node requests to actuators with bounded concurrency
pub struct JobDispatcher {
    executor: Arc<dyn RemoteExecutor>,
    hosts: Arc<dyn HostProvider>,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl JobDispatcher {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        hosts: Arc<dyn HostProvider>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            executor,
            hosts,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Send `request` in the background and call `on_complete` with the
    /// outcome. Must be called from within a tokio runtime.
    pub fn dispatch<F>(&self, request: ExecuteRequest, on_complete: F)
    where
        F: FnOnce(Result<ExecuteResponse, DispatchError>) + Send + 'static,
    {
        let executor = self.executor.clone();
        let hosts = self.hosts.available_hosts(&request.job_key());
        let permits = self.permits.clone();
        let in_flight = self.in_flight.clone();
        let request_id = request.request_id;

        // Held across spawn so the task cannot deregister before it is registered
        let mut registry = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let handle = tokio::spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => send_with_failover(executor.as_ref(), &hosts, &request).await,
                Err(_) => Err(DispatchError::transport("-", "dispatcher shut down")),
            };
            in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request_id);
            on_complete(result);
        });
        registry.insert(request_id, handle.abort_handle());
    }

    /// Abort an in-flight request; its completion callback will not run.
    pub fn cancel(&self, request_id: u64) -> bool {
        let handle = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&request_id);
        match handle {
            Some(handle) => {
                handle.abort();
                log::info!("Cancelled in-flight request {}", request_id);
                true
            }
            None => false,
        }
    }

    /// Number of requests sent or queued but not yet completed
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Try hosts from last to first; only transport errors move on to the next
async fn send_with_failover(
    executor: &dyn RemoteExecutor,
    hosts: &[String],
    request: &ExecuteRequest,
) -> Result<ExecuteResponse, DispatchError> {
    let mut last_error = None;
    for host in hosts.iter().rev() {
        log::debug!(
            "Sending request {} ({}) to {}",
            request.request_id,
            request.job_key(),
            host
        );
        match executor.execute(host, request).await {
            Ok(response) => return Ok(response),
            Err(e @ DispatchError::Transport { .. }) => {
                log::warn!("Request {} failed on {}: {}", request.request_id, host, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| DispatchError::NoAvailableHost(request.job_key().to_string())))
}
