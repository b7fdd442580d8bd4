// SPDX-License-Identifier: MIT

//! Flow execution controller
//!
//! `FlowJobExecutor::process` is the trigger callback. It builds a [`Dag`],
//! registers it single-flight, and publishes RUNNING for layer 0. From then
//! on progress is driven by listeners on the executor's [`EventBus`]:
//!
//! - RUNNING: mark the node running and hand it to the dispatcher
//! - SUCCESS / FAILURE / KILLED: record the result, then submit the next
//!   layer or finalize the dag once the layer's barrier is reached

use crate::core::error::{DispatchError, FlowError};
use crate::core::event::{Event, EventBus};
use crate::core::status::Status;
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::dispatch::{ExecuteRequest, ExecuteResponse, JobDispatcher};
use crate::scheduler::flow::builder::DagBuilder;
use crate::scheduler::flow::dag::{Dag, FailurePolicy, Progress};
use crate::scheduler::flow::store::{FlowDefinitionStore, InstanceStore};
use crate::scheduler::flow::types::JobKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;
use uuid::Uuid;

/// A node of a live dag, as carried on the event bus
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub dag: Arc<Dag>,
    pub node: usize,
}

/// A fired trigger for one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub job_key: JobKey,
    pub scheduler_name: String,
    pub fired_at: DateTime<Utc>,
}

impl Trigger {
    pub fn now(job_key: JobKey, scheduler_name: impl Into<String>) -> Self {
        Self {
            job_key,
            scheduler_name: scheduler_name.into(),
            fired_at: Utc::now(),
        }
    }
}

/// Result of handling a trigger
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// A new dag was built, registered and its first layer submitted
    Started(Arc<Dag>),
    /// A non-terminal dag already exists for the workflow; nothing started
    DuplicateSuppressed(Arc<Dag>),
}

impl ProcessOutcome {
    pub fn dag(&self) -> &Arc<Dag> {
        match self {
            ProcessOutcome::Started(dag) | ProcessOutcome::DuplicateSuppressed(dag) => dag,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, ProcessOutcome::Started(_))
    }
}

/// One node status change, broadcast to observers.
///
/// Transitions of different nodes may be broadcast from different tasks, so
/// receive order across nodes is not the order the dag accepted them in.
/// `seq` is assigned under the dag lock; sort by it to replay a dag's
/// history with layer barriers intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTransition {
    pub dag_id: Uuid,
    pub seq: u64,
    pub workflow: JobKey,
    pub group_name: String,
    pub node_name: String,
    pub node_id: usize,
    pub layer: usize,
    pub status: Status,
    pub at: DateTime<Utc>,
}

/// Execution controller for layered flows
pub struct FlowJobExecutor {
    me: Weak<FlowJobExecutor>,
    policy: FailurePolicy,
    definitions: Arc<dyn FlowDefinitionStore>,
    instances: Arc<dyn InstanceStore>,
    dispatcher: Arc<JobDispatcher>,
    bus: EventBus<NodeRef>,
    transitions: broadcast::Sender<NodeTransition>,
    next_request_id: AtomicU64,
    // (dag, node) -> request id of the in-flight dispatch
    requests: Mutex<HashMap<(Uuid, usize), u64>>,
}

impl FlowJobExecutor {
    /// Create the executor and wire its status listeners
    pub fn new(
        config: &SchedulerConfig,
        definitions: Arc<dyn FlowDefinitionStore>,
        instances: Arc<dyn InstanceStore>,
        dispatcher: Arc<JobDispatcher>,
    ) -> Arc<Self> {
        let (transitions, _) = broadcast::channel(config.event_buffer.max(1));

        let executor = Arc::new_cyclic(|me: &Weak<FlowJobExecutor>| Self {
            me: me.clone(),
            policy: config.failure_policy,
            definitions,
            instances,
            dispatcher,
            bus: EventBus::new(),
            transitions,
            next_request_id: AtomicU64::new(1),
            requests: Mutex::new(HashMap::new()),
        });
        executor.register_listeners();
        executor
    }

    fn register_listeners(&self) {
        let me = self.me.clone();
        self.bus.add_listener(Status::Running, move |event: &Event<NodeRef>| {
            if let Some(executor) = me.upgrade() {
                executor.on_running(&event.value);
            }
        });

        for status in [Status::Success, Status::Failure, Status::Killed] {
            let me = self.me.clone();
            self.bus.add_listener(status, move |event: &Event<NodeRef>| {
                if let Some(executor) = me.upgrade() {
                    executor.on_terminal(&event.value, event.status);
                }
            });
        }
    }

    /// Handle a fired trigger.
    ///
    /// Returns once layer 0 has been handed to the dispatcher; the dag then
    /// runs to completion in the background.
    pub async fn process(&self, trigger: Trigger) -> Result<ProcessOutcome, FlowError> {
        let key = &trigger.job_key;

        if let Some(existing) = self.instances.get(key).await {
            if !existing.status().is_terminal() {
                log::warn!(
                    "Duplicate trigger for {} suppressed, dag {} is {}",
                    key,
                    existing.id(),
                    existing.status()
                );
                return Ok(ProcessOutcome::DuplicateSuppressed(existing));
            }
        }

        let definition = self.definitions.get_flow_definition(key).await.map_err(|e| {
            log::error!("Failed to load flow definition {}: {}", key, e);
            e
        })?;

        let dag = DagBuilder::new(key.clone())
            .build(&definition)
            .map_err(|e| {
                log::error!("Failed to build dag for {}: {}", key, e);
                FlowError::from(e)
            })?
            .with_scheduler_name(trigger.scheduler_name.clone());
        let dag = Arc::new(dag);

        if let Err(live) = self.instances.try_register(dag.clone()).await {
            log::warn!(
                "Duplicate trigger for {} suppressed, dag {} registered concurrently",
                key,
                live.id()
            );
            return Ok(ProcessOutcome::DuplicateSuppressed(live));
        }

        log::info!(
            "Starting dag {} for {} ({} nodes in {} layers, fired at {})",
            dag.id(),
            key,
            dag.nodes().len(),
            dag.layer_count(),
            trigger.fired_at.to_rfc3339()
        );
        for node in dag.start() {
            self.publish(&dag, node, Status::Running);
        }
        Ok(ProcessOutcome::Started(dag))
    }

    /// Kill the live dag of a workflow.
    ///
    /// Returns the dag when a kill was issued, `None` if there is no
    /// non-terminal instance.
    pub async fn kill(&self, key: &JobKey) -> Option<Arc<Dag>> {
        let dag = self.instances.get(key).await?;
        if dag.status().is_terminal() {
            return None;
        }

        let plan = dag.request_kill();
        log::info!(
            "Killing dag {} for {}: {} live nodes",
            dag.id(),
            key,
            plan.to_kill.len()
        );
        for (i, &node) in plan.cancelled.iter().enumerate() {
            self.emit(&dag, node, Status::Killed, plan.first_seq + i as u64);
        }
        for node in plan.to_kill {
            self.publish(&dag, node, Status::Killed);
        }
        Some(dag)
    }

    /// Kill one node of the live dag of a workflow.
    ///
    /// Only nodes of the in-flight layer can be killed. Returns whether the
    /// node ended up KILLED by this call.
    pub async fn kill_node(&self, key: &JobKey, group_name: &str, node_name: &str) -> bool {
        let Some(dag) = self.instances.get(key).await else {
            return false;
        };
        let Some(node) = dag.find_node(group_name, node_name) else {
            return false;
        };
        if !dag.is_in_flight(node) {
            log::warn!(
                "Refusing to kill {}/{} of dag {}: not in the in-flight layer",
                group_name,
                node_name,
                dag.id()
            );
            return false;
        }
        self.publish(&dag, node, Status::Killed);
        // the remote result may have won the race
        dag.node_status(node) == Some(Status::Killed)
    }

    /// Latest dag registered for a workflow
    pub async fn instance(&self, key: &JobKey) -> Option<Arc<Dag>> {
        self.instances.get(key).await
    }

    pub async fn instances(&self) -> Vec<Arc<Dag>> {
        self.instances.list().await
    }

    /// Receive every node transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<NodeTransition> {
        self.transitions.subscribe()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn publish(&self, dag: &Arc<Dag>, node: usize, status: Status) {
        self.bus.publish(
            NodeRef {
                dag: dag.clone(),
                node,
            },
            status,
        );
    }

    fn on_running(&self, node_ref: &NodeRef) {
        let NodeRef { dag, node } = node_ref;
        let Some(job) = dag.node(*node).map(|n| &n.raw_data) else {
            return;
        };
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = ExecuteRequest::from_job(request_id, dag.id(), dag.scheduler_name(), job);

        // Held from mark_running until the request is registered: a KILLED
        // event for this node either lands first, and mark_running refuses,
        // or finds the request and cancels it.
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let Some(seq) = dag.mark_running(*node) else {
            log::debug!("Ignoring RUNNING for node {} of dag {}", node, dag.id());
            return;
        };
        self.emit(dag, *node, Status::Running, seq);

        let me = self.me.clone();
        let callback_ref = node_ref.clone();
        self.dispatcher.dispatch(request, move |result| {
            if let Some(executor) = me.upgrade() {
                executor.on_dispatch_result(callback_ref, request_id, result);
            }
        });
        requests.insert((dag.id(), *node), request_id);
    }

    fn on_dispatch_result(
        &self,
        node_ref: NodeRef,
        request_id: u64,
        result: Result<ExecuteResponse, DispatchError>,
    ) {
        {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            if requests.get(&(node_ref.dag.id(), node_ref.node)) == Some(&request_id) {
                requests.remove(&(node_ref.dag.id(), node_ref.node));
            }
        }

        let name = node_label(&node_ref);
        let status = match result {
            Ok(ExecuteResponse::Failed { reason }) => {
                log::error!(
                    "{}",
                    DispatchError::RemoteFailure(format!("{}: {}", name, reason))
                );
                Status::Failure
            }
            Ok(response) => response.status(),
            Err(e) => {
                log::error!("Dispatch of {} failed: {}", name, e);
                Status::Failure
            }
        };
        self.bus.publish(node_ref, status);
    }

    fn on_terminal(&self, node_ref: &NodeRef, status: Status) {
        let NodeRef { dag, node } = node_ref;
        let Some(completion) = dag.complete(*node, status, self.policy) else {
            log::debug!(
                "Ignoring {} for node {} of dag {}",
                status,
                node,
                dag.id()
            );
            return;
        };
        self.emit(dag, *node, status, completion.seq);

        if status == Status::Killed {
            let request_id = self
                .requests
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&(dag.id(), *node));
            if let Some(request_id) = request_id {
                self.dispatcher.cancel(request_id);
            }
        }

        for (i, &cancelled) in completion.cancelled.iter().enumerate() {
            self.emit(dag, cancelled, Status::Killed, completion.seq + 1 + i as u64);
        }

        match completion.progress {
            Progress::Pending => {}
            Progress::NextLayer { layer, nodes } => {
                log::info!("Dag {} submitting layer {}", dag.id(), layer);
                for next in nodes {
                    self.publish(dag, next, Status::Running);
                }
            }
            Progress::Finished(final_status) => {
                log::info!(
                    "Dag {} for {} finished: {}",
                    dag.id(),
                    dag.job_key(),
                    final_status
                );
            }
        }
    }

    fn emit(&self, dag: &Dag, node: usize, status: Status, seq: u64) {
        let Some(n) = dag.node(node) else {
            return;
        };
        log::info!(
            "Dag {} node {}/{} (layer {}) -> {}",
            dag.id(),
            n.group_name,
            n.node_name,
            n.layer,
            status
        );
        // No receivers is fine
        let _ = self.transitions.send(NodeTransition {
            dag_id: dag.id(),
            seq,
            workflow: dag.job_key().clone(),
            group_name: n.group_name.clone(),
            node_name: n.node_name.clone(),
            node_id: node,
            layer: n.layer,
            status,
            at: Utc::now(),
        });
    }
}

fn node_label(node_ref: &NodeRef) -> String {
    node_ref
        .dag
        .node(node_ref.node)
        .map(|n| format!("{}/{}", n.group_name, n.node_name))
        .unwrap_or_else(|| format!("#{}", node_ref.node))
}
