// SPDX-License-Identifier: MIT

//! Runtime graph model of one flow execution
//!
//! A [`Dag`] owns every [`Node`] in an arena; nodes refer to each other and
//! to their [`NodeLayer`] by index only. Topology is immutable after build.
//! Mutable run state (node, layer and dag status, per-layer running
//! counters) lives behind a single mutex so that a node transition, the
//! layer decrement and the layer-terminal check happen as one step.

use crate::core::status::Status;
use crate::scheduler::flow::types::{JobDesc, JobKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use uuid::Uuid;

/// What to do with later layers once a layer finishes with a failed node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Finalize the dag as FAILURE at the end of the failing layer
    #[default]
    FailFast,
    /// Keep submitting layers; the dag ends as FAILURE if any node failed
    Continue,
}

/// A unit of work inside a dag
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    /// Arena index, unique within the dag
    pub node_id: usize,
    pub group_name: String,
    pub node_name: String,
    /// Topological depth, 0 for nodes without dependencies
    pub layer: usize,
    /// Arena indices of the nodes this one waits for
    pub depends_on: Vec<usize>,
    /// Job shipped to the actuator
    pub raw_data: JobDesc,
}

impl Node {
    pub fn key(&self) -> JobKey {
        JobKey::new(&self.group_name, &self.node_name)
    }
}

/// Nodes sharing one topological depth, executed concurrently
#[derive(Debug, Clone, Serialize)]
pub struct NodeLayer {
    pub layer: usize,
    pub status: Status,
    /// Members not yet terminal; set when the layer is submitted
    pub running_nodes: usize,
    pub nodes: Vec<usize>,
}

/// Result of recording a terminal node event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// The node's layer still has live members
    Pending,
    /// The layer finished and the next one was submitted
    NextLayer { layer: usize, nodes: Vec<usize> },
    /// The dag reached a terminal status
    Finished(Status),
}

/// An accepted terminal transition of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub node: usize,
    pub status: Status,
    /// Position of this transition in the dag's transition order
    pub seq: u64,
    pub progress: Progress,
    /// Never-submitted nodes marked KILLED because the dag finished early.
    /// The i-th entry was recorded at `seq + 1 + i`.
    pub cancelled: Vec<usize>,
}

#[derive(Debug)]
struct DagState {
    status: Status,
    node_status: Vec<Status>,
    layers: Vec<NodeLayer>,
    kill_requested: bool,
    has_failures: bool,
    // last transition sequence number handed out
    seq: u64,
}

impl DagState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// One execution instance of a flow
pub struct Dag {
    id: Uuid,
    job_key: JobKey,
    scheduler_name: String,
    nodes: Vec<Node>,
    by_key: HashMap<JobKey, usize>,
    state: Mutex<DagState>,
    status_tx: watch::Sender<Status>,
}

impl Dag {
    /// Create a dag from nodes whose `node_id` equals their position and
    /// whose `layer` is already computed.
    pub(crate) fn new(job_key: JobKey, nodes: Vec<Node>) -> Self {
        let layer_count = nodes.iter().map(|n| n.layer + 1).max().unwrap_or(0);
        let mut layers: Vec<NodeLayer> = (0..layer_count)
            .map(|layer| NodeLayer {
                layer,
                status: Status::Ready,
                running_nodes: 0,
                nodes: Vec::new(),
            })
            .collect();
        for node in &nodes {
            layers[node.layer].nodes.push(node.node_id);
        }

        let by_key = nodes.iter().map(|n| (n.key(), n.node_id)).collect();
        let (status_tx, _) = watch::channel(Status::Ready);

        Self {
            id: Uuid::new_v4(),
            job_key,
            scheduler_name: String::new(),
            state: Mutex::new(DagState {
                status: Status::Ready,
                node_status: vec![Status::Ready; nodes.len()],
                layers,
                kill_requested: false,
                has_failures: false,
                seq: 0,
            }),
            nodes,
            by_key,
            status_tx,
        }
    }

    pub fn with_scheduler_name(mut self, scheduler_name: impl Into<String>) -> Self {
        self.scheduler_name = scheduler_name.into();
        self
    }

    fn lock(&self) -> MutexGuard<'_, DagState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Workflow identity used for single-flight
    pub fn job_key(&self) -> &JobKey {
        &self.job_key
    }

    pub fn scheduler_name(&self) -> &str {
        &self.scheduler_name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, node: usize) -> Option<&Node> {
        self.nodes.get(node)
    }

    pub fn find_node(&self, group_name: &str, node_name: &str) -> Option<usize> {
        self.by_key
            .get(&JobKey::new(group_name, node_name))
            .copied()
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    pub fn node_status(&self, node: usize) -> Option<Status> {
        self.lock().node_status.get(node).copied()
    }

    pub fn layer_count(&self) -> usize {
        self.lock().layers.len()
    }

    pub fn layer(&self, layer: usize) -> Option<NodeLayer> {
        self.lock().layers.get(layer).cloned()
    }

    pub fn is_last_layer(&self, layer: usize) -> bool {
        layer + 1 == self.layer_count()
    }

    pub fn is_kill_requested(&self) -> bool {
        self.lock().kill_requested
    }

    /// Mark the dag RUNNING and submit layer 0.
    ///
    /// Returns the nodes to publish RUNNING for; empty if the dag was
    /// already started.
    pub fn start(&self) -> Vec<usize> {
        let mut state = self.lock();
        if state.status != Status::Ready {
            return Vec::new();
        }
        self.set_status(&mut state, Status::Running);
        submit_layer(&mut state, 0)
    }

    /// READY -> RUNNING for a node of a submitted layer.
    ///
    /// Returns the transition's sequence number, or `None` if the node is
    /// not ready or its layer is not in flight.
    pub fn mark_running(&self, node: usize) -> Option<u64> {
        let mut state = self.lock();
        let layer = self.nodes.get(node)?.layer;
        if state.status.is_terminal()
            || !state.node_status[node].is_ready()
            || !state.layers[layer].status.is_running()
        {
            return None;
        }
        state.node_status[node] = Status::Running;
        Some(state.next_seq())
    }

    /// Whether a node is live in the in-flight layer and can still be killed
    pub fn is_in_flight(&self, node: usize) -> bool {
        let state = self.lock();
        let Some(layer) = self.nodes.get(node).map(|n| n.layer) else {
            return false;
        };
        !state.status.is_terminal()
            && !state.node_status[node].is_terminal()
            && state.layers[layer].status.is_running()
    }

    /// Record a terminal status for a node.
    ///
    /// Returns `None` when the event does not apply (node already terminal,
    /// layer not submitted, unknown node), so duplicate or late events never
    /// touch the running counter twice.
    pub fn complete(&self, node: usize, status: Status, policy: FailurePolicy) -> Option<Completion> {
        if !status.is_terminal() {
            return None;
        }
        let layer = self.nodes.get(node)?.layer;

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.node_status[node].is_terminal() || !state.layers[layer].status.is_running() {
            return None;
        }

        state.node_status[node] = status;
        let seq = state.next_seq();
        if status == Status::Failure {
            state.has_failures = true;
        }
        let nl = &mut state.layers[layer];
        nl.running_nodes = nl.running_nodes.saturating_sub(1);
        if nl.running_nodes > 0 {
            return Some(Completion {
                node,
                status,
                seq,
                progress: Progress::Pending,
                cancelled: Vec::new(),
            });
        }

        let layer_status = aggregate(nl.nodes.iter().map(|&n| state.node_status[n]));
        state.layers[layer].status = layer_status;

        let last = layer + 1 == state.layers.len();
        let finish = if state.kill_requested || layer_status == Status::Killed {
            Some(Status::Killed)
        } else if layer_status == Status::Failure && policy == FailurePolicy::FailFast {
            Some(Status::Failure)
        } else if last {
            Some(if state.has_failures {
                Status::Failure
            } else {
                Status::Success
            })
        } else {
            None
        };

        let (progress, cancelled) = match finish {
            Some(final_status) => {
                let cancelled = self.finish(state, final_status);
                (Progress::Finished(final_status), cancelled)
            }
            None => {
                let nodes = submit_layer(state, layer + 1);
                (
                    Progress::NextLayer {
                        layer: layer + 1,
                        nodes,
                    },
                    Vec::new(),
                )
            }
        };

        Some(Completion {
            node,
            status,
            seq,
            progress,
            cancelled,
        })
    }

    /// Begin killing the dag.
    ///
    /// Returns the live nodes of the in-flight layer; each must receive a
    /// KILLED event. If the dag never started it is finalized immediately and
    /// the returned list is empty.
    pub fn request_kill(&self) -> KillPlan {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return KillPlan::default();
        }
        state.kill_requested = true;

        if state.status == Status::Ready {
            let first_seq = state.seq + 1;
            let cancelled = self.finish(&mut state, Status::Killed);
            return KillPlan {
                to_kill: Vec::new(),
                cancelled,
                first_seq,
            };
        }

        let to_kill = state
            .layers
            .iter()
            .filter(|l| l.status.is_running())
            .flat_map(|l| l.nodes.iter().copied())
            .filter(|&n| !state.node_status[n].is_terminal())
            .collect();
        KillPlan {
            to_kill,
            cancelled: Vec::new(),
            first_seq: 0,
        }
    }

    /// Mark every never-submitted node and layer KILLED and set the final
    /// dag status. Returns the nodes that were cancelled.
    fn finish(&self, state: &mut DagState, final_status: Status) -> Vec<usize> {
        let mut cancelled = Vec::new();
        for layer in state.layers.iter_mut() {
            if layer.status.is_terminal() {
                continue;
            }
            for &n in &layer.nodes {
                if !state.node_status[n].is_terminal() {
                    state.node_status[n] = Status::Killed;
                    state.seq += 1;
                    cancelled.push(n);
                }
            }
            layer.status = Status::Killed;
            layer.running_nodes = 0;
        }
        self.set_status(state, final_status);
        cancelled
    }

    fn set_status(&self, state: &mut DagState, status: Status) {
        state.status = status;
        self.status_tx.send_replace(status);
    }

    /// Watch dag-level status changes
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.status_tx.subscribe()
    }

    /// Wait until the dag reaches a terminal status
    pub async fn wait_terminal(&self) -> Status {
        let mut rx = self.watch_status();
        loop {
            let current = *rx.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    /// Point-in-time view of the dag, suitable for serialization
    pub fn snapshot(&self) -> DagSnapshot {
        let state = self.lock();
        DagSnapshot {
            id: self.id,
            job_key: self.job_key.clone(),
            scheduler_name: self.scheduler_name.clone(),
            status: state.status,
            layers: state
                .layers
                .iter()
                .map(|l| LayerSnapshot {
                    layer: l.layer,
                    status: l.status,
                    running_nodes: l.running_nodes,
                    nodes: l
                        .nodes
                        .iter()
                        .map(|&n| NodeSnapshot {
                            node_id: n,
                            group_name: self.nodes[n].group_name.clone(),
                            node_name: self.nodes[n].node_name.clone(),
                            status: state.node_status[n],
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for Dag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dag")
            .field("id", &self.id)
            .field("job_key", &self.job_key)
            .field("nodes", &self.nodes.len())
            .field("status", &self.status())
            .finish()
    }
}

/// Nodes a kill request must act on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillPlan {
    /// Live nodes of the in-flight layer; publish KILLED for each
    pub to_kill: Vec<usize>,
    /// Nodes already marked KILLED without ever being submitted
    pub cancelled: Vec<usize>,
    /// Sequence number of the first cancelled node; the rest follow in order
    pub first_seq: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DagSnapshot {
    pub id: Uuid,
    pub job_key: JobKey,
    pub scheduler_name: String,
    pub status: Status,
    pub layers: Vec<LayerSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerSnapshot {
    pub layer: usize,
    pub status: Status,
    pub running_nodes: usize,
    pub nodes: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub node_id: usize,
    pub group_name: String,
    pub node_name: String,
    pub status: Status,
}

fn submit_layer(state: &mut DagState, layer: usize) -> Vec<usize> {
    let Some(nl) = state.layers.get_mut(layer) else {
        return Vec::new();
    };
    nl.status = Status::Running;
    nl.running_nodes = nl.nodes.len();
    nl.nodes.clone()
}

/// KILLED beats FAILURE beats SUCCESS
fn aggregate(statuses: impl Iterator<Item = Status>) -> Status {
    statuses.fold(Status::Success, |acc, s| match (acc, s) {
        (Status::Killed, _) | (_, Status::Killed) => Status::Killed,
        (Status::Failure, _) | (_, Status::Failure) => Status::Failure,
        _ => Status::Success,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: usize, name: &str, layer: usize, deps: Vec<usize>) -> Node {
        Node {
            node_id: id,
            group_name: "g".to_string(),
            node_name: name.to_string(),
            layer,
            depends_on: deps,
            raw_data: JobDesc::default(),
        }
    }

    /// {A: [], B: [], C: [A,B], D: [C]}
    fn diamond() -> Dag {
        Dag::new(
            JobKey::new("g", "flow"),
            vec![
                node(0, "A", 0, vec![]),
                node(1, "B", 0, vec![]),
                node(2, "C", 1, vec![0, 1]),
                node(3, "D", 2, vec![2]),
            ],
        )
        .with_scheduler_name("s1")
    }

    fn run_all(dag: &Dag, nodes: &[usize]) {
        for &n in nodes {
            assert!(dag.mark_running(n).is_some());
        }
    }

    #[test]
    fn test_layers_grouped_by_depth() {
        let dag = diamond();
        assert_eq!(dag.layer_count(), 3);
        assert_eq!(dag.layer(0).unwrap().nodes, vec![0, 1]);
        assert_eq!(dag.layer(1).unwrap().nodes, vec![2]);
        assert_eq!(dag.layer(2).unwrap().nodes, vec![3]);
        assert!(dag.is_last_layer(2));
        assert_eq!(dag.find_node("g", "C"), Some(2));
        assert_eq!(dag.scheduler_name(), "s1");
        assert_eq!(dag.status(), Status::Ready);
    }

    #[test]
    fn test_start_submits_first_layer_once() {
        let dag = diamond();
        assert_eq!(dag.start(), vec![0, 1]);
        assert_eq!(dag.status(), Status::Running);
        let l0 = dag.layer(0).unwrap();
        assert_eq!(l0.status, Status::Running);
        assert_eq!(l0.running_nodes, 2);
        assert!(dag.start().is_empty());
    }

    #[test]
    fn test_barrier_blocks_next_layer() {
        let dag = diamond();
        dag.start();
        // C is in layer 1, not yet submitted
        assert!(dag.mark_running(2).is_none());
        assert!(dag.complete(2, Status::Success, FailurePolicy::FailFast).is_none());
    }

    #[test]
    fn test_success_path_walks_all_layers() {
        let dag = diamond();
        let first = dag.start();
        run_all(&dag, &first);

        let c = dag.complete(0, Status::Success, FailurePolicy::FailFast).unwrap();
        assert_eq!(c.progress, Progress::Pending);
        assert_eq!(dag.layer(0).unwrap().running_nodes, 1);

        let c = dag.complete(1, Status::Success, FailurePolicy::FailFast).unwrap();
        assert_eq!(
            c.progress,
            Progress::NextLayer {
                layer: 1,
                nodes: vec![2]
            }
        );
        assert_eq!(dag.layer(0).unwrap().status, Status::Success);

        assert!(dag.mark_running(2).is_some());
        let c = dag.complete(2, Status::Success, FailurePolicy::FailFast).unwrap();
        assert_eq!(
            c.progress,
            Progress::NextLayer {
                layer: 2,
                nodes: vec![3]
            }
        );

        assert!(dag.mark_running(3).is_some());
        let c = dag.complete(3, Status::Success, FailurePolicy::FailFast).unwrap();
        assert_eq!(c.progress, Progress::Finished(Status::Success));
        assert_eq!(dag.status(), Status::Success);
        assert!(dag.layer(2).unwrap().status.is_terminal());
    }

    #[test]
    fn test_duplicate_completion_is_noop() {
        let dag = diamond();
        let first = dag.start();
        run_all(&dag, &first);

        assert!(dag.complete(0, Status::Success, FailurePolicy::FailFast).is_some());
        assert!(dag.complete(0, Status::Success, FailurePolicy::FailFast).is_none());
        assert!(dag.complete(0, Status::Failure, FailurePolicy::FailFast).is_none());
        assert_eq!(dag.layer(0).unwrap().running_nodes, 1);
        assert_eq!(dag.node_status(0), Some(Status::Success));
    }

    #[test]
    fn test_non_terminal_completion_rejected() {
        let dag = diamond();
        dag.start();
        assert!(dag.complete(0, Status::Running, FailurePolicy::FailFast).is_none());
        assert!(dag.complete(99, Status::Success, FailurePolicy::FailFast).is_none());
    }

    #[test]
    fn test_fail_fast_stops_at_layer_barrier() {
        let dag = diamond();
        let first = dag.start();
        run_all(&dag, &first);

        let c = dag.complete(0, Status::Failure, FailurePolicy::FailFast).unwrap();
        assert_eq!(c.progress, Progress::Pending);

        let c = dag.complete(1, Status::Success, FailurePolicy::FailFast).unwrap();
        assert_eq!(c.progress, Progress::Finished(Status::Failure));
        assert_eq!(c.cancelled, vec![2, 3]);
        assert_eq!(dag.status(), Status::Failure);
        assert_eq!(dag.layer(0).unwrap().status, Status::Failure);
        assert_eq!(dag.layer(2).unwrap().status, Status::Killed);
        assert_eq!(dag.node_status(3), Some(Status::Killed));
    }

    #[test]
    fn test_continue_policy_runs_on_and_reports_failure() {
        let dag = diamond();
        let first = dag.start();
        run_all(&dag, &first);

        dag.complete(0, Status::Failure, FailurePolicy::Continue);
        let c = dag.complete(1, Status::Success, FailurePolicy::Continue).unwrap();
        assert!(matches!(c.progress, Progress::NextLayer { layer: 1, .. }));

        dag.mark_running(2);
        dag.complete(2, Status::Success, FailurePolicy::Continue);
        dag.mark_running(3);
        let c = dag.complete(3, Status::Success, FailurePolicy::Continue).unwrap();
        assert_eq!(c.progress, Progress::Finished(Status::Failure));
        assert_eq!(dag.status(), Status::Failure);
    }

    #[test]
    fn test_kill_in_flight_layer_any_order() {
        for order in [[0usize, 1], [1, 0]] {
            let dag = diamond();
            let first = dag.start();
            run_all(&dag, &first);

            let plan = dag.request_kill();
            assert_eq!(plan.to_kill, vec![0, 1]);
            assert!(dag.is_kill_requested());

            let c = dag.complete(order[0], Status::Killed, FailurePolicy::FailFast).unwrap();
            assert_eq!(c.progress, Progress::Pending);
            let c = dag.complete(order[1], Status::Killed, FailurePolicy::FailFast).unwrap();
            assert_eq!(c.progress, Progress::Finished(Status::Killed));
            assert_eq!(c.cancelled, vec![2, 3]);
            assert_eq!(dag.status(), Status::Killed);
        }
    }

    #[test]
    fn test_kill_overrides_success_finalization() {
        let dag = diamond();
        let first = dag.start();
        run_all(&dag, &first);

        let plan = dag.request_kill();
        dag.complete(plan.to_kill[0], Status::Killed, FailurePolicy::FailFast);
        // sibling finishes successfully before its kill arrives
        let c = dag.complete(1, Status::Success, FailurePolicy::FailFast).unwrap();
        assert_eq!(c.progress, Progress::Finished(Status::Killed));
        // late kill is a no-op
        assert!(dag.complete(1, Status::Killed, FailurePolicy::FailFast).is_none());
        assert_eq!(dag.status(), Status::Killed);
    }

    #[test]
    fn test_single_node_kill_finalizes_dag_killed() {
        let dag = diamond();
        let first = dag.start();
        run_all(&dag, &first);

        dag.complete(0, Status::Success, FailurePolicy::Continue);
        let c = dag.complete(1, Status::Killed, FailurePolicy::Continue).unwrap();
        assert_eq!(c.progress, Progress::Finished(Status::Killed));
        assert_eq!(dag.layer(0).unwrap().status, Status::Killed);
    }

    #[test]
    fn test_kill_before_start_finalizes_immediately() {
        let dag = diamond();
        let plan = dag.request_kill();
        assert!(plan.to_kill.is_empty());
        assert_eq!(plan.cancelled, vec![0, 1, 2, 3]);
        assert_eq!(dag.status(), Status::Killed);
        assert!(dag.start().is_empty());
        assert_eq!(dag.request_kill(), KillPlan::default());
    }

    #[test]
    fn test_kill_skips_already_finished_members() {
        let dag = diamond();
        let first = dag.start();
        run_all(&dag, &first);
        dag.complete(0, Status::Success, FailurePolicy::FailFast);

        let plan = dag.request_kill();
        assert_eq!(plan.to_kill, vec![1]);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let dag = diamond();
        let first = dag.start();
        run_all(&dag, &first);

        let snap = dag.snapshot();
        assert_eq!(snap.status, Status::Running);
        assert_eq!(snap.layers.len(), 3);
        assert_eq!(snap.layers[0].running_nodes, 2);
        assert_eq!(snap.layers[0].nodes[0].node_name, "A");
        assert_eq!(snap.layers[0].nodes[0].status, Status::Running);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["status"], "RUNNING");
        assert_eq!(json["job_key"]["job_name"], "flow");
    }

    #[tokio::test]
    async fn test_wait_terminal_resolves_on_finish() {
        let dag = std::sync::Arc::new(diamond());
        let first = dag.start();
        run_all(&dag, &first);

        let waiter = {
            let dag = dag.clone();
            tokio::spawn(async move { dag.wait_terminal().await })
        };

        dag.request_kill();
        dag.complete(0, Status::Killed, FailurePolicy::FailFast);
        dag.complete(1, Status::Killed, FailurePolicy::FailFast);

        assert_eq!(waiter.await.unwrap(), Status::Killed);
    }

    #[test]
    fn test_concurrent_duplicate_completion_counts_once() {
        let dag = diamond();
        let first = dag.start();
        run_all(&dag, &first);

        let accepted = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for i in 0..8 {
                let dag = &dag;
                let accepted = &accepted;
                scope.spawn(move || {
                    let status = if i % 2 == 0 {
                        Status::Success
                    } else {
                        Status::Killed
                    };
                    if dag.complete(0, status, FailurePolicy::FailFast).is_some() {
                        accepted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 1);
        let l0 = dag.layer(0).unwrap();
        assert_eq!(l0.running_nodes, 1);
        assert_eq!(l0.status, Status::Running);
    }

    #[test]
    fn test_concurrent_layer_completion_submits_next_once() {
        let dag = Dag::new(
            JobKey::new("g", "wide"),
            (0..16)
                .map(|i| node(i, &format!("w{}", i), 0, vec![]))
                .chain(std::iter::once(node(16, "join", 1, (0..16).collect())))
                .collect(),
        );
        let first = dag.start();
        run_all(&dag, &first);

        let advanced = std::sync::Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for &n in &first {
                let dag = &dag;
                let advanced = &advanced;
                scope.spawn(move || {
                    let c = dag.complete(n, Status::Success, FailurePolicy::FailFast).unwrap();
                    if c.progress != Progress::Pending {
                        advanced.lock().unwrap().push(c.progress);
                    }
                });
            }
        });

        assert_eq!(
            *advanced.lock().unwrap(),
            vec![Progress::NextLayer {
                layer: 1,
                nodes: vec![16]
            }]
        );
        assert_eq!(dag.layer(0).unwrap().running_nodes, 0);
    }

    #[test]
    fn test_transition_sequence_follows_barrier() {
        let dag = diamond();
        let first = dag.start();
        let s0 = dag.mark_running(first[0]).unwrap();
        let s1 = dag.mark_running(first[1]).unwrap();
        assert!(s1 > s0);

        let a = dag.complete(0, Status::Success, FailurePolicy::FailFast).unwrap();
        let b = dag.complete(1, Status::Failure, FailurePolicy::FailFast).unwrap();
        assert!(a.seq > s1);
        assert_eq!(b.seq, a.seq + 1);
        // cancelled nodes follow the completion that finished the dag
        assert_eq!(b.cancelled, vec![2, 3]);
        assert!(dag.mark_running(2).is_none());
    }

    #[test]
    fn test_kill_plan_sequence_before_start() {
        let dag = diamond();
        let plan = dag.request_kill();
        assert_eq!(plan.first_seq, 1);
        assert_eq!(plan.cancelled.len(), 4);
    }

    #[test]
    fn test_in_flight_only_for_submitted_layer() {
        let dag = diamond();
        assert!(!dag.is_in_flight(0));
        let first = dag.start();
        assert!(dag.is_in_flight(0));
        assert!(!dag.is_in_flight(2));
        assert!(!dag.is_in_flight(42));

        run_all(&dag, &first);
        dag.complete(0, Status::Success, FailurePolicy::FailFast);
        assert!(!dag.is_in_flight(0));
        assert!(dag.is_in_flight(1));
    }

    #[test]
    fn test_aggregate_precedence() {
        use Status::*;
        assert_eq!(aggregate([Success, Success].into_iter()), Success);
        assert_eq!(aggregate([Success, Failure].into_iter()), Failure);
        assert_eq!(aggregate([Failure, Killed, Success].into_iter()), Killed);
    }
}
