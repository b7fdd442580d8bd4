// SPDX-License-Identifier: MIT

//! Dag builder - compiles a definition tree into a layered dag
//!
//! Sub-flows are inlined: a node with children is not executable itself.
//! Its `depends_on` is handed to the sub-flow's entry nodes (children that
//! depend on no sibling), and a dependency on its name resolves to the
//! sub-flow's exit nodes (children no sibling depends on).

use crate::core::error::GraphError;
use crate::scheduler::flow::dag::{Dag, Node};
use crate::scheduler::flow::types::{JobDesc, JobKey, NodeDefinition};
use std::collections::{HashMap, HashSet};

/// A leaf of the definition tree with its names not yet resolved
#[derive(Debug)]
struct FlatNode {
    group_name: String,
    node_name: String,
    depends_on: Vec<String>,
    job: JobDesc,
}

#[derive(Default)]
struct Flattened {
    nodes: Vec<FlatNode>,
    /// leaf name -> index in `nodes`
    leaves: HashMap<String, usize>,
    /// sub-flow name -> exit names (leaves or nested sub-flows)
    aliases: HashMap<String, Vec<String>>,
}

impl Flattened {
    fn claim(&self, name: &str) -> Result<(), GraphError> {
        if self.leaves.contains_key(name) || self.aliases.contains_key(name) {
            return Err(GraphError::DuplicateNode(name.to_string()));
        }
        Ok(())
    }

    /// Resolve a dependency name to leaf indices
    fn resolve(&self, name: &str, out: &mut Vec<usize>) -> bool {
        if let Some(&idx) = self.leaves.get(name) {
            out.push(idx);
            return true;
        }
        match self.aliases.get(name) {
            Some(exits) => exits.iter().all(|exit| self.resolve(exit, out)),
            None => false,
        }
    }
}

/// Builds [`Dag`] instances for one workflow identity
pub struct DagBuilder {
    job_key: JobKey,
}

impl DagBuilder {
    pub fn new(job_key: JobKey) -> Self {
        Self { job_key }
    }

    /// Compile `root` into a dag with every node READY
    pub fn build(&self, root: &NodeDefinition) -> Result<Dag, GraphError> {
        let group = root
            .group_name
            .clone()
            .unwrap_or_else(|| self.job_key.group_name.clone());

        let mut flat = Flattened::default();
        if root.is_sub_flow() {
            flatten_children(root, &group, &[], &mut flat)?;
        } else {
            flatten(root, &group, &[], &mut flat)?;
        }

        let depends_on = resolve_dependencies(&flat)?;
        let layers = compute_layers(&flat, &depends_on)?;

        let nodes: Vec<Node> = flat
            .nodes
            .into_iter()
            .zip(depends_on)
            .zip(layers)
            .enumerate()
            .map(|(node_id, ((flat, depends_on), layer))| Node {
                node_id,
                group_name: flat.group_name,
                node_name: flat.node_name,
                layer,
                depends_on,
                raw_data: flat.job,
            })
            .collect();

        log::debug!(
            "Built dag for '{}' with {} nodes",
            self.job_key,
            nodes.len()
        );

        Ok(Dag::new(self.job_key.clone(), nodes))
    }
}

/// Flatten one definition node; returns the leaf/sub-flow names other nodes
/// reach when depending on it.
fn flatten(
    def: &NodeDefinition,
    parent_group: &str,
    inherited: &[String],
    flat: &mut Flattened,
) -> Result<Vec<String>, GraphError> {
    let group = def.group_name.as_deref().unwrap_or(parent_group);
    flat.claim(&def.node_name)?;

    if def.is_sub_flow() {
        let exits = flatten_children(def, group, inherited, flat)?;
        flat.aliases.insert(def.node_name.clone(), exits);
        return Ok(vec![def.node_name.clone()]);
    }

    let mut depends_on = def.depends_on.to_vec();
    depends_on.extend(inherited.iter().cloned());

    let mut job = def.job.clone().unwrap_or_default();
    if job.group_name.is_empty() {
        job.group_name = group.to_string();
    }
    if job.job_name.is_empty() {
        job.job_name = def.node_name.clone();
    }

    flat.leaves.insert(def.node_name.clone(), flat.nodes.len());
    flat.nodes.push(FlatNode {
        group_name: group.to_string(),
        node_name: def.node_name.clone(),
        depends_on,
        job,
    });
    Ok(vec![def.node_name.clone()])
}

/// Flatten the children of a container; returns its exit names
fn flatten_children(
    def: &NodeDefinition,
    group: &str,
    inherited: &[String],
    flat: &mut Flattened,
) -> Result<Vec<String>, GraphError> {
    let siblings: HashSet<&str> = def.nodes.iter().map(|n| n.node_name.as_str()).collect();

    let mut entry_deps = def.depends_on.to_vec();
    entry_deps.extend(inherited.iter().cloned());

    let depended_on: HashSet<String> = def
        .nodes
        .iter()
        .flat_map(|n| n.depends_on.to_vec())
        .filter(|d| siblings.contains(d.as_str()))
        .collect();

    let mut exits = Vec::new();
    for child in &def.nodes {
        let is_entry = !child
            .depends_on
            .to_vec()
            .iter()
            .any(|d| siblings.contains(d.as_str()));
        let child_inherited: &[String] = if is_entry { &entry_deps } else { &[] };

        let reach = flatten(child, group, child_inherited, flat)?;
        if !depended_on.contains(&child.node_name) {
            exits.extend(reach);
        }
    }
    Ok(exits)
}

fn resolve_dependencies(flat: &Flattened) -> Result<Vec<Vec<usize>>, GraphError> {
    flat.nodes
        .iter()
        .map(|node| {
            let mut resolved = Vec::new();
            for dep in &node.depends_on {
                if !flat.resolve(dep, &mut resolved) {
                    return Err(GraphError::DanglingReference {
                        node: node.node_name.clone(),
                        missing: dep.clone(),
                    });
                }
            }
            resolved.sort_unstable();
            resolved.dedup();
            Ok(resolved)
        })
        .collect()
}

/// Fixed-point layering: a node's layer is one more than its deepest
/// dependency. A round without progress means the rest is cyclic.
fn compute_layers(flat: &Flattened, depends_on: &[Vec<usize>]) -> Result<Vec<usize>, GraphError> {
    let mut layers: Vec<Option<usize>> = vec![None; flat.nodes.len()];
    let mut remaining = flat.nodes.len();

    while remaining > 0 {
        let mut progressed = false;
        for idx in 0..flat.nodes.len() {
            if layers[idx].is_some() {
                continue;
            }
            let deps: Option<Vec<usize>> = depends_on[idx].iter().map(|&d| layers[d]).collect();
            if let Some(deps) = deps {
                layers[idx] = Some(deps.into_iter().max().map_or(0, |m| m + 1));
                remaining -= 1;
                progressed = true;
            }
        }

        if !progressed {
            let mut unresolved: Vec<String> = flat
                .nodes
                .iter()
                .zip(&layers)
                .filter(|(_, layer)| layer.is_none())
                .map(|(node, _)| node.node_name.clone())
                .collect();
            unresolved.sort();
            return Err(GraphError::Cycle { unresolved });
        }
    }

    Ok(layers.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::Status;

    fn leaf(name: &str, deps: &[&str]) -> NodeDefinition {
        NodeDefinition::new(name).with_depends_on(deps.iter().copied())
    }

    fn flow(nodes: Vec<NodeDefinition>) -> NodeDefinition {
        NodeDefinition::new("flow").with_group("g").with_nodes(nodes)
    }

    fn build(root: &NodeDefinition) -> Result<Dag, GraphError> {
        DagBuilder::new(JobKey::new("g", "flow")).build(root)
    }

    fn layer_of(dag: &Dag, name: &str) -> usize {
        let idx = dag.nodes().iter().position(|n| n.node_name == name).unwrap();
        dag.nodes()[idx].layer
    }

    fn layer_names(dag: &Dag, layer: usize) -> Vec<String> {
        let mut names: Vec<String> = dag
            .layer(layer)
            .unwrap()
            .nodes
            .iter()
            .map(|&n| dag.nodes()[n].node_name.clone())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_diamond_layers() {
        let dag = build(&flow(vec![
            leaf("A", &[]),
            leaf("B", &[]),
            leaf("C", &["A", "B"]),
            leaf("D", &["C"]),
        ]))
        .unwrap();

        assert_eq!(dag.layer_count(), 3);
        assert_eq!(layer_names(&dag, 0), vec!["A", "B"]);
        assert_eq!(layer_names(&dag, 1), vec!["C"]);
        assert_eq!(layer_names(&dag, 2), vec!["D"]);
        assert_eq!(dag.status(), Status::Ready);
        assert!(dag.nodes().iter().all(|n| dag.node_status(n.node_id) == Some(Status::Ready)));
    }

    #[test]
    fn test_layer_is_one_more_than_deepest_dependency() {
        // declaration order deliberately scrambled
        let root = NodeDefinition::new("flow").with_group("testGroup").with_nodes(vec![
            leaf("root", &[]),
            leaf("n1", &["root"]),
            leaf("r-n2", &["root"]),
            leaf("n4", &["n1"]),
            leaf("n7", &["n2"]),
            leaf("n5", &["n2"]),
            leaf("n6", &["n2"]),
            leaf("n2", &["n1"]),
            leaf("n3", &["n1"]),
            leaf("n8", &["n4"]),
            leaf("n9", &["n4"]),
            leaf("n11", &["n5", "n6", "n7"]),
            leaf("n13", &["n8", "n9", "n10"]),
            NodeDefinition::new("n14").with_depends_on(["n11", "n12", "n13"]),
            leaf("n12", &["n3"]),
            leaf("n10", &["n4"]),
        ]);
        let dag = build(&root).unwrap();

        for node in dag.nodes() {
            let expected = node
                .depends_on
                .iter()
                .map(|&d| dag.nodes()[d].layer + 1)
                .max()
                .unwrap_or(0);
            assert_eq!(node.layer, expected, "node {}", node.node_name);
        }
        assert_eq!(layer_of(&dag, "root"), 0);
        assert_eq!(layer_of(&dag, "n12"), 3);
        assert_eq!(layer_of(&dag, "n13"), 4);
        assert_eq!(layer_of(&dag, "n14"), 5);
        assert_eq!(dag.layer_count(), 6);

        let n14 = dag.find_node("testGroup", "n14").unwrap();
        assert_eq!(dag.nodes()[n14].group_name, "testGroup");
    }

    #[test]
    fn test_cycle_is_reported() {
        let err = build(&flow(vec![
            leaf("A", &[]),
            leaf("B", &["A", "D"]),
            leaf("C", &["B"]),
            leaf("D", &["C"]),
        ]))
        .unwrap_err();

        assert_eq!(
            err,
            GraphError::Cycle {
                unresolved: vec!["B".to_string(), "C".to_string(), "D".to_string()]
            }
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = build(&flow(vec![leaf("A", &["A"])])).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn test_dangling_reference() {
        let err = build(&flow(vec![leaf("A", &[]), leaf("B", &["ghost"])])).unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingReference {
                node: "B".to_string(),
                missing: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = build(&flow(vec![leaf("A", &[]), leaf("A", &[])])).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("A".to_string()));
    }

    #[test]
    fn test_nested_sub_flow_is_flattened() {
        let cleanse = NodeDefinition::new("cleanse")
            .with_depends_on(["prepare"])
            .with_nodes(vec![leaf("dedupe", &[]), leaf("normalize", &["dedupe"])]);
        let dag = build(&flow(vec![
            leaf("prepare", &[]),
            cleanse,
            leaf("publish", &["cleanse"]),
        ]))
        .unwrap();

        let mut names: Vec<&str> = dag.nodes().iter().map(|n| n.node_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["dedupe", "normalize", "prepare", "publish"]);

        assert_eq!(layer_of(&dag, "prepare"), 0);
        assert_eq!(layer_of(&dag, "dedupe"), 1);
        assert_eq!(layer_of(&dag, "normalize"), 2);
        assert_eq!(layer_of(&dag, "publish"), 3);
    }

    #[test]
    fn test_cross_level_edges_resolve_by_name() {
        let inner = NodeDefinition::new("inner").with_nodes(vec![
            leaf("x", &["outer_a"]),
            leaf("y", &[]),
        ]);
        let dag = build(&flow(vec![
            leaf("outer_a", &[]),
            inner,
            leaf("outer_b", &["x"]),
        ]))
        .unwrap();

        assert_eq!(layer_of(&dag, "outer_a"), 0);
        assert_eq!(layer_of(&dag, "y"), 0);
        assert_eq!(layer_of(&dag, "x"), 1);
        assert_eq!(layer_of(&dag, "outer_b"), 2);
    }

    #[test]
    fn test_group_inherited_unless_overridden() {
        let sub = NodeDefinition::new("sub")
            .with_group("other")
            .with_nodes(vec![leaf("s1", &[]), leaf("s2", &[]).with_group("third")]);
        let dag = build(&flow(vec![leaf("a", &[]), sub])).unwrap();

        let group_of = |name: &str| {
            dag.nodes()
                .iter()
                .find(|n| n.node_name == name)
                .unwrap()
                .group_name
                .clone()
        };
        assert_eq!(group_of("a"), "g");
        assert_eq!(group_of("s1"), "other");
        assert_eq!(group_of("s2"), "third");
        assert!(dag.find_node("other", "s1").is_some());
    }

    #[test]
    fn test_default_job_payload_names_node() {
        let dag = build(&flow(vec![
            leaf("a", &[]),
            leaf("b", &[]).with_job(JobDesc {
                job_type: "shell".to_string(),
                job_command: Some("echo b".to_string()),
                ..Default::default()
            }),
        ]))
        .unwrap();

        let a = &dag.nodes()[0].raw_data;
        assert_eq!((a.group_name.as_str(), a.job_name.as_str()), ("g", "a"));
        let b = &dag.nodes()[1].raw_data;
        assert_eq!(b.job_name, "b");
        assert_eq!(b.job_type, "shell");
        assert_eq!(b.job_command.as_deref(), Some("echo b"));
    }

    #[test]
    fn test_single_job_root() {
        let dag = DagBuilder::new(JobKey::new("g", "solo"))
            .build(&NodeDefinition::new("solo"))
            .unwrap();
        assert_eq!(dag.nodes().len(), 1);
        assert_eq!(dag.layer_count(), 1);
        assert_eq!(dag.nodes()[0].group_name, "g");
    }
}
