//! Adjacency view over a workflow definition.

use flowcore::{NodeId, NodeSpec, Workflow, WorkflowError, DEFAULT_PORT};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// One outgoing connection, as seen from its source node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub to_node_id: NodeId,
    pub from_output: String,
    pub to_input: String,
}

/// Borrowed adjacency structure built once per run.
pub struct ExecutionGraph<'a> {
    workflow: &'a Workflow,
    nodes: HashMap<&'a str, &'a NodeSpec>,
    adjacency: HashMap<&'a str, Vec<Edge>>,
    has_incoming: HashSet<&'a str>,
}

impl<'a> ExecutionGraph<'a> {
    pub fn build(workflow: &'a Workflow) -> Self {
        let nodes: HashMap<&str, &NodeSpec> = workflow
            .nodes
            .iter()
            .map(|node| (node.id.as_str(), node))
            .collect();

        let mut adjacency: HashMap<&str, Vec<Edge>> = HashMap::new();
        let mut has_incoming = HashSet::new();
        for conn in &workflow.connections {
            adjacency
                .entry(conn.from_node_id.as_str())
                .or_default()
                .push(Edge {
                    to_node_id: conn.to_node_id.clone(),
                    from_output: conn.from_output.clone(),
                    to_input: conn.to_input.clone(),
                });
            has_incoming.insert(conn.to_node_id.as_str());
        }

        Self {
            workflow,
            nodes,
            adjacency,
            has_incoming,
        }
    }

    pub fn workflow(&self) -> &'a Workflow {
        self.workflow
    }

    pub fn node(&self, id: &str) -> Option<&'a NodeSpec> {
        self.nodes.get(id).copied()
    }

    pub fn edges(&self, id: &str) -> &[Edge] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A node whose outgoing edges leave through named outputs.
    ///
    /// Either more than one distinct output is wired, or the single wired
    /// output is not the implicit default one.
    pub fn is_branch(&self, id: &str) -> bool {
        let mut outputs = self.edges(id).iter().map(|e| e.from_output.as_str());
        match outputs.next() {
            Some(first) => first != DEFAULT_PORT || outputs.any(|o| o != first),
            None => false,
        }
    }

    /// Targets of `id`'s outgoing edges, optionally restricted to one output.
    pub fn successors(&self, id: &str, output: Option<&str>) -> Vec<NodeId> {
        self.edges(id)
            .iter()
            .filter(|edge| output.map_or(true, |tag| edge.from_output == tag))
            .map(|edge| edge.to_node_id.clone())
            .collect()
    }

    /// First dispatchable nodes of a fresh run, in definition order.
    ///
    /// Entry points are nodes without incoming edges and trigger nodes;
    /// triggers are replaced by whatever their edges lead to.
    pub fn entry_nodes(&self, is_trigger: impl Fn(&str) -> bool) -> Vec<NodeId> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut expanded_triggers = HashSet::new();

        for node in &self.workflow.nodes {
            let id = node.id.as_str();
            if self.has_incoming.contains(id) && !is_trigger(&node.node_type) {
                continue;
            }
            self.expand_entry(id, &is_trigger, &mut expanded_triggers, &mut seen, &mut entries);
        }

        entries
    }

    fn expand_entry(
        &self,
        id: &str,
        is_trigger: &impl Fn(&str) -> bool,
        expanded_triggers: &mut HashSet<NodeId>,
        seen: &mut HashSet<NodeId>,
        entries: &mut Vec<NodeId>,
    ) {
        let trigger = self
            .node(id)
            .map_or(false, |node| is_trigger(&node.node_type));

        if !trigger {
            if seen.insert(id.to_string()) {
                entries.push(id.to_string());
            }
            return;
        }

        if !expanded_triggers.insert(id.to_string()) {
            return;
        }
        for edge in self.edges(id) {
            self.expand_entry(&edge.to_node_id, is_trigger, expanded_triggers, seen, entries);
        }
    }

    /// Groups of nodes that sit on a cycle, each sorted by id.
    pub fn cycles(&self) -> Vec<Vec<NodeId>> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();

        for node in &self.workflow.nodes {
            index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
        }
        for conn in &self.workflow.connections {
            if let (Some(from), Some(to)) = (
                index.get(conn.from_node_id.as_str()),
                index.get(conn.to_node_id.as_str()),
            ) {
                graph.add_edge(*from, *to, ());
            }
        }

        let mut cycles: Vec<Vec<NodeId>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .map_or(false, |idx| graph.contains_edge(*idx, *idx))
            })
            .map(|component| {
                let mut ids: Vec<NodeId> =
                    component.iter().map(|idx| graph[*idx].to_string()).collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Reject a graph with any cycle, naming the nodes of the first one.
    pub fn ensure_acyclic(&self) -> Result<(), WorkflowError> {
        match self.cycles().into_iter().next() {
            Some(nodes) => Err(WorkflowError::CyclicDependency { nodes }),
            None => Ok(()),
        }
    }

    /// Non-trigger nodes, i.e. the most steps a run can take.
    pub fn executable_count(&self, is_trigger: impl Fn(&str) -> bool) -> usize {
        self.workflow
            .nodes
            .iter()
            .filter(|node| !is_trigger(&node.node_type))
            .count()
    }
}
