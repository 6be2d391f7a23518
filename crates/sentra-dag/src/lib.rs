#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sentra-dag** – Pure functions over an agent-set or a playbook graph:
//! cycle detection, dependency existence, class-consistency, the
//! single-parent rule, and topological levelization.
//!
//! Nothing in this crate performs I/O or holds state across calls; every
//! function takes its inputs by reference and returns a fresh result. The
//! Orchestrator (`sentra-orchestrator`) calls into `topological_order` to
//! drive its own node-by-node walk; `sentra-registry`/handler-layer write
//! paths call `validate_agent_dependencies`/`validate_playbook` before
//! persisting a change.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use sentra_types::{AgentClass, AgentDef, Edge, Playbook};
use tracing::debug;

/// Errors returned by the validation and scheduling functions in this
/// crate. Variant names mirror the closed error taxonomy the write-path
/// and the Orchestrator's defense-in-depth check both rely on.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DagError {
    /// A proposed dependency does not exist in `all_agents`.
    #[error("unknown dependency: {0}")]
    InvalidDependency(String),
    /// The dependency graph (existing agents plus the proposed change)
    /// contains a cycle; the message names the closing edge.
    #[error("cyclic dependency: {0}")]
    CyclicDependency(String),
    /// A playbook was submitted with no graph at all (defensive; the
    /// in-process `Playbook` type always carries `nodes`/`edges`, but
    /// this variant is retained for parity with the write-path contract).
    #[error("playbook has no graph")]
    MissingGraph,
    /// A playbook declared an empty node set.
    #[error("playbook graph is empty")]
    EmptyGraph,
    /// An edge or node referenced an agent id absent from `all_agents`.
    #[error("unknown node: {0}")]
    UnknownNode(String),
    /// A referenced agent's class does not match the playbook's class.
    #[error("class mismatch on node {node}: expected {expected}, found {found}")]
    ClassMismatch {
        /// The offending node id.
        node: String,
        /// The playbook's declared class.
        expected: AgentClass,
        /// The agent's actual class.
        found: AgentClass,
    },
    /// An edge referenced a node outside the playbook's declared node set.
    #[error("dangling edge: {0} -> {1}")]
    DanglingEdge(String, String),
    /// A node had more than one incoming edge.
    #[error("node {0} has more than one incoming edge")]
    MultiParent(String),
    /// The playbook's edge graph contains a cycle.
    #[error("cycle in playbook involving {0}")]
    CycleInPlaybook(String),
}

/// Validate that `proposed_deps` may be written as `self_id`'s dependency
/// list without introducing a cycle or referencing an unknown agent.
///
/// `self_id` need not already exist in `all_agents` (it may be a new
/// agent being created). A self-dependency is rejected as a cycle before
/// any graph traversal.
pub fn validate_agent_dependencies(
    self_id: &str,
    proposed_deps: &[String],
    all_agents: &HashMap<String, AgentDef>,
) -> Result<(), DagError> {
    for dep in proposed_deps {
        if dep == self_id {
            return Err(DagError::CyclicDependency(format!("{self_id} -> {self_id}")));
        }
        if !all_agents.contains_key(dep) {
            return Err(DagError::InvalidDependency(dep.clone()));
        }
    }

    // Build the dependency graph (node -> its dependencies) with the
    // proposed edges overlaid on top of the existing agent set.
    let mut deps_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, def) in all_agents {
        deps_of.insert(id.as_str(), def.dependencies.iter().map(String::as_str).collect());
    }
    deps_of.insert(self_id, proposed_deps.iter().map(String::as_str).collect());

    detect_cycle_in_deps_graph(&deps_of, self_id)
}

/// Tri-color DFS cycle check over a `node -> dependencies` adjacency map,
/// starting from `start`. Returns `CyclicDependency` naming the closing
/// edge on the first cycle found.
fn detect_cycle_in_deps_graph(
    deps_of: &HashMap<&str, Vec<&str>>,
    start: &str,
) -> Result<(), DagError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: HashMap<&str, Color> = HashMap::new();

    fn visit<'a>(
        node: &'a str,
        deps_of: &HashMap<&'a str, Vec<&'a str>>,
        color: &mut HashMap<&'a str, Color>,
    ) -> Result<(), DagError> {
        color.insert(node, Color::Gray);
        if let Some(deps) = deps_of.get(node) {
            for &dep in deps {
                match color.get(dep).copied().unwrap_or(Color::White) {
                    Color::White => visit(dep, deps_of, color)?,
                    Color::Gray => {
                        return Err(DagError::CyclicDependency(format!("{node} -> {dep}")));
                    }
                    Color::Black => {}
                }
            }
        }
        color.insert(node, Color::Black);
        Ok(())
    }

    visit(start, deps_of, &mut color)?;

    // Also sweep any other nodes reachable only from elsewhere in the
    // map, so a cycle not touching `start` is still caught.
    let all_nodes: Vec<&str> = deps_of.keys().copied().collect();
    for node in all_nodes {
        if !matches!(color.get(node), Some(Color::Black)) {
            visit(node, deps_of, &mut color)?;
        }
    }
    Ok(())
}

/// Validate that `playbook` is well-formed for the given `playbook_class`:
/// non-empty, every node known and class-consistent, every edge
/// referencing declared nodes, single-parent, and acyclic.
pub fn validate_playbook(
    playbook: &Playbook,
    playbook_class: AgentClass,
    all_agents: &HashMap<String, AgentDef>,
) -> Result<(), DagError> {
    if playbook.nodes.is_empty() {
        return Err(DagError::EmptyGraph);
    }

    for node in &playbook.nodes {
        let def = all_agents.get(node).ok_or_else(|| DagError::UnknownNode(node.clone()))?;
        if def.agent_class != playbook_class {
            return Err(DagError::ClassMismatch {
                node: node.clone(),
                expected: playbook_class,
                found: def.agent_class,
            });
        }
    }

    let mut in_degree: HashMap<&str, u32> = playbook.nodes.iter().map(|n| (n.as_str(), 0)).collect();
    for edge in &playbook.edges {
        if !playbook.nodes.contains(&edge.from) {
            return Err(DagError::DanglingEdge(edge.from.clone(), edge.to.clone()));
        }
        if !playbook.nodes.contains(&edge.to) {
            return Err(DagError::DanglingEdge(edge.from.clone(), edge.to.clone()));
        }
        let entry = in_degree.entry(edge.to.as_str()).or_insert(0);
        *entry += 1;
        if *entry > 1 {
            return Err(DagError::MultiParent(edge.to.clone()));
        }
    }

    detect_cycle_in_playbook(playbook)?;

    debug!(nodes = playbook.nodes.len(), edges = playbook.edges.len(), "playbook validated");
    Ok(())
}

/// Tri-color DFS cycle check over a playbook's edge list.
fn detect_cycle_in_playbook(playbook: &Playbook) -> Result<(), DagError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &playbook.edges {
        adj.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
    }

    let mut color: HashMap<&str, Color> = HashMap::new();

    fn visit<'a>(
        node: &'a str,
        adj: &HashMap<&'a str, Vec<&'a str>>,
        color: &mut HashMap<&'a str, Color>,
    ) -> Result<(), DagError> {
        color.insert(node, Color::Gray);
        if let Some(next) = adj.get(node) {
            for &n in next {
                match color.get(n).copied().unwrap_or(Color::White) {
                    Color::White => visit(n, adj, color)?,
                    Color::Gray => return Err(DagError::CycleInPlaybook(n.to_string())),
                    Color::Black => {}
                }
            }
        }
        color.insert(node, Color::Black);
        Ok(())
    }

    // Sort for deterministic traversal order (and thus deterministic
    // error messages), matching the lexicographic tie-break used
    // elsewhere in this crate.
    let mut nodes: Vec<&str> = playbook.nodes.iter().map(String::as_str).collect();
    nodes.sort_unstable();

    for node in nodes {
        if !matches!(color.get(node), Some(Color::Black)) {
            visit(node, &adj, &mut color)?;
        }
    }
    Ok(())
}

/// Compute a flat topological order over `nodes`/`edges` via Kahn's
/// algorithm, breaking ties by ascending lexical id. Used by the
/// Orchestrator to drive its linear walk; also used internally by
/// `topological_levelize`.
pub fn topological_order(nodes: &HashSet<String>, edges: &[Edge]) -> Result<Vec<String>, DagError> {
    let mut in_degree: HashMap<&str, u32> = nodes.iter().map(|n| (n.as_str(), 0)).collect();
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adj.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
        *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
    }

    let mut heap: BinaryHeap<Reverse<&str>> =
        in_degree.iter().filter(|(_, &d)| d == 0).map(|(&n, _)| Reverse(n)).collect();

    let mut order: Vec<String> = Vec::with_capacity(nodes.len());
    while let Some(Reverse(node)) = heap.pop() {
        order.push(node.to_string());
        if let Some(next) = adj.get(node) {
            let mut next = next.clone();
            next.sort_unstable();
            for n in next {
                let d = in_degree.get_mut(n).expect("edge target must be a declared node");
                *d -= 1;
                if *d == 0 {
                    heap.push(Reverse(n));
                }
            }
        }
    }

    if order.len() != nodes.len() {
        // Name an arbitrary node still unresolved as the cycle hint.
        let stuck = nodes
            .iter()
            .find(|n| !order.contains(*n))
            .cloned()
            .unwrap_or_default();
        return Err(DagError::CycleInPlaybook(stuck));
    }

    Ok(order)
}

/// Produce a list of levels where level 0 is every node with in-degree 0
/// and level `k + 1` is every node whose predecessors all lie in levels
/// `<= k`. Nodes within a level are sorted lexically ascending. This is
/// planning metadata only — the Orchestrator performs its own flat
/// topological walk rather than consuming levels directly.
pub fn topological_levelize(nodes: &HashSet<String>, edges: &[Edge]) -> Result<Vec<Vec<String>>, DagError> {
    let mut in_degree: HashMap<&str, u32> = nodes.iter().map(|n| (n.as_str(), 0)).collect();
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adj.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
        *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
    }

    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut remaining = in_degree.clone();
    let mut resolved_count = 0usize;

    loop {
        let mut level: Vec<&str> = remaining
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();
        if level.is_empty() {
            break;
        }
        level.sort_unstable();
        for &n in &level {
            remaining.remove(n);
        }
        for &n in &level {
            if let Some(next) = adj.get(n) {
                for &m in next {
                    if let Some(d) = remaining.get_mut(m) {
                        *d -= 1;
                    }
                }
            }
        }
        resolved_count += level.len();
        levels.push(level.into_iter().map(str::to_string).collect());
    }

    if resolved_count != nodes.len() {
        let stuck = remaining.keys().next().map(|s| s.to_string()).unwrap_or_default();
        return Err(DagError::CycleInPlaybook(stuck));
    }

    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_types::SchemaFieldType;
    use std::collections::HashSet;

    fn agent(id: &str, class: AgentClass, deps: &[&str]) -> AgentDef {
        AgentDef {
            agent_id: id.to_string(),
            agent_name: id.to_string(),
            agent_class: class,
            system_prompt: "p".to_string(),
            tools: HashSet::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            output_schema: std::collections::HashMap::<String, SchemaFieldType>::new(),
            enabled: true,
            version: 1,
            is_builtin: false,
        }
    }

    #[test]
    fn validate_agent_dependencies_rejects_self_dependency() {
        let all = HashMap::new();
        let err = validate_agent_dependencies("a", &["a".to_string()], &all).unwrap_err();
        assert!(matches!(err, DagError::CyclicDependency(_)));
    }

    #[test]
    fn validate_agent_dependencies_rejects_unknown_dep() {
        let all = HashMap::new();
        let err = validate_agent_dependencies("a", &["missing".to_string()], &all).unwrap_err();
        assert!(matches!(err, DagError::InvalidDependency(_)));
    }

    #[test]
    fn validate_agent_dependencies_rejects_transitive_cycle() {
        let mut all = HashMap::new();
        all.insert("b".to_string(), agent("b", AgentClass::Ingestion, &["a"]));
        let err = validate_agent_dependencies("a", &["b".to_string()], &all).unwrap_err();
        assert!(matches!(err, DagError::CyclicDependency(_)));
    }

    #[test]
    fn validate_agent_dependencies_accepts_diamond() {
        let mut all = HashMap::new();
        all.insert("a".to_string(), agent("a", AgentClass::Ingestion, &[]));
        all.insert("b".to_string(), agent("b", AgentClass::Ingestion, &["a"]));
        all.insert("c".to_string(), agent("c", AgentClass::Ingestion, &["a"]));
        assert!(validate_agent_dependencies("d", &["b".to_string(), "c".to_string()], &all).is_ok());
    }

    #[test]
    fn validate_playbook_rejects_empty_graph() {
        let playbook = Playbook::default();
        let err = validate_playbook(&playbook, AgentClass::Ingestion, &HashMap::new()).unwrap_err();
        assert!(matches!(err, DagError::EmptyGraph));
    }

    #[test]
    fn validate_playbook_rejects_class_mismatch() {
        let mut all = HashMap::new();
        all.insert("a".to_string(), agent("a", AgentClass::Query, &[]));
        let mut playbook = Playbook::default();
        playbook.nodes.insert("a".to_string());
        let err = validate_playbook(&playbook, AgentClass::Ingestion, &all).unwrap_err();
        assert!(matches!(err, DagError::ClassMismatch { .. }));
    }

    #[test]
    fn validate_playbook_rejects_multi_parent() {
        let mut all = HashMap::new();
        for id in ["a", "b", "c"] {
            all.insert(id.to_string(), agent(id, AgentClass::Ingestion, &[]));
        }
        let mut playbook = Playbook::default();
        playbook.nodes.extend(["a".to_string(), "b".to_string(), "c".to_string()]);
        playbook.edges.push(Edge::new("a", "c"));
        playbook.edges.push(Edge::new("b", "c"));
        let err = validate_playbook(&playbook, AgentClass::Ingestion, &all).unwrap_err();
        assert!(matches!(err, DagError::MultiParent(ref n) if n == "c"));
    }

    #[test]
    fn validate_playbook_rejects_cycle() {
        let mut all = HashMap::new();
        for id in ["a", "b"] {
            all.insert(id.to_string(), agent(id, AgentClass::Ingestion, &[]));
        }
        let mut playbook = Playbook::default();
        playbook.nodes.extend(["a".to_string(), "b".to_string()]);
        playbook.edges.push(Edge::new("a", "b"));
        playbook.edges.push(Edge::new("b", "a"));
        let err = validate_playbook(&playbook, AgentClass::Ingestion, &all).unwrap_err();
        assert!(matches!(err, DagError::CycleInPlaybook(_)));
    }

    #[test]
    fn validate_playbook_accepts_linear_chain() {
        let mut all = HashMap::new();
        for id in ["a", "b", "c"] {
            all.insert(id.to_string(), agent(id, AgentClass::Ingestion, &[]));
        }
        let mut playbook = Playbook::default();
        playbook.nodes.extend(["a".to_string(), "b".to_string(), "c".to_string()]);
        playbook.edges.push(Edge::new("a", "b"));
        playbook.edges.push(Edge::new("b", "c"));
        assert!(validate_playbook(&playbook, AgentClass::Ingestion, &all).is_ok());
    }

    #[test]
    fn topological_order_breaks_ties_lexically() {
        let nodes: HashSet<String> = ["c", "b", "a"].iter().map(|s| s.to_string()).collect();
        let order = topological_order(&nodes, &[]).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn topological_order_respects_diamond_edges() {
        let nodes: HashSet<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let edges = vec![Edge::new("a", "b"), Edge::new("a", "c"), Edge::new("b", "d"), Edge::new("c", "d")];
        let order = topological_order(&nodes, &edges).unwrap();
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn topological_order_detects_cycle() {
        let nodes: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let edges = vec![Edge::new("a", "b"), Edge::new("b", "a")];
        assert!(topological_order(&nodes, &edges).is_err());
    }

    #[test]
    fn topological_levelize_groups_parallel_nodes() {
        let nodes: HashSet<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let edges = vec![Edge::new("a", "b"), Edge::new("a", "c"), Edge::new("b", "d"), Edge::new("c", "d")];
        let levels = topological_levelize(&nodes, &edges).unwrap();
        assert_eq!(levels, vec![vec!["a".to_string()], vec!["b".to_string(), "c".to_string()], vec!["d".to_string()]]);
    }
}
