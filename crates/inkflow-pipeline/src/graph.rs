//! Graph definition: named nodes, static edges, and conditional routers.
//!
//! All wiring is checked once in [`GraphBuilder::build`]. The only wiring
//! error left for run time is a router returning a target outside the set
//! it declared.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;

use inkflow_types::{FlowError, Result};

use crate::node::Node;
use crate::state::{PipelineState, StateSchema};

/// Entry sentinel. Exactly one edge leaves it.
pub const START: &str = "__start__";
/// Exit sentinel. Reaching it ends the run.
pub const END: &str = "__end__";

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// Where control goes after a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    To(String),
    End,
}

impl Route {
    /// `Route::End` for [`END`], otherwise `Route::To(name)`.
    pub fn named(name: &str) -> Self {
        if name == END {
            Route::End
        } else {
            Route::To(name.to_string())
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Route::To(name) => name,
            Route::End => END,
        }
    }
}

/// A conditional router: a pure function of the just-merged state.
pub type Router = Arc<dyn Fn(&PipelineState) -> Route + Send + Sync>;

#[derive(Clone)]
enum Transition {
    Static(String),
    Conditional {
        targets: BTreeSet<String>,
        router: Router,
    },
}

impl Transition {
    fn targets(&self) -> Vec<String> {
        match self {
            Transition::Static(to) => vec![to.clone()],
            Transition::Conditional { targets, .. } => targets.iter().cloned().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// A validated, immutable graph.
#[derive(Clone)]
pub struct Graph {
    name: String,
    schema: StateSchema,
    entry: String,
    nodes: BTreeMap<String, Arc<dyn Node>>,
    /// Declaration order, for display.
    order: Vec<String>,
    transitions: BTreeMap<String, Transition>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("nodes", &self.order)
            .finish_non_exhaustive()
    }
}

impl Graph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// The node reached from [`START`].
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Node names in declaration order.
    pub fn node_names(&self) -> &[String] {
        &self.order
    }

    pub fn node(&self, name: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Every target `from` may transition to. [`START`] yields the entry.
    pub fn successors(&self, from: &str) -> Vec<String> {
        if from == START {
            return vec![self.entry.clone()];
        }
        self.transitions
            .get(from)
            .map(Transition::targets)
            .unwrap_or_default()
    }

    /// `true` when `from -> to` is a declared static edge or a declared
    /// router target.
    pub fn is_declared_transition(&self, from: &str, to: &str) -> bool {
        self.successors(from).iter().any(|t| t == to)
    }

    /// Resolve the next node after `from` against the just-merged state.
    pub fn next(&self, from: &str, state: &PipelineState) -> Result<Route> {
        match self.transitions.get(from) {
            Some(Transition::Static(to)) => Ok(Route::named(to)),
            Some(Transition::Conditional { targets, router }) => {
                let route = router(state);
                if targets.contains(route.target()) {
                    Ok(Route::named(route.target()))
                } else {
                    Err(FlowError::UndeclaredRoute {
                        node: from.to_string(),
                        target: route.target().to_string(),
                    })
                }
            }
            None => Err(FlowError::GraphConfig(format!(
                "node '{from}' has no outgoing transition"
            ))),
        }
    }

    /// Human-readable wiring, one transition per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "graph {}", self.name);
        let _ = writeln!(out, "  {START} -> {}", self.entry);
        for name in &self.order {
            match self.transitions.get(name) {
                Some(Transition::Static(to)) => {
                    let _ = writeln!(out, "  {name} -> {to}");
                }
                Some(Transition::Conditional { targets, .. }) => {
                    let targets: Vec<&str> = targets.iter().map(String::as_str).collect();
                    let _ = writeln!(out, "  {name} -> ? {{{}}}", targets.join(", "));
                }
                None => {}
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// GraphBuilder
// ---------------------------------------------------------------------------

/// Collects nodes and edges, then validates them into a [`Graph`].
pub struct GraphBuilder {
    name: String,
    schema: StateSchema,
    nodes: Vec<(String, Arc<dyn Node>)>,
    edges: Vec<(String, String)>,
    conditionals: Vec<(String, Vec<String>, Router)>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>, schema: StateSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            nodes: Vec::new(),
            edges: Vec::new(),
            conditionals: Vec::new(),
        }
    }

    pub fn add_node(mut self, name: impl Into<String>, node: impl Node + 'static) -> Self {
        self.nodes.push((name.into(), Arc::new(node)));
        self
    }

    pub fn add_shared_node(mut self, name: impl Into<String>, node: Arc<dyn Node>) -> Self {
        self.nodes.push((name.into(), node));
        self
    }

    /// Unconditional edge. `from` may be [`START`], `to` may be [`END`].
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Conditional edge: `router` must return one of `targets`.
    pub fn add_conditional_edges<F>(
        mut self,
        from: impl Into<String>,
        targets: &[&str],
        router: F,
    ) -> Self
    where
        F: Fn(&PipelineState) -> Route + Send + Sync + 'static,
    {
        self.conditionals.push((
            from.into(),
            targets.iter().map(|t| t.to_string()).collect(),
            Arc::new(router),
        ));
        self
    }

    pub fn build(self) -> Result<Graph> {
        let config_err = |msg: String| FlowError::GraphConfig(format!("{}: {msg}", self.name));

        // 1. Unique, non-reserved node names
        let mut nodes = BTreeMap::new();
        let mut order = Vec::new();
        for (name, node) in &self.nodes {
            if name.is_empty() || name == START || name == END {
                return Err(config_err(format!("invalid node name '{name}'")));
            }
            if nodes.insert(name.clone(), node.clone()).is_some() {
                return Err(config_err(format!("duplicate node '{name}'")));
            }
            order.push(name.clone());
        }

        let is_target = |t: &str| t == END || nodes.contains_key(t);

        // 2. START has exactly one successor
        let entries: Vec<&String> = self
            .edges
            .iter()
            .filter(|(from, _)| from == START)
            .map(|(_, to)| to)
            .collect();
        if self.conditionals.iter().any(|(from, _, _)| from == START) {
            return Err(config_err("START cannot have conditional edges".into()));
        }
        let entry = match entries.as_slice() {
            [only] => (*only).clone(),
            [] => return Err(config_err("START has no outgoing edge".into())),
            _ => return Err(config_err("START has more than one outgoing edge".into())),
        };
        if !nodes.contains_key(&entry) {
            return Err(config_err(format!("START edge targets unknown node '{entry}'")));
        }

        // 3. Static edges: declared endpoints, one per node
        let mut transitions = BTreeMap::new();
        for (from, to) in self.edges.iter().filter(|(from, _)| from != START) {
            if !nodes.contains_key(from) {
                return Err(config_err(format!("edge from unknown node '{from}'")));
            }
            if !is_target(to) {
                return Err(config_err(format!("edge {from} -> unknown node '{to}'")));
            }
            if transitions
                .insert(from.clone(), Transition::Static(to.clone()))
                .is_some()
            {
                return Err(config_err(format!(
                    "node '{from}' has more than one static edge"
                )));
            }
        }

        // 4. Conditional edges: declared targets, not mixed with a static edge
        for (from, targets, router) in &self.conditionals {
            if !nodes.contains_key(from) {
                return Err(config_err(format!(
                    "conditional edges from unknown node '{from}'"
                )));
            }
            if targets.is_empty() {
                return Err(config_err(format!(
                    "conditional edges from '{from}' declare no targets"
                )));
            }
            if let Some(bad) = targets.iter().find(|t| !is_target(t)) {
                return Err(config_err(format!(
                    "router for '{from}' declares unknown target '{bad}'"
                )));
            }
            let transition = Transition::Conditional {
                targets: targets.iter().cloned().collect(),
                router: router.clone(),
            };
            if transitions.insert(from.clone(), transition).is_some() {
                return Err(config_err(format!(
                    "node '{from}' has more than one outgoing transition"
                )));
            }
        }

        // 5. No dead ends
        if let Some(stuck) = order.iter().find(|n| !transitions.contains_key(*n)) {
            return Err(config_err(format!("node '{stuck}' has no outgoing edge")));
        }

        let graph = Graph {
            name: self.name.clone(),
            schema: self.schema.clone(),
            entry,
            nodes,
            order,
            transitions,
        };

        let live = reachable(&graph);
        for name in graph.order.iter().filter(|n| !live.contains(*n)) {
            tracing::warn!(graph = %graph.name, node = %name, "Node is unreachable from START");
        }

        Ok(graph)
    }
}

fn reachable(graph: &Graph) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![graph.entry.clone()];
    while let Some(name) = stack.pop() {
        if name == END || !seen.insert(name.clone()) {
            continue;
        }
        stack.extend(graph.successors(&name));
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FnNode;
    use crate::state::{Delta, PipelineState};

    fn noop() -> FnNode<impl Fn(&PipelineState) -> Result<Delta> + Send + Sync> {
        FnNode::new(|_: &PipelineState| Ok(Delta::new()))
    }

    fn schema() -> StateSchema {
        StateSchema::new().overwrite("flag")
    }

    fn state(flag: bool) -> PipelineState {
        schema().init(serde_json::json!({ "flag": flag })).unwrap()
    }

    fn branching() -> GraphBuilder {
        GraphBuilder::new("branching", schema())
            .add_node("check", noop())
            .add_node("yes", noop())
            .add_node("no", noop())
            .add_edge(START, "check")
            .add_conditional_edges("check", &["yes", "no"], |s: &PipelineState| {
                if s.get("flag") == Some(&serde_json::json!(true)) {
                    Route::To("yes".into())
                } else {
                    Route::To("no".into())
                }
            })
            .add_edge("yes", END)
            .add_edge("no", END)
    }

    fn config_message(result: Result<Graph>) -> String {
        match result {
            Err(FlowError::GraphConfig(msg)) => msg,
            Err(other) => panic!("expected GraphConfig, got {other:?}"),
            Ok(_) => panic!("expected GraphConfig, got a graph"),
        }
    }

    #[test]
    fn builds_valid_graph() {
        let graph = branching().build().unwrap();
        assert_eq!(graph.entry(), "check");
        assert_eq!(graph.node_names(), ["check", "yes", "no"]);
        assert_eq!(graph.successors(START), vec!["check"]);
        assert_eq!(graph.successors("check"), vec!["no", "yes"]);
        assert!(graph.is_declared_transition("yes", END));
        assert!(!graph.is_declared_transition("yes", "no"));
    }

    #[test]
    fn router_decides_on_state() {
        let graph = branching().build().unwrap();
        assert_eq!(graph.next("check", &state(true)).unwrap(), Route::To("yes".into()));
        assert_eq!(graph.next("check", &state(false)).unwrap(), Route::To("no".into()));
        assert_eq!(graph.next("yes", &state(true)).unwrap(), Route::End);
    }

    #[test]
    fn undeclared_router_result_is_an_error() {
        let graph = GraphBuilder::new("bad_router", schema())
            .add_node("a", noop())
            .add_node("b", noop())
            .add_edge(START, "a")
            .add_conditional_edges("a", &["b"], |_: &PipelineState| Route::To("a".into()))
            .add_edge("b", END)
            .build()
            .unwrap();
        let err = graph.next("a", &state(true)).unwrap_err();
        assert!(matches!(err, FlowError::UndeclaredRoute { ref target, .. } if target == "a"));
    }

    #[test]
    fn router_returning_end_by_name_is_normalized() {
        let graph = GraphBuilder::new("named_end", schema())
            .add_node("a", noop())
            .add_edge(START, "a")
            .add_conditional_edges("a", &["a", END], |_: &PipelineState| Route::To(END.into()))
            .build()
            .unwrap();
        assert_eq!(graph.next("a", &state(true)).unwrap(), Route::End);
    }

    #[test]
    fn rejects_duplicate_nodes() {
        let msg = config_message(branching().add_node("yes", noop()).build());
        assert!(msg.contains("duplicate node 'yes'"), "{msg}");
    }

    #[test]
    fn rejects_missing_or_multiple_start_edges() {
        let msg = config_message(
            GraphBuilder::new("g", schema())
                .add_node("a", noop())
                .add_edge("a", END)
                .build(),
        );
        assert!(msg.contains("no outgoing edge"), "{msg}");

        let msg = config_message(branching().add_edge(START, "yes").build());
        assert!(msg.contains("more than one"), "{msg}");
    }

    #[test]
    fn rejects_unknown_targets() {
        let msg = config_message(
            GraphBuilder::new("g", schema())
                .add_node("a", noop())
                .add_edge(START, "a")
                .add_edge("a", "ghost")
                .build(),
        );
        assert!(msg.contains("ghost"), "{msg}");

        let msg = config_message(
            GraphBuilder::new("g", schema())
                .add_node("a", noop())
                .add_edge(START, "a")
                .add_conditional_edges("a", &["ghost", END], |_: &PipelineState| Route::End)
                .build(),
        );
        assert!(msg.contains("unknown target 'ghost'"), "{msg}");
    }

    #[test]
    fn rejects_mixed_transitions_and_dead_ends() {
        let msg = config_message(branching().add_edge("check", "yes").build());
        assert!(msg.contains("more than one outgoing transition"), "{msg}");

        let msg = config_message(
            GraphBuilder::new("g", schema())
                .add_node("a", noop())
                .add_node("b", noop())
                .add_edge(START, "a")
                .add_edge("a", "b")
                .build(),
        );
        assert!(msg.contains("'b' has no outgoing edge"), "{msg}");
    }

    #[test]
    fn describe_lists_wiring() {
        let text = branching().build().unwrap().describe();
        assert!(text.contains("__start__ -> check"));
        assert!(text.contains("check -> ? {no, yes}"));
        assert!(text.contains("yes -> __end__"));
    }
}
