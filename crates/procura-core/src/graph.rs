//! Graph definitions: nodes, transitions, and interrupt points.
//!
//! A `GraphDefinition` is built once per workflow type through
//! [`GraphBuilder`] and validated on `compile()`: every transition target
//! must exist, interrupt nodes must be real nodes, and every node plus the
//! end marker must be reachable from the start node (checked with
//! `petgraph`). Compiled graphs are immutable and shared behind `Arc`.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use procura_types::error::BranchError;
use procura_types::workflow::{NodeId, WorkflowInstance, WorkflowStatus, WorkflowType};

// ---------------------------------------------------------------------------
// Node contract
// ---------------------------------------------------------------------------

/// What a node asks the engine to do after it ran successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Follow the node's transition.
    Continue,
    /// Stay on this node and halt until the next resume.
    Wait,
}

/// Failure raised by a node's business logic.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Business-rule rejection. Recovered by the engine into the rejection
    /// status and the node's rejection branch.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An external collaborator failed. Fatal to the call.
    #[error("collaborator failed: {0}")]
    Collaborator(String),

    /// A branch decision could not be applied. Fatal to the call.
    #[error(transparent)]
    Branch(#[from] BranchError),

    /// The payload variant does not belong to this graph.
    #[error("node received a {0} payload")]
    WrongPayload(WorkflowType),
}

pub type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<NodeOutcome, NodeError>> + Send + 'a>>;

/// Business logic of one node.
///
/// Runs on a working copy of the instance; mutations are only kept if the
/// engine commits the resulting checkpoint.
pub trait NodeHandler: Send + Sync {
    fn run<'a>(&'a self, instance: &'a mut WorkflowInstance) -> NodeFuture<'a>;
}

/// Adapts a synchronous closure into a [`NodeHandler`].
pub struct FnNode<F>(pub F);

impl<F> NodeHandler for FnNode<F>
where
    F: Fn(&mut WorkflowInstance) -> Result<NodeOutcome, NodeError> + Send + Sync,
{
    fn run<'a>(&'a self, instance: &'a mut WorkflowInstance) -> NodeFuture<'a> {
        let result = (self.0)(instance);
        Box::pin(std::future::ready(result))
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// A resolved successor position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Next {
    Node(NodeId),
    End,
}

impl Next {
    pub fn node(id: &str) -> Self {
        Next::Node(NodeId::new(id))
    }

    pub fn into_node_id(self) -> NodeId {
        match self {
            Next::Node(id) => id,
            Next::End => NodeId::end(),
        }
    }
}

/// Routing function: a pure choice of successor from the instance.
pub type Router = fn(&WorkflowInstance) -> Next;

/// Where a node goes after `NodeOutcome::Continue`.
#[derive(Clone)]
pub enum Transition {
    Fixed(Next),
    /// `targets` lists every successor the router may return; only these are
    /// accepted at run time.
    Route { router: Router, targets: Vec<Next> },
}

impl Transition {
    fn targets(&self) -> Vec<&Next> {
        match self {
            Transition::Fixed(next) => vec![next],
            Transition::Route { targets, .. } => targets.iter().collect(),
        }
    }
}

/// A compiled node: handler plus its outgoing edges.
pub struct NodeSpec {
    handler: Arc<dyn NodeHandler>,
    transition: Transition,
    on_reject: Next,
}

impl NodeSpec {
    pub fn handler(&self) -> &dyn NodeHandler {
        self.handler.as_ref()
    }

    pub fn on_reject(&self) -> &Next {
        &self.on_reject
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("graph has no start node")]
    MissingStart,

    #[error("duplicate node '{0}'")]
    DuplicateNode(String),

    #[error("node '{0}' has no transition")]
    MissingTransition(String),

    #[error("node '{from}' targets unknown node '{to}'")]
    UnknownTarget { from: String, to: String },

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{0}' is unreachable from the start node")]
    Unreachable(String),

    #[error("the end marker is unreachable from the start node")]
    NoPathToEnd,

    #[error("router of node '{from}' returned undeclared target {to:?}")]
    UndeclaredRoute { from: String, to: Next },

    #[error("department '{0}' collides with a reserved approval type")]
    ReservedBranchKey(String),
}

// ---------------------------------------------------------------------------
// GraphDefinition
// ---------------------------------------------------------------------------

/// An immutable, validated workflow graph.
pub struct GraphDefinition {
    workflow_type: WorkflowType,
    start: NodeId,
    nodes: HashMap<NodeId, NodeSpec>,
    interrupts: HashSet<NodeId>,
    initial_status: WorkflowStatus,
    rejection_status: WorkflowStatus,
}

impl std::fmt::Debug for GraphDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut nodes: Vec<&str> = self.nodes.keys().map(NodeId::as_str).collect();
        nodes.sort_unstable();
        f.debug_struct("GraphDefinition")
            .field("workflow_type", &self.workflow_type)
            .field("start", &self.start)
            .field("nodes", &nodes)
            .field("interrupts", &self.interrupts)
            .finish()
    }
}

impl GraphDefinition {
    pub fn builder(workflow_type: WorkflowType) -> GraphBuilder {
        GraphBuilder::new(workflow_type)
    }

    pub fn workflow_type(&self) -> WorkflowType {
        self.workflow_type
    }

    pub fn start_node(&self) -> &NodeId {
        &self.start
    }

    pub fn initial_status(&self) -> WorkflowStatus {
        self.initial_status
    }

    pub fn rejection_status(&self) -> WorkflowStatus {
        self.rejection_status
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    pub fn is_interrupt(&self, id: &NodeId) -> bool {
        self.interrupts.contains(id)
    }

    /// Resolve the successor of `from` for the given (post-node) instance.
    pub fn resolve_next(
        &self,
        from: &NodeId,
        instance: &WorkflowInstance,
    ) -> Result<Next, GraphError> {
        let spec = self
            .nodes
            .get(from)
            .ok_or_else(|| GraphError::UnknownNode(from.to_string()))?;
        match &spec.transition {
            Transition::Fixed(next) => Ok(next.clone()),
            Transition::Route { router, targets } => {
                let next = router(instance);
                if targets.contains(&next) {
                    Ok(next)
                } else {
                    Err(GraphError::UndeclaredRoute {
                        from: from.to_string(),
                        to: next,
                    })
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct PendingNode {
    id: NodeId,
    handler: Arc<dyn NodeHandler>,
    transition: Option<Transition>,
    on_reject: Next,
}

/// Incrementally describes a graph; validated by [`GraphBuilder::compile`].
pub struct GraphBuilder {
    workflow_type: WorkflowType,
    start: Option<NodeId>,
    nodes: Vec<PendingNode>,
    interrupts: Vec<NodeId>,
    initial_status: WorkflowStatus,
    rejection_status: WorkflowStatus,
    errors: Vec<GraphError>,
}

impl GraphBuilder {
    pub fn new(workflow_type: WorkflowType) -> Self {
        Self {
            workflow_type,
            start: None,
            nodes: Vec::new(),
            interrupts: Vec::new(),
            initial_status: WorkflowStatus::Draft,
            rejection_status: WorkflowStatus::Rejected,
            errors: Vec::new(),
        }
    }

    pub fn start(mut self, id: &str) -> Self {
        self.start = Some(NodeId::new(id));
        self
    }

    pub fn initial_status(mut self, status: WorkflowStatus) -> Self {
        self.initial_status = status;
        self
    }

    pub fn rejection_status(mut self, status: WorkflowStatus) -> Self {
        self.rejection_status = status;
        self
    }

    /// Add a node. Its rejection branch defaults to the end marker.
    pub fn node(mut self, id: &str, handler: impl NodeHandler + 'static) -> Self {
        self.nodes.push(PendingNode {
            id: NodeId::new(id),
            handler: Arc::new(handler),
            transition: None,
            on_reject: Next::End,
        });
        self
    }

    /// Fixed successor of `from`.
    pub fn edge(self, from: &str, to: Next) -> Self {
        self.set_transition(from, Transition::Fixed(to))
    }

    /// Conditional successor of `from`, chosen by `router` among `targets`.
    pub fn route(self, from: &str, router: Router, targets: Vec<Next>) -> Self {
        self.set_transition(from, Transition::Route { router, targets })
    }

    /// Where `from` goes when its validation fails.
    pub fn on_reject(mut self, from: &str, to: Next) -> Self {
        match self.nodes.iter_mut().rev().find(|n| n.id.as_str() == from) {
            Some(node) => node.on_reject = to,
            None => self.errors.push(GraphError::UnknownNode(from.to_string())),
        }
        self
    }

    /// Execution halts on arrival at `id` and resumes by running it.
    pub fn interrupt(mut self, id: &str) -> Self {
        self.interrupts.push(NodeId::new(id));
        self
    }

    fn set_transition(mut self, from: &str, transition: Transition) -> Self {
        match self.nodes.iter_mut().rev().find(|n| n.id.as_str() == from) {
            Some(node) => node.transition = Some(transition),
            None => self.errors.push(GraphError::UnknownNode(from.to_string())),
        }
        self
    }

    /// Validate and freeze the graph.
    pub fn compile(mut self) -> Result<GraphDefinition, GraphError> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        let start = self.start.ok_or(GraphError::MissingStart)?;

        let mut nodes: HashMap<NodeId, NodeSpec> = HashMap::new();
        for pending in self.nodes {
            let transition = pending
                .transition
                .ok_or_else(|| GraphError::MissingTransition(pending.id.to_string()))?;
            if nodes.contains_key(&pending.id) {
                return Err(GraphError::DuplicateNode(pending.id.to_string()));
            }
            nodes.insert(
                pending.id,
                NodeSpec {
                    handler: pending.handler,
                    transition,
                    on_reject: pending.on_reject,
                },
            );
        }

        if !nodes.contains_key(&start) {
            return Err(GraphError::UnknownNode(start.to_string()));
        }
        for id in &self.interrupts {
            if !nodes.contains_key(id) {
                return Err(GraphError::UnknownNode(id.to_string()));
            }
        }

        // Reachability over fixed, routed and rejection edges.
        let mut graph = DiGraph::<&NodeId, ()>::new();
        let end_marker = NodeId::end();
        let end_idx = graph.add_node(&end_marker);
        let mut indices: HashMap<&NodeId, NodeIndex> = HashMap::new();
        for id in nodes.keys() {
            indices.insert(id, graph.add_node(id));
        }
        for (id, spec) in &nodes {
            let targets = spec
                .transition
                .targets()
                .into_iter()
                .chain(std::iter::once(&spec.on_reject));
            for target in targets {
                let to_idx = match target {
                    Next::End => end_idx,
                    Next::Node(to) => *indices.get(to).ok_or_else(|| GraphError::UnknownTarget {
                        from: id.to_string(),
                        to: to.to_string(),
                    })?,
                };
                graph.add_edge(indices[id], to_idx, ());
            }
        }

        let start_idx = indices[&start];
        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&graph, start_idx);
        while let Some(idx) = dfs.next(&graph) {
            reachable.insert(idx);
        }
        let mut unreachable: Vec<&NodeId> = indices
            .iter()
            .filter(|(_, idx)| !reachable.contains(*idx))
            .map(|(id, _)| *id)
            .collect();
        unreachable.sort();
        if let Some(id) = unreachable.first() {
            return Err(GraphError::Unreachable(id.to_string()));
        }
        if !has_path_connecting(&graph, start_idx, end_idx, None) {
            return Err(GraphError::NoPathToEnd);
        }

        let interrupts: HashSet<NodeId> = self.interrupts.into_iter().collect();

        tracing::debug!(
            workflow_type = %self.workflow_type,
            nodes = nodes.len(),
            interrupts = interrupts.len(),
            "compiled workflow graph"
        );

        Ok(GraphDefinition {
            workflow_type: self.workflow_type,
            start,
            nodes,
            interrupts,
            initial_status: self.initial_status,
            rejection_status: self.rejection_status,
        })
    }
}
