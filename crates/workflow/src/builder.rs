//! Workflow graph and the builder that assembles it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::definition::StepDefinition;
use crate::error::{Result, WorkflowError};

/// Id of the implicit no-op root whose children are the top-level steps.
pub const ROOT_STEP_ID: &str = "_root";

/// Serialized form of a graph: the root's children and the step definitions.
#[derive(Serialize, Deserialize)]
struct RawGraph {
    root: Vec<String>,
    steps: Vec<StepDefinition>,
}

/// An immutable, validated directed acyclic graph of workflow steps.
///
/// Steps are keyed by id. A step may have several parents; it becomes
/// eligible once all of them have completed. The topological order is
/// computed once at construction and drives both dispatch and the reverse
/// order used for compensation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawGraph", into = "RawGraph")]
pub struct WorkflowGraph {
    root: Vec<String>,
    steps: BTreeMap<String, StepDefinition>,
    parents: BTreeMap<String, Vec<String>>,
    order: Vec<String>,
}

impl WorkflowGraph {
    /// Validates and builds a graph from the root's children and the steps.
    pub fn new(root: Vec<String>, steps: Vec<StepDefinition>) -> Result<Self> {
        let mut by_id = BTreeMap::new();
        for step in steps {
            if step.id.is_empty() {
                return Err(WorkflowError::EmptyStepId);
            }
            if step.id == ROOT_STEP_ID {
                return Err(WorkflowError::ReservedStepId(step.id));
            }
            if by_id.contains_key(&step.id) {
                return Err(WorkflowError::DuplicateStep(step.id));
            }
            by_id.insert(step.id.clone(), step);
        }

        let mut parents: BTreeMap<String, Vec<String>> =
            by_id.keys().map(|id| (id.clone(), Vec::new())).collect();

        for child in &root {
            if !by_id.contains_key(child) {
                return Err(WorkflowError::UnknownStep {
                    step: ROOT_STEP_ID.to_string(),
                    reference: child.clone(),
                });
            }
        }

        for step in by_id.values() {
            for child in &step.next {
                match parents.get_mut(child) {
                    Some(list) => {
                        if !list.contains(&step.id) {
                            list.push(step.id.clone());
                        }
                    }
                    None => {
                        return Err(WorkflowError::UnknownStep {
                            step: step.id.clone(),
                            reference: child.clone(),
                        });
                    }
                }
            }
        }

        let order = topological_order(&by_id, &parents)?;

        Ok(Self {
            root,
            steps: by_id,
            parents,
            order,
        })
    }

    /// Creates a graph with no steps.
    pub fn empty() -> Self {
        Self {
            root: Vec::new(),
            steps: BTreeMap::new(),
            parents: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    /// Ids of the top-level steps.
    pub fn root(&self) -> &[String] {
        &self.root
    }

    pub fn get(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.get(step_id)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.steps.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step definitions in topological order.
    pub fn steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.order.iter().filter_map(|id| self.steps.get(id))
    }

    /// Step ids in topological order (parents before children).
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Direct parents of a step. Top-level steps have none.
    pub fn parents(&self, step_id: &str) -> &[String] {
        self.parents.get(step_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct children of a step.
    pub fn children(&self, step_id: &str) -> &[String] {
        self.steps
            .get(step_id)
            .map(|s| s.next.as_slice())
            .unwrap_or(&[])
    }

    /// All transitive ancestors of a step.
    pub fn ancestors(&self, step_id: &str) -> BTreeSet<String> {
        self.walk(step_id, |id| self.parents(id))
    }

    /// All transitive descendants of a step.
    pub fn descendants(&self, step_id: &str) -> BTreeSet<String> {
        self.walk(step_id, |id| self.children(id))
    }

    /// Steps declared as hooks.
    pub fn hooks(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps().filter(|s| s.hook)
    }

    /// Returns true if any step may suspend.
    pub fn has_async_steps(&self) -> bool {
        self.steps.values().any(|s| s.async_step)
    }

    fn walk<'a, F>(&'a self, start: &str, next: F) -> BTreeSet<String>
    where
        F: Fn(&str) -> &'a [String],
    {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = next(start).iter().map(String::as_str).collect();
        while let Some(id) = queue.pop_front() {
            if seen.insert(id.to_string()) {
                queue.extend(next(id).iter().map(String::as_str));
            }
        }
        seen
    }
}

/// Structural equality: same root and the same step definitions.
impl PartialEq for WorkflowGraph {
    fn eq(&self, other: &Self) -> bool {
        let mut a = self.root.clone();
        let mut b = other.root.clone();
        a.sort();
        b.sort();
        a == b && self.steps == other.steps
    }
}

impl Eq for WorkflowGraph {}

impl TryFrom<RawGraph> for WorkflowGraph {
    type Error = WorkflowError;

    fn try_from(raw: RawGraph) -> Result<Self> {
        WorkflowGraph::new(raw.root, raw.steps)
    }
}

impl From<WorkflowGraph> for RawGraph {
    fn from(graph: WorkflowGraph) -> Self {
        let steps = graph
            .order
            .iter()
            .filter_map(|id| graph.steps.get(id).cloned())
            .collect();
        RawGraph {
            root: graph.root,
            steps,
        }
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::empty()
    }
}

/// Kahn's algorithm; ties are broken by step id so the order is stable.
fn topological_order(
    steps: &BTreeMap<String, StepDefinition>,
    parents: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = parents
        .iter()
        .map(|(id, p)| (id.as_str(), p.len()))
        .collect();

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        for child in steps.get(id).map(|s| s.next.as_slice()).unwrap_or(&[]) {
            if let Some(degree) = in_degree.get_mut(child.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(child.as_str());
                }
            }
        }
    }

    if order.len() != steps.len() {
        let stuck = in_degree
            .iter()
            .find(|(_, degree)| **degree > 0)
            .map(|(id, _)| id.to_string())
            .unwrap_or_default();
        return Err(WorkflowError::Cycle(stuck));
    }

    Ok(order)
}

/// Accumulates steps and their parent/child relationships.
///
/// ```
/// use workflow::{StepDefinition, WorkflowBuilder};
///
/// // a -> [b, c] -> d
/// let graph = WorkflowBuilder::new()
///     .add_step(StepDefinition::new("a"))
///     .parallel([StepDefinition::new("b"), StepDefinition::new("c")])
///     .then(StepDefinition::new("d"))
///     .build()
///     .unwrap();
///
/// assert_eq!(graph.parents("d"), ["b", "c"]);
/// ```
#[derive(Debug, Default)]
pub struct WorkflowBuilder {
    root: Vec<String>,
    steps: Vec<StepDefinition>,
    tail: Vec<String>,
    error: Option<WorkflowError>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step as a child of every listed parent, or as a top-level
    /// step when `parents` is empty.
    pub fn add_action(mut self, parents: &[&str], step: StepDefinition) -> Self {
        if self.error.is_some() {
            return self;
        }

        for parent in parents {
            match self.steps.iter_mut().find(|s| s.id == *parent) {
                Some(p) => {
                    if !p.next.contains(&step.id) {
                        p.next.push(step.id.clone());
                    }
                }
                None => {
                    self.error = Some(WorkflowError::UnknownStep {
                        step: step.id.clone(),
                        reference: (*parent).to_string(),
                    });
                    return self;
                }
            }
        }

        if parents.is_empty() {
            self.root.push(step.id.clone());
        }
        self.tail = vec![step.id.clone()];
        self.steps.push(step);
        self
    }

    /// Adds a top-level step.
    pub fn add_step(self, step: StepDefinition) -> Self {
        self.add_action(&[], step)
    }

    /// Adds a step after every step of the previous group.
    pub fn then(mut self, step: StepDefinition) -> Self {
        if self.tail.is_empty() {
            if self.error.is_none() {
                self.error = Some(WorkflowError::NoPreviousStep(step.id));
            }
            return self;
        }
        let tail = std::mem::take(&mut self.tail);
        let parents: Vec<&str> = tail.iter().map(String::as_str).collect();
        self.add_action(&parents, step)
    }

    /// Adds steps that run concurrently after the previous group.
    ///
    /// The next call to [`then`](Self::then) joins all of them.
    pub fn parallel(mut self, steps: impl IntoIterator<Item = StepDefinition>) -> Self {
        let parents = std::mem::take(&mut self.tail);
        let parent_refs: Vec<&str> = parents.iter().map(String::as_str).collect();
        let mut group = Vec::new();
        for step in steps {
            group.push(step.id.clone());
            self = self.add_action(&parent_refs, step);
        }
        self.tail = group;
        self
    }

    /// Validates the accumulated steps and builds the graph.
    pub fn build(self) -> Result<WorkflowGraph> {
        if let Some(err) = self.error {
            return Err(err);
        }
        WorkflowGraph::new(self.root, self.steps)
    }
}
