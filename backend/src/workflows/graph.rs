// Workflow Graph - Validated, indexed view over a workflow definition

use std::collections::{HashMap, HashSet};

use groundwork_shared::{Connection, Step, StepId, WorkflowDefinition};
use thiserror::Error;

/// Malformed or unroutable workflow graph. Always fatal for an execution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("workflow has no start step")]
    MissingStart,
    #[error("workflow has {0} start steps, expected exactly one")]
    MultipleStarts(usize),
    #[error("step id '{0}' is used more than once")]
    DuplicateStep(StepId),
    #[error("connection {from} -> {to} references a step that does not exist")]
    DanglingConnection { from: StepId, to: StepId },
    #[error("step '{0}' has no outgoing connection")]
    NoOutgoing(StepId),
    #[error("cycle without a condition step: {}", .0.join(" -> "))]
    Cycle(Vec<StepId>),
    #[error("step '{0}' does not exist in the workflow")]
    UnknownStep(StepId),
    #[error("no outgoing connection of step '{0}' is eligible")]
    NoEligibleConnection(StepId),
    #[error("condition step '{step}' visited more than {limit} times")]
    RevisitLimit { step: StepId, limit: u32 },
    #[error("step '{0}' is an end step and has no processor")]
    NoProcessor(StepId),
}

#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    definition: WorkflowDefinition,
    index: HashMap<StepId, usize>,
    outgoing: HashMap<StepId, Vec<usize>>,
    start: usize,
}

impl WorkflowGraph {
    /// Validate `definition` and build lookup tables for the driver loop
    pub fn new(definition: WorkflowDefinition) -> Result<Self, DefinitionError> {
        let mut index = HashMap::with_capacity(definition.steps.len());
        for (position, step) in definition.steps.iter().enumerate() {
            if index.insert(step.id.clone(), position).is_some() {
                return Err(DefinitionError::DuplicateStep(step.id.clone()));
            }
        }

        let starts: Vec<usize> = definition
            .steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.is_start())
            .map(|(position, _)| position)
            .collect();

        let start = match starts.as_slice() {
            [] => return Err(DefinitionError::MissingStart),
            [only] => *only,
            many => return Err(DefinitionError::MultipleStarts(many.len())),
        };

        let mut outgoing: HashMap<StepId, Vec<usize>> = HashMap::new();
        for (position, connection) in definition.connections.iter().enumerate() {
            if !index.contains_key(&connection.source) || !index.contains_key(&connection.target) {
                return Err(DefinitionError::DanglingConnection {
                    from: connection.source.clone(),
                    to: connection.target.clone(),
                });
            }
            outgoing.entry(connection.source.clone()).or_default().push(position);
        }

        if let Some(step) = definition
            .steps
            .iter()
            .find(|step| !step.is_end() && !outgoing.contains_key(&step.id))
        {
            return Err(DefinitionError::NoOutgoing(step.id.clone()));
        }

        let graph = Self {
            definition,
            index,
            outgoing,
            start,
        };

        if let Some(cycle) = graph.find_unguarded_cycle() {
            return Err(DefinitionError::Cycle(cycle));
        }

        Ok(graph)
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn start(&self) -> &Step {
        &self.definition.steps[self.start]
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&position| &self.definition.steps[position])
    }

    /// Outgoing connections of `id` in authoring order
    pub fn outgoing(&self, id: &str) -> Vec<&Connection> {
        self.outgoing
            .get(id)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&position| &self.definition.connections[position])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Find a cycle made only of non-condition steps.
    ///
    /// Loops through a condition step are allowed; they are bounded at run
    /// time by the per-execution revisit cap instead.
    fn find_unguarded_cycle(&self) -> Option<Vec<StepId>> {
        let mut finished = HashSet::new();
        let mut stack = Vec::new();

        for step in &self.definition.steps {
            if step.is_condition() || finished.contains(step.id.as_str()) {
                continue;
            }
            if let Some(cycle) = self.visit(&step.id, &mut stack, &mut finished) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        id: &'a str,
        stack: &mut Vec<&'a str>,
        finished: &mut HashSet<&'a str>,
    ) -> Option<Vec<StepId>> {
        if let Some(at) = stack.iter().position(|on_stack| *on_stack == id) {
            let mut cycle: Vec<StepId> = stack[at..].iter().map(|s| s.to_string()).collect();
            cycle.push(id.to_string());
            return Some(cycle);
        }
        if finished.contains(id) {
            return None;
        }

        stack.push(id);
        for connection in self.outgoing(id) {
            let skip = self
                .step(&connection.target)
                .map(|target| target.is_condition())
                .unwrap_or(true);
            if skip {
                continue;
            }
            if let Some(cycle) = self.visit(&connection.target, stack, finished) {
                return Some(cycle);
            }
        }
        stack.pop();
        finished.insert(id);
        None
    }
}
