// Workflow Engine - Drives executions through a workflow graph
//
// An execution advances step by step until it reaches an end step, parks on
// an approval, or fails. Approvals are picked up again through `resume`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use groundwork_shared::{ApprovalStatus, Decision, Execution, ExecutionStatus, StepId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::{next_step, record_step, StepExecutor, StepOutcome};
use super::graph::{DefinitionError, WorkflowGraph};
use super::runner::{ExecutionLocks, ExecutionRunner};
use crate::notifications::NotificationDispatcher;
use crate::store::{DecideOutcome, DefinitionRepository, ExecutionStore, StoreError};

/// Why a resume was refused; the execution is left untouched
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResumeConflict {
    #[error("approval {approval_id} is not pending (status: {})", .status.as_str())]
    NotPending {
        approval_id: Uuid,
        status: ApprovalStatus,
    },
    #[error("approval {approval_id} expired at {expires_at}")]
    Expired {
        approval_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    #[error("execution {execution_id} is {} and cannot be resumed", .status.as_str())]
    ExecutionNotRunning {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Workflow {0} not found")]
    WorkflowNotFound(Uuid),
    #[error("Execution {0} not found")]
    ExecutionNotFound(Uuid),
    #[error("Approval {0} not found")]
    ApprovalNotFound(Uuid),
    #[error("Invalid workflow definition: {0}")]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Conflict(#[from] ResumeConflict),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("A reason is required to decide an approval")]
    MissingReason,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an approval stays open
    pub approval_window: Duration,
    /// Condition steps visited more often than this in one drive fail the execution
    pub max_condition_visits: u32,
    /// Driver loops allowed to run at once
    pub worker_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            approval_window: Duration::days(7),
            max_condition_visits: 100,
            worker_concurrency: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeCommand {
    pub approval_id: Uuid,
    pub decision: Decision,
    pub reason: String,
    pub actor_id: String,
}

/// Handle returned by `start`. Dropping `handle` leaves the loop running.
#[derive(Debug)]
pub struct StartedExecution {
    pub execution_id: Uuid,
    pub handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeOutcome {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
}

/// How one drive of the loop ended
#[derive(Debug, Clone, PartialEq)]
enum LoopExit {
    Completed,
    Suspended(Uuid),
    /// Execution was already terminal when the loop got to it
    Stopped,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    definitions: Arc<dyn DefinitionRepository>,
    store: Arc<dyn ExecutionStore>,
    executor: StepExecutor,
    runner: ExecutionRunner,
    locks: ExecutionLocks,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        definitions: Arc<dyn DefinitionRepository>,
        store: Arc<dyn ExecutionStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: EngineConfig,
    ) -> Self {
        let executor = StepExecutor::new(store.clone(), dispatcher, config.approval_window);
        let runner = ExecutionRunner::new(config.worker_concurrency);

        Self {
            definitions,
            store,
            executor,
            runner,
            locks: ExecutionLocks::new(),
            config,
        }
    }

    /// Create an execution at the workflow's start step and hand its loop to
    /// the runner. Returns once the execution row exists.
    pub async fn start(&self, workflow_id: Uuid, trigger_context: Value) -> Result<StartedExecution, EngineError> {
        let graph = self.load_graph(workflow_id).await?;

        let execution = Execution::new(workflow_id, &graph.start().id, trigger_context);
        self.store.create_execution(&execution).await?;

        info!(
            execution_id = %execution.id,
            workflow_id = %workflow_id,
            "Execution started for workflow '{}'",
            graph.name()
        );

        let engine = self.clone();
        let execution_id = execution.id;
        let handle = self.runner.spawn(execution_id, async move {
            engine.drive(execution_id, &graph).await;
        });

        Ok(StartedExecution { execution_id, handle })
    }

    /// Apply a decision to a pending approval and continue its execution
    pub async fn resume(&self, command: ResumeCommand) -> Result<ResumeOutcome, EngineError> {
        if command.reason.trim().is_empty() {
            return Err(EngineError::MissingReason);
        }

        let approval = self
            .store
            .get_approval(command.approval_id)
            .await?
            .ok_or(EngineError::ApprovalNotFound(command.approval_id))?;
        let execution_id = approval.execution_id;

        let _guard = self.locks.lock(execution_id).await;

        let execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;
        if execution.status != ExecutionStatus::Running {
            let current = self
                .store
                .get_approval(approval.id)
                .await?
                .ok_or(EngineError::ApprovalNotFound(approval.id))?;
            return Err(match current.status {
                ApprovalStatus::Expired => ResumeConflict::Expired {
                    approval_id: approval.id,
                    expires_at: current.expires_at,
                },
                ApprovalStatus::Pending => ResumeConflict::ExecutionNotRunning {
                    execution_id,
                    status: execution.status,
                },
                status => ResumeConflict::NotPending {
                    approval_id: approval.id,
                    status,
                },
            }
            .into());
        }

        let decided_at = Utc::now();
        let decided = match self
            .store
            .decide_approval(
                approval.id,
                command.decision,
                &command.reason,
                &command.actor_id,
                decided_at,
            )
            .await?
        {
            DecideOutcome::Decided(approval) => approval,
            DecideOutcome::NotFound => return Err(EngineError::ApprovalNotFound(approval.id)),
            DecideOutcome::NotPending(ApprovalStatus::Expired) => {
                return Err(ResumeConflict::Expired {
                    approval_id: approval.id,
                    expires_at: approval.expires_at,
                }
                .into())
            }
            DecideOutcome::NotPending(status) => {
                return Err(ResumeConflict::NotPending {
                    approval_id: approval.id,
                    status,
                }
                .into())
            }
            DecideOutcome::Expired(expires_at) => {
                return Err(ResumeConflict::Expired {
                    approval_id: approval.id,
                    expires_at,
                }
                .into())
            }
        };

        info!(
            execution_id = %execution_id,
            approval_id = %decided.id,
            step_id = %decided.step_id,
            decision = command.decision.as_str(),
            actor = %command.actor_id,
            "Approval decided"
        );

        let result = self
            .continue_after_decision(execution_id, &decided.step_id, &command, decided_at)
            .await;
        self.settle(execution_id, result).await;

        let execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;

        Ok(ResumeOutcome {
            execution_id,
            status: execution.status,
        })
    }

    async fn continue_after_decision(
        &self,
        execution_id: Uuid,
        approval_step: &str,
        command: &ResumeCommand,
        decided_at: DateTime<Utc>,
    ) -> Result<LoopExit, EngineError> {
        let mut execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;
        if execution.status != ExecutionStatus::Running {
            return Ok(LoopExit::Stopped);
        }

        let graph = self.load_graph(execution.workflow_id).await?;

        record_step(
            &mut execution.context,
            approval_step,
            json!({
                "decision": command.decision.as_str(),
                "reason": command.reason,
                "actor": command.actor_id,
                "decided_at": decided_at,
            }),
        );
        if let Some(root) = execution.context.as_object_mut() {
            root.insert("decision".to_string(), json!(command.decision.as_str()));
        }

        let next = next_step(&graph, approval_step, &execution.context)?;
        self.store
            .advance_execution(execution_id, &next, &execution.context)
            .await?;

        self.step_loop(execution_id, &graph).await
    }

    /// Run the loop for an execution that is not yet locked
    async fn drive(&self, execution_id: Uuid, graph: &WorkflowGraph) {
        let _guard = self.locks.lock(execution_id).await;
        let result = self.step_loop(execution_id, graph).await;
        self.settle(execution_id, result).await;
    }

    async fn step_loop(&self, execution_id: Uuid, graph: &WorkflowGraph) -> Result<LoopExit, EngineError> {
        let mut execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;
        if execution.status != ExecutionStatus::Running {
            return Ok(LoopExit::Stopped);
        }

        let mut condition_visits: HashMap<StepId, u32> = HashMap::new();

        loop {
            let step = graph
                .step(&execution.current_step_id)
                .ok_or_else(|| DefinitionError::UnknownStep(execution.current_step_id.clone()))?;

            if step.is_end() {
                self.store
                    .complete_execution(execution_id, &execution.context)
                    .await?;
                return Ok(LoopExit::Completed);
            }

            if step.is_condition() {
                let visits = condition_visits.entry(step.id.clone()).or_insert(0);
                *visits += 1;
                if *visits > self.config.max_condition_visits {
                    return Err(DefinitionError::RevisitLimit {
                        step: step.id.clone(),
                        limit: self.config.max_condition_visits,
                    }
                    .into());
                }
            }

            debug!(execution_id = %execution_id, step_id = %step.id, kind = step.kind.as_str(), "Running step");

            match self
                .executor
                .execute(graph, step, execution_id, &mut execution.context)
                .await?
            {
                StepOutcome::Advance(next) => {
                    self.store
                        .advance_execution(execution_id, &next, &execution.context)
                        .await?;
                    execution.current_step_id = next;
                }
                StepOutcome::Suspend(approval_id) => return Ok(LoopExit::Suspended(approval_id)),
            }
        }
    }

    /// Record how a drive ended; fatal errors fail the execution
    async fn settle(&self, execution_id: Uuid, result: Result<LoopExit, EngineError>) {
        match result {
            Ok(LoopExit::Completed) => info!(execution_id = %execution_id, "Execution completed"),
            Ok(LoopExit::Suspended(approval_id)) => {
                info!(execution_id = %execution_id, approval_id = %approval_id, "Execution waiting for approval")
            }
            Ok(LoopExit::Stopped) => debug!(execution_id = %execution_id, "Execution already finished"),
            Err(EngineError::Store(StoreError::ExecutionNotRunning(_))) => {
                warn!(execution_id = %execution_id, "Execution left the running state mid-drive; stopping")
            }
            Err(e) => {
                error!(execution_id = %execution_id, "Execution failed: {}", e);
                if let Err(store_err) = self.store.fail_execution(execution_id, &e.to_string()).await {
                    error!(
                        execution_id = %execution_id,
                        "Failed to record execution failure: {}",
                        store_err
                    );
                }
            }
        }
    }

    async fn load_graph(&self, workflow_id: Uuid) -> Result<WorkflowGraph, EngineError> {
        let definition = self
            .definitions
            .get_workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;

        Ok(WorkflowGraph::new(definition)?)
    }
}
