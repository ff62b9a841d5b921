// Execution Runner - Background tasks and per-execution serialization

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

/// Bounded pool for driver loops handed off by `start`
#[derive(Debug, Clone)]
pub struct ExecutionRunner {
    permits: Arc<Semaphore>,
}

impl ExecutionRunner {
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Spawn `task` for `execution_id`; it waits for a free slot before running
    pub fn spawn<F>(&self, execution_id: Uuid, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let span = info_span!("execution", execution_id = %execution_id);

        tokio::spawn(
            async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Execution runner closed before the task could start");
                        return;
                    }
                };
                task.await;
            }
            .instrument(span),
        )
    }

    #[cfg(test)]
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }
}

type LockTable = HashMap<Uuid, Arc<AsyncMutex<()>>>;

/// One async lock per execution id. Entries are dropped once nobody holds or
/// waits on them, so the table only grows with in-flight executions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLocks {
    table: Arc<Mutex<LockTable>>,
}

impl ExecutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, execution_id: Uuid) -> ExecutionGuard {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.entry(execution_id).or_default().clone()
        };
        let guard = slot.lock_owned().await;

        ExecutionGuard {
            execution_id,
            table: self.table.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ExecutionGuard {
    execution_id: Uuid,
    table: Arc<Mutex<LockTable>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters clone the slot under the table lock, so a count of one means
        // the table holds the only reference
        if table
            .get(&self.execution_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            table.remove(&self.execution_id);
        }
    }
}
