//! Interval task runner.
//!
//! Every task gets a child of the scheduler's root [`CancellationToken`], so
//! a task can be stopped on its own through its [`TaskHandle`] or all at
//! once through [`Scheduler::shutdown`]. A run that is in flight when its
//! token is cancelled finishes; no further runs start.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, StashError};

/// Handle to a single scheduled task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    name: String,
    token: CancellationToken,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the task after its current run, if any.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Runs periodic tasks on the ambient tokio runtime.
#[derive(Debug)]
pub struct Scheduler {
    root: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn lock_tasks(&self) -> Result<MutexGuard<'_, Vec<JoinHandle<()>>>> {
        self.tasks
            .lock()
            .map_err(|_| StashError::Storage("Scheduler lock poisoned".to_string()))
    }

    /// Run `task` every `period`. The first run happens one period from now.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn every<F, Fut>(&self, name: &str, period: Duration, mut task: F) -> Result<TaskHandle>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(StashError::InvalidInput(
                "Task period must be greater than zero".to_string(),
            ));
        }
        if self.root.is_cancelled() {
            return Err(StashError::InvalidInput(
                "Scheduler has been shut down".to_string(),
            ));
        }

        let token = self.root.child_token();
        let handle = TaskHandle {
            name: name.to_string(),
            token: token.clone(),
        };
        let task_name = name.to_string();

        let join = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => task().await,
                }
            }
            debug!(task = %task_name, "Scheduled task stopped");
        });

        let mut tasks = self.lock_tasks()?;
        tasks.retain(|task| !task.is_finished());
        tasks.push(join);
        debug!(task = name, period_ms = period.as_millis() as u64, "Scheduled task");
        Ok(handle)
    }

    /// Cancel every task. Tasks stop after their current run.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Cancel every task and wait for all of them to stop.
    pub async fn shutdown_and_wait(&self) {
        self.root.cancel();
        let tasks = match self.lock_tasks() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return,
        };
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Scheduled task panicked");
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
