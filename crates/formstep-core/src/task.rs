//! Deferred task queue.
//!
//! Tasks posted here run on the host's next scheduling turn, when it calls
//! [`TaskQueue::process_all`] or [`TaskQueue::process_batch`]. A running task
//! may post further tasks; they run in the same drain if it is still going.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::logging::targets;

/// A unique identifier for a deferred task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Get the raw u64 value of this task ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Global counter for generating unique task IDs.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

/// A boxed task closure.
type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

struct TaskData {
    id: TaskId,
    task: BoxedTask,
}

/// A thread-safe queue of deferred tasks.
pub struct TaskQueue {
    tasks: Mutex<VecDeque<TaskData>>,
    /// Maximum number of tasks to process per [`process_batch`](Self::process_batch).
    batch_size: AtomicUsize,
}

impl TaskQueue {
    /// Create a new task queue.
    pub fn new() -> Self {
        Self::with_batch_size(10)
    }

    /// Create a new task queue with a custom batch size.
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            batch_size: AtomicUsize::new(batch_size.max(1)),
        }
    }

    /// Post a task to be executed on the next scheduling turn.
    ///
    /// Returns the task ID that can be used to cancel the task.
    pub fn post<F>(&self, task: F) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = next_task_id();
        self.tasks.lock().push_back(TaskData {
            id,
            task: Box::new(task),
        });
        tracing::trace!(target: targets::TASK, task_id = id.as_u64(), "task posted");
        id
    }

    /// Cancel a pending task.
    ///
    /// Returns `true` if the task was found and cancelled.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut tasks = self.tasks.lock();
        if let Some(pos) = tasks.iter().position(|t| t.id == id) {
            tasks.remove(pos);
            true
        } else {
            false
        }
    }

    /// Check if there are any pending tasks.
    pub fn has_pending(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Get the number of pending tasks.
    pub fn pending_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Set the batch size for [`process_batch`](Self::process_batch).
    pub fn set_batch_size(&self, size: usize) {
        self.batch_size.store(size.max(1), Ordering::Relaxed);
    }

    /// Process up to `batch_size` tasks.
    ///
    /// Returns the number of tasks processed.
    pub fn process_batch(&self) -> usize {
        let limit = self.batch_size.load(Ordering::Relaxed);
        self.process_up_to(limit)
    }

    /// Process pending tasks until the queue is empty.
    ///
    /// Returns the number of tasks processed.
    pub fn process_all(&self) -> usize {
        self.process_up_to(usize::MAX)
    }

    fn process_up_to(&self, limit: usize) -> usize {
        let mut processed = 0;
        while processed < limit {
            // The lock is released before the task runs so it can post more work.
            let Some(task_data) = self.tasks.lock().pop_front() else {
                break;
            };
            (task_data.task)();
            processed += 1;
        }
        if processed > 0 {
            tracing::trace!(target: targets::TASK, processed, "processed deferred tasks");
        }
        processed
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.pending_count())
            .field("batch_size", &self.batch_size.load(Ordering::Relaxed))
            .finish()
    }
}
