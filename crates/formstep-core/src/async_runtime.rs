//! Async runtime integration for formstep.
//!
//! Asynchronous host operations (form validation in particular) run as Tokio
//! tasks. [`AsyncRuntime`] either borrows the ambient Tokio runtime or owns
//! one created from an [`AsyncRuntimeConfig`].
//!
//! # Example
//!
//! ```no_run
//! use formstep_core::async_runtime::{AsyncRuntime, AsyncRuntimeConfig};
//!
//! # async fn fetch_data() -> String { "data".to_string() }
//! let runtime = AsyncRuntime::new(AsyncRuntimeConfig::default()).unwrap();
//!
//! let handle = runtime.spawn(async { fetch_data().await });
//! let result = runtime.block_on(handle.wait());
//! assert_eq!(result.as_deref(), Some("data"));
//! ```
//!
//! # Runtime Types
//!
//! - **Multi-threaded** (default): Tokio's work-stealing scheduler.
//! - **Current-thread**: tasks only make progress while the owner is inside
//!   [`AsyncRuntime::block_on`]. Useful for deterministic demos.
//!
//! An owned runtime must not be dropped from within an async context.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;

use crate::logging::targets;

/// Counter for unique task IDs.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// The type of async runtime to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeType {
    /// Multi-threaded runtime using Tokio's default scheduler.
    #[default]
    MultiThreaded,
    /// Current-thread runtime driven by [`AsyncRuntime::block_on`].
    CurrentThread,
}

/// Configuration for an owned async runtime.
#[derive(Debug, Clone)]
pub struct AsyncRuntimeConfig {
    /// The type of runtime to create.
    pub runtime_type: RuntimeType,
    /// Number of worker threads for multi-threaded runtime.
    /// Defaults to the number of CPU cores.
    pub worker_threads: Option<usize>,
    /// Name prefix for runtime threads.
    pub thread_name: String,
    /// Enable time driver (required for tokio::time operations).
    pub enable_time: bool,
}

impl Default for AsyncRuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_type: RuntimeType::MultiThreaded,
            worker_threads: None,
            thread_name: "formstep-async".to_string(),
            enable_time: true,
        }
    }
}

impl AsyncRuntimeConfig {
    /// Create a configuration for a multi-threaded runtime.
    pub fn multi_threaded() -> Self {
        Self::default()
    }

    /// Create a configuration for a current-thread runtime.
    pub fn current_thread() -> Self {
        Self {
            runtime_type: RuntimeType::CurrentThread,
            ..Default::default()
        }
    }

    /// Set the number of worker threads (multi-threaded runtime only).
    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = Some(count);
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// A handle to a spawned async task.
#[derive(Debug)]
pub struct AsyncTaskHandle<T> {
    id: u64,
    receiver: oneshot::Receiver<T>,
}

impl<T> AsyncTaskHandle<T> {
    /// Get the unique task ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Try to get the result without blocking.
    ///
    /// Gives the handle back if the task has not completed yet.
    pub fn try_get(mut self) -> Result<T, Self> {
        match self.receiver.try_recv() {
            Ok(value) => Ok(value),
            Err(_) => Err(self),
        }
    }

    /// Wait for the task to complete.
    ///
    /// Returns `None` if the task panicked or the runtime shut down first.
    pub async fn wait(self) -> Option<T> {
        self.receiver.await.ok()
    }
}

/// The async runtime manager.
pub struct AsyncRuntime {
    /// Kept alive so the runtime does not shut down while tasks are pending.
    runtime: Option<Runtime>,
    /// Handle to the runtime for spawning tasks.
    handle: Handle,
    /// The runtime type, when owned.
    runtime_type: Option<RuntimeType>,
    /// Active task count.
    active_tasks: Arc<AtomicU64>,
}

impl AsyncRuntime {
    /// Create and own a new runtime.
    pub fn new(config: AsyncRuntimeConfig) -> Result<Self, AsyncRuntimeError> {
        let mut builder = match config.runtime_type {
            RuntimeType::MultiThreaded => {
                let mut builder = Builder::new_multi_thread();
                if let Some(threads) = config.worker_threads {
                    builder.worker_threads(threads.max(1));
                }
                builder
            }
            RuntimeType::CurrentThread => Builder::new_current_thread(),
        };
        builder.thread_name(config.thread_name.clone());
        if config.enable_time {
            builder.enable_time();
        }

        let runtime = builder
            .build()
            .map_err(|e| AsyncRuntimeError::CreationFailed(e.to_string()))?;
        let handle = runtime.handle().clone();

        tracing::debug!(
            target: targets::RUNTIME,
            runtime_type = ?config.runtime_type,
            thread_name = %config.thread_name,
            "created async runtime"
        );

        Ok(Self {
            runtime: Some(runtime),
            handle,
            runtime_type: Some(config.runtime_type),
            active_tasks: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Borrow the Tokio runtime the caller is running inside.
    pub fn current() -> Result<Self, AsyncRuntimeError> {
        let handle = Handle::try_current().map_err(|_| AsyncRuntimeError::NoRuntime)?;
        Ok(Self::from_handle(handle))
    }

    /// Spawn onto an existing runtime through its handle.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            runtime: None,
            handle,
            runtime_type: None,
            active_tasks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether this instance owns its runtime.
    pub fn is_owned(&self) -> bool {
        self.runtime.is_some()
    }

    /// The runtime type, if this instance created the runtime.
    pub fn runtime_type(&self) -> Option<RuntimeType> {
        self.runtime_type
    }

    /// Get the number of tasks spawned through this instance that are still running.
    pub fn active_tasks(&self) -> u64 {
        self.active_tasks.load(Ordering::Acquire)
    }

    /// Get a handle to the Tokio runtime.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn an async task on the runtime.
    ///
    /// Returns a handle that can be used to wait for the result.
    pub fn spawn<F, T>(&self, future: F) -> AsyncTaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let active_tasks = self.active_tasks.clone();

        active_tasks.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(target: targets::RUNTIME, task_id = id, "spawning async task");

        self.handle.spawn(async move {
            let active = ActiveTask(active_tasks);
            let result = future.await;
            drop(active);
            let _ = sender.send(result);
        });

        AsyncTaskHandle { id, receiver }
    }

    /// Block on a future, running it to completion.
    ///
    /// Must not be called from within an async context.
    pub fn block_on<F, T>(&self, future: F) -> T
    where
        F: Future<Output = T>,
    {
        match &self.runtime {
            Some(runtime) => runtime.block_on(future),
            None => self.handle.block_on(future),
        }
    }
}

/// Decrements the active task count when the task ends, panics included.
struct ActiveTask(Arc<AtomicU64>);

impl Drop for ActiveTask {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for AsyncRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRuntime")
            .field("owned", &self.is_owned())
            .field("runtime_type", &self.runtime_type)
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}

/// Errors that can occur with the async runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncRuntimeError {
    /// No Tokio runtime is running on this thread.
    NoRuntime,
    /// Failed to create the runtime.
    CreationFailed(String),
}

impl std::fmt::Display for AsyncRuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoRuntime => write!(f, "No Tokio runtime is running on this thread"),
            Self::CreationFailed(msg) => write!(f, "Failed to create async runtime: {}", msg),
        }
    }
}

impl std::error::Error for AsyncRuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_and_wait() {
        let runtime = AsyncRuntime::new(AsyncRuntimeConfig::multi_threaded().with_worker_threads(1))
            .unwrap();
        let handle = runtime.spawn(async { 21 * 2 });
        assert_eq!(runtime.block_on(handle.wait()), Some(42));
        assert!(runtime.is_owned());
        assert_eq!(runtime.runtime_type(), Some(RuntimeType::MultiThreaded));
    }

    #[test]
    fn test_current_thread_runtime() {
        let runtime = AsyncRuntime::new(AsyncRuntimeConfig::current_thread()).unwrap();
        let handle = runtime.spawn(async { "done" });
        assert_eq!(runtime.block_on(handle.wait()), Some("done"));
    }

    #[test]
    fn test_current_without_runtime() {
        assert_eq!(
            AsyncRuntime::current().unwrap_err(),
            AsyncRuntimeError::NoRuntime
        );
    }

    #[tokio::test]
    async fn test_current_inside_runtime() {
        let runtime = AsyncRuntime::current().unwrap();
        assert!(!runtime.is_owned());
        let handle = runtime.spawn(async { 7 });
        assert_eq!(handle.wait().await, Some(7));
        assert_eq!(runtime.active_tasks(), 0);
    }

    #[tokio::test]
    async fn test_task_ids_are_unique() {
        let runtime = AsyncRuntime::current().unwrap();
        let a = runtime.spawn(async {});
        let b = runtime.spawn(async {});
        assert_ne!(a.id(), b.id());
        a.wait().await;
        b.wait().await;
    }

    fn failing_task() -> u32 {
        panic!("task failed")
    }

    #[tokio::test]
    async fn test_panicking_task_is_no_longer_active() {
        let runtime = AsyncRuntime::current().unwrap();
        let handle = runtime.spawn(async { failing_task() });
        assert_eq!(handle.wait().await, None);
        assert_eq!(runtime.active_tasks(), 0);
    }
}
