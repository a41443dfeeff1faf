//! Core systems for formstep.
//!
//! This crate provides the reactive building blocks the step controller is
//! assembled from:
//!
//! - **Signal/Slot System**: Type-safe, synchronous change notification
//! - **Property System**: Reactive values with change detection
//! - **Task Queue**: Deferred work run on the host's next scheduling turn
//! - **Async Runtime**: Tokio integration for asynchronous host operations
//!
//! # Signal/Slot Example
//!
//! ```
//! use formstep_core::Signal;
//!
//! let value_changed = Signal::<i32>::new();
//! let conn_id = value_changed.connect(|value| {
//!     println!("Value changed to: {}", value);
//! });
//!
//! value_changed.emit(42);
//! value_changed.disconnect(conn_id);
//! ```
//!
//! # Deferred Task Example
//!
//! ```
//! use formstep_core::TaskQueue;
//!
//! let queue = TaskQueue::new();
//! queue.post(|| println!("runs later"));
//! assert_eq!(queue.process_all(), 1);
//! ```

pub mod async_runtime;
mod error;
pub mod logging;
pub mod property;
pub mod signal;
mod task;

pub use async_runtime::{AsyncRuntime, AsyncRuntimeConfig, AsyncRuntimeError, AsyncTaskHandle, RuntimeType};
pub use error::{CoreError, Result, SignalError};
pub use property::{Property, ReadOnlyProperty};
pub use signal::{ConnectionGuard, ConnectionId, Signal};
pub use task::{TaskId, TaskQueue};
