//! Logging facilities for formstep.
//!
//! formstep uses the `tracing` crate for instrumentation. The library never
//! installs a subscriber; applications do:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("formstep=debug,formstep_core=info")
//!     .init();
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem. Spans
/// follow the same scheme: `formstep::dispatch`, `formstep::projection` and
/// `formstep::validation`.
pub mod targets {
    /// Signal/slot system target.
    pub const SIGNAL: &str = "formstep_core::signal";
    /// Deferred task queue target.
    pub const TASK: &str = "formstep_core::task";
    /// Async runtime target.
    pub const RUNTIME: &str = "formstep_core::runtime";
    /// Step controller state machine target.
    pub const CONTROLLER: &str = "formstep::controller";
    /// Notification bus target.
    pub const BUS: &str = "formstep::bus";
    /// Visibility projection target.
    pub const VISIBILITY: &str = "formstep::visibility";
    /// Configuration loading target.
    pub const CONFIG: &str = "formstep::config";
}
