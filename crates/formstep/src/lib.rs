//! Step-wizard controller for multi-step forms.
//!
//! formstep coordinates which step of a multi-step form is active and which
//! of the form's fields are visible. It sits between three host-owned
//! collaborators:
//!
//! - a [`NotificationBus`] carrying navigation commands and step events,
//! - a [`ValidationProvider`] that checks the visible fields asynchronously,
//! - a [`FieldVisibilityStore`] holding each field's display state.
//!
//! The host publishes [`StepMessage::Next`], [`StepMessage::Previous`] or
//! [`StepMessage::Goto`]; the [`StepController`] validates when needed, moves
//! its current index, publishes [`StepMessage::CurrentChanged`], and writes
//! `display` for every step-owned field so that only the current step shows.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use formstep::validation::{validator_fn, ValidationReport};
//! use formstep::{MemoryFieldStore, StepController, StepsConfig};
//!
//! # async fn run() -> formstep::Result<()> {
//! let store = Arc::new(MemoryFieldStore::with_fields(["account", "profile", "confirm"]));
//! let controller = StepController::builder(
//!     StepsConfig::from_names(["account", "profile", "confirm"]),
//!     store.clone(),
//! )
//! .validator(Arc::new(validator_fn(|| async { ValidationReport::valid() })))
//! .build()?;
//!
//! controller.bus().form_initialized();
//! controller.process_pending();
//! assert_eq!(store.displayed_fields(), vec!["account".to_string()]);
//!
//! controller.bus().next();
//! controller.settle().await;
//! controller.process_pending();
//! assert_eq!(store.displayed_fields(), vec!["profile".to_string()]);
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod controller;
mod error;
pub mod step;
pub mod validation;
pub mod visibility;

pub use bus::{NotificationBus, StepMessage};
pub use config::{GotoBounds, StaleValidationPolicy, StepsConfig};
pub use controller::{StepController, StepControllerBuilder};
pub use error::{ConfigError, FieldStateError, Result, StepError};
pub use step::{Step, StepSequence};
pub use validation::{AlwaysValid, ValidationError, ValidationProvider, ValidationReport};
pub use visibility::{
    project_visibility, FieldState, FieldVisibilityStore, FieldWrite, MemoryFieldStore,
    ProjectionReport, VisibilityPlan,
};
