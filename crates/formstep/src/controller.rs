//! The step controller.
//!
//! [`StepController`] owns the current step index of a multi-step form. It
//! listens on the [`NotificationBus`] for navigation commands, gates `Next`
//! on the host's [`ValidationProvider`], announces every index change as
//! [`StepMessage::CurrentChanged`], and projects the new index onto the host's
//! [`FieldVisibilityStore`].
//!
//! # State machine
//!
//! | Command | Effect |
//! |---|---|
//! | `Next` | validate; on success move to `current + 1` unless already on the last step |
//! | `Previous` | move to `current - 1` unless already on the first step |
//! | `Goto(i)` | move to `i` if [`GotoBounds`] accepts it, otherwise ignore |
//!
//! `Previous` on the first step and `Next` on the last step change nothing and
//! publish nothing. An accepted `Goto` always publishes `CurrentChanged`, even
//! when it names the current step, so the host can force a re-projection.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use formstep::{MemoryFieldStore, StepController, StepsConfig};
//!
//! # async fn run() -> formstep::Result<()> {
//! let store = Arc::new(MemoryFieldStore::with_fields(["account", "profile"]));
//! let controller = StepController::builder(
//!     StepsConfig::from_names(["account", "profile"]),
//!     store.clone(),
//! )
//! .build()?;
//!
//! controller.initialize()?;
//! controller.bus().next();
//! controller.settle().await;
//! controller.process_pending();
//! assert_eq!(controller.current(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use formstep_core::logging::targets;
use formstep_core::{
    AsyncRuntime, ConnectionGuard, CoreError, Property, ReadOnlyProperty, Signal, TaskQueue,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::Instrument;

use crate::bus::{NotificationBus, StepMessage};
use crate::config::{GotoBounds, StaleValidationPolicy, StepsConfig};
use crate::error::StepError;
use crate::step::{Step, StepSequence};
use crate::validation::{AlwaysValid, ValidationProvider, ValidationReport};
use crate::visibility::{FieldVisibilityStore, ProjectionReport, VisibilityPlan};

/// Coordinates navigation and field visibility for a multi-step form.
///
/// Dropping the controller unsubscribes it from the bus.
pub struct StepController {
    inner: Arc<ControllerInner>,
    subscription: Mutex<Option<ConnectionGuard<StepMessage>>>,
}

struct ControllerInner {
    sequence: StepSequence,
    goto_bounds: GotoBounds,
    stale_validation: StaleValidationPolicy,
    deferred_visibility: bool,

    /// The current step index. Written only while `generation` is locked.
    current: Property<usize>,
    /// Bumped on every transition; tags in-flight validations.
    generation: Mutex<u64>,
    initialized: AtomicBool,

    bus: Arc<NotificationBus>,
    validator: Arc<dyn ValidationProvider>,
    store: Arc<dyn FieldVisibilityStore>,
    runtime: Arc<AsyncRuntime>,
    tasks: Arc<TaskQueue>,

    validations_pending: AtomicUsize,
    /// Woken when `validations_pending` drops to zero.
    idle: Notify,
    stale_validations: AtomicU64,
    last_projection: Mutex<Option<ProjectionReport>>,

    current_index_changed: Signal<usize>,
    validation_failed: Signal<ValidationReport>,
    visibility_projected: Signal<ProjectionReport>,
    configuration_error: Signal<StepError>,
}

/// Builder for [`StepController`].
pub struct StepControllerBuilder {
    config: StepsConfig,
    store: Arc<dyn FieldVisibilityStore>,
    bus: Option<Arc<NotificationBus>>,
    validator: Option<Arc<dyn ValidationProvider>>,
    runtime: Option<Arc<AsyncRuntime>>,
    tasks: Option<Arc<TaskQueue>>,
}

impl StepControllerBuilder {
    /// Start a builder for the given steps and field store.
    pub fn new(config: StepsConfig, store: Arc<dyn FieldVisibilityStore>) -> Self {
        Self {
            config,
            store,
            bus: None,
            validator: None,
            runtime: None,
            tasks: None,
        }
    }

    /// Share an existing bus. A private bus is created otherwise.
    pub fn bus(mut self, bus: Arc<NotificationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set the validation provider. Defaults to [`AlwaysValid`].
    pub fn validator(mut self, validator: Arc<dyn ValidationProvider>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Set the runtime validations are spawned on.
    ///
    /// Defaults to the Tokio runtime `build` is called from.
    pub fn runtime(mut self, runtime: Arc<AsyncRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Share the host's deferred task queue. A private queue is created otherwise.
    pub fn task_queue(mut self, tasks: Arc<TaskQueue>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Build the controller and subscribe it to the bus.
    ///
    /// Fails if no runtime was given and none is running.
    pub fn build(self) -> Result<StepController, StepError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Arc::new(AsyncRuntime::current().map_err(CoreError::from)?),
        };

        let inner = Arc::new(ControllerInner {
            sequence: self.config.sequence(),
            goto_bounds: self.config.goto_bounds,
            stale_validation: self.config.stale_validation,
            deferred_visibility: self.config.deferred_visibility,
            current: Property::new(0),
            generation: Mutex::new(0),
            initialized: AtomicBool::new(false),
            bus: self.bus.unwrap_or_default(),
            validator: self.validator.unwrap_or_else(|| Arc::new(AlwaysValid)),
            store: self.store,
            runtime,
            tasks: self.tasks.unwrap_or_default(),
            validations_pending: AtomicUsize::new(0),
            idle: Notify::new(),
            stale_validations: AtomicU64::new(0),
            last_projection: Mutex::new(None),
            current_index_changed: Signal::new(),
            validation_failed: Signal::new(),
            visibility_projected: Signal::new(),
            configuration_error: Signal::new(),
        });

        let weak: Weak<ControllerInner> = Arc::downgrade(&inner);
        let subscription = inner.bus.subscribe_scoped(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_message(message);
            }
        });

        tracing::debug!(
            target: targets::CONTROLLER,
            steps = inner.sequence.len(),
            goto_bounds = ?inner.goto_bounds,
            stale_validation = ?inner.stale_validation,
            deferred_visibility = inner.deferred_visibility,
            "step controller created"
        );

        Ok(StepController {
            inner,
            subscription: Mutex::new(Some(subscription)),
        })
    }
}

impl StepController {
    /// Start building a controller.
    pub fn builder(
        config: StepsConfig,
        store: Arc<dyn FieldVisibilityStore>,
    ) -> StepControllerBuilder {
        StepControllerBuilder::new(config, store)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Signal that the host form and its fields exist.
    ///
    /// The first call publishes `CurrentChanged { value: current, previous:
    /// current }`, which drives the initial visibility projection. Later
    /// calls do nothing. Publishing [`StepMessage::FormInitialized`] on the
    /// bus has the same effect.
    ///
    /// Returns [`StepError::MissingStepName`] if a step cannot be projected;
    /// the error is also emitted on [`configuration_error`](Self::configuration_error).
    pub fn initialize(&self) -> Result<(), StepError> {
        self.inner.initialize()
    }

    /// Whether the host has signalled initialization.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Stop listening on the bus.
    ///
    /// Returns an error if the controller was already detached.
    pub fn detach(&self) -> Result<(), StepError> {
        match self.subscription.lock().take() {
            Some(guard) => guard.disconnect().map_err(|e| CoreError::from(e).into()),
            None => Err(CoreError::from(formstep_core::SignalError::InvalidConnection).into()),
        }
    }

    /// Wait until every in-flight validation has resolved and been handled.
    pub async fn settle(&self) {
        loop {
            let mut idle = std::pin::pin!(self.inner.idle.notified());
            // Registered before the check so a wake-up in between is not lost.
            idle.as_mut().enable();
            if self.inner.validations_pending.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Run deferred field visibility writes.
    ///
    /// Returns the number of tasks run.
    pub fn process_pending(&self) -> usize {
        self.inner.tasks.process_all()
    }

    // =========================================================================
    // State
    // =========================================================================

    /// The current step index.
    pub fn current(&self) -> usize {
        self.inner.current.get()
    }

    /// A read-only view of the current index.
    pub fn current_property(&self) -> ReadOnlyProperty<'_, usize> {
        ReadOnlyProperty::new(&self.inner.current)
    }

    /// The step at the current index, if the index points at one.
    pub fn current_step(&self) -> Option<&Step> {
        self.inner.sequence.get(self.current())
    }

    /// The steps being coordinated.
    pub fn sequence(&self) -> &StepSequence {
        &self.inner.sequence
    }

    /// Whether the current index is the last step.
    pub fn is_last_step(&self) -> bool {
        self.inner.sequence.last_index() == Some(self.current())
    }

    /// Number of transitions so far, re-announcements by `Goto` included.
    pub fn generation(&self) -> u64 {
        *self.inner.generation.lock()
    }

    /// Whether a `Next` validation is still running.
    ///
    /// Hosts disable their navigation UI while this is true.
    pub fn is_validating(&self) -> bool {
        self.inner.validations_pending.load(Ordering::Acquire) > 0
    }

    /// Number of validation results dropped because the step changed first.
    pub fn stale_validations(&self) -> u64 {
        self.inner.stale_validations.load(Ordering::Acquire)
    }

    /// The report of the most recent completed projection pass.
    pub fn last_projection(&self) -> Option<ProjectionReport> {
        self.inner.last_projection.lock().clone()
    }

    /// The bus this controller listens and publishes on.
    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.inner.bus
    }

    /// The queue deferred visibility writes are posted to.
    pub fn task_queue(&self) -> &Arc<TaskQueue> {
        &self.inner.tasks
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Emitted with the new index whenever it changes, before the bus event.
    pub fn current_index_changed(&self) -> &Signal<usize> {
        &self.inner.current_index_changed
    }

    /// Emitted when a `Next` is refused by validation.
    pub fn validation_failed(&self) -> &Signal<ValidationReport> {
        &self.inner.validation_failed
    }

    /// Emitted when every write of a projection pass has run.
    pub fn visibility_projected(&self) -> &Signal<ProjectionReport> {
        &self.inner.visibility_projected
    }

    /// Emitted when a projection pass cannot run because of bad configuration.
    pub fn configuration_error(&self) -> &Signal<StepError> {
        &self.inner.configuration_error
    }
}

impl std::fmt::Debug for StepController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepController")
            .field("steps", &self.inner.sequence.len())
            .field("current", &self.current())
            .field("generation", &self.generation())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl ControllerInner {
    fn handle_message(self: &Arc<Self>, message: &StepMessage) {
        match *message {
            StepMessage::Next => self.request_next(),
            StepMessage::Previous => {
                let current = self.current.get();
                let target = current.checked_sub(1).unwrap_or(current);
                self.advance_to(target, false);
            }
            StepMessage::Goto(target) => {
                if self.goto_bounds.accepts(target, self.sequence.len()) {
                    self.advance_to(target as usize, true);
                } else {
                    tracing::debug!(
                        target: targets::CONTROLLER,
                        target_index = target,
                        steps = self.sequence.len(),
                        "goto out of range, ignored"
                    );
                }
            }
            StepMessage::CurrentChanged { value, .. } => self.project(value),
            StepMessage::FormInitialized => {
                // Errors are already logged and emitted on `configuration_error`.
                let _ = self.initialize();
            }
        }
    }

    fn initialize(&self) -> Result<(), StepError> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let current = self.current.get();
        if let Some(index) = self.sequence.first_unnamed() {
            let err = StepError::MissingStepName { index };
            self.report_configuration_error(&err);
            self.configuration_error.emit(err);
            return Err(StepError::MissingStepName { index });
        }

        tracing::debug!(target: targets::CONTROLLER, current, "host form initialized");
        self.bus.publish(StepMessage::CurrentChanged {
            value: current,
            previous: current,
        });
        Ok(())
    }

    /// Next target relative to `current`, clamped to the last step.
    fn next_target(&self, current: usize) -> usize {
        match self.sequence.last_index() {
            Some(last) if current < last => current + 1,
            _ => current,
        }
    }

    fn request_next(self: &Arc<Self>) {
        let issued_at = *self.generation.lock();
        let pending = PendingValidation::new(self.clone());
        let span = tracing::debug_span!(target: targets::CONTROLLER, "formstep::validation", issued_at);

        // Completion is tracked through `validations_pending`, not the handle.
        let _ = self.runtime.spawn(
            async move {
                let inner = &pending.0;
                let report = inner.validator.validate_current_form().await;
                inner.finish_next(issued_at, report);
            }
            .instrument(span),
        );
    }

    fn finish_next(&self, issued_at: u64, report: ValidationReport) {
        let mut generation = self.generation.lock();
        if *generation != issued_at && self.stale_validation == StaleValidationPolicy::Discard {
            let current_generation = *generation;
            drop(generation);
            self.stale_validations.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(
                target: targets::CONTROLLER,
                issued_at,
                generation = current_generation,
                "step changed during validation, result discarded"
            );
            return;
        }

        if !report.is_valid() {
            drop(generation);
            tracing::debug!(
                target: targets::CONTROLLER,
                errors = report.errors().len(),
                first = report.first_error_message().unwrap_or_default(),
                "validation failed, staying on current step"
            );
            self.validation_failed.emit(report);
            return;
        }

        let target = self.next_target(self.current.get());
        let transition = self.commit(&mut generation, target, false);
        drop(generation);
        if let Some(transition) = transition {
            self.announce(transition);
        }
    }

    /// Move to `target`. With `republish`, an unchanged index is announced too.
    fn advance_to(&self, target: usize, republish: bool) {
        let transition = self.commit(&mut self.generation.lock(), target, republish);
        if let Some(transition) = transition {
            self.announce(transition);
        }
    }

    /// Write the index under the generation lock.
    fn commit(&self, generation: &mut u64, target: usize, republish: bool) -> Option<Transition> {
        let changed = self.current.replace(target);
        if changed.is_none() && !republish {
            tracing::trace!(target: targets::CONTROLLER, target_index = target, "already on target step");
            return None;
        }
        *generation += 1;
        Some(Transition {
            value: target,
            previous: changed.unwrap_or(target),
            generation: *generation,
            changed: changed.is_some(),
        })
    }

    /// Publish a committed transition. Must run without the generation lock held.
    fn announce(&self, transition: Transition) {
        let Transition {
            value,
            previous,
            generation,
            changed,
        } = transition;

        tracing::info!(
            target: targets::CONTROLLER,
            value,
            previous,
            generation,
            "current step changed"
        );

        if changed {
            self.current_index_changed.emit(value);
        }
        self.bus.publish(StepMessage::CurrentChanged { value, previous });
    }

    fn project(self: &Arc<Self>, value: usize) {
        if !self.initialized.load(Ordering::Acquire) {
            tracing::trace!(target: targets::VISIBILITY, value, "host not initialized, projection skipped");
            return;
        }

        let plan = match VisibilityPlan::build(&self.sequence, value) {
            Ok(plan) => plan,
            Err(err) => {
                self.report_configuration_error(&err);
                self.configuration_error.emit(err);
                return;
            }
        };

        if self.deferred_visibility {
            let weak = Arc::downgrade(self);
            plan.schedule(&self.tasks, self.store.clone(), move |report| {
                if let Some(inner) = weak.upgrade() {
                    inner.finish_projection(report);
                }
            });
        } else {
            let report = plan.apply(self.store.as_ref());
            self.finish_projection(report);
        }
    }

    fn finish_projection(&self, report: ProjectionReport) {
        let failures = report.failures().count();
        if failures > 0 {
            tracing::warn!(
                target: targets::VISIBILITY,
                current = report.current(),
                failures,
                "some field visibility writes failed"
            );
        } else {
            tracing::debug!(
                target: targets::VISIBILITY,
                current = report.current(),
                writes = report.len(),
                "field visibility projected"
            );
        }
        *self.last_projection.lock() = Some(report.clone());
        self.visibility_projected.emit(report);
    }

    fn report_configuration_error(&self, err: &StepError) {
        tracing::error!(target: targets::VISIBILITY, error = %err, "invalid step configuration");
    }
}

struct Transition {
    value: usize,
    previous: usize,
    generation: u64,
    changed: bool,
}

/// Counts one in-flight validation for as long as it lives.
///
/// Dropped when the validation future completes or is torn down after a
/// panic in the provider, so `is_validating` always clears.
struct PendingValidation(Arc<ControllerInner>);

impl PendingValidation {
    fn new(inner: Arc<ControllerInner>) -> Self {
        inner.validations_pending.fetch_add(1, Ordering::AcqRel);
        Self(inner)
    }
}

impl Drop for PendingValidation {
    fn drop(&mut self) {
        if self.0.validations_pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visibility::MemoryFieldStore;

    fn build(names: &[&str]) -> StepController {
        let store = Arc::new(MemoryFieldStore::with_fields(names.iter().copied()));
        StepController::builder(StepsConfig::from_names(names.iter().copied()), store)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_without_runtime_fails() {
        let store = Arc::new(MemoryFieldStore::new());
        let err = StepController::builder(StepsConfig::default(), store)
            .build()
            .unwrap_err();
        assert!(matches!(err, StepError::Core(CoreError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_next_target_clamps() {
        let controller = build(&["a", "b", "c"]);
        let inner = &controller.inner;

        assert_eq!(inner.next_target(0), 1);
        assert_eq!(inner.next_target(1), 2);
        assert_eq!(inner.next_target(2), 2);
        // One past the last step, reachable through an inclusive goto.
        assert_eq!(inner.next_target(3), 3);
    }

    #[tokio::test]
    async fn test_empty_sequence_never_moves() {
        let controller = build(&[]);
        controller.initialize().unwrap();

        controller.bus().next();
        controller.settle().await;
        controller.bus().previous();
        controller.bus().goto(1);

        assert_eq!(controller.current(), 0);
        assert_eq!(controller.generation(), 0);
        assert!(controller.last_projection().is_some_and(|r| r.is_empty()));
    }

    #[tokio::test]
    async fn test_goto_zero_on_empty_sequence_is_announced() {
        let controller = build(&[]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        controller.bus().subscribe(move |message| {
            if let StepMessage::CurrentChanged { value, previous } = *message {
                seen_clone.lock().push((value, previous));
            }
        });

        controller.bus().goto(0);

        assert_eq!(controller.current(), 0);
        assert_eq!(controller.generation(), 1);
        assert_eq!(*seen.lock(), vec![(0, 0)]);
    }

    #[tokio::test]
    async fn test_completed_validations_release_controller() {
        let controller = build(&["a", "b", "c"]);
        controller.initialize().unwrap();

        for _ in 0..1000 {
            controller.bus().next();
            tokio::task::yield_now().await;
        }
        controller.settle().await;

        assert!(!controller.is_validating());
        assert_eq!(controller.inner.validations_pending.load(Ordering::Acquire), 0);
        // Nothing spawned for a finished validation keeps the controller alive.
        assert_eq!(Arc::strong_count(&controller.inner), 1);
        assert_eq!(controller.current(), 2);
    }

    fn crashing_validation() -> ValidationReport {
        panic!("validator crashed")
    }

    #[tokio::test]
    async fn test_panicking_validator_clears_validating_state() {
        let store = Arc::new(MemoryFieldStore::with_fields(["a", "b"]));
        let controller = StepController::builder(StepsConfig::from_names(["a", "b"]), store)
            .validator(Arc::new(crate::validation::validator_fn(|| async {
                crashing_validation()
            })))
            .build()
            .unwrap();
        controller.initialize().unwrap();

        controller.bus().next();
        assert!(controller.is_validating());
        controller.settle().await;

        assert!(!controller.is_validating());
        assert_eq!(controller.current(), 0);

        // The controller keeps working after the provider crashed.
        controller.bus().goto(1);
        assert_eq!(controller.current(), 1);
    }

    #[tokio::test]
    async fn test_stale_result_does_not_move_index() {
        let controller = build(&["a", "b", "c", "d"]);
        let issued_at = controller.generation();
        controller.bus().goto(2);

        controller.inner.finish_next(issued_at, ValidationReport::valid());

        assert_eq!(controller.current(), 2);
        assert_eq!(controller.generation(), issued_at + 1);
        assert_eq!(controller.stale_validations(), 1);
    }

    #[tokio::test]
    async fn test_commit_bumps_generation_under_lock() {
        let controller = build(&["a", "b", "c"]);
        let inner = &controller.inner;

        {
            let mut generation = inner.generation.lock();
            assert!(inner.commit(&mut generation, 0, false).is_none());
            let transition = inner.commit(&mut generation, 0, true).unwrap();
            assert!(!transition.changed);
            let transition = inner.commit(&mut generation, 2, false).unwrap();
            assert!(transition.changed);
            assert_eq!((transition.value, transition.previous), (2, 0));
            assert_eq!(*generation, 2);
        }
        assert_eq!(controller.current(), 2);
        assert_eq!(controller.generation(), 2);
    }

    #[test]
    fn test_owned_runtime_drives_validation() {
        let runtime = Arc::new(
            AsyncRuntime::new(formstep_core::AsyncRuntimeConfig::current_thread()).unwrap(),
        );
        let store = Arc::new(MemoryFieldStore::with_fields(["a", "b"]));
        let controller = StepController::builder(StepsConfig::from_names(["a", "b"]), store)
            .runtime(runtime.clone())
            .build()
            .unwrap();

        controller.initialize().unwrap();
        controller.bus().next();
        runtime.block_on(controller.settle());

        assert_eq!(controller.current(), 1);
        assert!(format!("{controller:?}").contains("StepController"));
    }
}
