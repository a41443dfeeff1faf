//! Field visibility store and the projection of the current step onto it.
//!
//! Projection turns the current step index into one `display` write per step:
//! the current step's field is shown and every other step's field is hidden.
//! Writes are independent. A write that fails is recorded in the
//! [`ProjectionReport`] and never stops the others, and no atomicity is
//! promised across fields.

use std::collections::HashMap;
use std::sync::Arc;

use formstep_core::logging::targets;
use formstep_core::TaskQueue;
use parking_lot::{Mutex, RwLock};

use crate::error::{FieldStateError, StepError};
use crate::step::StepSequence;

/// Display state of one host field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldState {
    /// Whether the field is displayed.
    pub display: bool,
}

impl Default for FieldState {
    fn default() -> Self {
        Self { display: true }
    }
}

/// Host-owned mapping from field name to display state.
///
/// The only primitive is a read-modify-write of one field through a mutator.
pub trait FieldVisibilityStore: Send + Sync {
    /// Apply `mutator` to the state of field `name`.
    fn set_field_state(
        &self,
        name: &str,
        mutator: &mut dyn FnMut(&mut FieldState),
    ) -> Result<(), FieldStateError>;
}

/// An in-memory [`FieldVisibilityStore`] for hosts without their own store.
///
/// Only registered fields accept writes. Every successful write is appended to
/// a log that can be inspected and cleared.
#[derive(Debug, Default)]
pub struct MemoryFieldStore {
    fields: RwLock<HashMap<String, FieldState>>,
    write_log: Mutex<Vec<FieldWrite>>,
}

impl MemoryFieldStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given fields registered in their default state.
    pub fn with_fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for name in names {
            store.register(name);
        }
        store
    }

    /// Register a field. Returns `false` if it already existed.
    pub fn register(&self, name: impl Into<String>) -> bool {
        let mut fields = self.fields.write();
        let name = name.into();
        if fields.contains_key(&name) {
            return false;
        }
        fields.insert(name, FieldState::default());
        true
    }

    /// Remove a field, returning its last state.
    pub fn unregister(&self, name: &str) -> Option<FieldState> {
        self.fields.write().remove(name)
    }

    /// Current state of a field.
    pub fn field_state(&self, name: &str) -> Option<FieldState> {
        self.fields.read().get(name).copied()
    }

    /// Whether a field is displayed, if it exists.
    pub fn is_displayed(&self, name: &str) -> Option<bool> {
        self.field_state(name).map(|s| s.display)
    }

    /// Names of the displayed fields, sorted.
    pub fn displayed_fields(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .fields
            .read()
            .iter()
            .filter(|(_, state)| state.display)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every successful write since the log was last cleared.
    pub fn write_log(&self) -> Vec<FieldWrite> {
        self.write_log.lock().clone()
    }

    /// Clear the write log.
    pub fn clear_write_log(&self) {
        self.write_log.lock().clear();
    }
}

impl FieldVisibilityStore for MemoryFieldStore {
    fn set_field_state(
        &self,
        name: &str,
        mutator: &mut dyn FnMut(&mut FieldState),
    ) -> Result<(), FieldStateError> {
        let mut fields = self.fields.write();
        let state = fields
            .get_mut(name)
            .ok_or_else(|| FieldStateError::UnknownField(name.to_string()))?;
        mutator(state);
        self.write_log.lock().push(FieldWrite {
            field: name.to_string(),
            display: state.display,
        });
        Ok(())
    }
}

impl<S: FieldVisibilityStore + ?Sized> FieldVisibilityStore for Arc<S> {
    fn set_field_state(
        &self,
        name: &str,
        mutator: &mut dyn FnMut(&mut FieldState),
    ) -> Result<(), FieldStateError> {
        (**self).set_field_state(name, mutator)
    }
}

/// One display write for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWrite {
    /// The field name.
    pub field: String,
    /// The display flag written.
    pub display: bool,
}

impl FieldWrite {
    /// Perform this write against `store`.
    pub fn apply(&self, store: &dyn FieldVisibilityStore) -> Result<(), FieldStateError> {
        let display = self.display;
        store.set_field_state(&self.field, &mut |state| state.display = display)
    }
}

/// The outcome of one write in a projection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWriteOutcome {
    /// The write that was attempted.
    pub write: FieldWrite,
    /// What the store answered.
    pub result: Result<(), FieldStateError>,
}

/// The writes needed to show step `current` and hide every other step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityPlan {
    current: usize,
    writes: Vec<FieldWrite>,
}

impl VisibilityPlan {
    /// Plan the writes for `current`.
    ///
    /// Every step name is checked before anything is planned, so a missing
    /// name fails the whole pass before a single write happens.
    pub fn build(sequence: &StepSequence, current: usize) -> Result<Self, StepError> {
        let names = sequence.field_names()?;
        let writes = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| FieldWrite {
                field: name.to_string(),
                display: index == current,
            })
            .collect();
        Ok(Self { current, writes })
    }

    /// The step index this plan shows.
    pub fn current(&self) -> usize {
        self.current
    }

    /// The planned writes, in step order.
    pub fn writes(&self) -> &[FieldWrite] {
        &self.writes
    }

    /// Apply every write now.
    pub fn apply(self, store: &dyn FieldVisibilityStore) -> ProjectionReport {
        let outcomes = self
            .writes
            .into_iter()
            .map(|write| {
                let result = write.apply(store);
                FieldWriteOutcome { write, result }
            })
            .collect();
        ProjectionReport::new(self.current, outcomes)
    }

    /// Post each write as its own task on `queue`.
    ///
    /// `on_complete` receives the aggregated report once the last write has
    /// run, in whatever order the writes ran. An empty plan completes
    /// immediately. Returns the number of tasks posted.
    ///
    /// The task IDs are not handed out: the report needs every write to run,
    /// so individual writes cannot be cancelled.
    pub fn schedule<F>(
        self,
        queue: &TaskQueue,
        store: Arc<dyn FieldVisibilityStore>,
        on_complete: F,
    ) -> usize
    where
        F: FnOnce(ProjectionReport) + Send + 'static,
    {
        let current = self.current;
        let expected = self.writes.len();
        if expected == 0 {
            on_complete(ProjectionReport::new(current, Vec::new()));
            return 0;
        }

        let batch = Arc::new(Mutex::new(PendingBatch {
            outcomes: Vec::with_capacity(expected),
            on_complete: Some(Box::new(on_complete)),
        }));

        for write in self.writes {
            let store = store.clone();
            let batch = batch.clone();
            queue.post(move || {
                let result = write.apply(store.as_ref());
                if let Err(err) = &result {
                    tracing::warn!(target: targets::VISIBILITY, field = %write.field, error = %err, "field state write failed");
                }

                let finished = {
                    let mut batch = batch.lock();
                    batch.outcomes.push(FieldWriteOutcome { write, result });
                    if batch.outcomes.len() == expected {
                        let outcomes = std::mem::take(&mut batch.outcomes);
                        batch.on_complete.take().map(|cb| (cb, outcomes))
                    } else {
                        None
                    }
                };

                if let Some((cb, outcomes)) = finished {
                    cb(ProjectionReport::new(current, outcomes));
                }
            });
        }
        expected
    }
}

struct PendingBatch {
    outcomes: Vec<FieldWriteOutcome>,
    on_complete: Option<Box<dyn FnOnce(ProjectionReport) + Send>>,
}

/// Per-field results of one projection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionReport {
    current: usize,
    outcomes: Vec<FieldWriteOutcome>,
}

impl ProjectionReport {
    fn new(current: usize, outcomes: Vec<FieldWriteOutcome>) -> Self {
        Self { current, outcomes }
    }

    /// The step index that was projected.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Every attempted write with its result.
    pub fn outcomes(&self) -> &[FieldWriteOutcome] {
        &self.outcomes
    }

    /// Number of writes attempted.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the pass attempted no writes.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// True when every write succeeded.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// The writes that failed.
    pub fn failures(&self) -> impl Iterator<Item = (&FieldWrite, &FieldStateError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.write, e)))
    }

    /// The field that was shown, if any step matched `current`.
    pub fn shown_field(&self) -> Option<&str> {
        self.outcomes
            .iter()
            .find(|o| o.write.display)
            .map(|o| o.write.field.as_str())
    }
}

/// Show step `current` and hide every other step, synchronously.
///
/// Fails before any write if a step has no name.
pub fn project_visibility(
    sequence: &StepSequence,
    current: usize,
    store: &dyn FieldVisibilityStore,
) -> Result<ProjectionReport, StepError> {
    let plan = VisibilityPlan::build(sequence, current)?;
    let _span = tracing::debug_span!(target: targets::VISIBILITY, "formstep::projection", current).entered();
    let report = plan.apply(store);
    tracing::debug!(
        target: targets::VISIBILITY,
        current,
        writes = report.len(),
        failures = report.failures().count(),
        "projected step visibility"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;

    fn sequence(names: &[&str]) -> StepSequence {
        names.iter().copied().map(Step::new).collect()
    }

    struct RejectingStore {
        inner: MemoryFieldStore,
        reject: &'static str,
    }

    impl FieldVisibilityStore for RejectingStore {
        fn set_field_state(
            &self,
            name: &str,
            mutator: &mut dyn FnMut(&mut FieldState),
        ) -> Result<(), FieldStateError> {
            if name == self.reject {
                return Err(FieldStateError::Rejected {
                    name: name.to_string(),
                    reason: "read-only".to_string(),
                });
            }
            self.inner.set_field_state(name, mutator)
        }
    }

    #[test]
    fn test_plan_shows_only_current() {
        let plan = VisibilityPlan::build(&sequence(&["a", "b", "c"]), 1).unwrap();
        let flags: Vec<bool> = plan.writes().iter().map(|w| w.display).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert_eq!(plan.current(), 1);
    }

    #[test]
    fn test_plan_past_last_step_hides_everything() {
        let plan = VisibilityPlan::build(&sequence(&["a", "b"]), 2).unwrap();
        assert!(plan.writes().iter().all(|w| !w.display));
    }

    #[test]
    fn test_project_writes_one_per_step() {
        let store = MemoryFieldStore::with_fields(["a", "b", "c"]);
        let report = project_visibility(&sequence(&["a", "b", "c"]), 2, &store).unwrap();

        assert!(report.is_success());
        assert_eq!(report.len(), 3);
        assert_eq!(report.shown_field(), Some("c"));
        assert_eq!(store.write_log().len(), 3);
        assert_eq!(store.displayed_fields(), vec!["c".to_string()]);
    }

    #[test]
    fn test_missing_name_fails_before_any_write() {
        let store = MemoryFieldStore::with_fields(["a", "c"]);
        let steps = StepSequence::new([Step::new("a"), Step::unnamed(), Step::new("c")]);

        let err = project_visibility(&steps, 0, &store).unwrap_err();
        assert!(matches!(err, StepError::MissingStepName { index: 1 }));
        assert!(err.to_string().contains("name"));
        assert!(store.write_log().is_empty());
    }

    #[test]
    fn test_failed_write_does_not_stop_others() {
        let store = RejectingStore {
            inner: MemoryFieldStore::with_fields(["a", "b", "c"]),
            reject: "b",
        };
        let report = project_visibility(&sequence(&["a", "b", "c"]), 0, &store).unwrap();

        assert!(!report.is_success());
        let failed: Vec<&str> = report.failures().map(|(w, _)| w.field.as_str()).collect();
        assert_eq!(failed, vec!["b"]);
        assert_eq!(store.inner.write_log().len(), 2);
        assert_eq!(store.inner.is_displayed("a"), Some(true));
        assert_eq!(store.inner.is_displayed("c"), Some(false));
    }

    #[test]
    fn test_unknown_field_is_reported() {
        let store = MemoryFieldStore::with_fields(["a"]);
        let report = project_visibility(&sequence(&["a", "ghost"]), 0, &store).unwrap();

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].1, &FieldStateError::UnknownField("ghost".into()));
    }

    #[test]
    fn test_scheduled_writes_wait_for_queue() {
        let store = Arc::new(MemoryFieldStore::with_fields(["a", "b"]));
        let queue = TaskQueue::new();
        let reports = Arc::new(Mutex::new(Vec::new()));

        let plan = VisibilityPlan::build(&sequence(&["a", "b"]), 1).unwrap();
        let reports_clone = reports.clone();
        let posted = plan.schedule(&queue, store.clone(), move |report| {
            reports_clone.lock().push(report);
        });

        assert_eq!(posted, 2);
        assert_eq!(queue.pending_count(), 2);
        assert!(store.write_log().is_empty());
        assert!(reports.lock().is_empty());

        assert_eq!(queue.process_all(), 2);
        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].shown_field(), Some("b"));
        assert_eq!(store.displayed_fields(), vec!["b".to_string()]);
    }

    #[test]
    fn test_scheduled_empty_plan_completes_immediately() {
        let queue = TaskQueue::new();
        let store: Arc<dyn FieldVisibilityStore> = Arc::new(MemoryFieldStore::new());
        let done = Arc::new(Mutex::new(None));

        let plan = VisibilityPlan::build(&StepSequence::default(), 0).unwrap();
        let done_clone = done.clone();
        let posted = plan.schedule(&queue, store, move |report| *done_clone.lock() = Some(report));

        assert_eq!(posted, 0);
        assert!(!queue.has_pending());
        assert!(done.lock().as_ref().is_some_and(|r| r.is_empty()));
    }
}
