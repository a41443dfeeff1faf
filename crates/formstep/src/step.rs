//! Steps and the ordered step sequence.
//!
//! A [`Step`] names the field (usually a layout group) that holds the step's
//! content. Every other property (title, description, icon...) is opaque to
//! the controller and passed through untouched for the step indicator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StepError;

/// One entry of a step sequence.
///
/// The `name` is optional at construction time so that configuration can be
/// loaded as-is; a missing name is reported when visibility is projected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Name of the host field this step shows and hides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Presentational properties, passed through untouched.
    #[serde(flatten)]
    pub props: Map<String, Value>,
}

impl Step {
    /// Create a step for the named field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            props: Map::new(),
        }
    }

    /// Create a step without a field name.
    pub fn unnamed() -> Self {
        Self::default()
    }

    /// Add a presentational property using builder pattern.
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Set the title property using builder pattern.
    pub fn with_title(self, title: impl Into<String>) -> Self {
        self.with_prop("title", title.into())
    }

    /// The field name, if present and non-empty.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// The `title` property, if it is a string.
    pub fn title(&self) -> Option<&str> {
        self.props.get("title").and_then(Value::as_str)
    }

    /// Look up a presentational property.
    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }
}

/// An ordered, fixed-length list of steps.
///
/// Built once when the controller is constructed and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepSequence {
    steps: Vec<Step>,
}

impl StepSequence {
    /// Build a sequence from steps in display order.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the sequence has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The index of the last step, or `None` for an empty sequence.
    pub fn last_index(&self) -> Option<usize> {
        self.steps.len().checked_sub(1)
    }

    /// The step at `index`.
    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Iterate over the steps in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }

    /// The position of the step owning `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name() == Some(name))
    }

    /// Position of the first step without a name.
    pub fn first_unnamed(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.name().is_none())
    }

    /// All field names in order.
    ///
    /// Fails on the first step without a name.
    pub fn field_names(&self) -> Result<Vec<&str>, StepError> {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, step)| step.name().ok_or(StepError::MissingStepName { index }))
            .collect()
    }
}

impl FromIterator<Step> for StepSequence {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a StepSequence {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_builder() {
        let step = Step::new("account")
            .with_title("Account")
            .with_prop("icon", "user");

        assert_eq!(step.name(), Some("account"));
        assert_eq!(step.title(), Some("Account"));
        assert_eq!(step.prop("icon"), Some(&Value::from("user")));
    }

    #[test]
    fn test_empty_name_counts_as_missing() {
        let step = Step {
            name: Some(String::new()),
            props: Map::new(),
        };
        assert_eq!(step.name(), None);
    }

    #[test]
    fn test_sequence_lookup() {
        let sequence: StepSequence = ["a", "b", "c"].into_iter().map(Step::new).collect();

        assert_eq!(sequence.len(), 3);
        assert_eq!(sequence.last_index(), Some(2));
        assert_eq!(sequence.position("b"), Some(1));
        assert_eq!(sequence.position("z"), None);
        assert_eq!(sequence.field_names().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_field_names_reports_first_missing() {
        let sequence = StepSequence::new([
            Step::new("a"),
            Step::unnamed(),
            Step::unnamed(),
        ]);

        match sequence.field_names() {
            Err(StepError::MissingStepName { index }) => assert_eq!(index, 1),
            other => panic!("expected missing name error, got {other:?}"),
        }
        assert_eq!(sequence.first_unnamed(), Some(1));
    }

    #[test]
    fn test_empty_sequence() {
        let sequence = StepSequence::default();
        assert!(sequence.is_empty());
        assert_eq!(sequence.last_index(), None);
    }

    #[test]
    fn test_opaque_props_round_trip_through_json() {
        let json = r#"{"name":"profile","title":"Profile","description":"About you"}"#;
        let step: Step = serde_json::from_str(json).unwrap();

        assert_eq!(step.name(), Some("profile"));
        assert_eq!(step.prop("description"), Some(&Value::from("About you")));
        let back: Value = serde_json::to_value(&step).unwrap();
        assert_eq!(back["title"], "Profile");
    }
}
