use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::AggregateError;

/// Opaque policy-parameter overrides understood by the calculation engine.
///
/// The aggregator never looks inside a definition; it only composes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reform(Value);

impl Reform {
    pub fn new(definition: Value) -> Self {
        Self(definition)
    }

    pub fn definition(&self) -> &Value {
        &self.0
    }

    /// Composes `self` with a later layer. Objects merge key by key, anything else in
    /// the later layer replaces what was there, and a `null` layer changes nothing.
    pub fn stacked_with(&self, layer: &Reform) -> Reform {
        let mut composite = self.0.clone();
        merge_layer(&mut composite, &layer.0);
        Reform(composite)
    }
}

fn merge_layer(target: &mut Value, layer: &Value) {
    match (target, layer) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(key) {
                    Some(existing) => merge_layer(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, layer) => *target = layer.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReformStep {
    pub name: String,
    pub reform: Reform,
}

impl ReformStep {
    pub fn new(name: impl Into<String>, reform: Reform) -> Self {
        Self {
            name: name.into(),
            reform,
        }
    }
}

/// The fixed, ordered list of named reforms. Order is the cumulative-stacking order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReformSequence {
    steps: Vec<ReformStep>,
}

impl ReformSequence {
    pub fn new(steps: Vec<ReformStep>) -> Result<Self, AggregateError> {
        let mut seen = HashSet::with_capacity(steps.len());
        for step in &steps {
            if step.name.trim().is_empty() {
                return Err(AggregateError::InvalidSequence {
                    reason: "reform names must not be empty".to_string(),
                });
            }
            if !seen.insert(step.name.as_str()) {
                return Err(AggregateError::InvalidSequence {
                    reason: format!("duplicate reform name '{}'", step.name),
                });
            }
        }
        Ok(Self { steps })
    }

    /// Builds a sequence from a JSON object, keeping the object's key order.
    pub fn from_definitions(definitions: Map<String, Value>) -> Result<Self, AggregateError> {
        Self::new(
            definitions
                .into_iter()
                .map(|(name, definition)| ReformStep::new(name, Reform::new(definition)))
                .collect(),
        )
    }

    pub fn steps(&self) -> &[ReformStep] {
        &self.steps
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Baseline plus an ordered prefix of the sequence, already folded into one composite.
#[derive(Debug, Clone, PartialEq)]
pub struct ReformStack {
    composite: Reform,
    applied: Vec<String>,
}

impl ReformStack {
    pub fn baseline(reform: &Reform) -> Self {
        Self {
            composite: reform.clone(),
            applied: Vec::new(),
        }
    }

    pub fn push(&self, step: &ReformStep) -> Self {
        let mut applied = self.applied.clone();
        applied.push(step.name.clone());
        Self {
            composite: self.composite.stacked_with(&step.reform),
            applied,
        }
    }

    pub fn composite(&self) -> &Reform {
        &self.composite
    }

    pub fn applied(&self) -> &[String] {
        &self.applied
    }

    pub fn label(&self) -> String {
        std::iter::once("baseline")
            .chain(self.applied.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" + ")
    }
}
