//! State schema, reducers, and the immutable state snapshot nodes read.
//!
//! Every field is declared up front with a reducer. Nodes never touch the
//! state directly: they return a [`Delta`] which [`StateSchema::merge`] folds
//! into a new [`PipelineState`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use inkflow_types::{FlowError, Result};

// ---------------------------------------------------------------------------
// Reducer
// ---------------------------------------------------------------------------

/// How a delta value is combined with the current value of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    /// The new value replaces the old one. Nested objects are not merged.
    #[default]
    Overwrite,
    /// The new array is concatenated to the old one, duplicates kept.
    Append,
}

impl Reducer {
    pub fn as_str(self) -> &'static str {
        match self {
            Reducer::Overwrite => "overwrite",
            Reducer::Append => "append",
        }
    }

    fn apply(
        self,
        field: &str,
        current: &serde_json::Value,
        update: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        match self {
            Reducer::Overwrite => Ok(update.clone()),
            Reducer::Append => {
                let (Some(existing), Some(new)) = (current.as_array(), update.as_array()) else {
                    return Err(FlowError::ReducerMismatch {
                        field: field.to_string(),
                        reducer: self.as_str().to_string(),
                        message: "both the current value and the update must be arrays".into(),
                    });
                };
                let mut merged = Vec::with_capacity(existing.len() + new.len());
                merged.extend(existing.iter().cloned());
                merged.extend(new.iter().cloned());
                Ok(serde_json::Value::Array(merged))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// A read-only snapshot of every declared field.
///
/// Backed by a `BTreeMap` so iteration and serialization order is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineState {
    values: BTreeMap<String, serde_json::Value>,
}

impl PipelineState {
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.values.get(field)
    }

    /// `true` when the field holds anything other than `null`.
    pub fn is_set(&self, field: &str) -> bool {
        self.values.get(field).is_some_and(|v| !v.is_null())
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.values.get(field).and_then(|v| v.as_str())
    }

    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.values.get(field).and_then(|v| v.as_u64())
    }

    /// Elements of an array field; empty when missing or not an array.
    pub fn get_array(&self, field: &str) -> &[serde_json::Value] {
        self.values
            .get(field)
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// String elements of an array field, skipping anything else.
    pub fn get_strings(&self, field: &str) -> Vec<String> {
        self.get_array(field)
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// Deserialize a field into a typed value. `null` yields `None`.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, field: &str) -> Result<Option<T>> {
        match self.values.get(field) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Delta
// ---------------------------------------------------------------------------

/// A partial state update returned by one node invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta {
    values: BTreeMap<String, serde_json::Value>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.values.insert(field.into(), value.into());
    }

    /// Serialize `value` into the field.
    pub fn set_json<T: Serialize>(&mut self, field: impl Into<String>, value: &T) -> Result<()> {
        self.values.insert(field.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.values.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

// ---------------------------------------------------------------------------
// StateSchema
// ---------------------------------------------------------------------------

/// The fixed set of fields a graph's state may hold, each with its reducer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSchema {
    fields: BTreeMap<String, Reducer>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overwrite(self, field: impl Into<String>) -> Self {
        self.field(field, Reducer::Overwrite)
    }

    pub fn append(self, field: impl Into<String>) -> Self {
        self.field(field, Reducer::Append)
    }

    pub fn field(mut self, field: impl Into<String>, reducer: Reducer) -> Self {
        self.fields.insert(field.into(), reducer);
        self
    }

    pub fn reducer(&self, field: &str) -> Option<Reducer> {
        self.fields.get(field).copied()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build the initial state. `initial` must be an object holding a value
    /// for every declared field and nothing else.
    pub fn init(&self, initial: serde_json::Value) -> Result<PipelineState> {
        let serde_json::Value::Object(map) = initial else {
            return Err(FlowError::Other(
                "initial state must be a JSON object".into(),
            ));
        };
        let values: BTreeMap<String, serde_json::Value> = map.into_iter().collect();
        let state = PipelineState { values };
        self.check(&state)?;
        Ok(state)
    }

    /// Verify that `state` holds exactly the declared fields.
    pub fn check(&self, state: &PipelineState) -> Result<()> {
        if let Some(field) = state.values.keys().find(|k| !self.fields.contains_key(*k)) {
            return Err(FlowError::UnknownField {
                field: field.clone(),
            });
        }
        if let Some(field) = self.fields.keys().find(|k| !state.values.contains_key(*k)) {
            return Err(FlowError::MissingField {
                field: field.clone(),
            });
        }
        Ok(())
    }

    /// Fold `delta` into `state`. Fields absent from the delta are untouched.
    pub fn merge(&self, state: &PipelineState, delta: &Delta) -> Result<PipelineState> {
        let mut values = state.values.clone();
        for (field, update) in &delta.values {
            let reducer = self.reducer(field).ok_or_else(|| FlowError::UnknownField {
                field: field.clone(),
            })?;
            let current = values.get(field).unwrap_or(&serde_json::Value::Null);
            let merged = reducer.apply(field, current, update)?;
            values.insert(field.clone(), merged);
        }
        Ok(PipelineState { values })
    }
}
