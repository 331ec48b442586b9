// src/steps/info.rs

use std::collections::HashMap;

use serde::Serialize;

use crate::dag::Graph;
use crate::errors::Result;
use crate::hash::short_hash;

/// Static description of one pipeline stage. Immutable once the step graph
/// is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInfo {
    /// Logical name; the same name may appear more than once in a flow.
    pub step_name: String,
    /// Unique within the flow and stable across flows for an unchanged
    /// definition. Used in cache keys.
    pub step_id: String,
    pub step_group: String,
    pub display_name: String,
}

/// Input to [`build_steps_graph`].
#[derive(Debug, Clone, Default)]
pub struct StepDefinition {
    pub step_name: String,
    /// Defaults to the step name when empty.
    pub step_group: String,
    /// Defaults to the step name when empty.
    pub display_name: String,
    /// Indexes of the steps this one waits for.
    pub parents: Vec<usize>,
    /// Anything that should invalidate cached results when it changes
    /// (e.g. the command a step runs).
    pub fingerprint: String,
}

impl StepDefinition {
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            ..Default::default()
        }
    }

    pub fn after(mut self, parent: usize) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }
}

/// Build the step graph, deriving a step id for every definition.
///
/// The id covers the step name, how many earlier definitions share that
/// name, and the fingerprint, so repeated occurrences of one step name get
/// distinct ids.
pub fn build_steps_graph(definitions: Vec<StepDefinition>) -> Result<Graph<StepInfo>> {
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    let mut infos = Vec::with_capacity(definitions.len());
    let mut parents = Vec::with_capacity(definitions.len());

    for def in definitions {
        let occurrence = occurrences.entry(def.step_name.clone()).or_insert(0);
        let occurrence_str = occurrence.to_string();
        let step_id = short_hash([
            def.step_name.as_str(),
            occurrence_str.as_str(),
            def.fingerprint.as_str(),
        ]);
        *occurrence += 1;

        let step_group = if def.step_group.is_empty() {
            def.step_name.clone()
        } else {
            def.step_group
        };
        let display_name = if def.display_name.is_empty() {
            def.step_name.clone()
        } else {
            def.display_name
        };

        infos.push(StepInfo {
            step_name: def.step_name,
            step_id,
            step_group,
            display_name,
        });
        parents.push(def.parents);
    }

    Graph::from_parents(infos, parents)
}
