use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::errors::AgentError;
use crate::providers::base::{ToolCallDelta, ToolCallRequest};

/// A tool call still being assembled from stream deltas.
#[derive(Debug, Clone, Default)]
pub struct PartialToolCall {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// A fully-merged tool call whose arguments still need parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl AssembledToolCall {
    /// Parse the accumulated argument string. Empty arguments are treated
    /// as `{}`; anything unparseable is `InvalidArgs`.
    pub fn parse(&self) -> Result<ToolCallRequest, AgentError> {
        let arguments: Value = if self.arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&self.arguments).map_err(|e| {
                AgentError::InvalidArgs(format!(
                    "tool call '{}' has malformed JSON arguments: {}",
                    self.name, e
                ))
            })?
        };
        Ok(ToolCallRequest {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments,
        })
    }
}

/// Accumulates partial tool-call deltas into complete calls.
///
/// Partials are addressed by `id` when one is present and already known,
/// else by their `index` within the `tool_calls` array; argument fragments
/// append string-wise and the name locks on first sight. Arrival order
/// alone is never used to route a fragment.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    by_index: BTreeMap<u32, PartialToolCall>,
    id_to_index: HashMap<String, u32>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    pub fn apply(&mut self, delta: &ToolCallDelta) {
        let index = match (&delta.id, delta.index) {
            (Some(id), _) if self.id_to_index.contains_key(id) => self.id_to_index[id],
            (_, Some(index)) => index,
            (Some(_), None) => self.next_free_index(),
            // No routing key at all: continue the most recent call.
            (None, None) => self.by_index.keys().next_back().copied().unwrap_or(0),
        };

        let entry = self.by_index.entry(index).or_default();
        if let Some(id) = &delta.id
            && entry.id.is_none()
        {
            entry.id = Some(id.clone());
            self.id_to_index.insert(id.clone(), index);
        }
        if let Some(name) = &delta.function.name
            && entry.name.is_none()
        {
            entry.name = Some(name.clone());
        }
        if let Some(arguments) = &delta.function.arguments {
            entry.arguments.push_str(arguments);
        }
    }

    fn next_free_index(&self) -> u32 {
        self.by_index
            .keys()
            .next_back()
            .map_or(0, |last| last + 1)
    }

    /// Lock in the accumulated calls, in index order. Calls the model never
    /// named are dropped; calls without an id get a positional one.
    pub fn finish(self) -> Vec<AssembledToolCall> {
        self.by_index
            .into_iter()
            .filter_map(|(index, partial)| {
                let name = partial.name?;
                Some(AssembledToolCall {
                    id: partial.id.unwrap_or_else(|| format!("call-{}", index)),
                    name,
                    arguments: partial.arguments,
                })
            })
            .collect()
    }
}
