//! Workflow State Snapshots
//!
//! A snapshot records the run context as it was immediately after one
//! step finished. Snapshots are written once and never modified; replay
//! reads them back to restore a run partway through.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::{OutputMap, TranscriptEntry};

/// Persisted record of run context after a step.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StateSnapshot {
    /// Step that just finished
    pub step_name: String,

    /// Position of this snapshot in execution order (0-based)
    pub order: usize,

    /// Full transcript at this point
    pub transcript: Vec<TranscriptEntry>,

    /// Full output mapping at this point
    pub output: OutputMap,

    /// Finalized-output accumulator at this point
    #[serde(deserialize_with = "single_or_vec", default)]
    pub final_output: Vec<String>,

    /// Names of the steps executed so far, in order
    #[serde(default)]
    pub execution_order: Vec<String>,
}

/// Deserializes either a single string or array of strings into Vec<String>
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}
