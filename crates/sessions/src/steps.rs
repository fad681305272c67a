//! Execute-form workflow steps.
//!
//! An execute-form workflow is a stream of [`StepYield`] values. The
//! session records each yield as a `step:yield` signal; a replay log
//! extracted from a prior recording is matched positionally for
//! deterministic re-execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use orchid_domain::Signal;

/// One yielded step of an execute-form workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepYield {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl StepYield {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            input: None,
            output: None,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Extract the step log from a recorded signal sequence.
    pub fn from_signals(signals: &[Signal]) -> Vec<StepYield> {
        signals
            .iter()
            .filter(|s| s.name == "step:yield")
            .filter_map(|s| serde_json::from_value(s.payload.clone()).ok())
            .collect()
    }
}
