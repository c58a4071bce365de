//! The payload context: the data bus steps read upstream results from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Input and output recorded for one handler of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerPayload {
    pub input: Option<Value>,
    pub output: Option<Value>,
}

/// Invoke and compensate payloads for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadEntry {
    pub invoke: HandlerPayload,
    pub compensate: HandlerPayload,
}

/// Mapping from step id to the data its handlers consumed and produced.
///
/// Only the orchestrator writes here, after an invocation returns; each
/// step's output is written once per attempt by the attempt that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadContext {
    entries: BTreeMap<String, PayloadEntry>,
}

impl PayloadContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, step_id: &str) -> Option<&PayloadEntry> {
        self.entries.get(step_id)
    }

    /// The saved invoke output of a step.
    pub fn output(&self, step_id: &str) -> Option<&Value> {
        self.entries
            .get(step_id)
            .and_then(|e| e.invoke.output.as_ref())
    }

    /// All saved invoke outputs keyed by step id.
    pub fn outputs(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .filter_map(|(id, e)| e.invoke.output.clone().map(|v| (id.clone(), v)))
            .collect()
    }

    pub fn set_invoke_input(&mut self, step_id: &str, input: Value) {
        self.entry(step_id).invoke.input = Some(input);
    }

    pub fn set_invoke_output(&mut self, step_id: &str, output: Value) {
        self.entry(step_id).invoke.output = Some(output);
    }

    pub fn set_compensate_input(&mut self, step_id: &str, input: Value) {
        self.entry(step_id).compensate.input = Some(input);
    }

    pub fn set_compensate_output(&mut self, step_id: &str, output: Value) {
        self.entry(step_id).compensate.output = Some(output);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&mut self, step_id: &str) -> &mut PayloadEntry {
        self.entries.entry(step_id.to_string()).or_default()
    }
}

/// What a step handler receives when invoked or compensated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    /// The input the workflow run was started with.
    pub workflow_input: Value,

    /// Saved outputs of the step's direct parents.
    #[serde(default)]
    pub previous: BTreeMap<String, Value>,

    /// Saved outputs of every ancestor of the step.
    #[serde(default)]
    pub dependencies: BTreeMap<String, Value>,
}

impl StepInput {
    pub fn new(workflow_input: Value) -> Self {
        Self {
            workflow_input,
            ..Default::default()
        }
    }

    /// Deserializes the workflow input.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.workflow_input.clone())
    }

    /// Deserializes the saved output of an ancestor step.
    pub fn output_of<T: DeserializeOwned>(
        &self,
        step_id: &str,
    ) -> Option<Result<T, serde_json::Error>> {
        self.dependencies
            .get(step_id)
            .map(|v| serde_json::from_value(v.clone()))
    }

    /// The output of the only direct parent, if there is exactly one.
    pub fn previous_output(&self) -> Option<&Value> {
        if self.previous.len() == 1 {
            self.previous.values().next()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outputs_only_include_saved_values() {
        let mut payload = PayloadContext::new();
        payload.set_invoke_input("a", json!({"x": 1}));
        payload.set_invoke_output("b", json!("done"));

        assert_eq!(payload.output("a"), None);
        assert_eq!(payload.output("b"), Some(&json!("done")));
        assert_eq!(payload.outputs().len(), 1);
    }

    #[test]
    fn test_compensate_payload_is_separate() {
        let mut payload = PayloadContext::new();
        payload.set_invoke_output("a", json!(1));
        payload.set_compensate_input("a", json!(1));
        payload.set_compensate_output("a", json!(null));

        let entry = payload.get("a").unwrap();
        assert_eq!(entry.invoke.output, Some(json!(1)));
        assert_eq!(entry.compensate.input, Some(json!(1)));
    }

    #[test]
    fn test_step_input_helpers() {
        #[derive(Deserialize)]
        struct Order {
            sku: String,
        }

        let mut input = StepInput::new(json!({"sku": "ABC"}));
        input.previous.insert("reserve".into(), json!({"id": 7}));
        input.dependencies.insert("reserve".into(), json!(7));

        let order: Order = input.input().unwrap();
        assert_eq!(order.sku, "ABC");
        assert_eq!(input.previous_output(), Some(&json!({"id": 7})));
        assert_eq!(input.output_of::<u32>("reserve").unwrap().unwrap(), 7);
        assert!(input.output_of::<u32>("missing").is_none());
    }

    #[test]
    fn test_previous_output_requires_single_parent() {
        let mut input = StepInput::default();
        input.previous.insert("a".into(), json!(1));
        input.previous.insert("b".into(), json!(2));
        assert!(input.previous_output().is_none());
    }
}
