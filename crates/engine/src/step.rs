//! Built steps and the calls they finalize into.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::WorkflowError;

/// One call, ready to be serialized by an outer encoder.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PreparedCall {
    /// Contract to call. Flat sequences leave this out because the outer
    /// wrapper already knows the destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Address>,
    pub payload: Bytes,
    /// Encoded clipboard, when this call reads an earlier call's return data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clipboard: Option<Bytes>,
}

impl PreparedCall {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            target: None,
            payload: payload.into(),
            clipboard: None,
        }
    }

    pub fn with_target(mut self, target: Address) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_clipboard(mut self, clipboard: Bytes) -> Self {
        self.clipboard = Some(clipboard);
        self
    }
}

pub type FinalizeFn = Arc<dyn Fn() -> Result<PreparedCall, WorkflowError> + Send + Sync>;
pub type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<Value, WorkflowError> + Send + Sync>;

/// A simulated unit of work.
///
/// Steps are produced fresh on every build and never outlive the build state
/// that holds them. `finalize` is deferred so that a step can be simulated
/// (and its output threaded to the next generator) before its call is
/// encoded.
#[derive(Clone)]
pub struct Step {
    pub name: String,
    /// Simulated output, fed to the next generator as its input.
    pub amount_out: U256,
    /// Native currency this step needs attached to the outer call.
    pub value: Option<U256>,
    finalize: FinalizeFn,
    decode: Option<DecodeFn>,
    decode_result: Option<DecodeFn>,
}

impl Step {
    pub fn new<F>(name: impl Into<String>, amount_out: U256, finalize: F) -> Self
    where
        F: Fn() -> Result<PreparedCall, WorkflowError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            amount_out,
            value: None,
            finalize: Arc::new(finalize),
            decode: None,
            decode_result: None,
        }
    }

    /// A step whose call is already known.
    pub fn prepared(name: impl Into<String>, amount_out: U256, call: PreparedCall) -> Self {
        Self::new(name, amount_out, move || Ok(call.clone()))
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    /// Attaches a decoder for this step's own call payload.
    pub fn with_decoder<F>(mut self, decode: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Value, WorkflowError> + Send + Sync + 'static,
    {
        self.decode = Some(Arc::new(decode));
        self
    }

    /// Attaches a decoder for the data this step's call returns.
    pub fn with_result_decoder<F>(mut self, decode: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Value, WorkflowError> + Send + Sync + 'static,
    {
        self.decode_result = Some(Arc::new(decode));
        self
    }

    pub fn finalize(&self) -> Result<PreparedCall, WorkflowError> {
        (self.finalize)()
    }

    /// Decodes a payload produced by this step. `None` when the step has no decoder.
    pub fn decode(&self, data: &[u8]) -> Result<Option<Value>, WorkflowError> {
        self.decode.as_ref().map(|decode| decode(data)).transpose()
    }

    pub fn decode_result(&self, data: &[u8]) -> Result<Option<Value>, WorkflowError> {
        self.decode_result.as_ref().map(|decode| decode(data)).transpose()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("amount_out", &self.amount_out)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

/// What a generator hands back to the workflow.
#[derive(Debug)]
pub enum StepOutput {
    /// A bare payload. The amount passes through unchanged.
    Payload(Bytes),
    /// A finished call. The amount passes through unchanged.
    Prepared(PreparedCall),
    Step(Step),
}

impl StepOutput {
    pub(crate) fn into_step(self, name: &str, amount_in: U256) -> Step {
        match self {
            Self::Payload(payload) => Step::prepared(name, amount_in, PreparedCall::new(payload)),
            Self::Prepared(call) => Step::prepared(name, amount_in, call),
            Self::Step(step) => step,
        }
    }
}

impl From<Bytes> for StepOutput {
    fn from(payload: Bytes) -> Self {
        Self::Payload(payload)
    }
}

impl From<PreparedCall> for StepOutput {
    fn from(call: PreparedCall) -> Self {
        Self::Prepared(call)
    }
}

impl From<Step> for StepOutput {
    fn from(step: Step) -> Self {
        Self::Step(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_output_passes_amount_through() {
        let step = StepOutput::Payload(Bytes::from_static(b"A")).into_step("raw", U256::from(42));
        assert_eq!(step.name, "raw");
        assert_eq!(step.amount_out, U256::from(42));
        let call = step.finalize().expect("finalize");
        assert_eq!(call.payload, Bytes::from_static(b"A"));
        assert!(call.target.is_none() && call.clipboard.is_none());
    }

    #[test]
    fn step_output_is_kept_verbatim() {
        let step = Step::prepared("swap", U256::from(7), PreparedCall::new(vec![1u8])).with_value(U256::from(3));
        let built = StepOutput::from(step).into_step("ignored", U256::from(100));
        assert_eq!(built.name, "swap");
        assert_eq!(built.amount_out, U256::from(7));
        assert_eq!(built.value, Some(U256::from(3)));
    }

    #[test]
    fn decoders_are_optional() {
        let plain = Step::prepared("a", U256::ZERO, PreparedCall::default());
        assert!(plain.decode_result(&[0u8; 32]).expect("decode").is_none());

        let decoded = plain.with_result_decoder(|data| Ok(json!(data.len())));
        assert_eq!(decoded.decode_result(&[0u8; 32]).expect("decode"), Some(json!(32)));
    }
}
