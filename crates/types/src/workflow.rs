//! Data exchanged between the workflow engine, the transport, and callers.
//!
//! `RunData` carries caller-supplied auxiliary configuration into every step
//! generator. `OutboundCall` is what a finalized workflow produces: one entry
//! point, its encoded arguments, and the native value to attach.

use alloy_primitives::{Address, Bytes, FixedBytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Auxiliary data injected by the caller into each generator invocation.
///
/// Generators read what they need (slippage, signed permits, recipients) and
/// fail the build when a required entry is absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunData {
    /// Slippage tolerance in percent (`0.1` means 0.1%).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slippage: Option<f64>,
    /// Any other caller-defined entries, keyed by name.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl RunData {
    pub fn with_slippage(slippage: f64) -> Self {
        Self {
            slippage: Some(slippage),
            extra: Map::new(),
        }
    }

    /// Adds a named entry, replacing any previous value under the same key.
    pub fn insert(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// A single outbound call descriptor, ready to hand to a submission component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundCall {
    /// Contract receiving the call.
    pub target: Address,
    /// Human-readable entry point name (for example `advancedFarm`).
    pub function: String,
    /// Four-byte entry point selector.
    pub selector: FixedBytes<4>,
    /// ABI-encoded arguments following the selector.
    pub arguments: Bytes,
    /// Native currency attached to the call.
    pub value: U256,
}

impl OutboundCall {
    /// Full calldata: selector followed by the encoded arguments.
    pub fn calldata(&self) -> Bytes {
        let mut data = Vec::with_capacity(4 + self.arguments.len());
        data.extend_from_slice(self.selector.as_slice());
        data.extend_from_slice(&self.arguments);
        Bytes::from(data)
    }

    /// Converts the call into a read-only request, optionally from a specific sender.
    pub fn to_request(&self, from: Option<Address>) -> CallRequest {
        CallRequest {
            from,
            to: self.target,
            data: self.calldata(),
            value: (!self.value.is_zero()).then_some(self.value),
        }
    }
}

/// Read-only call request submitted to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    #[serde(rename = "input")]
    pub data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

impl CallRequest {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from: None,
            to,
            data: data.into(),
            value: None,
        }
    }
}

/// Name and simulated output of a built step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub name: String,
    pub amount_out: U256,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_data_keeps_unknown_entries() {
        let data: RunData = serde_json::from_value(json!({ "slippage": 0.5, "permit": "0xabc" })).expect("deserialize run data");
        assert_eq!(data.slippage, Some(0.5));
        assert_eq!(data.get("permit"), Some(&json!("0xabc")));
    }

    #[test]
    fn outbound_call_prefixes_selector() {
        let call = OutboundCall {
            target: Address::ZERO,
            function: "farm".into(),
            selector: FixedBytes::from([0xaa, 0xbb, 0xcc, 0xdd]),
            arguments: Bytes::from(vec![0x01, 0x02]),
            value: U256::ZERO,
        };
        assert_eq!(call.calldata().as_ref(), &[0xaa, 0xbb, 0xcc, 0xdd, 0x01, 0x02]);
        assert_eq!(call.to_request(None).value, None);
    }
}
