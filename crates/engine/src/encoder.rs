//! Outer wire shapes a workflow can serialize into.
//!
//! Each encoder knows one entry point of the remote interpreter and how to
//! pack a list of prepared calls into its arguments.

use alloy_primitives::{Address, Bytes, FixedBytes, U256};
use alloy_sol_types::{SolCall, SolValue, sol};
use clipflow_types::ContractAddresses;

use crate::{Clipboard, PreparedCall, WorkflowError};

sol! {
    struct AdvancedFarmCall {
        bytes callData;
        bytes clipboard;
    }

    struct AdvancedPipeCall {
        address target;
        bytes callData;
        bytes clipboard;
    }

    function farm(bytes[] data) external payable returns (bytes[] results);
    function advancedFarm(AdvancedFarmCall[] data) external payable returns (bytes[] results);
    function advancedPipe(AdvancedPipeCall[] pipes, uint256 value) external payable returns (bytes[] results);
}

/// A prepared call together with the name of the step that produced it.
#[derive(Debug, Clone)]
pub struct NamedCall {
    pub step: String,
    pub call: PreparedCall,
}

/// Serializes a finalized step sequence into one outbound call.
pub trait WorkflowEncoder: Clone + Send + Sync + 'static {
    /// Entry point name, for display.
    fn function(&self) -> &'static str;

    fn selector(&self) -> FixedBytes<4>;

    /// Contract that receives the encoded sequence.
    fn target(&self) -> Address;

    /// ABI-encoded arguments, without the selector.
    fn encode_arguments(&self, calls: Vec<NamedCall>, value: U256) -> Result<Bytes, WorkflowError>;

    /// Splits the return data of the entry point into one result per call.
    fn decode_results(&self, return_data: &[u8]) -> Result<Vec<Bytes>, WorkflowError> {
        let (results,) = <(Vec<Bytes>,)>::abi_decode_params(return_data).map_err(|e| WorkflowError::Decode {
            what: "workflow results",
            message: e.to_string(),
        })?;
        Ok(results)
    }
}

/// Strips the selector from a full call encoding.
fn arguments_of<C: SolCall>(call: &C) -> Bytes {
    let encoded = call.abi_encode();
    Bytes::copy_from_slice(&encoded[4..])
}

/// `farm(bytes[])`: a flat list of payloads, executed by the protocol itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Farm {
    pub target: Address,
}

impl Farm {
    pub fn new(contracts: &ContractAddresses) -> Self {
        Self { target: contracts.beanstalk }
    }
}

impl WorkflowEncoder for Farm {
    fn function(&self) -> &'static str {
        "farm"
    }

    fn selector(&self) -> FixedBytes<4> {
        FixedBytes::from(farmCall::SELECTOR)
    }

    fn target(&self) -> Address {
        self.target
    }

    fn encode_arguments(&self, calls: Vec<NamedCall>, _value: U256) -> Result<Bytes, WorkflowError> {
        let data = calls.into_iter().map(|named| named.call.payload).collect();
        Ok(arguments_of(&farmCall { data }))
    }
}

/// `advancedFarm((bytes,bytes)[])`: payloads paired with clipboards.
///
/// Calls without a clipboard get the empty static clipboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvancedFarm {
    pub target: Address,
}

impl AdvancedFarm {
    pub fn new(contracts: &ContractAddresses) -> Self {
        Self { target: contracts.beanstalk }
    }
}

impl WorkflowEncoder for AdvancedFarm {
    fn function(&self) -> &'static str {
        "advancedFarm"
    }

    fn selector(&self) -> FixedBytes<4> {
        FixedBytes::from(advancedFarmCall::SELECTOR)
    }

    fn target(&self) -> Address {
        self.target
    }

    fn encode_arguments(&self, calls: Vec<NamedCall>, _value: U256) -> Result<Bytes, WorkflowError> {
        let data = calls
            .into_iter()
            .map(|named| AdvancedFarmCall {
                callData: named.call.payload,
                clipboard: named.call.clipboard.unwrap_or_else(Clipboard::empty),
            })
            .collect();
        Ok(arguments_of(&advancedFarmCall { data }))
    }
}

/// `advancedPipe((address,bytes,bytes)[],uint256)` on the depot.
///
/// Every call runs through the pipeline at its own target, so each prepared
/// call must name one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvancedPipe {
    pub depot: Address,
}

impl AdvancedPipe {
    pub fn new(contracts: &ContractAddresses) -> Self {
        Self { depot: contracts.depot }
    }
}

impl WorkflowEncoder for AdvancedPipe {
    fn function(&self) -> &'static str {
        "advancedPipe"
    }

    fn selector(&self) -> FixedBytes<4> {
        FixedBytes::from(advancedPipeCall::SELECTOR)
    }

    fn target(&self) -> Address {
        self.depot
    }

    fn encode_arguments(&self, calls: Vec<NamedCall>, value: U256) -> Result<Bytes, WorkflowError> {
        let pipes = calls
            .into_iter()
            .map(|named| {
                let target = named.call.target.ok_or(WorkflowError::MissingTarget { step: named.step })?;
                Ok(AdvancedPipeCall {
                    target,
                    callData: named.call.payload,
                    clipboard: named.call.clipboard.unwrap_or_else(Clipboard::empty),
                })
            })
            .collect::<Result<Vec<_>, WorkflowError>>()?;
        Ok(arguments_of(&advancedPipeCall { pipes, value }))
    }
}

/// Any of the built-in encoders, chosen at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderKind {
    Farm(Farm),
    AdvancedFarm(AdvancedFarm),
    AdvancedPipe(AdvancedPipe),
}

impl WorkflowEncoder for EncoderKind {
    fn function(&self) -> &'static str {
        match self {
            Self::Farm(encoder) => encoder.function(),
            Self::AdvancedFarm(encoder) => encoder.function(),
            Self::AdvancedPipe(encoder) => encoder.function(),
        }
    }

    fn selector(&self) -> FixedBytes<4> {
        match self {
            Self::Farm(encoder) => encoder.selector(),
            Self::AdvancedFarm(encoder) => encoder.selector(),
            Self::AdvancedPipe(encoder) => encoder.selector(),
        }
    }

    fn target(&self) -> Address {
        match self {
            Self::Farm(encoder) => encoder.target(),
            Self::AdvancedFarm(encoder) => encoder.target(),
            Self::AdvancedPipe(encoder) => encoder.target(),
        }
    }

    fn encode_arguments(&self, calls: Vec<NamedCall>, value: U256) -> Result<Bytes, WorkflowError> {
        match self {
            Self::Farm(encoder) => encoder.encode_arguments(calls, value),
            Self::AdvancedFarm(encoder) => encoder.encode_arguments(calls, value),
            Self::AdvancedPipe(encoder) => encoder.encode_arguments(calls, value),
        }
    }
}

impl From<Farm> for EncoderKind {
    fn from(encoder: Farm) -> Self {
        Self::Farm(encoder)
    }
}

impl From<AdvancedFarm> for EncoderKind {
    fn from(encoder: AdvancedFarm) -> Self {
        Self::AdvancedFarm(encoder)
    }
}

impl From<AdvancedPipe> for EncoderKind {
    fn from(encoder: AdvancedPipe) -> Self {
        Self::AdvancedPipe(encoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn named(step: &str, call: PreparedCall) -> NamedCall {
        NamedCall {
            step: step.to_string(),
            call,
        }
    }

    #[test]
    fn farm_encodes_payloads_in_order() {
        let encoder = Farm::new(&ContractAddresses::default());
        let arguments = encoder
            .encode_arguments(
                vec![named("a", PreparedCall::new(b"A".to_vec())), named("b", PreparedCall::new(b"B".to_vec()))],
                U256::ZERO,
            )
            .expect("encode");
        let decoded = farmCall::abi_decode_raw(&arguments).expect("decode");
        assert_eq!(decoded.data, vec![Bytes::from_static(b"A"), Bytes::from_static(b"B")]);
        assert_eq!(encoder.target(), ContractAddresses::default().beanstalk);
    }

    #[test]
    fn advanced_farm_fills_missing_clipboards() {
        let pasted = Clipboard::encode_slot(0, 0, 1, U256::ZERO).expect("clipboard");
        let arguments = AdvancedFarm::new(&ContractAddresses::default())
            .encode_arguments(
                vec![
                    named("first", PreparedCall::new(vec![1u8])),
                    named("second", PreparedCall::new(vec![2u8]).with_clipboard(pasted.clone())),
                ],
                U256::ZERO,
            )
            .expect("encode");
        let decoded = advancedFarmCall::abi_decode_raw(&arguments).expect("decode");
        assert_eq!(decoded.data[0].clipboard, Clipboard::empty());
        assert_eq!(decoded.data[1].clipboard, pasted);
    }

    #[test]
    fn advanced_pipe_requires_targets() {
        let encoder = AdvancedPipe::new(&ContractAddresses::default());
        let err = encoder
            .encode_arguments(vec![named("orphan", PreparedCall::new(vec![1u8]))], U256::ZERO)
            .expect_err("missing target");
        assert!(matches!(err, WorkflowError::MissingTarget { step } if step == "orphan"));

        let target = address!("00000000000000000000000000000000000000aa");
        let arguments = encoder
            .encode_arguments(vec![named("ok", PreparedCall::new(vec![1u8]).with_target(target))], U256::from(5))
            .expect("encode");
        let decoded = advancedPipeCall::abi_decode_raw(&arguments).expect("decode");
        assert_eq!(decoded.pipes[0].target, target);
        assert_eq!(decoded.value, U256::from(5));
    }

    #[test]
    fn results_split_per_call() {
        let return_data = (vec![Bytes::from_static(b"x"), Bytes::from_static(b"yz")],).abi_encode_params();
        let results = Farm::new(&ContractAddresses::default()).decode_results(&return_data).expect("decode");
        assert_eq!(results.len(), 2);
        assert_eq!(results[1], Bytes::from_static(b"yz"));
    }
}
