//! Shared type definitions for the clipflow workspace.
//!
//! These types cross crate boundaries: the engine builds them, the transport
//! submits them, and the CLI prints them. Everything here is plain data with
//! serde support so plans and configuration can be stored as JSON or YAML.

use std::{error::Error, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub mod config;
pub mod workflow;

pub use config::{ClientConfig, ContractAddresses, NetworkConfig, RetryPolicy};
pub use workflow::{CallRequest, OutboundCall, RunData, StepSummary};

/// Identifies the different ways a workflow can be built.
///
/// The engine passes the mode through to every generator unchanged and
/// individual generators decide what it means for them, for example swapping
/// which side of a pair is the input. The only engine-level difference is that
/// `Reversed` walks generators from last to first; the emitted sequence keeps
/// insertion order in every mode.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// The input amount is known; compute the output.
    #[default]
    Forward,
    /// The desired output is known; compute the required input.
    Reversed,
    /// Build the full transaction for submission.
    Execute,
    /// Simulate the full sequence against current state without committing.
    ReadOnlyCall,
    /// Build the full transaction to estimate its execution cost.
    EstimateCost,
}

impl RunMode {
    /// Static modes need the complete transaction, so no step may be left out
    /// for convenience (permits, approvals and similar `only_execute` steps).
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Execute | Self::ReadOnlyCall | Self::EstimateCost)
    }

    pub fn is_reversed(&self) -> bool {
        matches!(self, Self::Reversed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Reversed => "reversed",
            Self::Execute => "execute",
            Self::ReadOnlyCall => "read_only_call",
            Self::EstimateCost => "estimate_cost",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = ParseRunModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Self::Forward),
            "reversed" => Ok(Self::Reversed),
            "execute" => Ok(Self::Execute),
            "read_only_call" | "call-static" => Ok(Self::ReadOnlyCall),
            "estimate_cost" | "estimate-gas" => Ok(Self::EstimateCost),
            _ => Err(ParseRunModeError),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseRunModeError;

impl fmt::Display for ParseRunModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid run mode; expected one of 'forward', 'reversed', 'execute', 'read_only_call', 'estimate_cost'")
    }
}

impl Error for ParseRunModeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_modes_require_full_transaction() {
        assert!(!RunMode::Forward.is_static());
        assert!(!RunMode::Reversed.is_static());
        assert!(RunMode::Execute.is_static());
        assert!(RunMode::ReadOnlyCall.is_static());
        assert!(RunMode::EstimateCost.is_static());
    }

    #[test]
    fn run_mode_parses_and_serializes_snake_case() {
        assert_eq!("reversed".parse::<RunMode>(), Ok(RunMode::Reversed));
        assert_eq!("estimate-gas".parse::<RunMode>(), Ok(RunMode::EstimateCost));
        assert!("sideways".parse::<RunMode>().is_err());

        let json = serde_json::to_string(&RunMode::ReadOnlyCall).expect("serialize run mode");
        assert_eq!(json, "\"read_only_call\"");
    }
}
