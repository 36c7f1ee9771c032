//! Plan documents: workflows of raw calls written as YAML or JSON.
//!
//! ```yaml
//! workflow: claim-and-deposit
//! kind: advanced_farm
//! steps:
//!   - name: claim
//!     call_data: "0x..."
//!     tag: claim
//!   - name: deposit
//!     call_data: "0x..."
//!     clipboard: { from_tag: claim, copy_slot: 0, paste_slot: 1 }
//!   - name: pipe
//!     workflow:
//!       kind: advanced_pipe
//!       steps:
//!         - name: transfer
//!           target: "0x..."
//!           call_data: "0x..."
//! ```

use std::{fs, path::Path, sync::Arc};

use alloy_primitives::{Address, Bytes, U256};
use anyhow::{Context, Result, bail};
use clipflow_types::ContractAddresses;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::encoder::{AdvancedFarm, AdvancedPipe, EncoderKind, Farm};
use crate::generator::{SkipRule, StepOptions};
use crate::steps::{ClipboardSource, RawCall};
use crate::workflow::Workflow;
use crate::{Clipboard, PasteParams};

/// Outer wire shape of a planned workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Farm,
    #[default]
    AdvancedFarm,
    AdvancedPipe,
}

impl PlanKind {
    pub fn encoder(&self, contracts: &ContractAddresses) -> EncoderKind {
        match self {
            Self::Farm => Farm::new(contracts).into(),
            Self::AdvancedFarm => AdvancedFarm::new(contracts).into(),
            Self::AdvancedPipe => AdvancedPipe::new(contracts).into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    /// Workflow name. Nested workflows default to their step's name.
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub kind: PlanKind,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub name: String,
    #[serde(default)]
    pub call_data: Option<Bytes>,
    #[serde(default)]
    pub target: Option<Address>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub only_local: bool,
    #[serde(default)]
    pub only_execute: bool,
    /// Replaces the running amount. Passes it through when absent.
    #[serde(default)]
    pub amount_out: Option<U256>,
    #[serde(default)]
    pub value: Option<U256>,
    #[serde(default)]
    pub clipboard: Option<PlanClipboard>,
    /// A nested workflow executed as this single step.
    #[serde(default)]
    pub workflow: Option<Box<PlanDocument>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanClipboard {
    FromTag {
        from_tag: String,
        #[serde(default)]
        copy_slot: Option<u64>,
        paste_slot: u64,
    },
    Literal {
        instructions: Value,
        #[serde(default)]
        value: Option<U256>,
    },
}

impl PlanClipboard {
    fn source(&self) -> Result<ClipboardSource> {
        Ok(match self {
            Self::FromTag {
                from_tag,
                copy_slot,
                paste_slot,
            } => ClipboardSource::FromTag {
                tag: from_tag.clone(),
                copy_slot: *copy_slot,
                paste_slot: *paste_slot,
            },
            Self::Literal { instructions, value } => {
                let params = PasteParams::from_json(instructions)?;
                ClipboardSource::Literal(Clipboard::encode(params, value.unwrap_or_default())?)
            }
        })
    }
}

impl PlanStep {
    fn options(&self) -> StepOptions {
        StepOptions {
            tag: self.tag.clone(),
            skip: SkipRule::from(self.skip),
            only_local: self.only_local,
            only_execute: self.only_execute,
        }
    }

    fn raw_call(&self, call_data: &Bytes) -> Result<RawCall> {
        let mut call = RawCall::new(&self.name, call_data.clone());
        if let Some(target) = self.target {
            call = call.target(target);
        }
        if let Some(amount_out) = self.amount_out {
            call = call.amount_out(amount_out);
        }
        if let Some(value) = self.value {
            call = call.value(value);
        }
        if let Some(clipboard) = &self.clipboard {
            let source = clipboard.source().with_context(|| format!("invalid clipboard on step '{}'", self.name))?;
            call = call.clipboard(source);
        }
        Ok(call)
    }
}

impl PlanDocument {
    pub fn name(&self) -> &str {
        self.workflow.as_deref().unwrap_or("default")
    }

    /// Builds a workflow bound to `contracts`.
    pub fn to_workflow(&self, contracts: &ContractAddresses) -> Result<Workflow<EncoderKind>> {
        self.build_workflow(self.name(), contracts)
    }

    fn build_workflow(&self, name: &str, contracts: &ContractAddresses) -> Result<Workflow<EncoderKind>> {
        let mut workflow = Workflow::new(name, self.kind.encoder(contracts));
        for step in &self.steps {
            let options = step.options();
            match (&step.call_data, &step.workflow) {
                (Some(call_data), None) => {
                    workflow.add_with(step.raw_call(call_data)?, options);
                }
                (None, Some(inner)) => {
                    let inner_name = inner.workflow.as_deref().unwrap_or(&step.name);
                    let nested = inner
                        .build_workflow(inner_name, contracts)
                        .with_context(|| format!("invalid nested workflow in step '{}'", step.name))?;
                    workflow.add_with(Arc::new(nested), options);
                }
                (Some(_), Some(_)) => bail!("step '{}' sets both call_data and workflow", step.name),
                (None, None) => bail!("step '{}' needs either call_data or workflow", step.name),
            }
        }
        Ok(workflow)
    }
}

/// Parses a plan from YAML or JSON text.
pub fn parse_plan_str(content: &str) -> Result<PlanDocument> {
    serde_yaml::from_str(content).context("failed to parse plan document")
}

/// Loads a plan file. JSON is accepted since it is valid YAML.
pub fn parse_plan_file(file_path: impl AsRef<Path>) -> Result<PlanDocument> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read plan file: {}", file_path.display()))?;
    parse_plan_str(&content).with_context(|| format!("in {}", file_path.display()))
}
