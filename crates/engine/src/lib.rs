//! # Clipflow Engine
//!
//! Composes multi-step calls for a remote interpreter that executes a whole
//! sequence atomically, where later calls may read values returned by earlier
//! ones at execution time.
//!
//! ## Architecture
//!
//! - **`clipboard`**: the paste instruction codec
//! - **`step`**: built steps and prepared calls
//! - **`generator`**: the generator trait, run context, and step options
//! - **`workflow`**: build, tag, and finalize engine, including nesting
//! - **`encoder`**: outer wire shapes (`farm`, `advancedFarm`, `advancedPipe`)
//! - **`steps`**: reusable generators
//! - **`document`**: YAML/JSON plan documents
//!
//! ## Usage
//!
//! ```rust
//! use alloy_primitives::{Bytes, U256};
//! use clipflow_engine::{Farm, StepOutput, StepOptions, Workflow, generator};
//! use clipflow_types::ContractAddresses;
//!
//! # let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # runtime.block_on(async {
//! let mut workflow = Workflow::new("demo", Farm::new(&ContractAddresses::default()));
//! workflow
//!     .add_with(generator("a", |_, _| Ok(StepOutput::Payload(Bytes::from_static(b"A")))), StepOptions::tag("first"))
//!     .add(generator("b", |_, _| Ok(StepOutput::Payload(Bytes::from_static(b"B")))));
//!
//! workflow.estimate(U256::from(100)).await?;
//! assert_eq!(workflow.find_tag("first")?, 0);
//! let call = workflow.finalize()?;
//! assert_eq!(call.function, "farm");
//! # Ok::<(), clipflow_engine::WorkflowError>(())
//! # }).unwrap();
//! ```

pub mod clipboard;
pub mod document;
pub mod encoder;
mod error;
pub mod generator;
pub mod step;
pub mod steps;
pub mod workflow;

pub use clipboard::{Clipboard, ClipboardError, ClipboardKind, MAX_U80, PasteInstruction, PasteParams};
pub use document::{PlanClipboard, PlanDocument, PlanKind, PlanStep, parse_plan_file, parse_plan_str};
pub use encoder::{AdvancedFarm, AdvancedPipe, EncoderKind, Farm, NamedCall, WorkflowEncoder};
pub use error::WorkflowError;
pub use generator::{FnGenerator, GeneratorInput, RunContext, SkipRule, StepGenerator, StepOptions, generator};
pub use step::{PreparedCall, Step, StepOutput};
pub use steps::{ClipboardSource, LocalAdjustment, Quote, QuotedAmounts, QuotedCall, RawCall, TransportQuote, paste_from_tag};
pub use workflow::{StepResult, Workflow};
