//! The workflow build and finalize engine.
//!
//! A [`Workflow`] holds a durable plan (its generators and their options) and
//! at most one ephemeral build state. Every build starts from an empty
//! arena: the built steps, the emitted positions, and the tag index are all
//! allocated fresh and only stored once the whole build succeeds. A failed
//! build therefore leaves the workflow unbuilt rather than half built.
//!
//! Generators run strictly one after another. The running amount produced by
//! one generator is the input of the next, and each generator can see every
//! step built before it.

use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use clipflow_api::ReadOnlyTransport;
use clipflow_types::{OutboundCall, RunData, RunMode, StepSummary};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::encoder::{NamedCall, WorkflowEncoder};
use crate::generator::{GeneratorInput, RunContext, StepGenerator, StepOptions};
use crate::step::{PreparedCall, Step, StepOutput};
use crate::WorkflowError;

#[derive(Clone)]
struct GeneratorEntry {
    generator: Arc<dyn StepGenerator>,
    options: StepOptions,
}

#[derive(Debug, Default)]
struct BuildState {
    /// Every built step in build order, local-only steps included.
    steps: Vec<Step>,
    /// Positions in `steps` of the steps that emit a call.
    emitted: Vec<usize>,
    tags: IndexMap<String, usize>,
    value: U256,
    amount_out: U256,
}

impl BuildState {
    fn register_tag(&mut self, workflow: &str, tag: &str, index: usize) -> Result<(), WorkflowError> {
        if self.tags.contains_key(tag) {
            return Err(WorkflowError::DuplicateTag {
                workflow: workflow.to_string(),
                tag: tag.to_string(),
            });
        }
        self.tags.insert(tag.to_string(), index);
        Ok(())
    }

    /// Appends a built step in emission order. Every built step adds its
    /// value, but only steps that emit a call get an index and a tag.
    fn record(&mut self, workflow: &str, options: &StepOptions, step: Step) -> Result<(), WorkflowError> {
        self.value += step.value.unwrap_or_default();
        if !options.only_local {
            if let Some(tag) = &options.tag {
                self.register_tag(workflow, tag, self.emitted.len())?;
            }
            self.emitted.push(self.steps.len());
        }
        self.steps.push(step);
        Ok(())
    }

    fn emitted_steps(&self) -> impl Iterator<Item = &Step> {
        self.emitted.iter().map(|&position| &self.steps[position])
    }
}

/// Decoded return data of one emitted step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub name: String,
    pub raw: Bytes,
    /// `None` when the step has no result decoder.
    pub decoded: Option<Value>,
}

/// An ordered plan of step generators serialized through `E`.
pub struct Workflow<E: WorkflowEncoder> {
    name: String,
    encoder: E,
    generators: Vec<GeneratorEntry>,
    state: Mutex<Option<BuildState>>,
}

impl<E: WorkflowEncoder> Workflow<E> {
    pub fn new(name: impl Into<String>, encoder: E) -> Self {
        Self {
            name: name.into(),
            encoder,
            generators: Vec::new(),
            state: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<BuildState>> {
        self.state.lock().expect("workflow state lock poisoned")
    }

    /// Appends a generator, or every generator in a (nested) group.
    pub fn add(&mut self, input: impl Into<GeneratorInput>) -> &mut Self {
        self.add_with(input, StepOptions::default())
    }

    /// Appends with options. A group applies the same options to each of its
    /// members.
    pub fn add_with(&mut self, input: impl Into<GeneratorInput>, options: StepOptions) -> &mut Self {
        for generator in input.into().flatten() {
            debug!(workflow = %self.name, generator = generator.name(), tag = ?options.tag, "adding generator");
            self.generators.push(GeneratorEntry {
                generator,
                options: options.clone(),
            });
        }
        self
    }

    /// Names of the planned generators, in insertion order.
    pub fn generators(&self) -> Vec<&str> {
        self.generators.iter().map(|entry| entry.generator.name()).collect()
    }

    pub fn generator_count(&self) -> usize {
        self.generators.len()
    }

    /// A new workflow with the same name, encoder and plan, and no build state.
    pub fn copy(&self) -> Self {
        Self {
            name: self.name.clone(),
            encoder: self.encoder.clone(),
            generators: self.generators.clone(),
            state: Mutex::new(None),
        }
    }

    pub fn clear(&self) {
        *self.lock_state() = None;
    }

    pub fn is_built(&self) -> bool {
        self.lock_state().is_some()
    }

    /// Runs every generator and stores the resulting build state.
    ///
    /// Returns the final running amount. In [`RunMode::Reversed`] generators
    /// are invoked from last to first, so the amount flows from the desired
    /// output back to the required input. The built steps are then put back
    /// in insertion order before indices and tags are assigned, so generators
    /// in a reversed run cannot look up tags while the walk is in progress.
    pub async fn build(&self, amount_in: U256, run_mode: RunMode, data: &RunData) -> Result<U256, WorkflowError> {
        self.clear();

        let reversed = run_mode.is_reversed();
        let order: Vec<usize> = if reversed {
            (0..self.generators.len()).rev().collect()
        } else {
            (0..self.generators.len()).collect()
        };

        let mut state = BuildState::default();
        // options of each step in `state.steps`, held back until a reversed walk ends
        let mut pending: Vec<&StepOptions> = Vec::new();
        let mut amount = amount_in;

        for position in order {
            let entry = &self.generators[position];
            let name = entry.generator.name();
            let index = state.emitted.len();
            let context = RunContext {
                run_mode,
                data,
                steps: &state.steps,
                index,
                workflow: &self.name,
                tags: &state.tags,
            };

            if entry.options.only_execute && !run_mode.is_static() {
                debug!(workflow = %self.name, position, generator = name, "skipping execute-only generator");
                continue;
            }
            if entry.options.skip.applies(amount, &context) {
                debug!(workflow = %self.name, position, generator = name, "skipping generator");
                continue;
            }

            let output = entry.generator.run(amount, &context).await.map_err(|source| WorkflowError::StepFailed {
                workflow: self.name.clone(),
                step: name.to_string(),
                source: Box::new(source),
            })?;
            let step = output.into_step(name, amount);

            amount = step.amount_out;
            debug!(
                workflow = %self.name,
                position,
                generator = name,
                amount_out = %step.amount_out,
                value = %step.value.unwrap_or_default(),
                only_local = entry.options.only_local,
                "built step"
            );

            if reversed {
                state.steps.push(step);
                pending.push(&entry.options);
            } else {
                state.record(&self.name, &entry.options, step)?;
            }
        }

        if reversed {
            let built = std::mem::take(&mut state.steps);
            for (step, options) in built.into_iter().rev().zip(pending.into_iter().rev()) {
                state.record(&self.name, options, step)?;
            }
        }

        state.amount_out = amount;
        *self.lock_state() = Some(state);
        Ok(amount)
    }

    fn with_state<T>(&self, read: impl FnOnce(&BuildState) -> Result<T, WorkflowError>) -> Result<T, WorkflowError> {
        match self.lock_state().as_ref() {
            Some(state) => read(state),
            None => Err(WorkflowError::NotBuilt { workflow: self.name.clone() }),
        }
    }

    /// Emitted index of the step tagged `tag` in the current build.
    pub fn find_tag(&self, tag: &str) -> Result<usize, WorkflowError> {
        self.lock_state()
            .as_ref()
            .and_then(|state| state.tags.get(tag).copied())
            .ok_or_else(|| WorkflowError::TagNotFound { tag: tag.to_string() })
    }

    /// Snapshot of the tag index. Empty when not built.
    pub fn tags(&self) -> IndexMap<String, usize> {
        self.lock_state().as_ref().map(|state| state.tags.clone()).unwrap_or_default()
    }

    /// Total native value the emitted steps need attached.
    pub fn value(&self) -> U256 {
        self.lock_state().as_ref().map(|state| state.value).unwrap_or_default()
    }

    /// Number of calls the current build emits.
    pub fn len(&self) -> usize {
        self.lock_state().as_ref().map(|state| state.emitted.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Final running amount of the current build.
    pub fn amount_out(&self) -> Result<U256, WorkflowError> {
        self.with_state(|state| Ok(state.amount_out))
    }

    /// Name and output of every built step, local-only steps included.
    pub fn summarize_steps(&self) -> Vec<StepSummary> {
        self.lock_state()
            .as_ref()
            .map(|state| {
                state
                    .steps
                    .iter()
                    .map(|step| StepSummary {
                        name: step.name.clone(),
                        amount_out: step.amount_out,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Finalizes every emitted step into a prepared call.
    pub fn prepared_calls(&self) -> Result<Vec<NamedCall>, WorkflowError> {
        self.with_state(|state| {
            if state.emitted.is_empty() {
                return Err(WorkflowError::EmptySequence { workflow: self.name.clone() });
            }
            state
                .emitted_steps()
                .map(|step| {
                    Ok(NamedCall {
                        step: step.name.clone(),
                        call: step.finalize()?,
                    })
                })
                .collect()
        })
    }

    /// Serializes the current build into one outbound call.
    pub fn finalize(&self) -> Result<OutboundCall, WorkflowError> {
        let calls = self.prepared_calls()?;
        let value = self.value();
        let arguments = self.encoder.encode_arguments(calls, value)?;
        debug!(workflow = %self.name, function = self.encoder.function(), value = %value, "finalized workflow");
        Ok(OutboundCall {
            target: self.encoder.target(),
            function: self.encoder.function().to_string(),
            selector: self.encoder.selector(),
            arguments,
            value,
        })
    }

    /// Full calldata of the current build.
    pub fn encode(&self) -> Result<Bytes, WorkflowError> {
        Ok(self.finalize()?.calldata())
    }

    /// The current build as a single call, for use inside another workflow.
    pub fn prepare(&self) -> Result<PreparedCall, WorkflowError> {
        Ok(PreparedCall::new(self.encode()?).with_target(self.encoder.target()))
    }

    /// Decodes per-step results, one entry per emitted step.
    pub fn decode_result(&self, results: &[Bytes]) -> Result<Vec<StepResult>, WorkflowError> {
        self.with_state(|state| {
            if results.len() != state.emitted.len() {
                return Err(WorkflowError::Decode {
                    what: "workflow results",
                    message: format!("expected {} results, got {}", state.emitted.len(), results.len()),
                });
            }
            state
                .emitted_steps()
                .zip(results)
                .map(|(step, raw)| {
                    Ok(StepResult {
                        name: step.name.clone(),
                        raw: raw.clone(),
                        decoded: step.decode_result(raw)?,
                    })
                })
                .collect()
        })
    }

    /// Builds forward without run data.
    pub async fn estimate(&self, amount_in: U256) -> Result<U256, WorkflowError> {
        self.build(amount_in, RunMode::Forward, &RunData::default()).await
    }

    /// Given a desired output, returns the input required to produce it.
    pub async fn estimate_reversed(&self, desired_amount_out: U256) -> Result<U256, WorkflowError> {
        self.build(desired_amount_out, RunMode::Reversed, &RunData::default()).await
    }

    /// Builds the complete transaction and returns it for submission.
    pub async fn execute(&self, amount_in: U256, data: &RunData) -> Result<OutboundCall, WorkflowError> {
        self.build(amount_in, RunMode::Execute, data).await?;
        self.finalize()
    }

    /// Builds the complete transaction and simulates it read-only.
    pub async fn call_static(
        &self, amount_in: U256, data: &RunData, transport: &dyn ReadOnlyTransport, from: Option<Address>,
    ) -> Result<Vec<StepResult>, WorkflowError> {
        self.build(amount_in, RunMode::ReadOnlyCall, data).await?;
        let call = self.finalize()?;
        let return_data = transport.call(&call.to_request(from)).await?;
        let results = self.encoder.decode_results(&return_data)?;
        self.decode_result(&results)
    }

    /// Builds the complete transaction and asks the transport for its cost.
    pub async fn estimate_cost(
        &self, amount_in: U256, data: &RunData, transport: &dyn ReadOnlyTransport, from: Option<Address>,
    ) -> Result<U256, WorkflowError> {
        self.build(amount_in, RunMode::EstimateCost, data).await?;
        let call = self.finalize()?;
        Ok(transport.estimate_cost(&call.to_request(from)).await?)
    }
}

/// A shared workflow runs as a single step of another workflow.
///
/// The inner workflow builds itself with the parent's run mode and run data,
/// keeps its own tag index, and finalizes into one call whose payload is its
/// entire encoded sequence.
#[async_trait]
impl<E: WorkflowEncoder> StepGenerator for Arc<Workflow<E>> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, amount_in: U256, context: &RunContext<'_>) -> Result<StepOutput, WorkflowError> {
        let amount_out = self.build(amount_in, context.run_mode, context.data).await?;
        let value = self.value();

        let finalize_from = Arc::clone(self);
        let decode_from = Arc::clone(self);
        let step = Step::new(self.name.clone(), amount_out, move || finalize_from.prepare())
            .with_value(value)
            .with_result_decoder(move |data| {
                let results = decode_from.encoder.decode_results(data)?;
                let decoded = decode_from.decode_result(&results)?;
                serde_json::to_value(decoded).map_err(|e| WorkflowError::Decode {
                    what: "nested workflow results",
                    message: e.to_string(),
                })
            });
        Ok(StepOutput::Step(step))
    }
}
