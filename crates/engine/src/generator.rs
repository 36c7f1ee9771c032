//! Step generators and the context they run in.
//!
//! A workflow is a list of generators. Each one is invoked once per build
//! with the running amount and a [`RunContext`], and answers with a
//! [`StepOutput`]. Plain closures, configured objects, and whole nested
//! workflows all sit behind the same [`StepGenerator`] trait; groups of
//! generators are flattened when they are added.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use clipflow_types::{RunData, RunMode};
use indexmap::IndexMap;

use crate::{Step, StepOutput, WorkflowError};

/// Produces one step of a workflow.
#[async_trait]
pub trait StepGenerator: Send + Sync {
    /// Name used in logs, errors, and step summaries.
    fn name(&self) -> &str;

    /// Simulates this step given the running amount.
    ///
    /// Implementations may issue read-only remote calls but must not assume
    /// anything runs concurrently with them within the same build.
    async fn run(&self, amount_in: U256, context: &RunContext<'_>) -> Result<StepOutput, WorkflowError>;
}

/// Read-only view of the build in progress, handed to every generator.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub run_mode: RunMode,
    pub data: &'a RunData,
    /// Steps built so far in this build, including local-only ones.
    pub steps: &'a [Step],
    /// Position the current step will take in the emitted sequence. Always
    /// zero during a reversed walk, where indices are assigned afterwards.
    pub index: usize,
    pub workflow: &'a str,
    pub(crate) tags: &'a IndexMap<String, usize>,
}

impl<'a> RunContext<'a> {
    pub fn new(run_mode: RunMode, data: &'a RunData, steps: &'a [Step], tags: &'a IndexMap<String, usize>, workflow: &'a str) -> Self {
        Self {
            run_mode,
            data,
            steps,
            index: 0,
            workflow,
            tags,
        }
    }

    /// Emitted index of the step registered under `tag` in this build.
    pub fn find_tag(&self, tag: &str) -> Result<usize, WorkflowError> {
        self.tags
            .get(tag)
            .copied()
            .ok_or_else(|| WorkflowError::TagNotFound { tag: tag.to_string() })
    }

    pub fn tags(&self) -> &IndexMap<String, usize> {
        self.tags
    }

    /// The most recently built step, if any.
    pub fn previous(&self) -> Option<&'a Step> {
        self.steps.last()
    }

    /// Slippage tolerance from the run data, or an error naming `step`.
    pub fn require_slippage(&self, step: &str) -> Result<f64, WorkflowError> {
        self.data.slippage.ok_or_else(|| WorkflowError::MissingRunData {
            step: step.to_string(),
            key: "slippage".to_string(),
        })
    }
}

type SyncGeneratorFn = dyn Fn(U256, &RunContext<'_>) -> Result<StepOutput, WorkflowError> + Send + Sync;

/// A generator backed by a plain function.
pub struct FnGenerator {
    name: String,
    run: Box<SyncGeneratorFn>,
}

impl FnGenerator {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(U256, &RunContext<'_>) -> Result<StepOutput, WorkflowError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }
}

#[async_trait]
impl StepGenerator for FnGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, amount_in: U256, context: &RunContext<'_>) -> Result<StepOutput, WorkflowError> {
        (self.run)(amount_in, context)
    }
}

/// Shorthand for [`FnGenerator::new`].
pub fn generator<F>(name: impl Into<String>, run: F) -> FnGenerator
where
    F: Fn(U256, &RunContext<'_>) -> Result<StepOutput, WorkflowError> + Send + Sync + 'static,
{
    FnGenerator::new(name, run)
}

pub type SkipPredicate = Arc<dyn Fn(U256, &RunContext<'_>) -> bool + Send + Sync>;

/// Whether a generator is left out of a build.
#[derive(Clone, Default)]
pub enum SkipRule {
    #[default]
    Never,
    Always,
    /// Decided at build time from the running amount and the context.
    When(SkipPredicate),
}

impl SkipRule {
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(U256, &RunContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self::When(Arc::new(predicate))
    }

    pub fn applies(&self, amount_in: U256, context: &RunContext<'_>) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::When(predicate) => predicate(amount_in, context),
        }
    }
}

impl From<bool> for SkipRule {
    fn from(skip: bool) -> Self {
        if skip { Self::Always } else { Self::Never }
    }
}

impl fmt::Debug for SkipRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Always => f.write_str("Always"),
            Self::When(_) => f.write_str("When(..)"),
        }
    }
}

/// Per-generator options supplied when it is added to a workflow.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    /// Name under which the emitted step can be found with `find_tag`.
    pub tag: Option<String>,
    pub skip: SkipRule,
    /// Simulate the step but emit no call for it.
    pub only_local: bool,
    /// Only build the step in run modes that need the full transaction.
    pub only_execute: bool,
}

impl StepOptions {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    pub fn skip() -> Self {
        Self {
            skip: SkipRule::Always,
            ..Self::default()
        }
    }

    pub fn local() -> Self {
        Self {
            only_local: true,
            ..Self::default()
        }
    }

    pub fn execute_only() -> Self {
        Self {
            only_execute: true,
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_skip(mut self, skip: impl Into<SkipRule>) -> Self {
        self.skip = skip.into();
        self
    }
}

/// A single generator or an arbitrarily nested group of them.
pub enum GeneratorInput {
    One(Arc<dyn StepGenerator>),
    Group(Vec<GeneratorInput>),
}

impl GeneratorInput {
    pub fn shared(generator: Arc<dyn StepGenerator>) -> Self {
        Self::One(generator)
    }

    /// Depth-first list of every generator in the input.
    pub fn flatten(self) -> Vec<Arc<dyn StepGenerator>> {
        let mut flat = Vec::new();
        self.flatten_into(&mut flat);
        flat
    }

    fn flatten_into(self, flat: &mut Vec<Arc<dyn StepGenerator>>) {
        match self {
            Self::One(generator) => flat.push(generator),
            Self::Group(group) => {
                for input in group {
                    input.flatten_into(flat);
                }
            }
        }
    }
}

impl<G: StepGenerator + 'static> From<G> for GeneratorInput {
    fn from(generator: G) -> Self {
        Self::One(Arc::new(generator))
    }
}

impl From<Vec<GeneratorInput>> for GeneratorInput {
    fn from(group: Vec<GeneratorInput>) -> Self {
        Self::Group(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;

    fn payload(name: &'static str) -> GeneratorInput {
        generator(name, move |_, _| Ok(StepOutput::Payload(Bytes::from_static(name.as_bytes())))).into()
    }

    #[test]
    fn groups_flatten_depth_first() {
        let input: GeneratorInput = vec![
            payload("a"),
            vec![payload("b"), vec![payload("c"), payload("d")].into()].into(),
            payload("e"),
        ]
        .into();
        let names: Vec<String> = input.flatten().iter().map(|g| g.name().to_string()).collect();
        assert_eq!(names, ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn skip_rule_predicate_sees_amount() {
        let data = RunData::default();
        let tags = IndexMap::new();
        let context = RunContext::new(RunMode::Forward, &data, &[], &tags, "test");
        let rule = SkipRule::when(|amount, _| amount.is_zero());
        assert!(rule.applies(U256::ZERO, &context));
        assert!(!rule.applies(U256::from(1), &context));
        assert!(SkipRule::from(true).applies(U256::from(1), &context));
    }

    #[test]
    fn context_reports_missing_tags_and_slippage() {
        let data = RunData::default();
        let mut tags = IndexMap::new();
        tags.insert("first".to_string(), 0);
        let context = RunContext::new(RunMode::Forward, &data, &[], &tags, "test");
        assert_eq!(context.find_tag("first").expect("tag"), 0);
        assert_eq!(context.find_tag("second").expect_err("missing").to_string(), "Tag does not exist: second");
        assert!(matches!(context.require_slippage("swap"), Err(WorkflowError::MissingRunData { .. })));
    }
}
