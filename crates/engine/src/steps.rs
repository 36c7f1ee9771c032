//! Reusable generators.
//!
//! These cover the shapes most plans are made of: fixed calls, calls whose
//! limits come from a quote, and local corrections to the running amount.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use clipflow_api::{ReadOnlyTransport, TransportError};
use clipflow_types::{CallRequest, RetryPolicy, RunMode};
use clipflow_util::{Exhausted, pad, retry_with_policy, slip};
use tracing::debug;

use crate::generator::{RunContext, StepGenerator};
use crate::step::{PreparedCall, Step, StepOutput};
use crate::{Clipboard, ClipboardError, WorkflowError};

/// Encodes a clipboard that pastes word `copy_slot` of the tagged step's
/// return data into word `paste_slot` of the current call.
///
/// Falls back to the empty static clipboard when the tag is not part of the
/// current build or no copy slot is given, so the call runs with the literal
/// arguments it was encoded with.
pub fn paste_from_tag(context: &RunContext<'_>, tag: &str, copy_slot: Option<u64>, paste_slot: u64) -> Result<Bytes, ClipboardError> {
    match (context.find_tag(tag), copy_slot) {
        (Ok(index), Some(copy_slot)) => Clipboard::encode_slot(index as u128, copy_slot.into(), paste_slot.into(), U256::ZERO),
        (lookup, copy_slot) => {
            debug!(
                workflow = context.workflow,
                tag,
                tag_found = lookup.is_ok(),
                has_copy_slot = copy_slot.is_some(),
                "using static clipboard"
            );
            Ok(Clipboard::empty())
        }
    }
}

/// Where a call's clipboard comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClipboardSource {
    #[default]
    None,
    /// An already encoded clipboard.
    Literal(Bytes),
    /// Resolved against the tag index when the step is built.
    FromTag { tag: String, copy_slot: Option<u64>, paste_slot: u64 },
}

impl ClipboardSource {
    pub fn resolve(&self, context: &RunContext<'_>) -> Result<Option<Bytes>, ClipboardError> {
        match self {
            Self::None => Ok(None),
            Self::Literal(bytes) => Ok(Some(bytes.clone())),
            Self::FromTag { tag, copy_slot, paste_slot } => paste_from_tag(context, tag, *copy_slot, *paste_slot).map(Some),
        }
    }
}

/// A call whose payload is fixed when the plan is written.
#[derive(Debug, Clone)]
pub struct RawCall {
    name: String,
    target: Option<Address>,
    payload: Bytes,
    clipboard: ClipboardSource,
    amount_out: Option<U256>,
    value: Option<U256>,
}

impl RawCall {
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            target: None,
            payload: payload.into(),
            clipboard: ClipboardSource::None,
            amount_out: None,
            value: None,
        }
    }

    pub fn target(mut self, target: Address) -> Self {
        self.target = Some(target);
        self
    }

    pub fn clipboard(mut self, clipboard: ClipboardSource) -> Self {
        self.clipboard = clipboard;
        self
    }

    /// Replaces the running amount instead of passing it through.
    pub fn amount_out(mut self, amount_out: U256) -> Self {
        self.amount_out = Some(amount_out);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }
}

#[async_trait]
impl StepGenerator for RawCall {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, amount_in: U256, context: &RunContext<'_>) -> Result<StepOutput, WorkflowError> {
        let call = PreparedCall {
            target: self.target,
            payload: self.payload.clone(),
            clipboard: self.clipboard.resolve(context)?,
        };
        let mut step = Step::prepared(self.name.clone(), self.amount_out.unwrap_or(amount_in), call);
        if let Some(value) = self.value {
            step = step.with_value(value);
        }
        Ok(StepOutput::Step(step))
    }
}

/// Source of the expected output (or, reversed, the required input) of a call.
#[async_trait]
pub trait Quote: Send + Sync {
    async fn quote(&self, amount: U256, run_mode: RunMode) -> Result<U256, WorkflowError>;
}

/// Amounts handed to a [`QuotedCall`] encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotedAmounts {
    /// Running amount the step received.
    pub amount_in: U256,
    pub quoted: U256,
    /// Slippage-adjusted limit: a minimum output going forward, a maximum
    /// input when reversed.
    pub limit: U256,
}

type CallEncoder = dyn Fn(QuotedAmounts) -> Bytes + Send + Sync;

/// A call whose limit is derived from a quote and the run's slippage.
///
/// Requires `slippage` in the run data. The quoted amount becomes the
/// running amount for the next step.
pub struct QuotedCall {
    name: String,
    target: Option<Address>,
    quote: Arc<dyn Quote>,
    encode: Arc<CallEncoder>,
    clipboard: ClipboardSource,
}

impl QuotedCall {
    pub fn new<F>(name: impl Into<String>, quote: Arc<dyn Quote>, encode: F) -> Self
    where
        F: Fn(QuotedAmounts) -> Bytes + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            target: None,
            quote,
            encode: Arc::new(encode),
            clipboard: ClipboardSource::None,
        }
    }

    pub fn target(mut self, target: Address) -> Self {
        self.target = Some(target);
        self
    }

    /// Reads the input amount from a tagged step at execution time instead of
    /// trusting the simulated one.
    pub fn paste_input_from(mut self, tag: impl Into<String>, copy_slot: u64, paste_slot: u64) -> Self {
        self.clipboard = ClipboardSource::FromTag {
            tag: tag.into(),
            copy_slot: Some(copy_slot),
            paste_slot,
        };
        self
    }
}

impl fmt::Debug for QuotedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotedCall")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("clipboard", &self.clipboard)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StepGenerator for QuotedCall {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, amount_in: U256, context: &RunContext<'_>) -> Result<StepOutput, WorkflowError> {
        let slippage = context.require_slippage(&self.name)?;
        let quoted = self.quote.quote(amount_in, context.run_mode).await?;
        let limit = if context.run_mode.is_reversed() {
            pad(quoted, slippage)?
        } else {
            slip(quoted, slippage)?
        };
        debug!(step = %self.name, amount_in = %amount_in, quoted = %quoted, limit = %limit, slippage, "quoted call");

        let payload = (self.encode)(QuotedAmounts { amount_in, quoted, limit });
        let call = PreparedCall {
            target: self.target,
            payload,
            clipboard: self.clipboard.resolve(context)?,
        };
        Ok(StepOutput::Step(Step::prepared(self.name.clone(), quoted, call)))
    }
}

type RequestEncoder = dyn Fn(U256, RunMode) -> Bytes + Send + Sync;

/// Quotes by simulating a view call through a [`ReadOnlyTransport`].
///
/// The first 32 bytes of the return data (or the word at `result_word`) are
/// read as the quote. Transient transport failures are retried per the
/// configured policy. Reverts and exhausted retries surface as
/// [`WorkflowError::Simulation`] carrying the transport error.
pub struct TransportQuote {
    transport: Arc<dyn ReadOnlyTransport>,
    target: Address,
    request: Arc<RequestEncoder>,
    retry: RetryPolicy,
    result_word: usize,
}

impl TransportQuote {
    pub fn new<F>(transport: Arc<dyn ReadOnlyTransport>, target: Address, request: F) -> Self
    where
        F: Fn(U256, RunMode) -> Bytes + Send + Sync + 'static,
    {
        Self {
            transport,
            target,
            request: Arc::new(request),
            retry: RetryPolicy::default(),
            result_word: 0,
        }
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn result_word(mut self, result_word: usize) -> Self {
        self.result_word = result_word;
        self
    }
}

#[async_trait]
impl Quote for TransportQuote {
    async fn quote(&self, amount: U256, run_mode: RunMode) -> Result<U256, WorkflowError> {
        let request = CallRequest::new(self.target, (self.request)(amount, run_mode));
        let transport = &self.transport;
        let request = &request;

        let return_data = retry_with_policy("quote", &self.retry, TransportError::is_transient, move |_| transport.call(request))
            .await
            .map_err(|Exhausted { attempts, last_error }| {
                let source = if last_error.is_transient() {
                    TransportError::RetriesExhausted {
                        attempts,
                        last: Box::new(last_error),
                    }
                } else {
                    last_error
                };
                WorkflowError::Simulation {
                    message: format!("quote from {} failed: {source}", self.target),
                    source: Some(source),
                }
            })?;

        let start = self.result_word * 32;
        let word = return_data.get(start..start + 32).ok_or_else(|| WorkflowError::Decode {
            what: "quote",
            message: format!("return data has {} bytes, need word {}", return_data.len(), self.result_word),
        })?;
        Ok(U256::from_be_slice(word))
    }
}

type AdjustFn = dyn Fn(U256, &RunContext<'_>) -> Result<U256, WorkflowError> + Send + Sync;

/// Corrects the running amount without emitting a call.
///
/// Meant to be added with `StepOptions::local()`, for amounts that arrive out
/// of band (claimable balances and the like).
pub struct LocalAdjustment {
    name: String,
    adjust: Box<AdjustFn>,
}

impl LocalAdjustment {
    pub fn new<F>(name: impl Into<String>, adjust: F) -> Self
    where
        F: Fn(U256, &RunContext<'_>) -> Result<U256, WorkflowError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            adjust: Box::new(adjust),
        }
    }

    /// Adds a fixed amount to the running total.
    pub fn add(name: impl Into<String>, extra: U256) -> Self {
        Self::new(name, move |amount, _| Ok(amount.saturating_add(extra)))
    }
}

#[async_trait]
impl StepGenerator for LocalAdjustment {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, amount_in: U256, context: &RunContext<'_>) -> Result<StepOutput, WorkflowError> {
        let amount_out = (self.adjust)(amount_in, context)?;
        Ok(StepOutput::Step(Step::prepared(self.name.clone(), amount_out, PreparedCall::default())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClipboardKind, PasteInstruction};
    use clipflow_types::RunData;
    use indexmap::IndexMap;
    use std::sync::Mutex;

    struct FixedQuote(U256);

    #[async_trait]
    impl Quote for FixedQuote {
        async fn quote(&self, _amount: U256, _run_mode: RunMode) -> Result<U256, WorkflowError> {
            Ok(self.0)
        }
    }

    /// Replays scripted responses, one per call.
    struct ScriptedTransport {
        responses: Mutex<Vec<Result<Bytes, TransportError>>>,
    }

    impl ScriptedTransport {
        fn new(mut responses: Vec<Result<Bytes, TransportError>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }

        fn remaining(&self) -> usize {
            self.responses.lock().expect("responses lock poisoned").len()
        }
    }

    #[async_trait]
    impl ReadOnlyTransport for ScriptedTransport {
        async fn call(&self, _request: &CallRequest) -> Result<Bytes, TransportError> {
            self.responses
                .lock()
                .expect("responses lock poisoned")
                .pop()
                .unwrap_or_else(|| Err(TransportError::Http("script exhausted".into())))
        }

        async fn estimate_cost(&self, _request: &CallRequest) -> Result<U256, TransportError> {
            Ok(U256::from(21_000))
        }
    }

    fn word(value: u64) -> Bytes {
        Bytes::from(U256::from(value).to_be_bytes::<32>().to_vec())
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy { attempts: 3, delay_ms: 0 }
    }

    #[test]
    fn paste_from_tag_resolves_index() {
        let data = RunData::default();
        let mut tags = IndexMap::new();
        tags.insert("swap".to_string(), 3);
        let context = RunContext::new(RunMode::Execute, &data, &[], &tags, "test");

        let pasted = paste_from_tag(&context, "swap", Some(0), 1).expect("clipboard");
        let decoded = Clipboard::decode(&pasted).expect("decode");
        assert_eq!(decoded.kind(), ClipboardKind::Single);
        assert_eq!(decoded.instructions(), &[PasteInstruction::new(3, 32, 68)]);
    }

    #[test]
    fn paste_from_tag_falls_back_to_static() {
        let data = RunData::default();
        let tags = IndexMap::new();
        let context = RunContext::new(RunMode::Execute, &data, &[], &tags, "test");
        assert_eq!(paste_from_tag(&context, "missing", Some(0), 1).expect("clipboard"), Clipboard::empty());

        let mut tags = IndexMap::new();
        tags.insert("swap".to_string(), 0);
        let context = RunContext::new(RunMode::Execute, &data, &[], &tags, "test");
        assert_eq!(paste_from_tag(&context, "swap", None, 1).expect("clipboard"), Clipboard::empty());
    }

    #[tokio::test]
    async fn quoted_call_applies_slippage() {
        let call = QuotedCall::new("swap", Arc::new(FixedQuote(U256::from(1_000_000))), |amounts| {
            Bytes::from(amounts.limit.to_be_bytes::<32>().to_vec())
        });
        let data = RunData::with_slippage(0.1);
        let tags = IndexMap::new();

        let context = RunContext::new(RunMode::Forward, &data, &[], &tags, "test");
        let step = call.run(U256::from(5), &context).await.expect("run").into_step("swap", U256::from(5));
        assert_eq!(step.amount_out, U256::from(1_000_000));
        let payload = step.finalize().expect("finalize").payload;
        assert_eq!(U256::from_be_slice(&payload), U256::from(999_000));

        let context = RunContext::new(RunMode::Reversed, &data, &[], &tags, "test");
        let step = call.run(U256::from(5), &context).await.expect("run").into_step("swap", U256::from(5));
        let payload = step.finalize().expect("finalize").payload;
        assert_eq!(U256::from_be_slice(&payload), U256::from(1_001_000));
    }

    #[tokio::test]
    async fn quoted_call_requires_slippage() {
        let call = QuotedCall::new("swap", Arc::new(FixedQuote(U256::from(1))), |_| Bytes::new());
        let data = RunData::default();
        let tags = IndexMap::new();
        let context = RunContext::new(RunMode::Forward, &data, &[], &tags, "test");
        let err = call.run(U256::from(1), &context).await.expect_err("missing slippage");
        assert!(matches!(err, WorkflowError::MissingRunData { key, .. } if key == "slippage"));
    }

    #[tokio::test]
    async fn transport_quote_retries_transient_failures() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Http("connection reset".into())),
            Err(TransportError::Status(503)),
            Ok(word(42)),
        ]));
        let quote = TransportQuote::new(transport.clone(), Address::ZERO, |_, _| Bytes::new()).retry(quick_retry());
        assert_eq!(quote.quote(U256::from(1), RunMode::Forward).await.expect("quote"), U256::from(42));
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn transport_quote_gives_up_after_policy() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Http("timeout".into())),
            Err(TransportError::Http("timeout".into())),
            Err(TransportError::Http("timeout".into())),
            Ok(word(1)),
        ]));
        let quote = TransportQuote::new(transport.clone(), Address::ZERO, |_, _| Bytes::new()).retry(quick_retry());
        let err = quote.quote(U256::from(1), RunMode::Forward).await.expect_err("exhausted");
        assert!(matches!(
            err,
            WorkflowError::Simulation {
                source: Some(TransportError::RetriesExhausted { attempts: 3, .. }),
                ..
            }
        ));
        assert_eq!(transport.remaining(), 1);
    }

    #[tokio::test]
    async fn transport_quote_does_not_retry_reverts() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Rpc {
                code: 3,
                message: "execution reverted".into(),
            }),
            Ok(word(1)),
        ]));
        let quote = TransportQuote::new(transport.clone(), Address::ZERO, |_, _| Bytes::new()).retry(quick_retry());
        let err = quote.quote(U256::from(1), RunMode::Forward).await.expect_err("revert");
        assert!(matches!(
            err,
            WorkflowError::Simulation {
                source: Some(TransportError::Rpc { code: 3, .. }),
                ..
            }
        ));
        assert_eq!(transport.remaining(), 1);
    }

    #[tokio::test]
    async fn local_adjustment_only_moves_the_amount() {
        let adjust = LocalAdjustment::add("claimable", U256::from(50));
        let data = RunData::default();
        let tags = IndexMap::new();
        let context = RunContext::new(RunMode::Forward, &data, &[], &tags, "test");
        let step = adjust.run(U256::from(10), &context).await.expect("run").into_step("claimable", U256::from(10));
        assert_eq!(step.amount_out, U256::from(60));
        assert!(step.finalize().expect("finalize").payload.is_empty());
    }
}
