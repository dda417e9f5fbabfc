use std::time::Instant;

use super::{
    GenerateResult, GenerationPhase, GenerationSession, GeneratorError,
    LogitsProcessor, PrefillResult,
};
use crate::{
    LogitsBuffer,
    backends::{ForwardGraph, ModelBackend, Token},
    config::{ConfigResolvableValue, EvalMode, ModelConfig, PrefillStepSize},
    kv_cache::{KVCacheShape, KVUpdater},
    session::{FinishReason, Output},
    stats::Stats,
    tokenizer::TokenCodec,
};

/// Drives one backend through prefill and decode for a session at a time.
pub struct Generator {
    backend: Box<dyn ModelBackend>,
    logits_processor: LogitsProcessor,
    eval_mode: EvalMode,
    prefill_step_size: usize,
}

impl Generator {
    pub fn new(
        backend: Box<dyn ModelBackend>,
        logits_processor: LogitsProcessor,
        eval_mode: EvalMode,
        prefill_step_size: PrefillStepSize,
    ) -> Self {
        let config = backend.model_config();
        let prefill_step_size = prefill_step_size.resolve(config);
        let logits_processor =
            logits_processor.vocab_size(Some(config.vocab_size));
        Self {
            backend,
            logits_processor,
            eval_mode,
            prefill_step_size,
        }
    }

    pub fn model_config(&self) -> &ModelConfig {
        self.backend.model_config()
    }

    pub fn eval_mode(&self) -> EvalMode {
        self.eval_mode
    }

    pub fn prefill_step_size(&self) -> usize {
        self.prefill_step_size
    }

    /// Caps a requested budget at the model's context length.
    pub fn resolve_seq_len(
        &self,
        seq_len: usize,
    ) -> usize {
        let context_length = self.model_config().context_length;
        if seq_len > context_length {
            log::warn!(
                "seq_len {seq_len} exceeds the model context length, using {context_length}"
            );
            context_length
        } else {
            seq_len
        }
    }

    /// Starts a session on an empty cache sized for `seq_len` positions.
    pub fn new_session(
        &self,
        prompt_tokens: Vec<Token>,
        seq_len: usize,
        kv_updater: KVUpdater,
        shift_pointer_window: Option<usize>,
    ) -> Result<GenerationSession, GeneratorError> {
        let seq_len = self.resolve_seq_len(seq_len);
        let config = self.model_config();
        let shape = KVCacheShape {
            num_layers: config.num_layers,
            head_dim: config.head_dim,
            capacity: seq_len,
        };
        let kv_cache = kv_updater.create(shape, shift_pointer_window);
        GenerationSession::new(prompt_tokens, seq_len, kv_cache)
    }

    fn sample(
        &mut self,
        session: &mut GenerationSession,
        logits: &LogitsBuffer,
    ) -> Result<Token, GeneratorError> {
        self.logits_processor.process(logits).map_err(|error| {
            session.poison();
            GeneratorError::from(error)
        })
    }

    fn forward(
        &mut self,
        session: &mut GenerationSession,
        graph: ForwardGraph,
        token_ids: &[Token],
        start_position: usize,
    ) -> Result<(LogitsBuffer, f64), GeneratorError> {
        let start = Instant::now();
        let result = self.backend.forward(
            graph,
            token_ids,
            start_position,
            session.kv_cache_mut(),
        );
        let duration = start.elapsed().as_secs_f64();
        match result {
            Ok(logits) => Ok((logits, duration)),
            Err(error) => {
                session.poison();
                Err(error.into())
            },
        }
    }

    /// Consumes the whole prompt and samples the first generated token.
    pub fn prefill(
        &mut self,
        session: &mut GenerationSession,
    ) -> Result<PrefillResult, GeneratorError> {
        if session.is_poisoned() {
            return Err(GeneratorError::SessionPoisoned);
        }
        if session.phase() != GenerationPhase::Prefill {
            return Err(GeneratorError::UnexpectedPhase(session.phase()));
        }

        let start = Instant::now();
        let (graph, step_size) = match self.eval_mode {
            EvalMode::Hybrid => (ForwardGraph::Prefill, self.prefill_step_size),
            EvalMode::TokenGenerator => (ForwardGraph::Decode, 1),
        };

        let prompt_tokens = session.prompt_tokens().to_vec();
        let mut forwardpass_durations = Vec::new();
        let mut last_logits = None;
        for (index, chunk) in prompt_tokens.chunks(step_size).enumerate() {
            let (logits, duration) =
                self.forward(session, graph, chunk, index * step_size)?;
            forwardpass_durations.push(duration);
            last_logits = Some(logits);
        }
        let logits = last_logits.ok_or(GeneratorError::EmptyPrompt)?;

        let token = self.sample(session, &logits)?;
        session.accept(prompt_tokens.len(), token);
        Ok(PrefillResult {
            token,
            forwardpass_durations,
            duration: start.elapsed().as_secs_f64(),
        })
    }

    /// Feeds back the last sampled token and samples the next one.
    pub fn generate(
        &mut self,
        session: &mut GenerationSession,
    ) -> Result<GenerateResult, GeneratorError> {
        if session.is_poisoned() {
            return Err(GeneratorError::SessionPoisoned);
        }
        let GenerationPhase::Decode {
            next_token,
        } = session.phase()
        else {
            return Err(GeneratorError::UnexpectedPhase(session.phase()));
        };
        if session.total_tokens() >= session.seq_len() {
            return Err(GeneratorError::ContextLengthExceeded {
                tokens: session.total_tokens(),
                seq_len: session.seq_len(),
            });
        }

        let start = Instant::now();
        let position = session.position();
        let (logits, forwardpass_duration) = self.forward(
            session,
            ForwardGraph::Decode,
            &[next_token],
            position,
        )?;
        let token = self.sample(session, &logits)?;
        session.accept(1, token);
        Ok(GenerateResult {
            token,
            forwardpass_duration,
            duration: start.elapsed().as_secs_f64(),
        })
    }

    /// Runs `session` to completion, handing every generated token's text to
    /// `callback` as soon as it is sampled.
    ///
    /// The callback returns `false` to cancel. The end-of-sequence token is
    /// emitted like any other before generation stops.
    pub fn run<F>(
        &mut self,
        session: &mut GenerationSession,
        codec: &dyn TokenCodec,
        mut callback: F,
    ) -> Result<Output, GeneratorError>
    where
        F: FnMut(&str) -> bool,
    {
        let run_start = Instant::now();
        let mut text = String::new();

        let prefill_result = self.prefill(session)?;
        let mut generate_results: Vec<GenerateResult> = Vec::new();
        let mut finish_reason =
            emit(session, codec, &mut text, &mut callback)?;

        let finish_reason = loop {
            if let Some(reason) = finish_reason {
                break reason;
            }
            if session.total_tokens() >= session.seq_len() {
                break FinishReason::Length;
            }
            generate_results.push(self.generate(session)?);
            finish_reason = emit(session, codec, &mut text, &mut callback)?;
        };
        session.finish(finish_reason);

        let stats = Stats::build(
            &prefill_result,
            &generate_results,
            run_start.elapsed().as_secs_f64(),
            session.prompt_tokens().len(),
            session.generated_tokens().len(),
        );
        if let Ok(json) = serde_json::to_string(&stats) {
            log::debug!("{json}");
        }

        Ok(Output {
            text,
            prompt_tokens: session.prompt_tokens().to_vec(),
            generated_tokens: session.generated_tokens().to_vec(),
            stats,
            finish_reason,
        })
    }
}

/// Decodes the newest token, forwards it and decides whether to stop.
fn emit<F>(
    session: &GenerationSession,
    codec: &dyn TokenCodec,
    text: &mut String,
    callback: &mut F,
) -> Result<Option<FinishReason>, GeneratorError>
where
    F: FnMut(&str) -> bool,
{
    let generated_tokens = session.generated_tokens();
    let Some((&token, earlier)) = generated_tokens.split_last() else {
        return Ok(None);
    };
    let previous = earlier.last().or(session.prompt_tokens().last()).copied();

    let fragment = codec.decode_fragment(previous, token)?;
    text.push_str(&fragment);
    let keep_going = callback(&fragment);

    if codec.eos_tokens().contains(&token) {
        Ok(Some(FinishReason::Stop))
    } else if !keep_going {
        Ok(Some(FinishReason::Cancelled))
    } else {
        Ok(None)
    }
}
