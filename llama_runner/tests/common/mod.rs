#![allow(dead_code)]

use std::path::Path;

use llama_runner::{
    LogitsBuffer, Runner, Token,
    backends::{
        BackendError, ForwardGraph, ModelBackend,
        cpu::{CpuBackend, CpuWeights},
    },
    config::{ModelConfig, RunConfig},
    kv_cache::KVCacheUpdater,
    tokenizer::{CodecError, TokenCodec},
};

pub const PROMPT: &str = "The answer to the ultimate question is";
pub const BOS_TOKEN: Token = 0;
pub const FAILING_TOKEN: Token = 63;
pub const WEIGHTS_SEED: u64 = 17;

pub fn tiny_config() -> ModelConfig {
    ModelConfig::new(64, 16, 8, 2, 64, 4)
}

pub fn tiny_weights() -> CpuWeights {
    CpuWeights::random(tiny_config(), WEIGHTS_SEED)
}

pub fn tiny_backend() -> Box<dyn ModelBackend> {
    Box::new(CpuBackend::from_weights(tiny_weights()))
}

/// Whitespace codec with a hashed vocabulary.
///
/// Token 0 is BOS and token 63 is never produced by `encode` unless the
/// text contains the word `fail`.
pub struct WordCodec {
    vocab_size: u64,
    eos_tokens: Vec<Token>,
}

impl WordCodec {
    pub fn new(eos_tokens: Vec<Token>) -> Self {
        Self {
            vocab_size: tiny_config().vocab_size as u64,
            eos_tokens,
        }
    }

    fn word_token(
        &self,
        word: &str,
    ) -> Token {
        if word == "fail" {
            return FAILING_TOKEN;
        }
        let hash = word.bytes().fold(17u64, |hash, byte| {
            hash.wrapping_mul(31).wrapping_add(byte as u64)
        });
        1 + hash % (self.vocab_size - 2)
    }
}

impl TokenCodec for WordCodec {
    fn encode(
        &self,
        text: &str,
        add_bos: bool,
    ) -> Result<Vec<Token>, CodecError> {
        let mut tokens = Vec::new();
        if add_bos {
            tokens.push(BOS_TOKEN);
        }
        tokens
            .extend(text.split_whitespace().map(|word| self.word_token(word)));
        Ok(tokens)
    }

    fn decode(
        &self,
        token: Token,
    ) -> Result<String, CodecError> {
        if token >= self.vocab_size {
            return Err(CodecError::Decode {
                token,
                message: "out of range".to_string(),
            });
        }
        if token == BOS_TOKEN || self.eos_tokens.contains(&token) {
            return Ok(String::new());
        }
        Ok(format!(" w{token}"))
    }

    fn bos_token(&self) -> Option<Token> {
        Some(BOS_TOKEN)
    }

    fn eos_tokens(&self) -> &[Token] {
        &self.eos_tokens
    }
}

/// Wraps the reference backend and fails any pass that sees
/// [`FAILING_TOKEN`].
pub struct FailingBackend {
    inner: CpuBackend,
    fatal: bool,
}

impl FailingBackend {
    pub fn new(fatal: bool) -> Self {
        Self {
            inner: CpuBackend::from_weights(tiny_weights()),
            fatal,
        }
    }
}

impl ModelBackend for FailingBackend {
    fn model_config(&self) -> &ModelConfig {
        self.inner.model_config()
    }

    fn forward(
        &mut self,
        graph: ForwardGraph,
        token_ids: &[Token],
        start_position: usize,
        kv_cache: &mut dyn KVCacheUpdater,
    ) -> Result<LogitsBuffer, BackendError> {
        if token_ids.contains(&FAILING_TOKEN) {
            let message = "injected failure".to_string();
            return Err(if self.fatal {
                BackendError::Unrecoverable(message)
            } else {
                BackendError::InvalidInput(message)
            });
        }
        self.inner.forward(graph, token_ids, start_position, kv_cache)
    }
}

/// Wraps the reference backend and fails the first pass that covers
/// `position`. Later passes succeed unless the failure is fatal.
pub struct FailAtPosition {
    inner: CpuBackend,
    position: usize,
    fatal: bool,
    failures: usize,
}

impl FailAtPosition {
    pub fn new(
        position: usize,
        fatal: bool,
    ) -> Self {
        Self {
            inner: CpuBackend::from_weights(tiny_weights()),
            position,
            fatal,
            failures: 0,
        }
    }
}

impl ModelBackend for FailAtPosition {
    fn model_config(&self) -> &ModelConfig {
        self.inner.model_config()
    }

    fn forward(
        &mut self,
        graph: ForwardGraph,
        token_ids: &[Token],
        start_position: usize,
        kv_cache: &mut dyn KVCacheUpdater,
    ) -> Result<LogitsBuffer, BackendError> {
        let covered = start_position..start_position + token_ids.len();
        if covered.contains(&self.position) && (self.fatal || self.failures == 0)
        {
            self.failures += 1;
            let message = format!("injected failure at {}", self.position);
            return Err(if self.fatal {
                BackendError::Unrecoverable(message)
            } else {
                BackendError::InvalidInput(message)
            });
        }
        self.inner.forward(graph, token_ids, start_position, kv_cache)
    }
}

pub fn run_config() -> RunConfig {
    RunConfig::default()
}

pub fn runner(config: RunConfig) -> Runner {
    runner_with(config, tiny_backend(), Vec::new())
}

pub fn runner_with(
    config: RunConfig,
    backend: Box<dyn ModelBackend>,
    eos_tokens: Vec<Token>,
) -> Runner {
    Runner::with_components(
        config,
        backend,
        Box::new(WordCodec::new(eos_tokens)),
    )
    .unwrap()
}

pub fn collect_fragments(
    runner: &mut Runner,
    seq_len: usize,
    prompt: &str,
    system_prompt: Option<&str>,
) -> (llama_runner::Output, Vec<String>) {
    let mut fragments = Vec::new();
    let output = runner
        .generate(seq_len, prompt, system_prompt, |fragment| {
            fragments.push(fragment.to_string());
            true
        })
        .unwrap();
    (output, fragments)
}

const PROMPT_WORDS: [&str; 7] =
    ["The", "answer", "to", "the", "ultimate", "question", "is"];

/// WordLevel `tokenizer.json` covering the whole tiny vocabulary.
pub fn tokenizer_json() -> String {
    let vocab_size = tiny_config().vocab_size;
    let mut entries = vec![
        "\"<s>\": 0".to_string(),
        "\"</s>\": 1".to_string(),
        "\"[UNK]\": 2".to_string(),
    ];
    for id in 3..vocab_size {
        let word = PROMPT_WORDS
            .get(id - 3)
            .map(|word| word.to_string())
            .unwrap_or_else(|| format!("tok{id}"));
        entries.push(format!("\"{word}\": {id}"));
    }
    let special = |id: usize, content: &str| {
        format!(
            r#"{{"id": {id}, "content": "{content}", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}}"#
        )
    };
    format!(
        r#"{{
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [{}, {}],
            "normalizer": null,
            "pre_tokenizer": {{"type": "Whitespace"}},
            "post_processor": null,
            "decoder": null,
            "model": {{
                "type": "WordLevel",
                "vocab": {{{}}},
                "unk_token": "[UNK]"
            }}
        }}"#,
        special(0, "<s>"),
        special(1, "</s>"),
        entries.join(", ")
    )
}

pub fn write_tokenizer(path: &Path) {
    std::fs::write(path, tokenizer_json()).unwrap();
}
