use crate::{
    backends::Token, generator::GeneratorError, kv_cache::KVCacheUpdater,
    session::FinishReason,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    /// Prompt not consumed yet.
    Prefill,
    /// `next_token` was sampled and emitted but not yet fed back.
    Decode {
        next_token: Token,
    },
    Done(FinishReason),
}

/// State of a single prompt's generation.
///
/// Owns its cache, so nothing written here can be observed by the next
/// session.
pub struct GenerationSession {
    phase: GenerationPhase,
    position: usize,
    seq_len: usize,
    prompt_tokens: Vec<Token>,
    generated_tokens: Vec<Token>,
    kv_cache: Box<dyn KVCacheUpdater>,
    poisoned: bool,
}

impl GenerationSession {
    pub fn new(
        prompt_tokens: Vec<Token>,
        seq_len: usize,
        kv_cache: Box<dyn KVCacheUpdater>,
    ) -> Result<Self, GeneratorError> {
        if prompt_tokens.is_empty() {
            return Err(GeneratorError::EmptyPrompt);
        }
        if prompt_tokens.len() >= seq_len {
            return Err(GeneratorError::ContextLengthExceeded {
                tokens: prompt_tokens.len(),
                seq_len,
            });
        }
        Ok(Self {
            phase: GenerationPhase::Prefill,
            position: 0,
            seq_len,
            prompt_tokens,
            generated_tokens: Vec::new(),
            kv_cache,
            poisoned: false,
        })
    }

    pub fn phase(&self) -> GenerationPhase {
        self.phase
    }

    /// Number of positions already written to the cache.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn prompt_tokens(&self) -> &[Token] {
        &self.prompt_tokens
    }

    pub fn generated_tokens(&self) -> &[Token] {
        &self.generated_tokens
    }

    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens.len() + self.generated_tokens.len()
    }

    pub fn last_token(&self) -> Option<Token> {
        self.generated_tokens
            .last()
            .or(self.prompt_tokens.last())
            .copied()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn kv_cache(&self) -> &dyn KVCacheUpdater {
        self.kv_cache.as_ref()
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        match self.phase {
            GenerationPhase::Done(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn finish(
        &mut self,
        reason: FinishReason,
    ) {
        self.phase = GenerationPhase::Done(reason);
    }

    pub(crate) fn kv_cache_mut(&mut self) -> &mut dyn KVCacheUpdater {
        self.kv_cache.as_mut()
    }

    pub(crate) fn poison(&mut self) {
        self.poisoned = true;
    }

    pub(crate) fn accept(
        &mut self,
        consumed_positions: usize,
        token: Token,
    ) {
        self.position += consumed_positions;
        self.generated_tokens.push(token);
        self.phase = GenerationPhase::Decode {
            next_token: token,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_cache::{KVCacheShape, KVUpdater};

    fn cache() -> Box<dyn KVCacheUpdater> {
        KVUpdater::SmartMask.create(
            KVCacheShape {
                num_layers: 1,
                head_dim: 2,
                capacity: 8,
            },
            None,
        )
    }

    #[test]
    fn test_prompt_must_leave_room_for_generation() {
        assert!(matches!(
            GenerationSession::new(vec![1, 2, 3], 3, cache()),
            Err(GeneratorError::ContextLengthExceeded {
                tokens: 3,
                seq_len: 3,
            })
        ));
        assert!(GenerationSession::new(vec![1, 2], 3, cache()).is_ok());
    }

    #[test]
    fn test_empty_prompt_is_rejected() {
        assert!(matches!(
            GenerationSession::new(Vec::new(), 8, cache()),
            Err(GeneratorError::EmptyPrompt)
        ));
    }

    #[test]
    fn test_accept_moves_to_decode() {
        let mut session =
            GenerationSession::new(vec![4, 5], 8, cache()).unwrap();
        assert_eq!(session.phase(), GenerationPhase::Prefill);
        session.accept(2, 9);
        assert_eq!(
            session.phase(),
            GenerationPhase::Decode {
                next_token: 9,
            }
        );
        assert_eq!(session.position(), 2);
        assert_eq!(session.total_tokens(), 3);
        assert_eq!(session.last_token(), Some(9));
    }
}
