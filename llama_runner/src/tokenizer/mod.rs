mod huggingface;

pub use huggingface::HuggingFaceCodec;
use thiserror::Error;

use crate::backends::Token;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Unable to load tokenizer: {0}")]
    Load(String),
    #[error("Unable to encode text: {0}")]
    Encode(String),
    #[error("Unable to decode token {token}: {message}")]
    Decode {
        token: Token,
        message: String,
    },
    #[error("Token \"{0}\" is not in the vocabulary")]
    UnknownToken(String),
}

/// Text to token ids and back.
///
/// Implementations must be deterministic and free of side effects.
pub trait TokenCodec {
    fn encode(
        &self,
        text: &str,
        add_bos: bool,
    ) -> Result<Vec<Token>, CodecError>;

    fn decode(
        &self,
        token: Token,
    ) -> Result<String, CodecError>;

    /// Text that `token` appends when it follows `previous`.
    ///
    /// Codecs whose pieces carry leading whitespace only once they are
    /// joined to a neighbour override this.
    fn decode_fragment(
        &self,
        _previous: Option<Token>,
        token: Token,
    ) -> Result<String, CodecError> {
        self.decode(token)
    }

    fn bos_token(&self) -> Option<Token>;

    fn eos_tokens(&self) -> &[Token];
}
