use std::path::Path;

use tokenizers::Tokenizer;

use super::{CodecError, TokenCodec};
use crate::backends::Token;

const BOS_CANDIDATES: [&str; 4] =
    ["<s>", "<|begin_of_text|>", "<bos>", "<|startoftext|>"];

const EOS_CANDIDATES: [&str; 6] = [
    "</s>",
    "<|eot_id|>",
    "<|end_of_text|>",
    "<eos>",
    "<|im_end|>",
    "<|endoftext|>",
];

/// [`TokenCodec`] backed by a HuggingFace `tokenizer.json`.
pub struct HuggingFaceCodec {
    tokenizer: Tokenizer,
    bos_token: Option<Token>,
    eos_tokens: Vec<Token>,
}

impl HuggingFaceCodec {
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        extra_eos_tokens: &[String],
    ) -> Result<Self, CodecError> {
        let tokenizer = Tokenizer::from_file(path.as_ref())
            .map_err(|error| CodecError::Load(error.to_string()))?;
        Self::new(tokenizer, extra_eos_tokens)
    }

    /// Resolves the special tokens the vocabulary knows about.
    ///
    /// Every entry of `extra_eos_tokens` must exist in the vocabulary.
    pub fn new(
        tokenizer: Tokenizer,
        extra_eos_tokens: &[String],
    ) -> Result<Self, CodecError> {
        let token_id =
            |name: &str| tokenizer.token_to_id(name).map(|id| id as Token);

        let bos_token = BOS_CANDIDATES.iter().find_map(|name| token_id(name));

        let mut eos_tokens: Vec<Token> =
            EOS_CANDIDATES.iter().filter_map(|name| token_id(name)).collect();
        for name in extra_eos_tokens {
            let token = token_id(name)
                .ok_or_else(|| CodecError::UnknownToken(name.clone()))?;
            if !eos_tokens.contains(&token) {
                eos_tokens.push(token);
            }
        }
        if eos_tokens.is_empty() {
            log::warn!(
                "Tokenizer has no end-of-sequence token, generation stops only at the length budget"
            );
        }

        Ok(Self {
            tokenizer,
            bos_token,
            eos_tokens,
        })
    }

    fn decode_ids(
        &self,
        ids: &[u32],
        token: Token,
    ) -> Result<String, CodecError> {
        self.tokenizer.decode(ids, true).map_err(|error| {
            CodecError::Decode {
                token,
                message: error.to_string(),
            }
        })
    }
}

fn to_id(token: Token) -> Result<u32, CodecError> {
    u32::try_from(token).map_err(|_| CodecError::Decode {
        token,
        message: "token id does not fit the vocabulary".to_string(),
    })
}

impl TokenCodec for HuggingFaceCodec {
    fn encode(
        &self,
        text: &str,
        add_bos: bool,
    ) -> Result<Vec<Token>, CodecError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|error| CodecError::Encode(error.to_string()))?;
        let ids = encoding.get_ids().iter().map(|&id| id as Token);

        let mut tokens = Vec::with_capacity(encoding.len() + 1);
        if let Some(bos_token) = self.bos_token.filter(|_| add_bos) {
            if encoding.get_ids().first().map(|&id| id as Token)
                != Some(bos_token)
            {
                tokens.push(bos_token);
            }
        }
        tokens.extend(ids);
        Ok(tokens)
    }

    fn decode(
        &self,
        token: Token,
    ) -> Result<String, CodecError> {
        self.decode_ids(&[to_id(token)?], token)
    }

    fn decode_fragment(
        &self,
        previous: Option<Token>,
        token: Token,
    ) -> Result<String, CodecError> {
        let Some(previous) = previous else {
            return self.decode(token);
        };
        let ids = [to_id(previous)?, to_id(token)?];
        let prefix = self.decode_ids(&ids[..1], token)?;
        let joined = self.decode_ids(&ids, token)?;
        match joined.strip_prefix(prefix.as_str()) {
            Some(fragment) => Ok(fragment.to_string()),
            None => self.decode(token),
        }
    }

    fn bos_token(&self) -> Option<Token> {
        self.bos_token
    }

    fn eos_tokens(&self) -> &[Token] {
        &self.eos_tokens
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    const TOKENIZER_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            {"id": 0, "content": "<s>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 1, "content": "</s>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
        ],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"<s>": 0, "</s>": 1, "[UNK]": 2, "hello": 3, "world": 4},
            "unk_token": "[UNK]"
        }
    }"#;

    fn codec(
        extra_eos_tokens: &[String]
    ) -> Result<HuggingFaceCodec, CodecError> {
        let tokenizer = Tokenizer::from_str(TOKENIZER_JSON)
            .map_err(|error| CodecError::Load(error.to_string()))?;
        HuggingFaceCodec::new(tokenizer, extra_eos_tokens)
    }

    #[test]
    fn test_special_tokens_are_resolved() {
        let codec = codec(&[]).unwrap();
        assert_eq!(codec.bos_token(), Some(0));
        assert_eq!(codec.eos_tokens(), &[1]);
    }

    #[test]
    fn test_bos_is_prepended_on_request() {
        let codec = codec(&[]).unwrap();
        assert_eq!(codec.encode("hello world", true).unwrap(), vec![0, 3, 4]);
        assert_eq!(codec.encode("hello world", false).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_fragment_keeps_separator() {
        let codec = codec(&[]).unwrap();
        assert_eq!(codec.decode(4).unwrap(), "world");
        assert_eq!(codec.decode_fragment(Some(3), 4).unwrap(), " world");
        assert_eq!(codec.decode(1).unwrap(), "");
    }

    #[test]
    fn test_unknown_extra_eos_is_rejected() {
        let result = codec(&["<|eot_id|>".to_string()]);
        assert!(matches!(result, Err(CodecError::UnknownToken(_))));
    }
}
