use std::path::Path;
use tokenizers::Tokenizer;
use tracing::warn;

use gridrag_core::chunking::WordApproxCounter;
use gridrag_core::error::{Error, Result};
use gridrag_core::traits::TokenCounter;

/// Exact token counts from a HuggingFace `tokenizer.json`, so chunk budgets
/// match the embedding model. Falls back to the word approximation when a
/// text cannot be encoded.
pub struct HfTokenCounter {
    tokenizer: Tokenizer,
}

impl HfTokenCounter {
    pub fn new(tokenizer: Tokenizer) -> Self { Self { tokenizer } }

    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| Error::InvalidConfig(format!("Failed to load tokenizer from {}: {}", path.display(), e)))?;
        Ok(Self::new(tokenizer))
    }
}

impl TokenCounter for HfTokenCounter {
    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(enc) => enc.get_ids().len(),
            Err(e) => {
                warn!(error = %e, "tokenization failed, using word approximation");
                WordApproxCounter.count(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORD_LEVEL: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": { "type": "WordLevel", "vocab": { "[UNK]": 0, "grid": 1, "losses": 2 }, "unk_token": "[UNK]" }
    }"#;

    #[test]
    fn counts_pre_tokenized_pieces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tokenizer.json");
        std::fs::write(&path, WORD_LEVEL).expect("write");
        let counter = HfTokenCounter::from_file(&path).expect("tokenizer");
        assert_eq!(counter.count("grid losses rose."), 4);
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = HfTokenCounter::from_file(Path::new("/nonexistent/tokenizer.json")).err();
        assert!(matches!(err, Some(Error::InvalidConfig(_))));
    }
}
