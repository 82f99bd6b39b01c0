//! gridrag-embed
//!
//! `EmbeddingProvider` implementations: an OpenAI-compatible HTTP client and
//! a deterministic fake. Also a HuggingFace tokenizer `TokenCounter`.
use std::sync::Arc;
use tracing::info;

use gridrag_core::config::EmbeddingSettings;
use gridrag_core::error::{Error, Result};
use gridrag_core::retry::RetryPolicy;
use gridrag_core::traits::EmbeddingProvider;

pub mod fake;
pub mod openai;
pub mod tokenize;

pub use fake::FakeEmbedder;
pub use openai::OpenAiEmbedder;
pub use tokenize::HfTokenCounter;

fn use_fake_from_env() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// Build the configured embedding provider. `APP_USE_FAKE_EMBEDDINGS=1`
/// forces the fake one regardless of `provider`.
pub fn build_embedder(settings: &EmbeddingSettings, retry: &RetryPolicy) -> Result<Arc<dyn EmbeddingProvider>> {
    if use_fake_from_env() || settings.provider == "fake" {
        info!(dim = settings.dimensions, "using fake embeddings");
        return Ok(Arc::new(FakeEmbedder::new(settings.dimensions)?));
    }
    match settings.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::from_settings(settings, retry.clone())?)),
        other => Err(Error::InvalidConfig(format!("unknown embedding provider '{other}'"))),
    }
}
