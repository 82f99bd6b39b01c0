//! Layered configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`,
//! `config.<env>.toml` and `APP_*` env vars (`__` separates nested keys,
//! e.g. `APP_RETRIEVAL__RRF_K=30`). Provides helpers to expand `~` and
//! `${VAR}` and to resolve relative paths against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::chunking::ChunkingConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::types::{DocumentSource, DocumentType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataSettings {
    pub tantivy_index_dir: String,
    pub lancedb_dir: String,
    pub lancedb_table: String,
    /// `lancedb` or `memory`.
    pub vector_backend: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            tantivy_index_dir: "./data/indexes/tantivy".into(),
            lancedb_dir: "./data/indexes/lancedb".into(),
            lancedb_table: "chunks".into(),
            vector_backend: "lancedb".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalSettings {
    pub rrf_k: f64,
    pub semantic_k: usize,
    pub keyword_k: usize,
    pub embed_timeout_ms: u64,
    pub vector_timeout_ms: u64,
    pub keyword_timeout_ms: u64,
    /// Fail instead of degrading when either sub-search fails.
    pub require_both: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            semantic_k: 15,
            keyword_k: 15,
            embed_timeout_ms: 10_000,
            vector_timeout_ms: 30_000,
            keyword_timeout_ms: 10_000,
            require_both: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `openai` or `fake`.
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub endpoint: String,
    /// Name of the env var holding the API key.
    pub api_key_env: String,
    pub batch_size: usize,
    pub timeout_ms: u64,
    /// HuggingFace `tokenizer.json` used to count chunk tokens. Word
    /// approximation when unset.
    pub tokenizer_path: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            endpoint: "https://api.openai.com/v1/embeddings".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            batch_size: 100,
            timeout_ms: 60_000,
            tokenizer_path: None,
        }
    }
}

/// Per chat-mode overrides of the built-in retrieval policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModeSettings {
    pub top_n: Option<usize>,
    pub source: Option<DocumentSource>,
    pub doc_type: Option<DocumentType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
    pub retry: RetryPolicy,
    pub modes: BTreeMap<String, ModeSettings>,
}

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_for_env(&env_name)
    }

    pub fn load_for_env(env_name: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{}': {}", key, e)))
    }

    /// The full typed settings, validated.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self.figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.chunking.validate()?;
        settings.retry.validate()?;
        if settings.retrieval.rrf_k <= 0.0 {
            return Err(Error::InvalidConfig(format!("retrieval.rrf_k must be positive, got {}", settings.retrieval.rrf_k)));
        }
        if settings.embedding.dimensions == 0 {
            return Err(Error::InvalidConfig("embedding.dimensions must be positive".into()));
        }
        Ok(settings)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_apply_without_files() {
        Jail::expect_with(|_jail| {
            let settings = Config::load_for_env("dev").expect("load").settings().expect("settings");
            assert_eq!(settings.chunking, ChunkingConfig::default());
            assert_eq!(settings.retrieval.rrf_k, 60.0);
            assert_eq!(settings.embedding.dimensions, 1536);
            assert!(settings.modes.is_empty());
            Ok(())
        });
    }

    #[test]
    fn env_file_and_variables_layer_in_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [retrieval]
                rrf_k = 30.0
                semantic_k = 20

                [modes.regulatory]
                top_n = 12
                source = "era"
                "#,
            )?;
            jail.create_file("config.test.toml", "[chunking]\nchunk_size = 300\nchunk_overlap = 50\n")?;
            jail.set_env("APP_RETRIEVAL__SEMANTIC_K", "25");

            let config = Config::load_for_env("test").expect("load");
            let settings = config.settings().expect("settings");
            assert_eq!(settings.retrieval.rrf_k, 30.0);
            assert_eq!(settings.retrieval.semantic_k, 25);
            assert_eq!(settings.chunking.chunk_size, 300);
            let regulatory = &settings.modes["regulatory"];
            assert_eq!(regulatory.top_n, Some(12));
            assert_eq!(regulatory.source, Some(DocumentSource::Era));
            assert_eq!(config.get::<usize>("retrieval.keyword_k").expect("key"), 15);
            Ok(())
        });
    }

    #[test]
    fn invalid_chunking_is_rejected_at_load() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n")?;
            assert!(matches!(Config::load_for_env("dev"), Err(Error::InvalidConfig(_))));
            Ok(())
        });
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let base = Path::new("/srv/gridrag");
        assert_eq!(resolve_with_base(base, "data/idx"), PathBuf::from("/srv/gridrag/data/idx"));
        assert_eq!(resolve_with_base(base, "/abs/idx"), PathBuf::from("/abs/idx"));
    }
}
