//! Per chat-mode retrieval parameters and context assembly for prompts.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use gridrag_core::config::ModeSettings;
use gridrag_core::error::{Error, Result};
use gridrag_core::filter::SearchFilter;
use gridrag_core::types::{Degradation, FusedResult};

use crate::retriever::{HybridRetriever, RetrievalRequest};

pub const DEFAULT_TOP_N: usize = 8;

const NO_DOCUMENTS: &str = "No relevant documents found.";
const PASSAGE_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    StrategyQa,
    Actions,
    Analytics,
    Regulatory,
}

impl ChatMode {
    pub const ALL: [ChatMode; 4] = [Self::StrategyQa, Self::Actions, Self::Analytics, Self::Regulatory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrategyQa => "strategy_qa",
            Self::Actions => "actions",
            Self::Analytics => "analytics",
            Self::Regulatory => "regulatory",
        }
    }

    fn default_top_n(&self) -> usize {
        match self {
            Self::StrategyQa | Self::Regulatory => 10,
            Self::Actions | Self::Analytics => DEFAULT_TOP_N,
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ChatMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| Error::InvalidRequest(format!("unknown chat mode '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalPolicy {
    pub top_n: usize,
    pub filter: SearchFilter,
}

impl Default for RetrievalPolicy {
    fn default() -> Self { Self { top_n: DEFAULT_TOP_N, filter: SearchFilter::none() } }
}

impl RetrievalPolicy {
    pub fn for_mode(mode: ChatMode) -> Self { Self { top_n: mode.default_top_n(), filter: SearchFilter::none() } }

    fn apply(mut self, overrides: &ModeSettings) -> Result<Self> {
        if let Some(top_n) = overrides.top_n {
            if top_n == 0 {
                return Err(Error::InvalidConfig("mode top_n must be positive".into()));
            }
            self.top_n = top_n;
        }
        if let Some(source) = overrides.source {
            self.filter = self.filter.with_source(source);
        }
        if let Some(doc_type) = overrides.doc_type {
            self.filter = self.filter.with_doc_type(doc_type);
        }
        self.filter.validate()?;
        Ok(self)
    }
}

/// Policies for every mode, built-in defaults merged with configured overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    policies: HashMap<ChatMode, RetrievalPolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self { Self { policies: ChatMode::ALL.into_iter().map(|m| (m, RetrievalPolicy::for_mode(m))).collect() } }
}

impl PolicyTable {
    pub fn from_settings(modes: &BTreeMap<String, ModeSettings>) -> Result<Self> {
        let mut table = Self::default();
        for (name, overrides) in modes {
            let mode: ChatMode = name.parse().map_err(|_| Error::InvalidConfig(format!("unknown chat mode '{name}' in [modes]")))?;
            let policy = RetrievalPolicy::for_mode(mode).apply(overrides)?;
            table.policies.insert(mode, policy);
        }
        Ok(table)
    }

    /// The policy of `mode`, or the default policy when no mode is given.
    pub fn policy(&self, mode: Option<ChatMode>) -> RetrievalPolicy {
        mode.and_then(|m| self.policies.get(&m).cloned()).unwrap_or_default()
    }
}

/// Retrieved passages ready to be placed in a prompt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextBundle {
    pub results: Vec<FusedResult>,
    /// Unique citations in result order.
    pub sources: Vec<String>,
    pub degraded: Vec<Degradation>,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool { self.results.is_empty() }

    pub fn render(&self) -> String {
        if self.results.is_empty() {
            return NO_DOCUMENTS.to_string();
        }
        self.results
            .iter()
            .enumerate()
            .map(|(i, r)| format!("[{}] Source: {}\n{}", i + 1, r.citation, r.chunk.text))
            .collect::<Vec<_>>()
            .join(PASSAGE_SEPARATOR)
    }
}

/// Applies the mode's policy and delegates to the hybrid retriever.
pub struct PolicyRetriever {
    retriever: Arc<HybridRetriever>,
    policies: PolicyTable,
}

impl PolicyRetriever {
    pub fn new(retriever: Arc<HybridRetriever>, policies: PolicyTable) -> Self { Self { retriever, policies } }

    pub fn policies(&self) -> &PolicyTable { &self.policies }

    pub async fn retrieve_context(&self, mode: Option<ChatMode>, query: &str) -> Result<ContextBundle> {
        let policy = self.policies.policy(mode);
        self.retrieve_with_policy(&policy, query).await
    }

    pub async fn retrieve_with_policy(&self, policy: &RetrievalPolicy, query: &str) -> Result<ContextBundle> {
        let request = RetrievalRequest::new(query, policy.top_n).with_filter(policy.filter.clone());
        let response = self.retriever.retrieve(&request).await?;
        let mut sources: Vec<String> = Vec::new();
        for r in &response.results {
            if !sources.contains(&r.citation) {
                sources.push(r.citation.clone());
            }
        }
        debug!(top_n = policy.top_n, results = response.results.len(), sources = sources.len(), "context retrieved");
        Ok(ContextBundle { results: response.results, sources, degraded: response.degraded })
    }
}
