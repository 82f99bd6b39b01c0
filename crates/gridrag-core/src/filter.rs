//! Typed metadata filter applied identically to the dense and sparse searches.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Chunk, DocumentSource, DocumentType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FilterClause {
    Source(DocumentSource),
    DocumentId(String),
    DocType(DocumentType),
}

impl FilterClause {
    fn kind(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::DocumentId(_) => "document_id",
            Self::DocType(_) => "doc_type",
        }
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        match self {
            Self::Source(s) => chunk.origin == Some(*s),
            Self::DocumentId(id) => &chunk.document_id == id,
            Self::DocType(t) => chunk.doc_type == Some(*t),
        }
    }
}

/// Conjunction of clauses. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    clauses: Vec<FilterClause>,
}

impl SearchFilter {
    pub fn none() -> Self { Self::default() }

    pub fn with_source(mut self, source: DocumentSource) -> Self { self.clauses.push(FilterClause::Source(source)); self }

    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.clauses.push(FilterClause::DocumentId(document_id.into()));
        self
    }

    pub fn with_doc_type(mut self, doc_type: DocumentType) -> Self { self.clauses.push(FilterClause::DocType(doc_type)); self }

    pub fn clauses(&self) -> &[FilterClause] { &self.clauses }

    pub fn is_empty(&self) -> bool { self.clauses.is_empty() }

    /// Reject filters that cannot be sent to a backend or can never match.
    pub fn validate(&self) -> Result<()> {
        for (i, clause) in self.clauses.iter().enumerate() {
            if let FilterClause::DocumentId(id) = clause {
                if id.trim().is_empty() {
                    return Err(Error::InvalidFilter("document_id must not be empty".into()));
                }
                if id.chars().any(char::is_control) {
                    return Err(Error::InvalidFilter(format!("document_id {id:?} contains control characters")));
                }
            }
            if let Some(other) = self.clauses[..i].iter().find(|c| c.kind() == clause.kind() && *c != clause) {
                return Err(Error::InvalidFilter(format!(
                    "contradictory {} clauses: {:?} and {:?}",
                    clause.kind(),
                    other,
                    clause
                )));
            }
        }
        Ok(())
    }

    pub fn matches(&self, chunk: &Chunk) -> bool { self.clauses.iter().all(|c| c.matches(chunk)) }

    /// Render as a SQL predicate over the vector table columns, `None` when empty.
    pub fn to_sql_predicate(&self) -> Option<String> {
        if self.clauses.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|c| match c {
                FilterClause::Source(s) => format!("origin = '{}'", s.as_str()),
                FilterClause::DocumentId(id) => format!("document_id = '{}'", id.replace('\'', "''")),
                FilterClause::DocType(t) => format!("doc_type = '{}'", t.as_str()),
            })
            .collect();
        Some(parts.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(document_id: &str, origin: Option<DocumentSource>) -> Chunk {
        Chunk {
            id: Chunk::make_id(document_id, 0),
            document_id: document_id.into(),
            chunk_index: 0,
            text: "text".into(),
            source: None,
            page: None,
            char_start: 0,
            char_end: 4,
            origin,
            doc_type: Some(DocumentType::Regulatory),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let f = SearchFilter::none();
        assert!(f.validate().is_ok());
        assert!(f.matches(&chunk("a", None)));
        assert_eq!(f.to_sql_predicate(), None);
    }

    #[test]
    fn combined_clauses_are_a_conjunction() {
        let f = SearchFilter::none().with_source(DocumentSource::Era).with_doc_type(DocumentType::Regulatory);
        assert!(f.matches(&chunk("a", Some(DocumentSource::Era))));
        assert!(!f.matches(&chunk("a", Some(DocumentSource::Uetcl))));
        assert_eq!(f.to_sql_predicate().as_deref(), Some("origin = 'era' AND doc_type = 'regulatory'"));
    }

    #[test]
    fn rejects_blank_and_contradictory_clauses() {
        assert!(matches!(SearchFilter::none().with_document_id("  ").validate(), Err(Error::InvalidFilter(_))));
        assert!(matches!(SearchFilter::none().with_document_id("a\nb").validate(), Err(Error::InvalidFilter(_))));
        let contradictory = SearchFilter::none().with_source(DocumentSource::Era).with_source(DocumentSource::Memd);
        assert!(matches!(contradictory.validate(), Err(Error::InvalidFilter(_))));
        let repeated = SearchFilter::none().with_source(DocumentSource::Era).with_source(DocumentSource::Era);
        assert!(repeated.validate().is_ok());
    }

    #[test]
    fn sql_predicate_escapes_quotes() {
        let f = SearchFilter::none().with_document_id("o'brien");
        assert_eq!(f.to_sql_predicate().as_deref(), Some("document_id = 'o''brien'"));
    }
}
