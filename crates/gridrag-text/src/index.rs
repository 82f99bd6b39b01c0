use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::tokenizer::TokenStream;
use tantivy::{DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};
use tracing::{debug, info};

use gridrag_core::error::{Error, Result};
use gridrag_core::filter::{FilterClause, SearchFilter};
use gridrag_core::traits::FullTextIndex;
use gridrag_core::types::{Chunk, ScoredChunk};

use crate::tantivy_utils::{build_schema, register_tokenizer, ChunkFields};

const WRITER_HEAP_BYTES: usize = 50_000_000;

struct Inner {
	index: Index,
	reader: IndexReader,
	writer: Mutex<IndexWriter>,
	fields: ChunkFields,
}

/// Tantivy-backed full-text index over chunks. It stores the complete chunk
/// payload and doubles as the chunk store keyed by `(document_id, chunk_index)`.
#[derive(Clone)]
pub struct TantivyIndex {
	inner: Arc<Inner>,
}

impl TantivyIndex {
	/// Open the index in `index_dir`, creating it when missing.
	pub fn open_or_create(index_dir: &Path) -> Result<Self> {
		std::fs::create_dir_all(index_dir).map_err(Error::backend)?;
		let dir = MmapDirectory::open(index_dir).map_err(Error::backend)?;
		let index = Index::open_or_create(dir, build_schema()).map_err(Error::backend)?;
		info!(dir = %index_dir.display(), "opened tantivy index");
		Self::from_index(index)
	}

	pub fn in_memory() -> Result<Self> { Self::from_index(Index::create_in_ram(build_schema())) }

	fn from_index(index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let fields = ChunkFields::from_schema(&index.schema()).map_err(|e| Error::InvalidConfig(format!("unexpected text index schema: {e}")))?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(Error::backend)?;
		let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES).map_err(Error::backend)?;
		Ok(Self { inner: Arc::new(Inner { index, reader, writer: Mutex::new(writer), fields }) })
	}

	/// All stored chunks of a document ordered by `chunk_index`.
	pub async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
		let document_id = document_id.to_string();
		self.blocking(move |inner| inner.chunks_for_document(&document_id)).await
	}

	pub fn num_chunks(&self) -> u64 { self.inner.reader.searcher().num_docs() }

	async fn blocking<T, F>(&self, f: F) -> Result<T>
	where
		F: FnOnce(&Inner) -> Result<T> + Send + 'static,
		T: Send + 'static,
	{
		let inner = Arc::clone(&self.inner);
		tokio::task::spawn_blocking(move || f(&inner))
			.await
			.map_err(|e| Error::Backend(format!("text index task failed: {e}")))?
	}
}

impl Inner {
	fn commit(&self, writer: &mut IndexWriter) -> Result<()> {
		writer.commit().map_err(Error::backend)?;
		self.reader.reload().map_err(Error::backend)
	}

	fn to_document(&self, c: &Chunk) -> TantivyDocument {
		let f = &self.fields;
		let mut doc = TantivyDocument::default();
		doc.add_text(f.id, &c.id);
		doc.add_text(f.document_id, &c.document_id);
		doc.add_u64(f.chunk_index, c.chunk_index as u64);
		doc.add_text(f.text, &c.text);
		if let Some(source) = &c.source { doc.add_text(f.source, source); }
		if let Some(page) = c.page { doc.add_u64(f.page, u64::from(page)); }
		doc.add_u64(f.char_start, c.char_start as u64);
		doc.add_u64(f.char_end, c.char_end as u64);
		if let Some(origin) = c.origin { doc.add_text(f.origin, origin.as_str()); }
		if let Some(doc_type) = c.doc_type { doc.add_text(f.doc_type, doc_type.as_str()); }
		doc
	}

	fn to_chunk(&self, doc: &TantivyDocument) -> Result<Chunk> {
		let f = &self.fields;
		let text = |field| doc.get_first(field).and_then(|v| v.as_str()).map(str::to_string);
		let num = |field| doc.get_first(field).and_then(|v| v.as_u64());
		let id = text(f.id).ok_or_else(|| Error::Backend("stored chunk without id".into()))?;
		Ok(Chunk {
			document_id: text(f.document_id).unwrap_or_default(),
			chunk_index: num(f.chunk_index).unwrap_or_default() as usize,
			text: text(f.text).unwrap_or_default(),
			source: text(f.source),
			page: num(f.page).map(|p| p as u32),
			char_start: num(f.char_start).unwrap_or_default() as usize,
			char_end: num(f.char_end).unwrap_or_default() as usize,
			origin: text(f.origin).and_then(|s| s.parse().ok()),
			doc_type: text(f.doc_type).and_then(|s| s.parse().ok()),
			id,
		})
	}

	fn fetch(&self, searcher: &Searcher, addr: DocAddress) -> Result<Chunk> {
		let doc: TantivyDocument = searcher.doc(addr).map_err(Error::backend)?;
		self.to_chunk(&doc)
	}

	fn index(&self, chunks: &[Chunk]) -> Result<()> {
		if chunks.is_empty() { return Ok(()); }
		let mut writer = self.writer.lock().map_err(|_| Error::Backend("text index writer lock poisoned".into()))?;
		for c in chunks {
			writer.delete_term(Term::from_field_text(self.fields.id, &c.id));
			writer.add_document(self.to_document(c)).map_err(Error::backend)?;
		}
		self.commit(&mut writer)?;
		debug!(chunks = chunks.len(), "indexed chunks");
		Ok(())
	}

	/// Analyze `query` with the text field's analyzer. Duplicates are dropped.
	fn query_terms(&self, query: &str) -> Result<Vec<String>> {
		let mut analyzer = self.index.tokenizer_for_field(self.fields.text).map_err(Error::backend)?;
		let mut stream = analyzer.token_stream(query);
		let mut terms: Vec<String> = Vec::new();
		while stream.advance() {
			let t = &stream.token().text;
			if !terms.contains(t) { terms.push(t.clone()); }
		}
		Ok(terms)
	}

	fn filter_clauses(&self, filter: &SearchFilter) -> Vec<(Occur, Box<dyn Query>)> {
		let f = &self.fields;
		filter
			.clauses()
			.iter()
			.map(|clause| {
				let term = match clause {
					FilterClause::Source(s) => Term::from_field_text(f.origin, s.as_str()),
					FilterClause::DocumentId(id) => Term::from_field_text(f.document_id, id),
					FilterClause::DocType(t) => Term::from_field_text(f.doc_type, t.as_str()),
				};
				let q: Box<dyn Query> = Box::new(ConstScoreQuery::new(Box::new(TermQuery::new(term, IndexRecordOption::Basic)), 0.0));
				(Occur::Must, q)
			})
			.collect()
	}

	/// Every analyzed query term must occur; the query string is never parsed
	/// as query syntax.
	fn search(&self, query: &str, top_k: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>> {
		let terms = self.query_terms(query)?;
		if terms.is_empty() || top_k == 0 { return Ok(vec![]); }
		let mut clauses: Vec<(Occur, Box<dyn Query>)> = terms
			.iter()
			.map(|t| {
				let q: Box<dyn Query> = Box::new(TermQuery::new(Term::from_field_text(self.fields.text, t), IndexRecordOption::WithFreqs));
				(Occur::Must, q)
			})
			.collect();
		clauses.extend(self.filter_clauses(filter));
		let query = BooleanQuery::new(clauses);

		let searcher = self.reader.searcher();
		let top_docs = searcher.search(&query, &TopDocs::with_limit(top_k)).map_err(Error::backend)?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			hits.push(ScoredChunk { chunk: self.fetch(&searcher, addr)?, score });
		}
		debug!(terms = ?terms, hits = hits.len(), "keyword search");
		Ok(hits)
	}

	fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
		let searcher = self.reader.searcher();
		let query = TermQuery::new(Term::from_field_text(self.fields.document_id, document_id), IndexRecordOption::Basic);
		let total = searcher.search(&query, &Count).map_err(Error::backend)?;
		if total == 0 { return Ok(vec![]); }
		let mut chunks = searcher
			.search(&query, &TopDocs::with_limit(total))
			.map_err(Error::backend)?
			.into_iter()
			.map(|(_, addr)| self.fetch(&searcher, addr))
			.collect::<Result<Vec<_>>>()?;
		chunks.sort_by_key(|c| c.chunk_index);
		Ok(chunks)
	}

	fn delete_by_document(&self, document_id: &str) -> Result<usize> {
		let term = Term::from_field_text(self.fields.document_id, document_id);
		let count = self
			.reader
			.searcher()
			.search(&TermQuery::new(term.clone(), IndexRecordOption::Basic), &Count)
			.map_err(Error::backend)?;
		if count == 0 { return Ok(0); }
		let mut writer = self.writer.lock().map_err(|_| Error::Backend("text index writer lock poisoned".into()))?;
		writer.delete_term(term);
		self.commit(&mut writer)?;
		info!(document_id, chunks = count, "deleted document chunks from text index");
		Ok(count)
	}
}

#[async_trait]
impl FullTextIndex for TantivyIndex {
	async fn index(&self, chunks: &[Chunk]) -> Result<()> {
		let chunks = chunks.to_vec();
		self.blocking(move |inner| inner.index(&chunks)).await
	}

	async fn search(&self, query: &str, top_k: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>> {
		let (query, filter) = (query.to_string(), filter.clone());
		self.blocking(move |inner| inner.search(&query, top_k, &filter)).await
	}

	async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
		let document_id = document_id.to_string();
		self.blocking(move |inner| inner.delete_by_document(&document_id)).await
	}
}
