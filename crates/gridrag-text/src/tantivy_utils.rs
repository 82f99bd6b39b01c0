use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{Language, LowerCaser, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const TEXT_TOKENIZER: &str = "text_en_stem";

/// Field handles of the chunk schema.
#[derive(Debug, Clone, Copy)]
pub struct ChunkFields {
	pub id: Field,
	pub document_id: Field,
	pub chunk_index: Field,
	pub text: Field,
	pub source: Field,
	pub page: Field,
	pub char_start: Field,
	pub char_end: Field,
	pub origin: Field,
	pub doc_type: Field,
}

impl ChunkFields {
	pub fn from_schema(schema: &Schema) -> tantivy::Result<Self> {
		Ok(Self {
			id: schema.get_field("id")?,
			document_id: schema.get_field("document_id")?,
			chunk_index: schema.get_field("chunk_index")?,
			text: schema.get_field("text")?,
			source: schema.get_field("source")?,
			page: schema.get_field("page")?,
			char_start: schema.get_field("char_start")?,
			char_end: schema.get_field("char_end")?,
			origin: schema.get_field("origin")?,
			doc_type: schema.get_field("doc_type")?,
		})
	}
}

/// `id`, `document_id`, `origin` and `doc_type` are raw indexed strings so
/// they can serve as delete keys and filters; `text` is analyzed with
/// positions for BM25 ranking.
pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field("id", STRING | STORED);
	schema_builder.add_text_field("document_id", STRING | STORED);
	schema_builder.add_u64_field("chunk_index", STORED);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(TEXT_TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing).set_stored();
	schema_builder.add_text_field("text", text_options);
	schema_builder.add_text_field("source", STORED);
	schema_builder.add_u64_field("page", STORED);
	schema_builder.add_u64_field("char_start", STORED);
	schema_builder.add_u64_field("char_end", STORED);
	schema_builder.add_text_field("origin", STRING | STORED);
	schema_builder.add_text_field("doc_type", STRING | STORED);
	schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
	let stop_words = vec![
		"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
	];
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
		.filter(Stemmer::new(Language::English))
		.build();
	index.tokenizers().register(TEXT_TOKENIZER, tokenizer);
}
