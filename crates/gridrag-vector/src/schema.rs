use arrow_array::cast::AsArray;
use arrow_array::types::{ArrowPrimitiveType, Float32Type, UInt32Type, UInt64Type};
use arrow_array::{Array, ArrayRef, FixedSizeListArray, PrimitiveArray, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

use gridrag_core::error::{Error, Result};
use gridrag_core::types::{Chunk, VectorRecord};

pub const VECTOR_COLUMN: &str = "vector";
pub const DISTANCE_COLUMN: &str = "_distance";

/// Chunk payload columns plus a `FixedSizeList<Float32>` vector of width `dim`.
pub fn build_arrow_schema(dim: usize) -> Result<SchemaRef> {
	let width = i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("vector dimension {dim} is too large")))?;
	Ok(Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("document_id", DataType::Utf8, false),
		Field::new("chunk_index", DataType::UInt32, false),
		Field::new("text", DataType::Utf8, false),
		Field::new("source", DataType::Utf8, true),
		Field::new("page", DataType::UInt32, true),
		Field::new("char_start", DataType::UInt64, false),
		Field::new("char_end", DataType::UInt64, false),
		Field::new("origin", DataType::Utf8, true),
		Field::new("doc_type", DataType::Utf8, true),
		Field::new(VECTOR_COLUMN, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), width), true),
	])))
}

/// Width of the vector column of an existing table.
pub fn vector_dim(schema: &Schema) -> Option<usize> {
	match schema.field_with_name(VECTOR_COLUMN).ok()?.data_type() {
		DataType::FixedSizeList(_, width) => usize::try_from(*width).ok(),
		_ => None,
	}
}

pub fn records_to_batch(records: &[VectorRecord], dim: usize) -> Result<RecordBatch> {
	if let Some(bad) = records.iter().find(|r| r.vector.len() != dim) {
		return Err(Error::DimensionMismatch { expected: dim, actual: bad.vector.len() });
	}
	let schema = build_arrow_schema(dim)?;
	let chunks = || records.iter().map(|r| &r.chunk);
	let vectors = records.iter().map(|r| Some(r.vector.iter().copied().map(Some).collect::<Vec<_>>()));
	let columns: Vec<ArrayRef> = vec![
		Arc::new(StringArray::from_iter_values(chunks().map(|c| c.id.as_str()))),
		Arc::new(StringArray::from_iter_values(chunks().map(|c| c.document_id.as_str()))),
		Arc::new(UInt32Array::from_iter_values(chunks().map(|c| c.chunk_index as u32))),
		Arc::new(StringArray::from_iter_values(chunks().map(|c| c.text.as_str()))),
		Arc::new(chunks().map(|c| c.source.as_deref()).collect::<StringArray>()),
		Arc::new(chunks().map(|c| c.page).collect::<UInt32Array>()),
		Arc::new(UInt64Array::from_iter_values(chunks().map(|c| c.char_start as u64))),
		Arc::new(UInt64Array::from_iter_values(chunks().map(|c| c.char_end as u64))),
		Arc::new(chunks().map(|c| c.origin.map(|o| o.as_str())).collect::<StringArray>()),
		Arc::new(chunks().map(|c| c.doc_type.map(|t| t.as_str())).collect::<StringArray>()),
		Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim as i32)),
	];
	RecordBatch::try_new(schema, columns).map_err(Error::backend)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<StringArray>())
		.ok_or_else(|| Error::Backend(format!("vector table column '{name}' missing or not utf8")))
}

fn primitive_column<'a, T: ArrowPrimitiveType>(batch: &'a RecordBatch, name: &str) -> Result<&'a PrimitiveArray<T>> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_primitive_opt::<T>())
		.ok_or_else(|| Error::Backend(format!("vector table column '{name}' missing or of unexpected type")))
}

/// Decode result rows into chunks paired with their `_distance`, when present.
pub fn batch_to_hits(batch: &RecordBatch) -> Result<Vec<(Chunk, Option<f32>)>> {
	let ids = string_column(batch, "id")?;
	let document_ids = string_column(batch, "document_id")?;
	let texts = string_column(batch, "text")?;
	let sources = string_column(batch, "source")?;
	let origins = string_column(batch, "origin")?;
	let doc_types = string_column(batch, "doc_type")?;
	let chunk_index = primitive_column::<UInt32Type>(batch, "chunk_index")?;
	let pages = primitive_column::<UInt32Type>(batch, "page")?;
	let starts = primitive_column::<UInt64Type>(batch, "char_start")?;
	let ends = primitive_column::<UInt64Type>(batch, "char_end")?;
	let distances = batch.column_by_name(DISTANCE_COLUMN).and_then(|c| c.as_primitive_opt::<Float32Type>());

	let opt_str = |a: &StringArray, i: usize| (!a.is_null(i)).then(|| a.value(i).to_string());
	let mut out = Vec::with_capacity(batch.num_rows());
	for i in 0..batch.num_rows() {
		let chunk = Chunk {
			id: ids.value(i).to_string(),
			document_id: document_ids.value(i).to_string(),
			chunk_index: chunk_index.value(i) as usize,
			text: texts.value(i).to_string(),
			source: opt_str(sources, i),
			page: (!pages.is_null(i)).then(|| pages.value(i)),
			char_start: starts.value(i) as usize,
			char_end: ends.value(i) as usize,
			origin: opt_str(origins, i).and_then(|s| s.parse().ok()),
			doc_type: opt_str(doc_types, i).and_then(|s| s.parse().ok()),
		};
		out.push((chunk, distances.map(|d| d.value(i))));
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use gridrag_core::types::{DocumentSource, DocumentType};

	fn record(idx: usize, page: Option<u32>) -> VectorRecord {
		VectorRecord {
			chunk: Chunk {
				id: Chunk::make_id("doc", idx),
				document_id: "doc".into(),
				chunk_index: idx,
				text: format!("passage {idx}"),
				source: page.map(|_| "era - Grid Code".to_string()),
				page,
				char_start: idx * 10,
				char_end: idx * 10 + 9,
				origin: page.map(|_| DocumentSource::Era),
				doc_type: Some(DocumentType::Regulatory),
			},
			vector: vec![idx as f32, 1.0, 0.0],
		}
	}

	#[test]
	fn batch_keeps_payload_including_nulls() {
		let records = vec![record(0, Some(2)), record(1, None)];
		let batch = records_to_batch(&records, 3).expect("batch");
		assert_eq!(vector_dim(&batch.schema()), Some(3));
		let hits = batch_to_hits(&batch).expect("decode");
		assert_eq!(hits.len(), 2);
		assert_eq!(hits[0].0, records[0].chunk);
		assert_eq!(hits[1].0, records[1].chunk);
		assert_eq!(hits[0].1, None);
	}

	#[test]
	fn wrong_width_is_a_dimension_mismatch() {
		let err = records_to_batch(&[record(0, None)], 4).err();
		assert!(matches!(err, Some(Error::DimensionMismatch { expected: 4, actual: 3 })));
	}
}
