use std::collections::HashSet;

use gridrag_core::chunking::{page_breaks_from_form_feeds, Chunker, ChunkingConfig};
use gridrag_core::types::{DocumentSource, DocumentType, SourceDocument};

fn report_text() -> String {
    let page = |p: usize| {
        (0..30)
            .map(|i| format!("Page {p} paragraph {i} reviews substation maintenance backlogs! Are outage targets met?"))
            .collect::<Vec<_>>()
            .join(" ")
    };
    format!("{}\x0c{}\x0c{}", page(1), page(2), page(3))
}

#[test]
fn chunk_document_keeps_identity_and_order_invariants() {
    let text = report_text();
    let breaks = page_breaks_from_form_feeds(&text);
    let doc = SourceDocument::new("annual-2023", "Annual Report 2023")
        .with_origin(DocumentSource::Uetcl)
        .with_doc_type(DocumentType::Report);
    let chunker = Chunker::new(ChunkingConfig { chunk_size: 120, chunk_overlap: 30 }).expect("chunker");
    let chunks = chunker.chunk_document(&doc, &text, &breaks).expect("chunks");

    assert!(chunks.len() > 3, "three pages of text should need several chunks");
    let ids: HashSet<_> = chunks.iter().map(|c| (c.document_id.clone(), c.chunk_index)).collect();
    assert_eq!(ids.len(), chunks.len(), "(document_id, chunk_index) is unique");

    for w in chunks.windows(2) {
        assert_eq!(w[1].chunk_index, w[0].chunk_index + 1);
        assert!(w[1].char_start > w[0].char_start);
        assert!(w[1].char_end > w[0].char_end);
        assert!(w[1].char_start <= w[0].char_end, "no text falls between adjacent chunks");
        assert!(w[1].page >= w[0].page);
    }
    assert_eq!(chunks.first().map(|c| c.char_start), Some(0));
    assert_eq!(chunks.last().map(|c| c.char_end), Some(text.len()));
    assert_eq!(chunks.last().and_then(|c| c.page), Some(3));
    assert!(chunks.iter().all(|c| c.origin == Some(DocumentSource::Uetcl) && c.doc_type == Some(DocumentType::Report)));
}

#[test]
fn identical_input_gives_identical_chunks() {
    let text = report_text();
    let doc = SourceDocument::new("d", "D");
    let chunker = Chunker::new(ChunkingConfig::default()).expect("chunker");
    let a = chunker.chunk_document(&doc, &text, &[]).expect("a");
    let b = chunker.chunk_document(&doc, &text, &[]).expect("b");
    assert_eq!(a, b);
    assert!(a.iter().all(|c| c.page.is_none()));
}
