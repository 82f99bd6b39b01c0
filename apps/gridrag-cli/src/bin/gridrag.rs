use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use gridrag_core::chunking::{page_breaks_from_form_feeds, Chunker};
use gridrag_core::config::{expand_path, Config, Settings};
use gridrag_core::traits::{EmbeddingProvider, VectorIndex};
use gridrag_core::types::{DocumentSource, DocumentType, SourceDocument};
use gridrag_embed::{build_embedder, HfTokenCounter};
use gridrag_hybrid::health::{self, check_embedder, check_text_index, check_vector_index, CheckLimits, ServiceHealth};
use gridrag_hybrid::{
    ChatMode, DocumentPipeline, HybridRetriever, IngestionQueue, JobStatus, PolicyRetriever, PolicyTable, RetrieverConfig,
    ServiceStatus, SystemHealth,
};
use gridrag_text::TantivyIndex;
use gridrag_vector::{LanceVectorIndex, MemoryVectorIndex};

const USAGE: &str = "Usage: gridrag <command> [args...]

Commands:
  ingest <file|dir> [--source S] [--doc-type T]    index .txt/.md files
  reindex <file> [--source S] [--doc-type T]       replace a document's chunks
  delete <document_id>                             remove a document
  query \"<text>\" [--mode M] [--top N]              retrieve cited context
  health                                           check the embedding and index backends";

const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];

/// Positional arguments plus `--flag value` pairs.
struct Args {
    positional: Vec<String>,
    source: Option<DocumentSource>,
    doc_type: Option<DocumentType>,
    mode: Option<ChatMode>,
    top: Option<usize>,
}

fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let mut parsed = Args { positional: vec![], source: None, doc_type: None, mode: None, top: None };
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        if !arg.starts_with("--") {
            parsed.positional.push(args[i].clone());
            i += 1;
            continue;
        }
        let value = args.get(i + 1).ok_or_else(|| anyhow!("{arg} requires a value"))?;
        match arg {
            "--source" => parsed.source = Some(value.parse()?),
            "--doc-type" => parsed.doc_type = Some(value.parse()?),
            "--mode" => parsed.mode = Some(value.parse()?),
            "--top" => parsed.top = Some(value.parse().with_context(|| format!("--top expects a number, got '{value}'"))?),
            other => bail!("unknown option {other}"),
        }
        i += 2;
    }
    Ok(parsed)
}

struct Stack {
    settings: Settings,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    text: Arc<TantivyIndex>,
}

impl Stack {
    async fn open(settings: Settings) -> anyhow::Result<Self> {
        let embedder = build_embedder(&settings.embedding, &settings.retry)?;
        let vectors = open_vectors(&settings, embedder.dim()).await?;
        let text = Arc::new(TantivyIndex::open_or_create(&expand_path(&settings.data.tantivy_index_dir))?);
        Ok(Self { settings, embedder, vectors, text })
    }

    fn chunker(&self) -> anyhow::Result<Chunker> {
        let config = self.settings.chunking.clone();
        match &self.settings.embedding.tokenizer_path {
            Some(path) => Ok(Chunker::with_counter(config, Arc::new(HfTokenCounter::from_file(&expand_path(path))?))?),
            None => Ok(Chunker::new(config)?),
        }
    }

    fn pipeline(&self) -> anyhow::Result<DocumentPipeline> {
        let text: Arc<TantivyIndex> = Arc::clone(&self.text);
        Ok(DocumentPipeline::new(self.chunker()?, Arc::clone(&self.embedder), Arc::clone(&self.vectors), text)?)
    }

    fn retriever(&self) -> anyhow::Result<PolicyRetriever> {
        let text: Arc<TantivyIndex> = Arc::clone(&self.text);
        let retriever = HybridRetriever::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.vectors),
            text,
            RetrieverConfig::from(&self.settings.retrieval),
        )?;
        Ok(PolicyRetriever::new(Arc::new(retriever), PolicyTable::from_settings(&self.settings.modes)?))
    }
}

async fn open_vectors(settings: &Settings, dim: usize) -> anyhow::Result<Arc<dyn VectorIndex>> {
    match settings.data.vector_backend.as_str() {
        "lancedb" => {
            let uri = expand_path(&settings.data.lancedb_dir).to_string_lossy().into_owned();
            let table = settings.data.lancedb_table.clone();
            let index = settings.retry.run("open lancedb", || LanceVectorIndex::open(&uri, &table, dim)).await?;
            Ok(Arc::new(index))
        }
        "memory" => {
            warn!("memory vector backend: vectors are not persisted between runs");
            Ok(Arc::new(MemoryVectorIndex::new(dim)))
        }
        other => bail!("unknown data.vector_backend '{other}' (expected lancedb or memory)"),
    }
}

/// Document metadata for a file: its stem is both id and display name.
fn document_for(path: &Path, args: &Args) -> anyhow::Result<SourceDocument> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("cannot derive a document id from {}", path.display()))?;
    let mut doc = SourceDocument::new(stem, stem.replace(['_', '-'], " "));
    if let Some(source) = args.source {
        doc = doc.with_origin(source);
    }
    if let Some(doc_type) = args.doc_type {
        doc = doc.with_doc_type(doc_type);
    }
    Ok(doc)
}

fn collect_files(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|x| x.to_str()).is_some_and(|x| TEXT_EXTENSIONS.contains(&x)))
        .collect();
    files.sort();
    files
}

async fn ingest(stack: &Stack, args: &Args) -> anyhow::Result<()> {
    let root = args.positional.first().map(PathBuf::from).ok_or_else(|| anyhow!("ingest needs a file or directory"))?;
    let files = collect_files(&root);
    if files.is_empty() {
        bail!("no .txt or .md files under {}", root.display());
    }
    println!("Ingesting {} file(s) from {}", files.len(), root.display());

    let queue = IngestionQueue::start(Arc::new(stack.pipeline()?));
    let mut pending = Vec::with_capacity(files.len());
    for path in &files {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let page_breaks = page_breaks_from_form_feeds(&text);
        pending.push(queue.submit(document_for(path, args)?, text, page_breaks)?);
    }

    let bar = ProgressBar::new(pending.len() as u64);
    bar.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")?);
    let mut finished = HashSet::new();
    let (mut chunks, mut failures) = (0usize, Vec::new());
    while finished.len() < pending.len() {
        for id in &pending {
            if finished.contains(id) {
                continue;
            }
            let Some(job) = queue.status(id) else { continue };
            match job.status {
                JobStatus::Done => chunks += job.chunks_count.unwrap_or_default(),
                JobStatus::Failed => failures.push((job.document_id.clone(), job.error_message.unwrap_or_default())),
                JobStatus::Queued | JobStatus::Running => {
                    bar.set_message(format!("{} {}%", job.document_id, job.progress));
                    continue;
                }
            }
            finished.insert(*id);
            bar.inc(1);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    bar.finish_and_clear();
    queue.shutdown().await?;

    println!("✅ Ingested {} document(s), {} chunks", pending.len() - failures.len(), chunks);
    for (document_id, error) in &failures {
        eprintln!("❌ {document_id}: {error}");
    }
    if !failures.is_empty() {
        bail!("{} document(s) failed", failures.len());
    }
    Ok(())
}

async fn reindex(stack: &Stack, args: &Args) -> anyhow::Result<()> {
    let path = args.positional.first().map(PathBuf::from).ok_or_else(|| anyhow!("reindex needs a file"))?;
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let doc = document_for(&path, args)?;
    let report = stack.pipeline()?.reindex(&doc, &text, &page_breaks_from_form_feeds(&text)).await?;
    println!("✅ Reindexed {}: {} old chunks replaced by {}", report.document_id, report.old_chunks, report.new_chunks);
    Ok(())
}

async fn delete(stack: &Stack, args: &Args) -> anyhow::Result<()> {
    let document_id = args.positional.first().ok_or_else(|| anyhow!("delete needs a document id"))?;
    let report = stack.pipeline()?.delete(document_id).await?;
    println!(
        "🗑️  Deleted {}: {} text chunks, {} vectors",
        report.document_id, report.chunks_deleted, report.vectors_deleted
    );
    Ok(())
}

async fn query(stack: &Stack, args: &Args) -> anyhow::Result<()> {
    let text = args.positional.first().ok_or_else(|| anyhow!("query needs the query text"))?;
    let retriever = stack.retriever()?;
    let mut policy = retriever.policies().policy(args.mode);
    if let Some(top) = args.top {
        policy.top_n = top;
    }
    info!(mode = ?args.mode, top_n = policy.top_n, "querying");
    let bundle = retriever.retrieve_with_policy(&policy, text).await?;
    for d in &bundle.degraded {
        eprintln!("⚠️  {} search unavailable: {}", d.search_type, d.reason);
    }
    println!("{}", bundle.render());
    if !bundle.sources.is_empty() {
        println!("\nSources:");
        for source in &bundle.sources {
            println!("  {source}");
        }
    }
    Ok(())
}

/// Checks each backend on its own, so one that cannot be built still leaves
/// a report for the others.
async fn check_health(settings: &Settings) -> anyhow::Result<()> {
    let embedding = match build_embedder(&settings.embedding, &settings.retry) {
        Ok(embedder) => check_embedder(embedder.as_ref(), CheckLimits::embedding()).await,
        Err(e) => ServiceHealth::unavailable(health::EMBEDDING, &e),
    };
    let vectors = match open_vectors(settings, settings.embedding.dimensions).await {
        Ok(vectors) => check_vector_index(vectors.as_ref(), CheckLimits::index()).await,
        Err(e) => ServiceHealth::unavailable(health::VECTOR_INDEX, &e),
    };
    let text = match TantivyIndex::open_or_create(&expand_path(&settings.data.tantivy_index_dir)) {
        Ok(text) => check_text_index(&text, CheckLimits::index()).await,
        Err(e) => ServiceHealth::unavailable(health::TEXT_INDEX, &e),
    };
    let report = SystemHealth::from_services(vec![embedding, vectors, text]);

    for service in &report.services {
        let mark = match service.status {
            ServiceStatus::Healthy => "✅",
            ServiceStatus::Degraded => "⚠️ ",
            ServiceStatus::Unhealthy => "❌",
        };
        let latency = service.latency_ms.map(|ms| format!(" ({ms} ms)")).unwrap_or_default();
        println!("{mark} {:<13} {}{latency}: {}", service.name, service.status, service.message);
    }
    let caps = report.capabilities;
    println!(
        "Overall: {} | hybrid: {} semantic: {} keyword: {} ingestion: {}",
        report.status, caps.hybrid_retrieval, caps.semantic_retrieval, caps.keyword_retrieval, caps.document_ingestion
    );
    if report.status == ServiceStatus::Unhealthy {
        bail!("at least one backend is unhealthy");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut argv: Vec<String> = env::args().skip(1).collect();
    if argv.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let cmd = argv.remove(0);
    let args = parse_args(&argv)?;
    let settings = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?.settings()?;
    if cmd == "health" {
        return check_health(&settings).await;
    }
    let stack = Stack::open(settings).await?;

    match cmd.as_str() {
        "ingest" => ingest(&stack, &args).await,
        "reindex" => reindex(&stack, &args).await,
        "delete" => delete(&stack, &args).await,
        "query" => query(&stack, &args).await,
        _ => {
            eprintln!("Unknown command: {cmd}\n\n{USAGE}");
            std::process::exit(1);
        }
    }
}
