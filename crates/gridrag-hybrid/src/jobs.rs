//! Background ingestion queue with pollable job status.
//!
//! One worker task drains a FIFO channel, so documents are ingested in
//! submission order and never concurrently with each other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use gridrag_core::error::{Error, Result};
use gridrag_core::types::SourceDocument;

use crate::pipeline::DocumentPipeline;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Done | Self::Failed) }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionJob {
    pub id: JobId,
    pub document_id: String,
    pub status: JobStatus,
    /// 0 to 100.
    pub progress: u8,
    pub chunks_count: Option<usize>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

struct JobRequest {
    id: JobId,
    doc: SourceDocument,
    text: String,
    page_breaks: Vec<usize>,
}

/// Page size callers pass to [`IngestionQueue::list`] by default.
pub const DEFAULT_LIST_LIMIT: usize = 50;
/// Finished jobs kept for status polling before the oldest are dropped.
pub const DEFAULT_RETAINED_JOBS: usize = 1_000;

#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobId, IngestionJob>,
    /// Submission order, oldest first.
    order: VecDeque<JobId>,
}

impl JobTable {
    fn insert(&mut self, job: IngestionJob) {
        self.order.push_back(job.id);
        self.jobs.insert(job.id, job);
    }

    fn remove(&mut self, id: &JobId) {
        self.jobs.remove(id);
        self.order.retain(|j| j != id);
    }

    /// Drop the oldest finished jobs until at most `retain` remain. Queued
    /// and running jobs are never dropped.
    fn prune(&mut self, retain: usize) {
        let finished = self.jobs.values().filter(|j| j.status.is_terminal()).count();
        let mut excess = finished.saturating_sub(retain);
        if excess == 0 {
            return;
        }
        let Self { jobs, order } = self;
        order.retain(|id| {
            if excess > 0 && jobs.get(id).is_some_and(|j| j.status.is_terminal()) {
                jobs.remove(id);
                excess -= 1;
                return false;
            }
            true
        });
    }
}

type SharedTable = Arc<RwLock<JobTable>>;

fn read(jobs: &SharedTable) -> RwLockReadGuard<'_, JobTable> {
    jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(jobs: &SharedTable) -> RwLockWriteGuard<'_, JobTable> {
    jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn update(jobs: &SharedTable, id: JobId, f: impl FnOnce(&mut IngestionJob)) {
    if let Some(job) = write(jobs).jobs.get_mut(&id) {
        f(job);
        job.updated_at = Utc::now();
    }
}

/// Record a job's outcome and prune in one critical section, so pollers never
/// see more than `retain` finished jobs.
fn finish(jobs: &SharedTable, id: JobId, retain: usize, f: impl FnOnce(&mut IngestionJob)) {
    let mut table = write(jobs);
    if let Some(job) = table.jobs.get_mut(&id) {
        f(job);
        job.updated_at = Utc::now();
    }
    table.prune(retain);
}

pub struct IngestionQueue {
    tx: mpsc::UnboundedSender<JobRequest>,
    jobs: SharedTable,
    worker: JoinHandle<()>,
}

impl IngestionQueue {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(pipeline: Arc<DocumentPipeline>) -> Self { Self::with_retention(pipeline, DEFAULT_RETAINED_JOBS) }

    /// Like [`Self::start`], keeping at most `retain` finished jobs.
    pub fn with_retention(pipeline: Arc<DocumentPipeline>, retain: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let jobs: SharedTable = Arc::default();
        let worker = tokio::spawn(run_worker(pipeline, rx, Arc::clone(&jobs), retain));
        Self { tx, jobs, worker }
    }

    pub fn submit(&self, doc: SourceDocument, text: String, page_breaks: Vec<usize>) -> Result<JobId> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        write(&self.jobs).insert(IngestionJob {
            id,
            document_id: doc.document_id.clone(),
            status: JobStatus::Queued,
            progress: 0,
            chunks_count: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        });
        if self.tx.send(JobRequest { id, doc, text, page_breaks }).is_err() {
            write(&self.jobs).remove(&id);
            return Err(Error::Operation("ingestion queue is closed".into()));
        }
        info!(job_id = %id, "ingestion job queued");
        Ok(id)
    }

    pub fn status(&self, id: &JobId) -> Option<IngestionJob> { read(&self.jobs).jobs.get(id).cloned() }

    /// Up to `limit` known jobs, newest first.
    pub fn list(&self, limit: usize) -> Vec<IngestionJob> {
        let table = read(&self.jobs);
        table.order.iter().rev().filter_map(|id| table.jobs.get(id)).take(limit).cloned().collect()
    }

    /// Stop accepting jobs and wait for the queued ones to finish.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.tx);
        self.worker.await.map_err(|e| Error::Operation(format!("ingestion worker failed: {e}")))
    }
}

async fn run_worker(pipeline: Arc<DocumentPipeline>, mut rx: mpsc::UnboundedReceiver<JobRequest>, jobs: SharedTable, retain: usize) {
    while let Some(req) = rx.recv().await {
        update(&jobs, req.id, |j| {
            j.status = JobStatus::Running;
            j.progress = 5;
        });
        let progress_jobs = Arc::clone(&jobs);
        let id = req.id;
        let on_progress = move |p: u8| update(&progress_jobs, id, |j| j.progress = p);
        let outcome = pipeline.ingest_with_progress(&req.doc, &req.text, &req.page_breaks, &on_progress).await;
        let now = Utc::now();
        match outcome {
            Ok(report) => {
                info!(job_id = %id, document_id = %report.document_id, chunks = report.chunks, "ingestion job done");
                finish(&jobs, id, retain, |j| {
                    j.status = JobStatus::Done;
                    j.progress = 100;
                    j.chunks_count = Some(report.chunks);
                    j.completed_at = Some(now);
                });
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "ingestion job failed");
                finish(&jobs, id, retain, |j| {
                    j.status = JobStatus::Failed;
                    j.error_message = Some(e.to_string());
                    j.completed_at = Some(now);
                });
            }
        }
    }
}
