use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, unbounded};
use tracing::{error, info, info_span, warn};

use crate::compositor::WatermarkCompositor;
use crate::error::{AppError, ErrorCategory};
use crate::export::{OutputPathPlanner, write_image};
use crate::parse_exif::DateResolver;
use crate::settings::{ExportSpec, WatermarkSpec};

/// Where the text of one item comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TextSource {
    Literal(String),
    /// The capture date of the image, else `fallback`. With neither the item is skipped.
    CaptureDate { fallback: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub source: PathBuf,
    pub text: TextSource,
}

impl BatchItem {
    pub fn new<P: Into<PathBuf>>(source: P, text: TextSource) -> Self {
        Self {
            source: source.into(),
            text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Succeeded { output: PathBuf },
    Failed { category: ErrorCategory, message: String },
    Skipped { reason: String },
}

/// Result of one attempted item.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionResult {
    pub source: PathBuf,
    pub outcome: ItemOutcome,
}

impl CompositionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Succeeded { .. })
    }

    pub fn output(&self) -> Option<&Path> {
        match &self.outcome {
            ItemOutcome::Succeeded { output } => Some(output),
            _ => None,
        }
    }

    pub fn error_category(&self) -> Option<ErrorCategory> {
        match &self.outcome {
            ItemOutcome::Failed { category, .. } => Some(*category),
            ItemOutcome::Skipped { .. } => Some(ErrorCategory::MetadataUnavailable),
            ItemOutcome::Succeeded { .. } => None,
        }
    }

    fn status(&self) -> ItemStatus {
        match self.outcome {
            ItemOutcome::Succeeded { .. } => ItemStatus::Succeeded,
            ItemOutcome::Failed { .. } => ItemStatus::Failed,
            ItemOutcome::Skipped { .. } => ItemStatus::Skipped,
        }
    }

    fn message(&self) -> String {
        match &self.outcome {
            ItemOutcome::Succeeded { output } => format!("saved to {}", output.display()),
            ItemOutcome::Failed { message, .. } => message.clone(),
            ItemOutcome::Skipped { reason } => reason.clone(),
        }
    }
}

/// Cooperative cancellation flag shared between a batch and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// A list of images to export with their own snapshot of the settings.
#[derive(Debug)]
pub struct BatchJob {
    items: Vec<BatchItem>,
    watermark: WatermarkSpec,
    export: ExportSpec,
    statuses: Vec<ItemStatus>,
    current: usize,
    results: Vec<CompositionResult>,
    cancel: CancelToken,
}

impl BatchJob {
    pub fn new(items: Vec<BatchItem>, watermark: WatermarkSpec, export: ExportSpec) -> Self {
        Self {
            statuses: vec![ItemStatus::Pending; items.len()],
            items,
            watermark,
            export,
            current: 0,
            results: Vec::new(),
            cancel: CancelToken::default(),
        }
    }

    /// One item per path, all with the same text source.
    pub fn from_paths<I, P>(
        paths: I,
        text: TextSource,
        watermark: WatermarkSpec,
        export: ExportSpec,
    ) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let items = paths
            .into_iter()
            .map(|p| BatchItem::new(p, text.clone()))
            .collect();
        Self::new(items, watermark, export)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Index of the item processed last (or being processed).
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn statuses(&self) -> &[ItemStatus] {
        &self.statuses
    }

    pub fn results(&self) -> &[CompositionResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<CompositionResult> {
        self.results
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub state: BatchState,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Set when at least one image was written.
    pub destination: Option<PathBuf>,
    pub message: String,
}

impl BatchSummary {
    fn new(
        state: BatchState,
        total: usize,
        results: &[CompositionResult],
        destination: &Path,
    ) -> Self {
        let count = |status| results.iter().filter(|r| r.status() == status).count();
        let succeeded = count(ItemStatus::Succeeded);
        let message = match state {
            BatchState::Cancelled => format!(
                "Cancelled after {} of {total} images, {succeeded} succeeded",
                results.len()
            ),
            _ => format!("Processed {succeeded}/{total} images successfully"),
        };
        Self {
            state,
            total,
            succeeded,
            failed: count(ItemStatus::Failed),
            skipped: count(ItemStatus::Skipped),
            destination: (succeeded > 0).then(|| destination.to_path_buf()),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Started { total: usize },
    Item { name: String, success: bool, message: String },
    Progress { completed: usize, total: usize },
    Finished(BatchSummary),
}

#[derive(Debug)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub results: Vec<CompositionResult>,
}

/// Handle on a batch running on its worker thread.
pub struct BatchHandle {
    pub events: Receiver<BatchEvent>,
    cancel: CancelToken,
    worker: JoinHandle<BatchReport>,
}

impl BatchHandle {
    /// Stops the batch before its next item. The item in flight still completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn join(self) -> Result<BatchReport, AppError> {
        self.worker
            .join()
            .map_err(|panic| AppError::Worker(panic_message(panic.as_ref())))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("(unknown)")
        .to_string()
}

/// Runs a [`BatchJob`] one image at a time.
pub struct BatchExportController {
    compositor: WatermarkCompositor,
    resolver: DateResolver,
    state: BatchState,
}

impl Default for BatchExportController {
    fn default() -> Self {
        Self::new(WatermarkCompositor::default(), DateResolver::default())
    }
}

impl BatchExportController {
    pub fn new(compositor: WatermarkCompositor, resolver: DateResolver) -> Self {
        Self {
            compositor,
            resolver,
            state: BatchState::Idle,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Processes every item of `job` in order on the calling thread, reporting
    /// to `sink`. Item failures are recorded and never stop the batch; the
    /// cancel token is checked before each item.
    pub fn run<F: FnMut(BatchEvent)>(&mut self, job: &mut BatchJob, mut sink: F) -> BatchSummary {
        let total = job.items.len();
        self.state = BatchState::Running;
        info!("Exporting {total} images to {:?}", job.export.destination);
        sink(BatchEvent::Started { total });

        for index in 0..total {
            if job.cancel.is_cancelled() {
                info!("Batch cancelled after {index} of {total} images");
                self.state = BatchState::Cancelled;
                break;
            }
            job.current = index;
            job.statuses[index] = ItemStatus::Processing;

            let result = self.process_item(&job.items[index], &job.watermark, &job.export);
            job.statuses[index] = result.status();
            sink(BatchEvent::Item {
                name: file_name(&result.source),
                success: result.is_success(),
                message: result.message(),
            });
            job.results.push(result);
            sink(BatchEvent::Progress {
                completed: index + 1,
                total,
            });
        }

        if self.state == BatchState::Running {
            self.state = BatchState::Completed;
        }
        let summary = BatchSummary::new(
            self.state,
            total,
            &job.results,
            &job.export.destination,
        );
        info!("{}", summary.message);
        sink(BatchEvent::Finished(summary.clone()));
        summary
    }

    /// Moves the controller and `job` onto a dedicated worker thread. Events
    /// arrive on the returned handle's channel.
    pub fn spawn(mut self, mut job: BatchJob) -> Result<BatchHandle, AppError> {
        let (tx, rx) = unbounded();
        let cancel = job.cancel_token();
        let worker = thread::Builder::new()
            .name("batch-export".to_string())
            .spawn(move || {
                let summary = self.run(&mut job, |event| {
                    // The receiver may have been dropped; the batch still finishes.
                    let _ = tx.send(event);
                });
                BatchReport {
                    summary,
                    results: job.into_results(),
                }
            })?;
        Ok(BatchHandle {
            events: rx,
            cancel,
            worker,
        })
    }

    fn resolve_text(&self, item: &BatchItem) -> Option<String> {
        match &item.text {
            TextSource::Literal(text) => Some(text.clone()),
            TextSource::CaptureDate { fallback } => self
                .resolver
                .resolve(&item.source)
                .or_else(|| fallback.clone()),
        }
    }

    fn export_one(
        &self,
        source: &Path,
        spec: &WatermarkSpec,
        export: &ExportSpec,
        text: &str,
    ) -> Result<PathBuf, AppError> {
        let image = self.compositor.render_file(source, spec, text)?;
        let planner = OutputPathPlanner::new(export);
        let out_path = planner.plan(source);
        planner.prepare()?;
        write_image(&image, source, &out_path, export)?;
        Ok(out_path)
    }

    fn process_item(
        &self,
        item: &BatchItem,
        spec: &WatermarkSpec,
        export: &ExportSpec,
    ) -> CompositionResult {
        let span = info_span!("item", source = %item.source.display());
        let _enter = span.enter();

        let Some(text) = self.resolve_text(item) else {
            warn!("Skipping {:?}: no capture date available", item.source);
            return CompositionResult {
                source: item.source.clone(),
                outcome: ItemOutcome::Skipped {
                    reason: "no capture date available".to_string(),
                },
            };
        };

        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            self.export_one(&item.source, spec, export, &text)
        }));
        let outcome = match attempt {
            Ok(Ok(output)) => {
                info!("✅ {} → {}", file_name(&item.source), file_name(&output));
                ItemOutcome::Succeeded { output }
            }
            Ok(Err(e)) => {
                let e = e.in_composition_of(&item.source);
                error!("{e}");
                ItemOutcome::Failed {
                    category: e.category(),
                    message: e.to_string(),
                }
            }
            Err(panic) => {
                let e = AppError::Composition {
                    path: item.source.clone(),
                    reason: panic_message(panic.as_ref()),
                    source: None,
                };
                error!("{e}");
                ItemOutcome::Failed {
                    category: e.category(),
                    message: e.to_string(),
                }
            }
        };
        CompositionResult {
            source: item.source.clone(),
            outcome,
        }
    }
}
