// Worker pool scheduler
//
// Renders a list of source files with a fixed number of worker threads.
// Workers claim files FIFO from a shared index the moment they go idle;
// cache hits are counted as skipped without touching an engine. One file
// failing, or panicking, never aborts the run.

pub mod discover;
pub mod progress;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::cache::RenderCache;
use crate::engine::EngineId;
use crate::error::{Result, SidflowError};
use crate::render::orchestrator::panic_message;
use crate::render::{
    dedup_formats, AudioFormat, RenderFailure, RenderOrchestrator, RenderOutcome, RenderRequest,
    RenderSuccess,
};
use progress::{ProgressSink, ThreadActivityUpdate, ThreadPhase};

/// Run-level cancellation. Checked before every claim; in-flight files finish.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options for one scheduler run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub threads: usize,
    pub force_rebuild: bool,
    pub formats: Vec<AudioFormat>,
    pub engine: Option<EngineId>,
    pub song_index: Option<u32>,
    pub target_duration_ms: Option<u64>,
    pub max_render_seconds: Option<f64>,
    pub progress: ProgressSink,
    pub cancel: Option<CancelFlag>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            force_rebuild: false,
            formats: vec![AudioFormat::Wav],
            engine: None,
            song_index: None,
            target_duration_ms: None,
            max_render_seconds: None,
            progress: ProgressSink::disabled(),
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildMetrics {
    pub total: usize,
    pub rendered: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// A cache hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub source_path: PathBuf,
    pub output_paths: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub metrics: BuildMetrics,
    pub rendered: Vec<RenderSuccess>,
    pub skipped: Vec<SkippedFile>,
    pub failed: Vec<RenderFailure>,
    /// Set when cancellation left queued files unclaimed.
    pub cancelled: bool,
    pub elapsed: Duration,
}

#[derive(Default)]
struct RunState {
    rendered: Vec<RenderSuccess>,
    skipped: Vec<SkippedFile>,
    failed: Vec<RenderFailure>,
}

struct Pool<'a> {
    orchestrator: &'a RenderOrchestrator,
    cache: &'a RenderCache,
    files: &'a [PathBuf],
    options: &'a BuildOptions,
    formats: Vec<AudioFormat>,
    next: AtomicUsize,
    stopped_early: AtomicBool,
    state: Mutex<RunState>,
}

impl Pool<'_> {
    fn is_cancelled(&self) -> bool {
        self.options.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    fn publish(&self, update: ThreadActivityUpdate) {
        self.options.progress.publish(update);
    }

    fn request_for(&self, source: &Path) -> RenderRequest {
        RenderRequest::new(source, self.cache.output_dir(source))
            .with_formats(&self.formats)
            .with_engine(self.options.engine)
            .with_song_index(self.options.song_index)
            .with_target_duration_ms(self.options.target_duration_ms)
            .with_max_render_seconds(self.options.max_render_seconds)
    }

    fn run_worker(&self, worker_id: usize) {
        self.publish(ThreadActivityUpdate::new(worker_id, ThreadPhase::Idle));

        loop {
            if self.is_cancelled() {
                if self.next.load(Ordering::SeqCst) < self.files.len() {
                    self.stopped_early.store(true, Ordering::SeqCst);
                }
                break;
            }

            let index = self.next.fetch_add(1, Ordering::SeqCst);
            let Some(source) = self.files.get(index) else {
                break;
            };

            if self.cache.is_fresh(source, self.options.song_index, &self.formats, self.options.force_rebuild) {
                log::debug!("Worker {}: cache hit for {}", worker_id, source.display());
                let skipped = SkippedFile {
                    source_path: source.clone(),
                    output_paths: self.cache.output_paths(source, self.options.song_index, &self.formats),
                };
                self.lock_state().skipped.push(skipped);
                continue;
            }

            self.publish(ThreadActivityUpdate::new(worker_id, ThreadPhase::Building).with_file(source));

            let request = self.request_for(source);
            let started = Instant::now();
            let outcome = match catch_unwind(AssertUnwindSafe(|| self.orchestrator.render(&request))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!("Worker {}: render of {} panicked: {}", worker_id, source.display(), message);
                    RenderOutcome::Failed(RenderFailure {
                        source_path: source.clone(),
                        song_index: request.song_index,
                        engine: request.engine.unwrap_or(EngineId::FALLBACK),
                        error: SidflowError::Other(format!("render panicked: {}", message)),
                        retriable: false,
                        elapsed: started.elapsed(),
                        attempts: Vec::new(),
                    })
                }
            };
            match outcome {
                RenderOutcome::Rendered(success) => self.lock_state().rendered.push(success),
                RenderOutcome::Failed(failure) => self.lock_state().failed.push(failure),
            }

            self.publish(ThreadActivityUpdate::new(worker_id, ThreadPhase::Idle));
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Render every file in `files` into `cache` with `options.threads` workers.
///
/// Returns an error only for pool-level problems (a worker could not be
/// started or died); per-file failures are listed in the report.
pub fn build_wav_cache(
    orchestrator: &RenderOrchestrator,
    cache: &RenderCache,
    files: &[PathBuf],
    options: &BuildOptions,
) -> Result<BuildReport> {
    let started = Instant::now();
    let workers = options.threads.max(1);
    let formats = if options.formats.is_empty() {
        vec![AudioFormat::Wav]
    } else {
        dedup_formats(&options.formats)
    };

    log::info!(
        "Building cache for {} files with {} worker(s), formats {:?}{}",
        files.len(),
        workers,
        formats,
        if options.force_rebuild { " (force rebuild)" } else { "" }
    );

    let pool = Pool {
        orchestrator,
        cache,
        files,
        options,
        formats,
        next: AtomicUsize::new(0),
        stopped_early: AtomicBool::new(false),
        state: Mutex::new(RunState::default()),
    };

    std::thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let pool = &pool;
            let handle = std::thread::Builder::new()
                .name(format!("render-worker-{}", worker_id))
                .spawn_scoped(scope, move || pool.run_worker(worker_id))?;
            handles.push(handle);
        }

        let panicked = handles.into_iter().map(|h| h.join()).filter(|r| r.is_err()).count();
        if panicked > 0 {
            return Err(SidflowError::Other(format!("{} render worker(s) panicked", panicked)));
        }
        Ok(())
    })?;

    let state = pool.state.into_inner().unwrap_or_else(|e| e.into_inner());
    let mut report = BuildReport {
        metrics: BuildMetrics {
            total: files.len(),
            rendered: state.rendered.len(),
            skipped: state.skipped.len(),
            failed: state.failed.len(),
        },
        rendered: state.rendered,
        skipped: state.skipped,
        failed: state.failed,
        cancelled: pool.stopped_early.load(Ordering::SeqCst),
        elapsed: started.elapsed(),
    };
    report.rendered.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    report.skipped.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    report.failed.sort_by(|a, b| a.source_path.cmp(&b.source_path));

    log::info!(
        "Cache build {}: {} rendered, {} skipped, {} failed of {} in {:.1}s",
        if report.cancelled { "cancelled" } else { "complete" },
        report.metrics.rendered,
        report.metrics.skipped,
        report.metrics.failed,
        report.metrics.total,
        report.elapsed.as_secs_f64()
    );

    Ok(report)
}
