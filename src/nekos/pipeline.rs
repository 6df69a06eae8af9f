use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::nekos::collector::UrlSink;
use crate::nekos::dedup::Deduper;
use crate::nekos::error::NekosResult;
use crate::nekos::io::directory::count_images;
use crate::nekos::queue::{DownloadTask, WorkQueue};
use crate::nekos::sender::ImageFetcher;
use crate::nekos::tui::ProgressReporter;
use crate::nekos::urls::ImageUrl;
use crate::nekos::worker::{DownloadOutcome, DownloadWorkerPool, Downloader, FinishedHook};

#[derive(Debug)]
struct EstimateState {
    started: Instant,
    seconds_per_image: Option<f64>,
}

/// Running estimate of how long the remaining downloads take. Display only.
#[derive(Debug)]
pub(crate) struct EstimateTracker {
    state: Mutex<EstimateState>,
}

impl EstimateTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(EstimateState {
                started: Instant::now(),
                seconds_per_image: None,
            }),
        }
    }

    /// Folds one finished download into the average, weighted by the images already on disk.
    pub(crate) fn record(&self, seconds: f64, on_disk: usize) {
        let mut state = self.state.lock();
        state.seconds_per_image = Some(match state.seconds_per_image {
            None => seconds,
            Some(average) => {
                let n = on_disk as f64;
                (n * average + seconds) / (n + 1.0)
            }
        });
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.state.lock().started.elapsed()
    }

    /// Elapsed time plus the average time of each image still waiting.
    pub(crate) fn estimate(&self, planned: usize) -> Duration {
        let state = self.state.lock();
        let remaining = state.seconds_per_image.unwrap_or(0.0) * planned as f64;
        state.started.elapsed() + Duration::from_secs_f64(remaining.max(0.0))
    }

    /// Restarts the clock, keeping the learned average.
    pub(crate) fn restart(&self) {
        self.state.lock().started = Instant::now();
    }
}

struct PipelineShared {
    save_dir: PathBuf,
    queue: Arc<WorkQueue>,
    deduper: Deduper,
    estimate: EstimateTracker,
    reporter: Arc<dyn ProgressReporter>,
    epoch: Arc<AtomicU64>,
}

/// Cheap, cloneable access to a running [DownloadPipeline].
#[derive(Clone)]
pub(crate) struct PipelineHandle {
    shared: Arc<PipelineShared>,
}

impl PipelineHandle {
    pub(crate) fn save_dir(&self) -> &Path {
        &self.shared.save_dir
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    /// Queues `url` under `epoch` unless its file is already present.
    fn enqueue_in(&self, url: &ImageUrl, epoch: u64) -> bool {
        if !self.shared.deduper.should_enqueue(url) {
            return false;
        }
        let task = DownloadTask::new(url.clone(), &self.shared.save_dir, epoch);
        self.shared.queue.enqueue(task);
        true
    }

    /// Queues every URL whose file is missing, returning how many were queued.
    pub(crate) fn enqueue_all(&self, urls: &[ImageUrl]) -> usize {
        let epoch = self.epoch();
        let queued = urls.iter().filter(|url| self.enqueue_in(url, epoch)).count();
        if queued > 0 {
            debug!("Queued {} of {} urls", queued, urls.len());
        }
        queued
    }

    /// Pushes the current counts to the reporter.
    pub(crate) fn report_progress(&self) {
        let done = count_images(&self.shared.save_dir);
        self.report(done, self.shared.queue.outstanding());
    }

    /// `remaining` counts queued and running downloads, the total is `done + remaining`.
    fn report(&self, done: usize, remaining: usize) {
        let planned = self.shared.queue.pending();
        self.shared.reporter.on_progress(
            done,
            done + remaining,
            self.shared.estimate.elapsed(),
            self.shared.estimate.estimate(planned),
        );
    }

    /// A sink that stops accepting URLs once the session epoch moves on.
    pub(crate) fn session_sink(&self) -> SessionSink {
        SessionSink {
            handle: self.clone(),
            epoch: self.epoch(),
        }
    }

    fn on_finished(&self, task: &DownloadTask, outcome: &DownloadOutcome) {
        self.shared.reporter.on_outcome(task, outcome);
        let on_disk = count_images(&self.shared.save_dir);
        if let DownloadOutcome::Completed { elapsed, .. } = outcome {
            self.shared.estimate.record(elapsed.as_secs_f64(), on_disk);
        }
        // The finished task is marked done only after this hook returns.
        self.report(on_disk, self.shared.queue.outstanding().saturating_sub(1));
    }
}

impl UrlSink for PipelineHandle {
    fn submit(&self, urls: &[ImageUrl]) -> usize {
        let queued = self.enqueue_all(urls);
        self.report_progress();
        queued
    }
}

/// URL sink bound to the session epoch it was created in.
#[derive(Clone)]
pub(crate) struct SessionSink {
    handle: PipelineHandle,
    epoch: u64,
}

impl UrlSink for SessionSink {
    fn submit(&self, urls: &[ImageUrl]) -> usize {
        if !self.accepting() {
            return 0;
        }
        let queued = urls.iter().filter(|url| self.handle.enqueue_in(url, self.epoch)).count();
        self.handle.report_progress();
        queued
    }

    fn accepting(&self) -> bool {
        self.handle.epoch() == self.epoch
    }
}

/// Download workers sharing one queue and one save directory.
pub(crate) struct DownloadPipeline {
    handle: PipelineHandle,
    pool: DownloadWorkerPool,
}

impl DownloadPipeline {
    /// Creates the save directory and starts the workers.
    ///
    /// # Arguments
    ///
    /// * `save_dir`: Where images are saved, created when missing.
    /// * `threads`: Number of download workers.
    /// * `chunk_size`: Bytes written per chunk.
    /// * `fetcher`: Opens image bodies.
    /// * `reporter`: Receives progress and outcomes.
    pub(crate) fn start(
        save_dir: &Path,
        threads: usize,
        chunk_size: usize,
        fetcher: Arc<dyn ImageFetcher>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> NekosResult<Self> {
        create_dir_all(save_dir)?;

        let queue = Arc::new(WorkQueue::new());
        let epoch = Arc::new(AtomicU64::new(0));
        let handle = PipelineHandle {
            shared: Arc::new(PipelineShared {
                save_dir: save_dir.to_path_buf(),
                queue: Arc::clone(&queue),
                deduper: Deduper::new(save_dir),
                estimate: EstimateTracker::new(),
                reporter,
                epoch: Arc::clone(&epoch),
            }),
        };

        let downloader = Arc::new(Downloader::new(fetcher, chunk_size, epoch));
        let hook: FinishedHook = {
            let handle = handle.clone();
            Arc::new(move |task: &DownloadTask, outcome: &DownloadOutcome| handle.on_finished(task, outcome))
        };
        let pool = DownloadWorkerPool::spawn(threads, queue, downloader, hook)?;
        info!("Started {} download workers for {}", pool.size(), save_dir.display());

        Ok(Self { handle, pool })
    }

    pub(crate) fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    pub(crate) fn save_dir(&self) -> &Path {
        self.handle.save_dir()
    }

    /// Blocks until every queued download finished, or `timeout` elapses.
    ///
    /// Returns whether everything finished; on timeout the workers keep running.
    pub(crate) fn wait_until_finished(&self, timeout: Duration) -> bool {
        self.handle.shared.queue.wait_until_empty(timeout)
    }

    /// Blocks until any download finishes, or `timeout` elapses.
    pub(crate) fn wait_for_progress(&self, timeout: Duration) -> bool {
        self.handle.shared.queue.wait_for_progress(timeout)
    }

    /// Drops every download that has not started yet.
    pub(crate) fn cancel_pending(&self) -> usize {
        let discarded = self.handle.shared.queue.drain_and_discard();
        if discarded > 0 {
            debug!("Discarded {} pending downloads", discarded);
        }
        discarded
    }

    /// Starts a new session: running downloads of the old one abort at their next chunk.
    pub(crate) fn new_epoch(&self) -> u64 {
        let epoch = self.handle.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.handle.shared.estimate.restart();
        trace!("Session epoch is now {}", epoch);
        epoch
    }

    /// Downloads queued or in progress.
    pub(crate) fn outstanding(&self) -> usize {
        self.handle.shared.queue.outstanding()
    }

    /// Completed images in the save directory.
    pub(crate) fn loaded(&self) -> usize {
        count_images(self.save_dir())
    }

    pub(crate) fn finish(&self, message: &str) {
        self.handle.shared.reporter.finish(message);
    }

    /// Lets the workers drain the queue and joins them.
    pub(crate) fn shutdown(self) {
        self.pool.shutdown();
    }
}
