use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::nekos::error::DownloadError;
use crate::nekos::io::directory::{partial_path, remove_if_present};
use crate::nekos::queue::{DownloadTask, WorkQueue};
use crate::nekos::sender::ImageFetcher;

/// Result of one download attempt.
#[derive(Debug)]
pub(crate) enum DownloadOutcome {
    Completed { bytes: u64, elapsed: Duration },
    Failed(DownloadError),
}

/// Called by a worker after every attempt, before the task is marked done.
pub(crate) type FinishedHook = Arc<dyn Fn(&DownloadTask, &DownloadOutcome) + Send + Sync>;

/// Streams single images to disk, never exposing a half written file under its final name.
pub(crate) struct Downloader {
    fetcher: Arc<dyn ImageFetcher>,
    chunk_size: usize,
    /// Current session epoch; tasks from an older epoch are abandoned.
    epoch: Arc<AtomicU64>,
    /// Numbers the partial file of every attempt.
    attempts: AtomicU64,
}

impl Downloader {
    pub(crate) fn new(fetcher: Arc<dyn ImageFetcher>, chunk_size: usize, epoch: Arc<AtomicU64>) -> Self {
        Self {
            fetcher,
            chunk_size: chunk_size.max(1),
            epoch,
            attempts: AtomicU64::new(0),
        }
    }

    /// Downloads `task` into `<target>.<attempt>.partial` and renames it into place on success.
    ///
    /// Any failure removes the partial file, nothing is retried. Two attempts at the same target
    /// write separate partials, the last rename wins.
    pub(crate) fn download(&self, task: &DownloadTask) -> DownloadOutcome {
        let start = Instant::now();
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        let partial = partial_path(task.target_path(), attempt);

        match self.stream_to(task, &partial) {
            Ok(bytes) => DownloadOutcome::Completed {
                bytes,
                elapsed: start.elapsed(),
            },
            Err(err) => {
                if let Err(remove_err) = remove_if_present(&partial) {
                    warn!("Unable to remove {}: {}", partial.display(), remove_err);
                }
                DownloadOutcome::Failed(err)
            }
        }
    }

    fn stream_to(&self, task: &DownloadTask, partial: &Path) -> Result<u64, DownloadError> {
        self.check_epoch(task)?;
        let mut body = self.fetcher.open(task.url())?;
        let mut file = File::create(partial)?;

        let mut buffer = vec![0; self.chunk_size];
        let mut bytes = 0;
        loop {
            let read = match body.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            file.write_all(&buffer[..read])?;
            bytes += read as u64;
            self.check_epoch(task)?;
        }

        file.flush()?;
        drop(file);

        self.check_epoch(task)?;
        fs::rename(partial, task.target_path())?;
        Ok(bytes)
    }

    fn check_epoch(&self, task: &DownloadTask) -> Result<(), DownloadError> {
        if task.epoch() != self.epoch.load(Ordering::SeqCst) {
            return Err(DownloadError::Cancelled);
        }
        Ok(())
    }
}

/// A fixed number of long lived threads draining a [WorkQueue].
pub(crate) struct DownloadWorkerPool {
    queue: Arc<WorkQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl DownloadWorkerPool {
    /// Starts `size` workers.
    ///
    /// # Arguments
    ///
    /// * `size`: Number of workers, at least one is started.
    /// * `queue`: The queue the workers drain.
    /// * `downloader`: Performs the actual transfers.
    /// * `on_finished`: Receives every outcome.
    pub(crate) fn spawn(
        size: usize,
        queue: Arc<WorkQueue>,
        downloader: Arc<Downloader>,
        on_finished: FinishedHook,
    ) -> io::Result<Self> {
        let mut workers = Vec::with_capacity(size.max(1));
        for i in 0..size.max(1) {
            let queue = Arc::clone(&queue);
            let downloader = Arc::clone(&downloader);
            let on_finished = Arc::clone(&on_finished);
            let handle = thread::Builder::new()
                .name(format!("nldlworker_{i}"))
                .spawn(move || work(&queue, &downloader, &on_finished))?;
            workers.push(handle);
        }

        trace!("Started {} download workers", workers.len());
        Ok(Self { queue, workers })
    }

    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }

    /// Closes the queue and waits for every worker to finish its remaining tasks.
    pub(crate) fn shutdown(mut self) {
        self.queue.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("A download worker panicked");
            }
        }
    }
}

impl Drop for DownloadWorkerPool {
    /// Workers still busy are detached, they exit once the queue is empty.
    fn drop(&mut self) {
        self.queue.close();
    }
}

fn work(queue: &WorkQueue, downloader: &Downloader, on_finished: &FinishedHook) {
    while let Some(task) = queue.dequeue() {
        let outcome = downloader.download(&task);
        on_finished(&task, &outcome);
        queue.mark_done();
    }
    trace!("{} exiting", thread::current().name().unwrap_or("worker"));
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::mpsc::{self, Receiver, Sender};

    use parking_lot::Mutex;
    use tempfile::tempdir;

    use super::*;
    use crate::nekos::io::directory::{is_partial, list_images};
    use crate::nekos::urls::ImageUrl;

    /// Serves fixed bodies by URL, unknown URLs fail with 404.
    #[derive(Default)]
    pub(crate) struct StubFetcher {
        pub(crate) bodies: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl StubFetcher {
        pub(crate) fn serve(&self, url: &str, body: &[u8]) {
            self.bodies.lock().insert(url.to_string(), body.to_vec());
        }
    }

    impl ImageFetcher for StubFetcher {
        fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, DownloadError> {
            match self.bodies.lock().get(url) {
                Some(body) => Ok(Box::new(io::Cursor::new(body.clone()))),
                None => Err(DownloadError::Status(404)),
            }
        }
    }

    /// Yields one byte per step; each step waits for a go signal, a closed channel breaks the stream.
    struct GatedBody {
        steps: Receiver<()>,
        remaining: usize,
    }

    impl Read for GatedBody {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Ok(0);
            }
            self.steps
                .recv()
                .map_err(|_| io::Error::new(io::ErrorKind::ConnectionReset, "stream broken"))?;
            buf[0] = b'x';
            self.remaining -= 1;
            Ok(1)
        }
    }

    /// Hands out its gated bodies in order, one per request.
    struct GatedFetcher {
        bodies: Mutex<VecDeque<GatedBody>>,
    }

    impl GatedFetcher {
        fn new(len: usize) -> (Self, Sender<()>) {
            let fetcher = Self {
                bodies: Mutex::new(VecDeque::new()),
            };
            let steps = fetcher.push(len);
            (fetcher, steps)
        }

        fn push(&self, len: usize) -> Sender<()> {
            let (tx, rx) = mpsc::channel();
            self.bodies.lock().push_back(GatedBody { steps: rx, remaining: len });
            tx
        }
    }

    impl ImageFetcher for GatedFetcher {
        fn open(&self, _url: &str) -> Result<Box<dyn Read + Send>, DownloadError> {
            match self.bodies.lock().pop_front() {
                Some(body) => Ok(Box::new(body)),
                None => Err(DownloadError::Status(410)),
            }
        }
    }

    fn wait_for_partials(dir: &Path, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while partials(dir).len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(partials(dir).len(), count);
    }

    fn partials(dir: &Path) -> Vec<std::path::PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| is_partial(path))
            .collect()
    }

    fn task(dir: &Path, name: &str) -> DownloadTask {
        DownloadTask::new(ImageUrl::new(format!("https://cdn.example/{name}")), dir, 0)
    }

    #[test]
    fn test_download_renames_into_place() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.serve("https://cdn.example/a.png", &[7; 10]);
        let downloader = Downloader::new(fetcher, 3, Arc::new(AtomicU64::new(0)));

        let outcome = downloader.download(&task(dir.path(), "a.png"));
        assert!(matches!(outcome, DownloadOutcome::Completed { bytes: 10, .. }));
        assert_eq!(fs::read(dir.path().join("a.png")).unwrap(), vec![7; 10]);
        assert!(partials(dir.path()).is_empty());
    }

    #[test]
    fn test_failed_request_leaves_nothing() {
        let dir = tempdir().unwrap();
        let downloader = Downloader::new(Arc::new(StubFetcher::default()), 3, Arc::new(AtomicU64::new(0)));

        let outcome = downloader.download(&task(dir.path(), "missing.png"));
        assert!(matches!(outcome, DownloadOutcome::Failed(DownloadError::Status(404))));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_target_is_invisible_until_complete() {
        let dir = tempdir().unwrap();
        let (fetcher, steps) = GatedFetcher::new(3);
        let downloader = Downloader::new(Arc::new(fetcher), 1, Arc::new(AtomicU64::new(0)));
        let task = task(dir.path(), "slow.png");

        let target = task.target_path().to_path_buf();
        let handle = thread::spawn(move || downloader.download(&task));

        for _ in 0..2 {
            steps.send(()).unwrap();
        }
        wait_for_partials(dir.path(), 1);
        assert!(!target.exists());
        assert!(list_images(dir.path()).unwrap().is_empty());

        steps.send(()).unwrap();
        let outcome = handle.join().unwrap();
        assert!(matches!(outcome, DownloadOutcome::Completed { bytes: 3, .. }));
        assert_eq!(fs::read(&target).unwrap(), b"xxx");
    }

    #[test]
    fn test_broken_stream_removes_partial() {
        let dir = tempdir().unwrap();
        let (fetcher, steps) = GatedFetcher::new(5);
        let downloader = Downloader::new(Arc::new(fetcher), 1, Arc::new(AtomicU64::new(0)));
        let task = task(dir.path(), "broken.png");

        steps.send(()).unwrap();
        steps.send(()).unwrap();
        drop(steps);

        let outcome = downloader.download(&task);
        assert!(matches!(outcome, DownloadOutcome::Failed(DownloadError::Io(_))));
        assert!(!task.target_path().exists());
        assert!(partials(dir.path()).is_empty());
    }

    #[test]
    fn test_concurrent_attempts_do_not_share_a_partial() {
        let dir = tempdir().unwrap();
        let (fetcher, first_steps) = GatedFetcher::new(4);
        let second_steps = fetcher.push(4);
        let downloader = Arc::new(Downloader::new(Arc::new(fetcher), 1, Arc::new(AtomicU64::new(0))));

        let first = {
            let downloader = Arc::clone(&downloader);
            let task = task(dir.path(), "dup.png");
            thread::spawn(move || downloader.download(&task))
        };
        first_steps.send(()).unwrap();
        first_steps.send(()).unwrap();
        wait_for_partials(dir.path(), 1);

        let second = {
            let downloader = Arc::clone(&downloader);
            let task = task(dir.path(), "dup.png");
            thread::spawn(move || downloader.download(&task))
        };
        second_steps.send(()).unwrap();
        wait_for_partials(dir.path(), 2);

        first_steps.send(()).unwrap();
        first_steps.send(()).unwrap();
        let outcome = first.join().unwrap();
        assert!(matches!(outcome, DownloadOutcome::Completed { bytes: 4, .. }));
        let target = dir.path().join("dup.png");
        assert_eq!(fs::read(&target).unwrap(), b"xxxx");

        drop(second_steps);
        let outcome = second.join().unwrap();
        assert!(matches!(outcome, DownloadOutcome::Failed(DownloadError::Io(_))));
        assert_eq!(fs::read(&target).unwrap(), b"xxxx");
        assert!(partials(dir.path()).is_empty());
    }

    #[test]
    fn test_stale_epoch_is_cancelled() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.serve("https://cdn.example/old.png", b"old");
        let epoch = Arc::new(AtomicU64::new(1));
        let downloader = Downloader::new(fetcher, 8, epoch);

        let outcome = downloader.download(&task(dir.path(), "old.png"));
        assert!(matches!(outcome, DownloadOutcome::Failed(ref err) if err.is_cancelled()));
        assert!(!dir.path().join("old.png").exists());
    }

    #[test]
    fn test_pool_marks_every_task_done() {
        let dir = tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::default());
        for i in 0..6 {
            fetcher.serve(&format!("https://cdn.example/{i}.png"), b"img");
        }
        let queue = Arc::new(WorkQueue::new());
        let downloader = Arc::new(Downloader::new(fetcher, 16, Arc::new(AtomicU64::new(0))));
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let hook: FinishedHook = {
            let outcomes = Arc::clone(&outcomes);
            Arc::new(move |task: &DownloadTask, outcome: &DownloadOutcome| {
                outcomes.lock().push((task.filename().to_string(), matches!(outcome, DownloadOutcome::Completed { .. })));
            })
        };

        let pool = DownloadWorkerPool::spawn(3, Arc::clone(&queue), downloader, hook).unwrap();
        assert_eq!(pool.size(), 3);
        // Eight tasks, two of which 404.
        for i in 0..8 {
            queue.enqueue(task(dir.path(), &format!("{i}.png")));
        }

        assert!(queue.wait_until_empty(Duration::from_secs(10)));
        pool.shutdown();

        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 8);
        assert_eq!(outcomes.iter().filter(|(_, ok)| *ok).count(), 6);
        assert_eq!(list_images(dir.path()).unwrap().len(), 6);
    }
}
