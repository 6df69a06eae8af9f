use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::nekos::urls::ImageUrl;

/// One image waiting to be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DownloadTask {
    url: ImageUrl,
    target_path: PathBuf,
    epoch: u64,
}

impl DownloadTask {
    /// # Arguments
    ///
    /// * `url`: The image to download.
    /// * `save_dir`: Directory the image is saved in.
    /// * `epoch`: The session epoch the task belongs to.
    pub(crate) fn new(url: ImageUrl, save_dir: &Path, epoch: u64) -> Self {
        let target_path = url.target_path(save_dir);
        Self {
            url,
            target_path,
            epoch,
        }
    }

    pub(crate) fn url(&self) -> &str {
        self.url.as_str()
    }

    pub(crate) fn filename(&self) -> &str {
        self.url.filename()
    }

    pub(crate) fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: VecDeque<DownloadTask>,
    /// Tasks enqueued but not yet marked done, queued and in progress alike.
    unfinished: usize,
    /// Total number of `mark_done` calls, lets waiters notice progress.
    completed: u64,
    closed: bool,
}

/// Unbounded FIFO of download tasks with completion tracking.
#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    progressed: Condvar,
}

impl WorkQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a task to the tail. Never blocks.
    pub(crate) fn enqueue(&self, task: DownloadTask) {
        let mut state = self.state.lock();
        state.tasks.push_back(task);
        state.unfinished += 1;
        self.available.notify_one();
    }

    /// Pops the head of the queue, waiting while it is empty.
    ///
    /// Returns `None` once the queue is closed and no task is left.
    pub(crate) fn dequeue(&self) -> Option<DownloadTask> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Marks one dequeued task as finished, whether it succeeded or not.
    pub(crate) fn mark_done(&self) {
        let mut state = self.state.lock();
        match state.unfinished.checked_sub(1) {
            Some(left) => state.unfinished = left,
            None => warn!("mark_done called more times than tasks were enqueued"),
        }
        state.completed += 1;
        self.progressed.notify_all();
    }

    /// Blocks until every enqueued task is marked done or `timeout` elapses.
    ///
    /// Returns whether the queue was fully drained.
    pub(crate) fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.unfinished > 0 {
            if self.progressed.wait_until(&mut state, deadline).timed_out() {
                return state.unfinished == 0;
            }
        }
        true
    }

    /// Blocks until some task is marked done or `timeout` elapses.
    ///
    /// Returns whether progress was made.
    pub(crate) fn wait_for_progress(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        let seen = state.completed;
        let deadline = Instant::now() + timeout;
        while state.completed == seen {
            if self.progressed.wait_until(&mut state, deadline).timed_out() {
                return state.completed != seen;
            }
        }
        true
    }

    /// Removes every task that has not been started and marks it done.
    ///
    /// Returns the number of discarded tasks.
    pub(crate) fn drain_and_discard(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.tasks.len();
        state.tasks.clear();
        state.unfinished = state.unfinished.saturating_sub(discarded);
        state.completed += discarded as u64;
        self.progressed.notify_all();
        discarded
    }

    /// Number of tasks waiting for a worker.
    pub(crate) fn pending(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Number of tasks not yet marked done.
    pub(crate) fn outstanding(&self) -> usize {
        self.state.lock().unfinished
    }

    /// Wakes every idle worker and makes `dequeue` return `None` once empty.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn task(name: &str) -> DownloadTask {
        DownloadTask::new(
            ImageUrl::new(format!("https://cdn.example/{name}")),
            Path::new("images"),
            0,
        )
    }

    #[test]
    fn test_fifo_order_and_accounting() {
        let queue = WorkQueue::new();
        queue.enqueue(task("a.png"));
        queue.enqueue(task("b.png"));
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.outstanding(), 2);

        let first = queue.dequeue().unwrap();
        assert_eq!(first.filename(), "a.png");
        assert_eq!(first.target_path(), Path::new("images/a.png"));
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.outstanding(), 2);

        queue.mark_done();
        assert!(!queue.wait_until_empty(Duration::from_millis(20)));

        assert_eq!(queue.dequeue().unwrap().filename(), "b.png");
        queue.mark_done();
        assert_eq!(queue.outstanding(), 0);
        assert!(queue.wait_until_empty(Duration::from_millis(20)));
    }

    #[test]
    fn test_extra_mark_done_never_underflows() {
        let queue = WorkQueue::new();
        queue.mark_done();
        assert_eq!(queue.outstanding(), 0);
    }

    #[test]
    fn test_wait_until_empty_with_workers() {
        let queue = Arc::new(WorkQueue::new());
        for i in 0..20 {
            queue.enqueue(task(&format!("{i}.png")));
        }

        let workers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    while let Some(_task) = queue.dequeue() {
                        thread::sleep(Duration::from_millis(2));
                        queue.mark_done();
                    }
                })
            })
            .collect();

        assert!(queue.wait_until_empty(Duration::from_secs(10)));
        assert_eq!(queue.outstanding(), 0);

        queue.close();
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_drain_and_discard() {
        let queue = WorkQueue::new();
        for name in ["a.png", "b.png", "c.png"] {
            queue.enqueue(task(name));
        }
        let started = queue.dequeue().unwrap();

        assert_eq!(queue.drain_and_discard(), 2);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.outstanding(), 1);
        assert!(!queue.wait_until_empty(Duration::from_millis(10)));

        drop(started);
        queue.mark_done();
        assert!(queue.wait_until_empty(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_for_progress() {
        let queue = Arc::new(WorkQueue::new());
        queue.enqueue(task("a.png"));
        assert!(!queue.wait_for_progress(Duration::from_millis(10)));

        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let _task = queue.dequeue();
                thread::sleep(Duration::from_millis(20));
                queue.mark_done();
            })
        };

        assert!(queue.wait_for_progress(Duration::from_secs(5)));
        worker.join().unwrap();
    }

    #[test]
    fn test_closed_queue_releases_workers() {
        let queue = Arc::new(WorkQueue::new());
        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(worker.join().unwrap().is_none());
    }
}
