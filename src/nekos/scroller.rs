use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::nekos::category::Category;
use crate::nekos::collector::{CollectOptions, UrlCollector};
use crate::nekos::error::{NekosError, NekosResult};
use crate::nekos::io::Selection;
use crate::nekos::io::directory::{clear_directory, list_images, move_file, remove_if_present, sort_oldest_first};
use crate::nekos::pipeline::DownloadPipeline;

/// How long `next` sleeps on the queue before looking at the directory again.
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// How long a session reset waits for running downloads.
const RESET_WAIT: Duration = Duration::from_secs(10);

/// Size of the top-up needed to bring the window back to `max_images`.
///
/// Nothing is fetched while the gap is smaller than one provider batch.
pub(crate) fn top_up_amount(max_images: usize, present: usize, queued: usize, batch: usize) -> Option<usize> {
    let gap = max_images.saturating_sub(present + queued);
    (gap > 0 && gap >= batch).then_some(gap)
}

/// Lifecycle of a [WindowedCache].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScrollState {
    Idle,
    Filling,
    Ready,
    Serving,
    Exhausted,
    Error,
}

impl fmt::Display for ScrollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScrollState::Idle => "idle",
            ScrollState::Filling => "filling",
            ScrollState::Ready => "ready",
            ScrollState::Serving => "serving",
            ScrollState::Exhausted => "exhausted",
            ScrollState::Error => "error",
        };
        f.write_str(name)
    }
}

/// What [WindowedCache::ensure_ready] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FillStatus {
    /// A top-up of this many images started in the background.
    Started(usize),
    /// An earlier top-up is still collecting.
    Running,
    /// The window is full enough.
    Full,
}

/// The image the scroller currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServedImage {
    pub(crate) path: PathBuf,
    pub(crate) filename: String,
}

impl ServedImage {
    fn new(path: PathBuf) -> Self {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, filename }
    }
}

/// A rolling window of downloaded images, shown one at a time and deleted once passed.
pub(crate) struct WindowedCache {
    pipeline: DownloadPipeline,
    collector: Arc<UrlCollector>,
    category: Category,
    max_images: usize,
    selection: Selection,
    filler: Option<JoinHandle<NekosResult<usize>>>,
    current: Option<PathBuf>,
    state: ScrollState,
}

impl WindowedCache {
    /// # Arguments
    ///
    /// * `pipeline`: Downloads into the scratch directory; its contents are deleted over time.
    /// * `collector`: Finds URLs for top-ups.
    /// * `category`: What to show.
    /// * `max_images`: Upper bound of cached plus queued images.
    /// * `selection`: How the next image is picked.
    pub(crate) fn new(
        pipeline: DownloadPipeline,
        collector: UrlCollector,
        category: Category,
        max_images: usize,
        selection: Selection,
    ) -> Self {
        Self {
            pipeline,
            collector: Arc::new(collector),
            category,
            max_images: max_images.max(1),
            selection,
            filler: None,
            current: None,
            state: ScrollState::Idle,
        }
    }

    pub(crate) fn state(&self) -> ScrollState {
        self.state
    }

    pub(crate) fn category(&self) -> &Category {
        &self.category
    }

    /// Completed images in the window, the current one included.
    pub(crate) fn loaded(&self) -> usize {
        self.pipeline.loaded()
    }

    pub(crate) fn current_image(&self) -> Option<ServedImage> {
        self.current.clone().map(ServedImage::new)
    }

    /// Starts a background top-up when the window has room for at least one batch.
    ///
    /// Returns immediately, only one top-up runs at a time.
    pub(crate) fn ensure_ready(&mut self) -> NekosResult<FillStatus> {
        self.reap_filler()?;
        if self.filler.is_some() {
            return Ok(FillStatus::Running);
        }

        let batch = self.collector.max_batch();
        let Some(amount) = top_up_amount(self.max_images, self.loaded(), self.pipeline.outstanding(), batch)
        else {
            if matches!(self.state, ScrollState::Idle | ScrollState::Filling) {
                self.state = ScrollState::Ready;
            }
            return Ok(FillStatus::Full);
        };

        let collector = Arc::clone(&self.collector);
        let category = self.category.clone();
        let sink = self.pipeline.handle().session_sink();
        let options = CollectOptions {
            amount,
            ..CollectOptions::default()
        };
        let handle = thread::Builder::new()
            .name(String::from("nldlgetter"))
            .spawn(move || {
                collector
                    .collect(&category, &options, Some(&sink))
                    .map(|urls| urls.len())
            })?;

        debug!("Topping up {} with {} images", self.category, amount);
        self.filler = Some(handle);
        if self.state != ScrollState::Serving {
            self.state = ScrollState::Filling;
        }
        Ok(FillStatus::Started(amount))
    }

    /// Deletes the current image and picks the next one, waiting for downloads if needed.
    ///
    /// Fails with [NekosError::NothingScheduled] when no other image exists and nothing
    /// is queued, downloading or being collected.
    pub(crate) fn next(&mut self) -> NekosResult<ServedImage> {
        self.wait_for_candidate()?;

        if let Some(previous) = self.current.take() {
            if let Err(err) = remove_if_present(&previous) {
                warn!("Unable to remove {}: {}", previous.display(), err);
            }
        }

        let mut images = list_images(self.pipeline.save_dir())?;
        let chosen = match self.selection {
            Selection::Fifo => {
                sort_oldest_first(&mut images);
                images.into_iter().next()
            }
            Selection::Random => images.choose(&mut rand::thread_rng()).cloned(),
        };
        let Some(chosen) = chosen else {
            self.state = ScrollState::Exhausted;
            return Err(NekosError::NothingScheduled);
        };

        trace!("Serving {}", chosen.display());
        self.current = Some(chosen.clone());
        self.state = ScrollState::Serving;
        Ok(ServedImage::new(chosen))
    }

    /// Moves the current image into `folder` instead of deleting it.
    ///
    /// Returns where it was moved, `None` when nothing is shown.
    pub(crate) fn move_current_to(&mut self, folder: &Path) -> NekosResult<Option<PathBuf>> {
        let Some(current) = self.current.take() else {
            return Ok(None);
        };
        let destination = move_file(&current, folder)?;
        info!("Moved {} to {}", current.display(), folder.display());
        Ok(Some(destination))
    }

    /// Throws the window away and starts over with `category`.
    ///
    /// Pending downloads are dropped, running ones abort at their next chunk and the
    /// running top-up stops queueing. Returns the first image of the new session.
    pub(crate) fn reset_session(&mut self, category: Category) -> NekosResult<ServedImage> {
        info!("Switching scroller to {}", category);
        self.pipeline.cancel_pending();
        self.pipeline.new_epoch();
        if !self.pipeline.wait_until_finished(RESET_WAIT) {
            warn!("Downloads of {} are still running", self.category);
        }

        if let Some(filler) = self.filler.take() {
            if filler.is_finished() {
                if let Err(err) = Self::join_filler(filler) {
                    debug!("Previous top-up of {} failed: {}", self.category, err);
                }
            } else {
                debug!("Detaching the top-up of {}", self.category);
            }
        }

        let removed = clear_directory(self.pipeline.save_dir())?;
        trace!("Cleared {} cached files", removed);

        self.current = None;
        self.category = category;
        self.state = ScrollState::Idle;
        self.ensure_ready()?;
        self.next()
    }

    /// Stops collecting and drops pending downloads, waiting for running ones.
    pub(crate) fn shutdown(self) {
        self.pipeline.cancel_pending();
        self.pipeline.new_epoch();
        self.pipeline.finish("Done");
        self.pipeline.shutdown();
    }

    fn wait_for_candidate(&mut self) -> NekosResult<()> {
        loop {
            if self.has_candidate()? {
                return Ok(());
            }

            self.reap_filler()?;
            if self.filler.is_none() && self.pipeline.outstanding() == 0 {
                // Downloads rename before they are marked done, so the directory is final now.
                if self.has_candidate()? {
                    return Ok(());
                }
                self.state = ScrollState::Exhausted;
                return Err(NekosError::NothingScheduled);
            }

            self.pipeline.wait_for_progress(POLL_INTERVAL);
        }
    }

    /// Whether an image other than the current one exists.
    fn has_candidate(&self) -> NekosResult<bool> {
        let images = list_images(self.pipeline.save_dir())?;
        Ok(images.iter().any(|image| Some(image) != self.current.as_ref()))
    }

    fn reap_filler(&mut self) -> NekosResult<()> {
        if !self.filler.as_ref().is_some_and(JoinHandle::is_finished) {
            return Ok(());
        }
        let Some(filler) = self.filler.take() else {
            return Ok(());
        };

        match Self::join_filler(filler) {
            Ok(collected) => {
                trace!("Top-up of {} collected {} urls", self.category, collected);
                Ok(())
            }
            Err(err) => {
                self.state = ScrollState::Error;
                Err(err)
            }
        }
    }

    fn join_filler(filler: JoinHandle<NekosResult<usize>>) -> NekosResult<usize> {
        match filler.join() {
            Ok(result) => result,
            Err(_) => {
                error!("The top-up thread panicked");
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{self, Read};
    use std::time::Instant;

    use tempfile::tempdir;

    use super::*;
    use crate::nekos::category::{ImageFormat, ImageType};
    use crate::nekos::collector::tests::StubListing;
    use crate::nekos::error::DownloadError;
    use crate::nekos::sender::ImageFetcher;
    use crate::nekos::tui::QuietReporter;

    /// Serves every URL with its own text as the body.
    struct EchoFetcher;

    impl ImageFetcher for EchoFetcher {
        fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, DownloadError> {
            Ok(Box::new(io::Cursor::new(url.as_bytes().to_vec())))
        }
    }

    fn cat(format: ImageFormat) -> Category {
        Category::new(ImageType::Safe, format, "cat")
    }

    fn cache(dir: &Path, max_images: usize, selection: Selection) -> WindowedCache {
        let pipeline = DownloadPipeline::start(dir, 3, 64, Arc::new(EchoFetcher), Arc::new(QuietReporter)).unwrap();
        let collector = UrlCollector::new(Arc::new(StubListing::fresh()), 20);
        WindowedCache::new(pipeline, collector, cat(ImageFormat::Still), max_images, selection)
    }

    #[test]
    fn test_top_up_needs_a_full_batch() {
        assert_eq!(top_up_amount(60, 40, 5, 20), None);
        assert_eq!(top_up_amount(60, 25, 5, 20), Some(30));
        assert_eq!(top_up_amount(60, 0, 0, 20), Some(60));
        assert_eq!(top_up_amount(60, 70, 0, 20), None);
    }

    #[test]
    fn test_next_fails_fast_when_nothing_is_scheduled() {
        let dir = tempdir().unwrap();
        let mut cache = cache(dir.path(), 20, Selection::Random);

        let err = cache.next().unwrap_err();
        assert!(matches!(err, NekosError::NothingScheduled));
        assert_eq!(cache.state(), ScrollState::Exhausted);
    }

    #[test]
    fn test_fill_then_serve_evicts_previous() {
        let dir = tempdir().unwrap();
        let mut cache = cache(dir.path(), 20, Selection::Random);

        assert_eq!(cache.ensure_ready().unwrap(), FillStatus::Started(20));
        let first = cache.next().unwrap();
        assert!(first.path.exists());
        assert_eq!(cache.state(), ScrollState::Serving);
        assert_eq!(cache.current_image(), Some(first.clone()));

        let second = cache.next().unwrap();
        assert_ne!(first, second);
        assert!(!first.path.exists());
        assert!(second.path.exists());
        assert!(second.filename.starts_with("cat_"));
        cache.shutdown();
    }

    #[test]
    fn test_fifo_serves_oldest_first() {
        let dir = tempdir().unwrap();
        for name in ["c.png", "a.png", "b.png"] {
            fs::write(dir.path().join(name), name).unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        let mut cache = cache(dir.path(), 20, Selection::Fifo);

        assert_eq!(cache.next().unwrap().filename, "c.png");
        assert_eq!(cache.next().unwrap().filename, "a.png");
        assert_eq!(cache.loaded(), 2);
        assert_eq!(cache.next().unwrap().filename, "b.png");
        assert!(matches!(cache.next(), Err(NekosError::NothingScheduled)));
    }

    #[test]
    fn test_reset_session_clears_the_window() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("stray.png"), b"old").unwrap();
        fs::write(dir.path().join("half.png.partial"), b"old").unwrap();
        let mut cache = cache(dir.path(), 20, Selection::Random);

        let first = cache.reset_session(cat(ImageFormat::Animated)).unwrap();
        assert!(first.filename.starts_with("cat_"));
        assert!(!dir.path().join("stray.png").exists());
        assert!(!dir.path().join("half.png.partial").exists());
        assert_eq!(cache.category(), &cat(ImageFormat::Animated));
        cache.shutdown();
    }

    #[test]
    fn test_reset_session_recovers_from_a_failed_top_up() {
        let dir = tempdir().unwrap();
        let pipeline = DownloadPipeline::start(dir.path(), 3, 64, Arc::new(EchoFetcher), Arc::new(QuietReporter)).unwrap();
        let collector = UrlCollector::new(Arc::new(StubListing::fresh()), 20);
        let dog = Category::new(ImageType::Safe, ImageFormat::Still, "dog");
        let mut cache = WindowedCache::new(pipeline, collector, dog, 20, Selection::Random);

        assert_eq!(cache.ensure_ready().unwrap(), FillStatus::Started(20));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cache.filler.as_ref().is_some_and(JoinHandle::is_finished) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let first = cache.reset_session(cat(ImageFormat::Still)).unwrap();
        assert!(first.filename.starts_with("cat_"));
        assert_eq!(cache.state(), ScrollState::Serving);
        cache.shutdown();
    }

    #[test]
    fn test_move_current_to_keeps_the_image() {
        let dir = tempdir().unwrap();
        let keep = tempdir().unwrap();
        for name in ["a.png", "b.png"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let mut cache = cache(dir.path(), 20, Selection::Fifo);

        assert_eq!(cache.move_current_to(keep.path()).unwrap(), None);
        let shown = cache.next().unwrap();
        let moved = cache.move_current_to(keep.path()).unwrap().unwrap();
        assert_eq!(moved, keep.path().join(&shown.filename));
        assert!(!shown.path.exists());
        assert_eq!(cache.current_image(), None);

        let next = cache.next().unwrap();
        assert_ne!(next.filename, shown.filename);
        assert!(next.path.exists());
    }
}
