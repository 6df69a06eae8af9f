use std::path::{Path, PathBuf};

use crate::nekos::urls::ImageUrl;

/// Decides whether an image still needs downloading, using the save directory as the index.
///
/// The check is best effort: two identical URLs queued before either finishes are both
/// admitted, the second download then atomically replaces the first.
#[derive(Debug, Clone)]
pub(crate) struct Deduper {
    save_dir: PathBuf,
}

impl Deduper {
    pub(crate) fn new(save_dir: &Path) -> Self {
        Self {
            save_dir: save_dir.to_path_buf(),
        }
    }

    /// False when a file with the URL's name already exists in the save directory.
    pub(crate) fn should_enqueue(&self, url: &ImageUrl) -> bool {
        url.is_storable() && !url.target_path(&self.save_dir).exists()
    }
}
