use std::collections::BTreeSet;
use std::fs::{self, read_to_string};
use std::io;
use std::path::{Path, PathBuf};

use crate::nekos::urls::url_index;

/// A side file holding every URL ever collected for a category, one per line.
///
/// Saving always rewrites the whole file through a temporary file, the old
/// contents stay intact until the rename.
#[derive(Debug, Clone)]
pub(crate) struct UrlFile {
    path: PathBuf,
    sorted: bool,
}

impl UrlFile {
    /// # Arguments
    ///
    /// * `path`: Location of the file, parent directories are created on save.
    /// * `sorted`: Whether saved URLs are ordered by their filename index.
    pub(crate) fn new(path: impl Into<PathBuf>, sorted: bool) -> Self {
        Self {
            path: path.into(),
            sorted,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every non-blank line. A missing file is an empty set.
    pub(crate) fn load(&self) -> io::Result<Vec<String>> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }

        Ok(read_to_string(&self.path)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Replaces the file contents with `urls`, returning what was written.
    pub(crate) fn save<I>(&self, urls: I) -> io::Result<Vec<String>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut urls: Vec<String> = urls
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if self.sorted {
            urls.sort_by(|a, b| url_index(a).cmp(&url_index(b)).then_with(|| a.cmp(b)));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        fs::write(&temp, urls.join("\n"))?;
        fs::rename(&temp, &self.path)?;

        trace!("Wrote {} urls to {}", urls.len(), self.path.display());
        Ok(urls)
    }

    /// Saves the union of the current file contents and `urls`.
    pub(crate) fn add<I>(&self, urls: I) -> io::Result<Vec<String>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut union = self.load()?;
        union.extend(urls);
        self.save(union)
    }
}
