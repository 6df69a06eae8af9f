use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

/// Suffix of files that are still being written.
pub(crate) const PARTIAL_SUFFIX: &str = ".partial";

/// The temporary path attempt number `attempt` streams into before being renamed to `target`.
///
/// Every attempt gets its own file, so concurrent downloads of one target never share a partial.
pub(crate) fn partial_path(target: &Path, attempt: u64) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(format!(".{attempt}{PARTIAL_SUFFIX}"));
    PathBuf::from(name)
}

pub(crate) fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(PARTIAL_SUFFIX))
}

/// Lists every completed image directly inside `dir`.
///
/// Partial downloads and subdirectories are skipped, a missing directory is empty.
pub(crate) fn list_images(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            // Files can vanish between readdir and stat while workers rename them.
            Err(err) if err.io_error().is_some_and(|e| e.kind() == io::ErrorKind::NotFound) => continue,
            Err(err) => return Err(err.into()),
        };

        if entry.file_type().is_file() && !is_partial(entry.path()) {
            images.push(entry.into_path());
        }
    }

    Ok(images)
}

/// Number of completed images in `dir`, errors count as zero.
pub(crate) fn count_images(dir: &Path) -> usize {
    match list_images(dir) {
        Ok(images) => images.len(),
        Err(err) => {
            warn!("Unable to list {}: {}", dir.display(), err);
            0
        }
    }
}

/// Sorts images oldest first, by modification time and then by name.
pub(crate) fn sort_oldest_first(images: &mut [PathBuf]) {
    images.sort_by_cached_key(|path| {
        let modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        (modified, path.clone())
    });
}

/// Deletes every file directly inside `dir`, partial downloads included.
///
/// Returns the number of removed files.
pub(crate) fn clear_directory(dir: &Path) -> io::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match remove_if_present(&path) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(err) => warn!("Unable to remove {}: {}", path.display(), err),
        }
    }

    Ok(removed)
}

/// Removes a file, treating an already missing file as success.
///
/// Returns whether a file was removed.
pub(crate) fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Moves `file` into `folder`, keeping its name.
///
/// When the folder already holds a file with that name the source is dropped instead.
pub(crate) fn move_file(file: &Path, folder: &Path) -> io::Result<PathBuf> {
    let name = file.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("{} has no file name", file.display()))
    })?;
    let destination = folder.join(name);

    if destination.exists() {
        remove_if_present(file)?;
    } else {
        fs::create_dir_all(folder)?;
        fs::rename(file, &destination)?;
    }

    Ok(destination)
}
