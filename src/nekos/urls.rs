use std::fmt;
use std::path::{Path, PathBuf};

/// A remote image locator together with the name it is saved under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ImageUrl {
    url: String,
}

impl ImageUrl {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().to_string(),
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.url
    }

    /// The basename of the URL path, query and fragment excluded.
    pub(crate) fn filename(&self) -> &str {
        filename_of(&self.url)
    }

    /// Whether the filename can safely be used inside a save directory.
    pub(crate) fn is_storable(&self) -> bool {
        let name = self.filename();
        !name.is_empty() && name != "." && name != ".." && !name.contains('\\')
    }

    /// The final location of this image inside `save_dir`.
    pub(crate) fn target_path(&self, save_dir: &Path) -> PathBuf {
        save_dir.join(self.filename())
    }
}

impl fmt::Display for ImageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

fn filename_of(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Sort key extracted from the digits of a filename.
///
/// `Unbounded` orders after every index, so files without digits sort last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Ordinal {
    Index(u64),
    Unbounded,
}

/// Gets the number in an image filename by concatenating every digit it contains.
///
/// `"foo/bar_007.png"` is `Index(7)`, a filename without digits (or with more digits
/// than fit in a `u64`) is `Unbounded`.
pub(crate) fn url_index(url: &str) -> Ordinal {
    let digits: String = filename_of(url).chars().filter(char::is_ascii_digit).collect();
    match digits.parse::<u64>() {
        Ok(index) => Ordinal::Index(index),
        Err(_) => Ordinal::Unbounded,
    }
}

/// Splits `total` into the fewest batches of at most `max_batch` items.
///
/// Every batch but the last is exactly `max_batch` long, the last holds the remainder.
/// Batches are produced lazily, so huge totals cost nothing up front.
pub(crate) fn split_batches(total: usize, max_batch: usize) -> impl Iterator<Item = usize> {
    let count = if max_batch == 0 { 0 } else { total.div_ceil(max_batch) };
    (0..count).map(move |i| max_batch.min(total - i * max_batch))
}

/// Formats seconds as `?min ?s` for progress lines.
pub(crate) fn to_minutes(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (minutes, seconds) = (total / 60, total % 60);
    if minutes == 0 {
        format!("{seconds}s")
    } else {
        format!("{minutes}min {seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_batches_examples() {
        assert_eq!(split_batches(45, 20).collect::<Vec<_>>(), vec![20, 20, 5]);
        assert_eq!(split_batches(40, 20).collect::<Vec<_>>(), vec![20, 20]);
        assert_eq!(split_batches(5, 20).collect::<Vec<_>>(), vec![5]);
        assert_eq!(split_batches(0, 20).count(), 0);
        assert_eq!(split_batches(usize::MAX, 20).next(), Some(20));
    }

    #[test]
    fn test_split_batches_law() {
        for size in 1..=7 {
            for total in 0..60 {
                let batches: Vec<usize> = split_batches(total, size).collect();
                assert_eq!(batches.iter().sum::<usize>(), total);
                assert_eq!(batches.len(), total.div_ceil(size));
                assert!(batches.iter().all(|b| *b > 0 && *b <= size));
                if let Some((_, head)) = batches.split_last() {
                    assert!(head.iter().all(|b| *b == size));
                }
            }
        }
    }

    #[test]
    fn test_url_index() {
        assert_eq!(url_index("foo/bar_007.png"), Ordinal::Index(7));
        assert_eq!(url_index("foo/bar.png"), Ordinal::Unbounded);
        assert_eq!(url_index("https://cdn/v3/sfw/img/neko_12/x1_2.jpg"), Ordinal::Index(12));
        assert!(Ordinal::Index(u64::MAX) < Ordinal::Unbounded);
    }

    #[test]
    fn test_filename() {
        let url = ImageUrl::new("https://cdn.nekos.life/v3/sfw/img/cat/cat_042.png?v=2");
        assert_eq!(url.filename(), "cat_042.png");
        assert!(url.is_storable());
        assert_eq!(url_index(url.as_str()), Ordinal::Index(42));

        assert!(!ImageUrl::new("https://cdn.nekos.life/v3/").is_storable());
        assert!(!ImageUrl::new("https://cdn.nekos.life/..").is_storable());
    }

    #[test]
    fn test_to_minutes() {
        assert_eq!(to_minutes(5.4), "5s");
        assert_eq!(to_minutes(65.0), "1min 5s");
        assert_eq!(to_minutes(-3.0), "0s");
    }
}
