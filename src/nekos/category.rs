use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use parking_lot::Mutex;

use crate::nekos::error::{NekosError, NekosResult};
use crate::nekos::sender::ListingSource;

/// Rating of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub(crate) enum ImageType {
    #[value(name = "sfw", alias = "safe")]
    Safe,
    #[value(name = "nsfw", alias = "explicit")]
    Explicit,
}

impl ImageType {
    pub(crate) const ALL: [ImageType; 2] = [ImageType::Safe, ImageType::Explicit];

    /// The path segment the API uses for this type.
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ImageType::Safe => "sfw",
            ImageType::Explicit => "nsfw",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media format of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub(crate) enum ImageFormat {
    #[value(name = "img", alias = "still")]
    Still,
    #[value(name = "gif", alias = "animated")]
    Animated,
}

impl ImageFormat {
    pub(crate) const ALL: [ImageFormat; 2] = [ImageFormat::Still, ImageFormat::Animated];

    /// The path segment the API uses for this format.
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Still => "img",
            ImageFormat::Animated => "gif",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully qualified image endpoint, e.g. `sfw/img/neko`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Category {
    kind: ImageType,
    format: ImageFormat,
    name: String,
}

impl Category {
    pub(crate) fn new(kind: ImageType, format: ImageFormat, name: &str) -> Self {
        Self {
            kind,
            format,
            name: name.trim().to_string(),
        }
    }

    pub(crate) fn kind(&self) -> ImageType {
        self.kind
    }

    pub(crate) fn format(&self) -> ImageFormat {
        self.format
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.format, self.name)
    }
}

/// Every valid category, grouped by type and format.
pub(crate) type Endpoints = BTreeMap<(ImageType, ImageFormat), Vec<String>>;

/// Lazily discovered table of valid categories.
///
/// Each session owns its own catalog, the table is fetched once and reused until
/// [EndpointCatalog::endpoints] is called with `force`.
pub(crate) struct EndpointCatalog {
    source: Arc<dyn ListingSource>,
    endpoints: Mutex<Option<Endpoints>>,
}

impl EndpointCatalog {
    pub(crate) fn new(source: Arc<dyn ListingSource>) -> Self {
        Self {
            source,
            endpoints: Mutex::new(None),
        }
    }

    /// Returns the category table, querying the API for every type and format the first time.
    ///
    /// # Arguments
    ///
    /// * `force`: Discards the cached table and queries again.
    pub(crate) fn endpoints(&self, force: bool) -> NekosResult<Endpoints> {
        let mut cached = self.endpoints.lock();
        if let Some(endpoints) = cached.as_ref() {
            if !force {
                return Ok(endpoints.clone());
            }
        }

        trace!("Discovering endpoints...");
        let mut endpoints = Endpoints::new();
        for kind in ImageType::ALL {
            for format in ImageFormat::ALL {
                let categories = self.source.categories(kind, format)?;
                trace!("{}/{}: {} categories", kind, format, categories.len());
                endpoints.insert((kind, format), categories);
            }
        }

        *cached = Some(endpoints.clone());
        Ok(endpoints)
    }

    /// Fails with [NekosError::IllegalCategory] when the category is not offered for its type and format.
    pub(crate) fn raise_for_category(&self, category: &Category) -> NekosResult<()> {
        let endpoints = self.endpoints(false)?;
        let known = endpoints
            .get(&(category.kind(), category.format()))
            .map(Vec::as_slice)
            .unwrap_or_default();

        if known.iter().any(|name| name == category.name()) {
            return Ok(());
        }

        Err(NekosError::IllegalCategory(format!(
            "category for {}/{} must be in [{}]",
            category.kind(),
            category.format(),
            known.join(",")
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::nekos::sender::Listing;

    struct StubCatalogSource {
        calls: AtomicUsize,
    }

    impl ListingSource for StubCatalogSource {
        fn categories(&self, kind: ImageType, format: ImageFormat) -> NekosResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match (kind, format) {
                (ImageType::Safe, ImageFormat::Still) => vec!["neko".to_string(), "cat".to_string()],
                (ImageType::Safe, ImageFormat::Animated) => vec!["hug".to_string()],
                _ => Vec::new(),
            })
        }

        fn images(&self, _category: &Category, _count: usize) -> NekosResult<Listing> {
            Ok(Listing::Urls(Vec::new()))
        }
    }

    fn catalog() -> (Arc<StubCatalogSource>, EndpointCatalog) {
        let source = Arc::new(StubCatalogSource {
            calls: AtomicUsize::new(0),
        });
        let catalog = EndpointCatalog::new(source.clone());
        (source, catalog)
    }

    #[test]
    fn test_endpoints_are_cached() {
        let (source, catalog) = catalog();

        let first = catalog.endpoints(false).unwrap();
        let second = catalog.endpoints(false).unwrap();

        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);

        catalog.endpoints(true).unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_raise_for_category() {
        let (_, catalog) = catalog();

        assert!(catalog
            .raise_for_category(&Category::new(ImageType::Safe, ImageFormat::Still, "cat"))
            .is_ok());

        let err = catalog
            .raise_for_category(&Category::new(ImageType::Safe, ImageFormat::Animated, "cat"))
            .unwrap_err();
        assert!(matches!(err, NekosError::IllegalCategory(ref msg) if msg.contains("hug")));
    }

    #[test]
    fn test_category_display() {
        let category = Category::new(ImageType::Explicit, ImageFormat::Animated, " yuri ");
        assert_eq!(category.to_string(), "nsfw/gif/yuri");
        assert_eq!(category.name(), "yuri");
    }
}
