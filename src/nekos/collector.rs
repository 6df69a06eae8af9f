use std::collections::HashSet;
use std::sync::Arc;

use crate::nekos::category::Category;
use crate::nekos::error::NekosResult;
use crate::nekos::sender::{Listing, ListingSource};
use crate::nekos::url_file::UrlFile;
use crate::nekos::urls::{ImageUrl, split_batches};

/// Receives URLs as soon as they are collected.
pub(crate) trait UrlSink: Send + Sync {
    /// Offers newly collected URLs, returning how many were queued.
    fn submit(&self, urls: &[ImageUrl]) -> usize;

    /// False once the session the sink belongs to is over; collection then stops.
    fn accepting(&self) -> bool {
        true
    }
}

/// What a single [UrlCollector::collect] call gathers.
#[derive(Debug, Clone, Default)]
pub(crate) struct CollectOptions {
    /// Upper bound of URLs requested from the API.
    pub(crate) amount: usize,
    /// Stop once this many distinct filenames were seen, `0` keeps duplicates.
    pub(crate) unique: usize,
    /// Side file restored before collecting and extended afterwards.
    pub(crate) url_file: Option<UrlFile>,
    /// Stop after this many consecutive batches without a new URL.
    pub(crate) stall_limit: Option<usize>,
}

/// Gathers more URLs than a single listing request can return.
pub(crate) struct UrlCollector {
    source: Arc<dyn ListingSource>,
    max_batch: usize,
}

impl UrlCollector {
    pub(crate) fn new(source: Arc<dyn ListingSource>, max_batch: usize) -> Self {
        Self {
            source,
            max_batch: max_batch.max(1),
        }
    }

    pub(crate) fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// One listing request of at most the provider maximum.
    ///
    /// An unavailable listing is logged and yields no URLs, an illegal category is an error.
    pub(crate) fn fetch_batch(&self, category: &Category, count: usize) -> NekosResult<Vec<ImageUrl>> {
        match self.source.images(category, count.min(self.max_batch))? {
            Listing::Urls(urls) => Ok(urls),
            Listing::Unavailable(status) => {
                debug!("{} unavailable ({}), batch skipped", category, status);
                Ok(Vec::new())
            }
        }
    }

    /// Collects URLs of `category` batch by batch.
    ///
    /// Without a uniqueness target every URL is kept in API order, duplicates included.
    /// With one, only URLs whose filename was not seen yet are kept and collection ends as
    /// soon as the target is reached. Newly kept URLs are handed to `sink` after every batch.
    ///
    /// # Arguments
    ///
    /// * `category`: What to collect.
    /// * `options`: Amount, uniqueness target, URL file and stall limit.
    /// * `sink`: Optional receiver, usually a download pipeline.
    pub(crate) fn collect(
        &self,
        category: &Category,
        options: &CollectOptions,
        sink: Option<&dyn UrlSink>,
    ) -> NekosResult<Vec<ImageUrl>> {
        let mut urls = Vec::new();
        let mut seen = HashSet::new();

        if let Some(url_file) = &options.url_file {
            let restored: Vec<ImageUrl> = url_file.load()?.into_iter().map(ImageUrl::new).collect();
            debug!("Restored {} urls from {}", restored.len(), url_file.path().display());
            let restored = self.keep_new(restored, options.unique, &mut seen);
            if let Some(sink) = sink {
                sink.submit(&restored);
            }
            urls.extend(restored);
        }

        let mut stalled = 0;
        for count in split_batches(options.amount, self.max_batch) {
            if options.unique > 0 && urls.len() >= options.unique {
                break;
            }
            if sink.is_some_and(|sink| !sink.accepting()) {
                debug!("Collection of {} cancelled", category);
                break;
            }

            let batch = self.fetch_batch(category, count)?;
            let fresh = self.keep_new(batch, options.unique, &mut seen);
            if let Some(sink) = sink {
                sink.submit(&fresh);
            }

            if fresh.is_empty() {
                stalled += 1;
                if options.stall_limit.is_some_and(|limit| stalled >= limit) {
                    debug!("{} stalled after {} batches without new urls", category, stalled);
                    break;
                }
            } else {
                stalled = 0;
            }
            urls.extend(fresh);
        }

        if let Some(url_file) = &options.url_file {
            url_file.add(urls.iter().map(|url| url.as_str().to_string()))?;
        }

        trace!("Collected {} urls of {}", urls.len(), category);
        Ok(urls)
    }

    fn keep_new(&self, batch: Vec<ImageUrl>, unique: usize, seen: &mut HashSet<String>) -> Vec<ImageUrl> {
        if unique == 0 {
            return batch;
        }
        batch
            .into_iter()
            .filter(|url| seen.insert(url.filename().to_string()))
            .collect()
    }
}
