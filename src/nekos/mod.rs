use std::path::Path;
use std::sync::Arc;

use crate::nekos::autocomplete::Autocompleter;
use crate::nekos::category::{Category, EndpointCatalog, Endpoints};
use crate::nekos::collector::UrlCollector;
use crate::nekos::error::NekosResult;
use crate::nekos::io::Config;
use crate::nekos::pipeline::DownloadPipeline;
use crate::nekos::scroller::WindowedCache;
use crate::nekos::sender::RequestSender;
use crate::nekos::tui::{ProgressReporter, QuietReporter};

pub(crate) mod autocomplete;
pub(crate) mod category;
pub(crate) mod collector;
pub(crate) mod dedup;
pub(crate) mod error;
pub(crate) mod io;
pub(crate) mod pipeline;
pub(crate) mod queue;
pub(crate) mod scroller;
pub(crate) mod sender;
pub(crate) mod tui;
pub(crate) mod url_file;
pub(crate) mod urls;
pub(crate) mod worker;

/// Owns everything one session needs to talk to the API: the config, the [RequestSender]
/// and the endpoint catalog. Builds the collectors, pipelines and caches of a run.
pub(crate) struct NekosConnector {
    config: Config,
    /// The sender used for all API calls.
    request_sender: Arc<RequestSender>,
    catalog: EndpointCatalog,
}

impl NekosConnector {
    pub(crate) fn new(config: Config) -> NekosResult<Self> {
        let request_sender = Arc::new(RequestSender::new(&config)?);
        let catalog = EndpointCatalog::new(request_sender.clone());
        Ok(Self {
            config,
            request_sender,
            catalog,
        })
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Valid categories of every type and format, fetched once per connector.
    pub(crate) fn endpoints(&self) -> NekosResult<Endpoints> {
        self.catalog.endpoints(false)
    }

    pub(crate) fn raise_for_category(&self, category: &Category) -> NekosResult<()> {
        self.catalog.raise_for_category(category)
    }

    pub(crate) fn collector(&self) -> UrlCollector {
        UrlCollector::new(self.request_sender.clone(), self.config.max_batch_size())
    }

    pub(crate) fn autocompleter(&self) -> Autocompleter {
        Autocompleter::new(self.request_sender.clone())
    }

    /// Starts `threads` download workers saving into `save_dir`.
    pub(crate) fn download_pipeline(
        &self,
        save_dir: &Path,
        threads: usize,
        reporter: Arc<dyn ProgressReporter>,
    ) -> NekosResult<DownloadPipeline> {
        DownloadPipeline::start(
            save_dir,
            threads,
            self.config.chunk_size(),
            self.request_sender.clone(),
            reporter,
        )
    }

    /// A scroller window over the configured scratch directory.
    pub(crate) fn scroll_cache(&self, category: Category) -> NekosResult<WindowedCache> {
        let pipeline = self.download_pipeline(
            self.config.scroll_directory(),
            self.config.scroll_threads(),
            Arc::new(QuietReporter),
        )?;
        Ok(WindowedCache::new(
            pipeline,
            self.collector(),
            category,
            self.config.max_images(),
            self.config.selection(),
        ))
    }
}
