use std::fs::{read_to_string, write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};
use serde_json::{from_str, to_string_pretty};

pub(crate) mod directory;

/// Name of the configuration file.
pub(crate) const CONFIG_NAME: &str = "config.json";

/// How the scroller picks the next image.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Selection {
    /// The oldest downloaded image first.
    Fifo,
    /// Any downloaded image, uniformly.
    #[default]
    Random,
}

/// Config that is used to do general setup.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct Config {
    /// Root of the image API.
    #[serde(rename = "baseUrl", default = "default_base_url")]
    base_url: String,
    /// Where `download` saves images.
    #[serde(rename = "downloadDirectory", default = "default_download_directory")]
    download_directory: String,
    /// Scratch directory the scroller caches images in; its contents get deleted.
    #[serde(rename = "scrollDirectory", default = "default_scroll_directory")]
    scroll_directory: String,
    /// Where `collect` writes URL files.
    #[serde(rename = "urlsDirectory", default = "default_urls_directory")]
    urls_directory: String,
    /// Download workers used by `download`.
    #[serde(rename = "downloadThreads", default = "default_download_threads")]
    download_threads: usize,
    /// Download workers used by `scroll`.
    #[serde(rename = "scrollThreads", default = "default_scroll_threads")]
    scroll_threads: usize,
    /// Seconds to wait for all downloads to finish.
    #[serde(rename = "timeoutSecs", default = "default_timeout_secs")]
    timeout_secs: u64,
    /// Largest `count` the listing endpoint accepts.
    #[serde(rename = "maxBatchSize", default = "default_max_batch_size")]
    max_batch_size: usize,
    /// Size of the scroller window.
    #[serde(rename = "maxImages", default = "default_max_images")]
    max_images: usize,
    /// Bytes written per chunk while streaming a download.
    #[serde(rename = "chunkSize", default = "default_chunk_size")]
    chunk_size: usize,
    /// Timeout of a single HTTP request in seconds.
    #[serde(rename = "requestTimeoutSecs", default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(rename = "userAgent", default = "default_user_agent")]
    user_agent: String,
    /// Scroller selection strategy.
    #[serde(default)]
    selection: Selection,
}

fn default_base_url() -> String { String::from("https://api.nekos.dev/api/v3/") }
fn default_download_directory() -> String { String::from("images") }
fn default_scroll_directory() -> String { String::from(".temp") }
fn default_urls_directory() -> String { String::from("urls") }
fn default_download_threads() -> usize { 1 }
fn default_scroll_threads() -> usize { 3 }
fn default_timeout_secs() -> u64 { 60 * 60 }
fn default_max_batch_size() -> usize { 20 }
fn default_max_images() -> usize { 60 }
fn default_chunk_size() -> usize { 0x100000 }
fn default_request_timeout_secs() -> u64 { 60 }
fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

impl Config {
    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn download_directory(&self) -> &Path {
        Path::new(&self.download_directory)
    }

    pub(crate) fn scroll_directory(&self) -> &Path {
        Path::new(&self.scroll_directory)
    }

    pub(crate) fn urls_directory(&self) -> &Path {
        Path::new(&self.urls_directory)
    }

    pub(crate) fn download_threads(&self) -> usize {
        self.download_threads.max(1)
    }

    pub(crate) fn scroll_threads(&self) -> usize {
        self.scroll_threads.max(1)
    }

    pub(crate) fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub(crate) fn max_batch_size(&self) -> usize {
        self.max_batch_size.max(1)
    }

    /// The scroller window never goes below one batch, otherwise no top-up would ever start.
    pub(crate) fn max_images(&self) -> usize {
        self.max_images.max(self.max_batch_size())
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    pub(crate) fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs
    }

    pub(crate) fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub(crate) fn selection(&self) -> Selection {
        self.selection
    }

    /// Path of the URL file `collect` writes for a category.
    pub(crate) fn url_file_for(&self, kind: &str, format: &str, category: &str) -> PathBuf {
        self.urls_directory()
            .join(kind)
            .join(format)
            .join(format!("{category}.txt"))
    }

    /// Checks config and ensure it isn't missing.
    pub(crate) fn config_exists(path: &Path) -> bool {
        if !path.exists() {
            trace!("{}: does not exist!", path.display());
            return false;
        }

        true
    }

    /// Creates config file.
    pub(crate) fn create_config(path: &Path) -> Result<(), Error> {
        let json = to_string_pretty(&Config::default())?;
        write(path, json)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Loads the config at `path`, creating it with defaults first if it is missing.
    pub(crate) fn load_or_create(path: &Path) -> Result<Self, Error> {
        if !Self::config_exists(path) {
            info!("Creating config file...");
            Self::create_config(path)?;
        }

        let config_contents = read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = from_str(&config_contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub(crate) fn set_download_directory(&mut self, dir: &str) {
        self.download_directory = dir.to_string();
    }

    pub(crate) fn set_urls_directory(&mut self, dir: &Path) {
        self.urls_directory = dir.to_string_lossy().into_owned();
    }

    pub(crate) fn set_download_threads(&mut self, threads: usize) {
        self.download_threads = threads;
    }

    pub(crate) fn set_scroll_threads(&mut self, threads: usize) {
        self.scroll_threads = threads;
    }

    pub(crate) fn set_timeout_secs(&mut self, secs: u64) {
        self.timeout_secs = secs;
    }

    pub(crate) fn set_selection(&mut self, selection: Selection) {
        self.selection = selection;
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: default_base_url(),
            download_directory: default_download_directory(),
            scroll_directory: default_scroll_directory(),
            urls_directory: default_urls_directory(),
            download_threads: default_download_threads(),
            scroll_threads: default_scroll_threads(),
            timeout_secs: default_timeout_secs(),
            max_batch_size: default_max_batch_size(),
            max_images: default_max_images(),
            chunk_size: default_chunk_size(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
            selection: Selection::default(),
        }
    }
}
