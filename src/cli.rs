use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::nekos::autocomplete::DEFAULT_PROBE_LIMIT;
use crate::nekos::category::{Category, ImageFormat, ImageType};
use crate::nekos::io::{CONFIG_NAME, Selection};

/// Keys the scroller itself listens to.
const RESERVED_KEYS: [char; 2] = ['n', 'q'];

/// Downloads images from nekos.life, with a progress bar and multi-threaded download.
#[derive(Parser, Debug)]
#[command(name = "nekos_downloader", version, long_about = None)]
pub(crate) struct Cli {
    /// Path of the configuration file, created with defaults when missing.
    #[arg(long, global = true, default_value = CONFIG_NAME)]
    pub(crate) config: PathBuf,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Collects urls of a category and downloads them.
    Download(DownloadArgs),
    /// Pages through a category in the terminal, keeping a small window of images on disk.
    Scroll(ScrollArgs),
    /// Harvests urls of every category into url files, without downloading.
    Collect(CollectArgs),
    /// Prints every valid category.
    Endpoints,
}

/// The endpoint a command works on.
#[derive(Args, Debug, Clone)]
pub(crate) struct CategoryArgs {
    /// sfw (safe) or nsfw (explicit).
    #[arg(value_enum)]
    pub(crate) kind: ImageType,
    /// img (still) or gif (animated).
    #[arg(value_enum)]
    pub(crate) format: ImageFormat,
    /// Category name, see `endpoints`.
    pub(crate) category: String,
}

impl CategoryArgs {
    pub(crate) fn category(&self) -> Category {
        Category::new(self.kind, self.format, &self.category)
    }
}

#[derive(Args, Debug)]
pub(crate) struct DownloadArgs {
    #[command(flatten)]
    pub(crate) category: CategoryArgs,

    /// Does not show the progress bar.
    #[arg(short, long)]
    pub(crate) quiet: bool,

    /// Amount of images to try and download.
    #[arg(short, long, default_value_t = 20)]
    pub(crate) amount: usize,

    /// Amount of unique images to download, 0 downloads without caring about duplicates.
    #[arg(short, long, default_value_t = 0)]
    pub(crate) unique: usize,

    /// Seconds to wait for downloads before giving up on them.
    #[arg(long)]
    pub(crate) timeout: Option<u64>,

    /// Probes for images missing between collected ones. Slow, every gap costs requests.
    #[arg(short = 'c', long, visible_alias = "complete")]
    pub(crate) autocomplete: bool,

    /// Most probe requests autocomplete may send.
    #[arg(long, default_value_t = DEFAULT_PROBE_LIMIT)]
    pub(crate) probe_limit: usize,

    /// Where to save all the images.
    #[arg(short, long)]
    pub(crate) folder: Option<String>,

    /// Stores every collected url; urls already in it are downloaded first.
    #[arg(short = 'F', long)]
    pub(crate) url_file: Option<PathBuf>,

    /// How many threads download images.
    #[arg(long)]
    pub(crate) threads: Option<usize>,

    /// Sorts the url file by image number.
    #[arg(long)]
    pub(crate) sort_url_file: bool,

    /// Rewrites the url file after every autocompleted url.
    #[arg(long)]
    pub(crate) update_file_every_url: bool,
}

/// A key that moves the current image into a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SortTarget {
    pub(crate) key: char,
    pub(crate) folder: PathBuf,
}

/// Parses `KEY=DIR`, e.g. `k=keep`.
pub(crate) fn parse_sort_target(value: &str) -> Result<SortTarget, String> {
    let (key, folder) = value
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=DIR, got '{value}'"))?;

    let mut chars = key.chars();
    let (Some(key), None) = (chars.next(), chars.next()) else {
        return Err(format!("'{key}' must be a single character"));
    };
    if RESERVED_KEYS.contains(&key) {
        return Err(format!("'{key}' is already used by the scroller"));
    }
    if folder.trim().is_empty() {
        return Err(String::from("the folder must not be empty"));
    }

    Ok(SortTarget {
        key,
        folder: PathBuf::from(folder.trim()),
    })
}

#[derive(Args, Debug)]
pub(crate) struct ScrollArgs {
    #[command(flatten)]
    pub(crate) category: CategoryArgs,

    /// How many threads download images.
    #[arg(long)]
    pub(crate) threads: Option<usize>,

    /// Binds a key to a folder the current image is moved to, e.g. `--sort k=keep`.
    #[arg(long = "sort", value_name = "KEY=DIR", value_parser = parse_sort_target)]
    pub(crate) sort: Vec<SortTarget>,

    /// Shows cached images in random order.
    #[arg(long, conflicts_with = "fifo")]
    pub(crate) random: bool,

    /// Shows cached images oldest first.
    #[arg(long)]
    pub(crate) fifo: bool,
}

impl ScrollArgs {
    /// The selection asked for on the command line, if any.
    pub(crate) fn selection(&self) -> Option<Selection> {
        match (self.random, self.fifo) {
            (true, _) => Some(Selection::Random),
            (_, true) => Some(Selection::Fifo),
            _ => None,
        }
    }

    pub(crate) fn sort_target(&self, key: char) -> Option<&SortTarget> {
        self.sort.iter().find(|target| target.key == key)
    }
}

#[derive(Args, Debug)]
pub(crate) struct CollectArgs {
    /// Only collect this type.
    #[arg(long = "type", value_enum)]
    pub(crate) kind: Option<ImageType>,

    /// Only collect this format.
    #[arg(long, value_enum)]
    pub(crate) format: Option<ImageFormat>,

    /// Most urls requested per category.
    #[arg(short, long, default_value_t = 0xffffffff)]
    pub(crate) amount: usize,

    /// Batches in a row without a new url before a category is considered complete.
    #[arg(long, default_value_t = 20)]
    pub(crate) stall_limit: usize,

    /// Where url files are written.
    #[arg(long)]
    pub(crate) folder: Option<PathBuf>,
}
