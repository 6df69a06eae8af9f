use std::env::current_dir;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Error, anyhow};
use clap::Parser;
use console::{Key, Term, style};

use crate::cli::{Cli, CollectArgs, Command, DownloadArgs, ScrollArgs};
use crate::nekos::NekosConnector;
use crate::nekos::category::Category;
use crate::nekos::collector::{CollectOptions, UrlCollector};
use crate::nekos::error::NekosResult;
use crate::nekos::io::Config;
use crate::nekos::scroller::ServedImage;
use crate::nekos::tui::{BarReporter, ProgressReporter, QuietReporter};
use crate::nekos::url_file::UrlFile;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// A program class that handles the flow of the downloader user experience and steps of execution.
pub(crate) struct Program {
    cli: Cli,
}

impl Program {
    /// Creates a new instance of the program from the command line.
    pub(crate) fn new() -> Self {
        Self { cli: Cli::parse() }
    }

    /// Runs the downloader program.
    pub(crate) fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("nekos downloader");
        trace!("Starting nekos downloader...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        match current_dir() {
            Ok(dir) => trace!("Program Working Directory: {}", dir.display()),
            Err(e) => warn!("Unable to get working directory: {}", e),
        }

        trace!("Loading config {}...", self.cli.config.display());
        let config = Config::load_or_create(&self.cli.config)?;

        match &self.cli.command {
            Command::Download(args) => self.download(config, args),
            Command::Scroll(args) => self.scroll(config, args),
            Command::Collect(args) => self.collect(config, args),
            Command::Endpoints => self.endpoints(config),
        }
    }

    fn download(&self, mut config: Config, args: &DownloadArgs) -> Result<(), Error> {
        if let Some(folder) = &args.folder {
            config.set_download_directory(folder);
        }
        if let Some(threads) = args.threads {
            config.set_download_threads(threads);
        }
        if let Some(timeout) = args.timeout {
            config.set_timeout_secs(timeout);
        }

        let connector = NekosConnector::new(config)?;
        let category = args.category.category();
        connector.raise_for_category(&category)?;

        let reporter: Arc<dyn ProgressReporter> = if args.quiet {
            Arc::new(QuietReporter)
        } else {
            Arc::new(BarReporter::new())
        };
        let config = connector.config();
        let pipeline = connector
            .download_pipeline(config.download_directory(), config.download_threads(), reporter)
            .with_context(|| format!("Unable to start downloading into {}", config.download_directory().display()))?;
        let handle = pipeline.handle();

        let url_file = args
            .url_file
            .as_ref()
            .map(|path| UrlFile::new(path, args.sort_url_file));
        let options = CollectOptions {
            amount: args.amount,
            unique: args.unique,
            url_file: url_file.clone(),
            stall_limit: None,
        };

        info!("Collecting {} urls of {}...", args.amount, category);
        let urls = connector.collector().collect(&category, &options, Some(&handle))?;
        info!("Collected {} urls", urls.len());

        if args.autocomplete {
            connector
                .autocompleter()
                .with_probe_limit(args.probe_limit)
                .complete(&urls, Some(&handle), url_file.as_ref(), args.update_file_every_url)?;
        }

        let timeout = Duration::from_secs(config.timeout_secs());
        if pipeline.wait_until_finished(timeout) {
            pipeline.finish("Done");
            info!("Finished downloading {} images into {}", pipeline.loaded(), config.download_directory().display());
            pipeline.shutdown();
        } else {
            pipeline.finish("Timed out");
            warn!(
                "Downloads did not finish within {}s, {} are still outstanding",
                config.timeout_secs(),
                pipeline.outstanding()
            );
        }

        Ok(())
    }

    fn scroll(&self, mut config: Config, args: &ScrollArgs) -> Result<(), Error> {
        if let Some(threads) = args.threads {
            config.set_scroll_threads(threads);
        }
        if let Some(selection) = args.selection() {
            config.set_selection(selection);
        }

        let connector = NekosConnector::new(config)?;
        let category = args.category.category();
        connector.raise_for_category(&category)?;

        let term = Term::stdout();
        println!("{} next image, {} quit", style("[Enter/n]").cyan(), style("[q]").cyan());
        for target in &args.sort {
            println!("{} move to {}", style(format!("[{}]", target.key)).cyan(), target.folder.display());
        }

        let mut cache = connector.scroll_cache(category.clone())?;
        cache.reset_session(category)?;
        loop {
            if let Some(image) = cache.current_image() {
                show_image(&image, cache.loaded());
            }
            cache.ensure_ready()?;

            match term.read_key()? {
                Key::Enter | Key::Char('n') | Key::ArrowRight => {}
                Key::Char('q') | Key::Escape => break,
                Key::Char(key) => match args.sort_target(key) {
                    Some(target) => {
                        if let Some(moved) = cache.move_current_to(&target.folder)? {
                            println!("{} {}", style("moved").green(), moved.display());
                        }
                    }
                    None => continue,
                },
                _ => continue,
            }

            cache.next()?;
        }

        debug!("Scroller of {} stopped in state {}", cache.category(), cache.state());
        cache.shutdown();
        Ok(())
    }

    fn collect(&self, mut config: Config, args: &CollectArgs) -> Result<(), Error> {
        if let Some(folder) = &args.folder {
            config.set_urls_directory(folder);
        }

        let connector = NekosConnector::new(config)?;
        let endpoints = connector.endpoints()?;
        let collector = Arc::new(connector.collector());

        let mut workers = Vec::new();
        for ((kind, format), categories) in &endpoints {
            if args.kind.is_some_and(|wanted| wanted != *kind) || args.format.is_some_and(|wanted| wanted != *format) {
                continue;
            }

            for name in categories {
                let category = Category::new(*kind, *format, name);
                let path = connector.config().url_file_for(kind.as_str(), format.as_str(), name);
                let options = CollectOptions {
                    amount: args.amount,
                    unique: args.amount,
                    url_file: Some(UrlFile::new(path, true)),
                    stall_limit: Some(args.stall_limit),
                };
                workers.push(spawn_collector(Arc::clone(&collector), category, options)?);
            }
        }

        info!(
            "Collecting urls of {} categories into {}...",
            workers.len(),
            connector.config().urls_directory().display()
        );
        let mut failed = 0;
        for (category, worker) in workers {
            match worker.join() {
                Ok(Ok(count)) => info!("{}: {} urls", category, count),
                Ok(Err(e)) => {
                    error!("{}: {}", category, e);
                    failed += 1;
                }
                Err(_) => {
                    error!("{}: collector panicked", category);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(anyhow!("{failed} categories could not be collected"));
        }
        Ok(())
    }

    fn endpoints(&self, config: Config) -> Result<(), Error> {
        let connector = NekosConnector::new(config)?;
        for ((kind, format), categories) in connector.endpoints()? {
            println!("{}/{}: {}", style(kind).bold(), style(format).bold(), categories.join(", "));
        }
        Ok(())
    }
}

type CollectorWorker = (Category, thread::JoinHandle<NekosResult<usize>>);

fn spawn_collector(
    collector: Arc<UrlCollector>,
    category: Category,
    options: CollectOptions,
) -> Result<CollectorWorker, Error> {
    let name = format!("cl_{category}");
    let thread_category = category.clone();
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            collector
                .collect(&thread_category, &options, None)
                .map(|urls| urls.len())
        })
        .with_context(|| format!("Unable to start collecting {category}"))?;
    Ok((category, handle))
}

fn show_image(image: &ServedImage, loaded: usize) {
    println!(
        "{} {} {}",
        style(&image.filename).cyan(),
        image.path.display(),
        style(format!("({loaded} cached)")).dim()
    );
}
