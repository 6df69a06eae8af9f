#[macro_use]
extern crate log;

use std::env::consts::{ARCH, EXE_SUFFIX, FAMILY, OS};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

use anyhow::Error;
use log::LevelFilter;
use parking_lot::Mutex;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

use crate::program::Program;

mod cli;
mod nekos;
mod program;

/// File every log level is written to.
const LOG_FILE: &str = "nekos_downloader.log";

/// Lines written between forced flushes of the log file.
const FLUSH_EVERY_LINES: usize = 50;

/// Buffered log file writer that flushes every few lines and on drop.
struct BufferedFileWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
    line_count: usize,
}

impl BufferedFileWriter {
    fn new() -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(LOG_FILE)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(64 * 1024, file))),
            line_count: 0,
        })
    }
}

impl Write for BufferedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self.inner.lock();
        let size = writer.write(buf)?;

        let lines = buf[..size].iter().filter(|&&b| b == b'\n').count();
        if lines > 0 {
            let before = self.line_count / FLUSH_EVERY_LINES;
            self.line_count += lines;
            if self.line_count / FLUSH_EVERY_LINES != before {
                writer.flush()?;
            }
        }

        Ok(size)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl Drop for BufferedFileWriter {
    fn drop(&mut self) {
        let _ = self.inner.lock().flush();
    }
}

fn main() -> Result<(), Error> {
    initialize_logger();
    log_system_information();

    let program = Program::new();
    program.run()
}

/// Logs `Info` and above to the terminal and everything this crate logs to [LOG_FILE].
fn initialize_logger() {
    let mut config = ConfigBuilder::new();
    config.add_filter_allow_str("nekos_downloader");

    let file_writer = match BufferedFileWriter::new() {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!("Failed to open {LOG_FILE}: {e}. Logging will only output to terminal.");
            init_terminal_logger();
            return;
        }
    };

    if let Err(e) = CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::max(), config.build(), file_writer),
    ]) {
        eprintln!("Failed to initialize combined logger: {e}. Falling back to terminal-only logging.");
        init_terminal_logger();
    }
}

fn init_terminal_logger() {
    let _ = TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("EXE_SUFFIX:     \"{}\"", EXE_SUFFIX);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}
