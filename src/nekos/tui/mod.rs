/*
 * Copyright (c) 2022 McSib
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */


use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::nekos::queue::DownloadTask;
use crate::nekos::urls::to_minutes;
use crate::nekos::worker::DownloadOutcome;

/// Receives pipeline progress, decoupling the pipeline from any display.
pub(crate) trait ProgressReporter: Send + Sync {
    /// Called after every finished download and every collected batch.
    ///
    /// # Arguments
    ///
    /// * `done`: Images present in the save directory.
    /// * `total`: Images present plus images queued or downloading.
    /// * `elapsed`: Time since the pipeline started.
    /// * `estimate`: Expected total time, elapsed included.
    fn on_progress(&self, done: usize, total: usize, elapsed: Duration, estimate: Duration);

    /// Called with the result of every download attempt.
    fn on_outcome(&self, task: &DownloadTask, outcome: &DownloadOutcome) {
        log_outcome(task, outcome);
    }

    /// Called once the caller stops waiting on the pipeline.
    fn finish(&self, _message: &str) {}
}

/// Writes a download result to the log.
pub(crate) fn log_outcome(task: &DownloadTask, outcome: &DownloadOutcome) {
    match outcome {
        DownloadOutcome::Completed { bytes, elapsed } => {
            trace!("Saved {} ({} bytes in {:.2}s)", task.target_path().display(), bytes, elapsed.as_secs_f64());
        }
        DownloadOutcome::Failed(err) if err.is_cancelled() => {
            debug!("Dropped {}: {}", task.filename(), err);
        }
        DownloadOutcome::Failed(err) => {
            warn!("Failed to download {}: {}", task.url(), err);
        }
    }
}

/// Reporter for `--quiet`, only logs.
#[derive(Debug, Default)]
pub(crate) struct QuietReporter;

impl ProgressReporter for QuietReporter {
    fn on_progress(&self, done: usize, total: usize, _elapsed: Duration, _estimate: Duration) {
        trace!("{} / {} images", done, total);
    }
}

/// Shows progress as a terminal bar: `[*] done / total images [elapsed / estimate]`.
pub(crate) struct BarReporter {
    progress_bar: ProgressBar,
}

impl BarReporter {
    pub(crate) fn new() -> Self {
        let style = ProgressStyleBuilder::default()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos} / {len} images {msg}")
            .progress_chars("#>-")
            .build();

        let progress_bar = ProgressBarBuilder::new(0)
            .style(style)
            .draw_target(ProgressDrawTarget::stderr_with_hz(5))
            .reset()
            .steady_tick(Duration::from_millis(200))
            .build();

        Self { progress_bar }
    }
}

impl ProgressReporter for BarReporter {
    fn on_progress(&self, done: usize, total: usize, elapsed: Duration, estimate: Duration) {
        self.progress_bar.set_length(total as u64);
        self.progress_bar.set_position(done as u64);
        self.progress_bar.set_message(format!(
            "[{} / {}]",
            to_minutes(elapsed.as_secs_f64()),
            to_minutes(estimate.as_secs_f64())
        ));
    }

    fn on_outcome(&self, task: &DownloadTask, outcome: &DownloadOutcome) {
        log_outcome(task, outcome);
        if let DownloadOutcome::Failed(err) = outcome {
            if !err.is_cancelled() {
                self.progress_bar
                    .println(format!("{} {}", console::style("failed").red(), task.filename()));
            }
        }
    }

    fn finish(&self, message: &str) {
        self.progress_bar.finish_with_message(message.to_string());
    }
}

/// A builder that helps in making a new [ProgressStyle] for use.
pub(crate) struct ProgressStyleBuilder {
    /// The [ProgressStyle] being built.
    progress_style: ProgressStyle,
}

impl ProgressStyleBuilder {
    /// Sets the template of the progress style, falling back to a plain bar if it does not parse.
    ///
    /// # Arguments
    ///
    /// * `msg_template`: The template to use.
    pub(crate) fn template(mut self, msg_template: &str) -> Self {
        match self.progress_style.clone().template(msg_template) {
            Ok(style) => self.progress_style = style,
            Err(err) => {
                warn!("Template error with '{}': {}. Using default bar.", msg_template, err);
                self.progress_style = ProgressStyle::default_bar();
            }
        }
        self
    }

    /// Sets the progress style chars.
    ///
    /// # Arguments
    ///
    /// * `chars`: Progress chars to use.
    pub(crate) fn progress_chars(mut self, chars: &str) -> Self {
        self.progress_style = self.progress_style.progress_chars(chars);
        self
    }

    pub(crate) fn build(self) -> ProgressStyle {
        self.progress_style
    }
}

impl Default for ProgressStyleBuilder {
    fn default() -> Self {
        Self {
            progress_style: ProgressStyle::default_bar(),
        }
    }
}

/// A builder that helps in initializing and configuring a new [ProgressBar] for use.
pub(crate) struct ProgressBarBuilder {
    /// The [ProgressBar] to build.
    progress_bar: ProgressBar,
}

impl ProgressBarBuilder {
    /// Creates new instance of the builder.
    ///
    /// # Arguments
    ///
    /// * `len`: Total length of the progress bar.
    pub(crate) fn new(len: u64) -> Self {
        Self {
            progress_bar: ProgressBar::new(len),
        }
    }

    /// Sets the style of the progress bar to the style given.
    pub(crate) fn style(self, progress_style: ProgressStyle) -> Self {
        self.progress_bar.set_style(progress_style);
        self
    }

    /// Sets the draw target (output) of the progress bar to the target given.
    pub(crate) fn draw_target(self, target: ProgressDrawTarget) -> Self {
        self.progress_bar.set_draw_target(target);
        self
    }

    /// Resets the progress bar state to update it.
    pub(crate) fn reset(self) -> Self {
        self.progress_bar.reset();
        self
    }

    /// Sets the steady tick's duration to the given duration.
    pub(crate) fn steady_tick(self, duration: Duration) -> Self {
        self.progress_bar.enable_steady_tick(duration);
        self
    }

    /// Returns the newly built progress bar.
    pub(crate) fn build(self) -> ProgressBar {
        self.progress_bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_template_falls_back() {
        let style = ProgressStyleBuilder::default().template("{bar:nonsense").build();
        let bar = ProgressBarBuilder::new(3)
            .style(style)
            .draw_target(ProgressDrawTarget::hidden())
            .build();
        bar.inc(1);
        assert_eq!(bar.position(), 1);
    }

    #[test]
    fn test_bar_reporter_tracks_counts() {
        let reporter = BarReporter::new();
        reporter.progress_bar.set_draw_target(ProgressDrawTarget::hidden());
        reporter.on_progress(3, 10, Duration::from_secs(2), Duration::from_secs(9));

        assert_eq!(reporter.progress_bar.position(), 3);
        assert_eq!(reporter.progress_bar.length(), Some(10));
        assert_eq!(reporter.progress_bar.message(), "[2s / 9s]");
    }
}
