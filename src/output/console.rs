//! Terminal rendering of progress and results.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::archive::FailedItem;
use crate::pipeline::{ProgressEvent, ProgressReporter};
use crate::utils::format_file_size;

/// Buffered progress events before updates start being dropped
const PROGRESS_CHANNEL_SIZE: usize = 64;

/// Create a reporter whose events drive a spinner on stderr.
///
/// The spinner task ends once every clone of the reporter is dropped.
pub fn progress_renderer(quiet: bool) -> (ProgressReporter, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ProgressEvent>(PROGRESS_CHANNEL_SIZE);

    let handle = tokio::spawn(async move {
        let progress = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        progress.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        progress.enable_steady_tick(Duration::from_millis(120));

        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::ItemStarted {
                    index,
                    total,
                    title,
                } => {
                    if total > 1 {
                        progress.set_message(format!("[{}/{}] {}", index + 1, total, title));
                    } else {
                        progress.set_message(format!("Resolving {}", title));
                    }
                }
                ProgressEvent::Downloading {
                    title,
                    bytes,
                    total,
                } => {
                    let total = total
                        .map(|t| format!(" / {}", format_file_size(t)))
                        .unwrap_or_default();
                    progress.set_message(format!(
                        "Downloading {}: {}{}",
                        title,
                        format_file_size(bytes),
                        total
                    ));
                }
                ProgressEvent::Transcoding { title, percent } => {
                    progress.set_message(format!("Converting {}: {:.0}%", title, percent));
                }
                ProgressEvent::ItemFinished { title, ok } => {
                    let mark = if ok {
                        style("✓").green()
                    } else {
                        style("✗").red()
                    };
                    progress.println(format!("{} {}", mark, title));
                }
            }
        }

        progress.finish_and_clear();
    });

    (ProgressReporter::new(tx), handle)
}

/// Print a per-item summary of a playlist download
pub fn print_playlist_summary(succeeded: &[String], failed: &[FailedItem]) {
    println!(
        "{} succeeded, {} failed",
        style(succeeded.len()).green().bold(),
        style(failed.len()).red().bold()
    );
    for name in succeeded {
        println!("  {} {}", style("✓").green(), name);
    }
    for item in failed {
        println!(
            "  {} {}: {}",
            style("✗").red(),
            item.title,
            style(&item.reason).dim()
        );
    }
}
