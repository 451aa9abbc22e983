//! Sequential processing of playlist items.

use super::cancel::CancellationToken;
use super::workspace::{remove_file_best_effort, TempWorkspace};
use super::{Pipeline, PipelineError};
use crate::archive::{ArchiveEntry, FailedItem};
use crate::resolver::MediaReference;
use crate::transcode::TARGET_EXTENSION;
use crate::utils::sanitize_filename;

/// Outcome of a batch: every item lands in exactly one of the two lists,
/// unless the batch was cancelled before reaching it.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub succeeded: Vec<ArchiveEntry>,
    pub failed: Vec<FailedItem>,
    pub cancelled: bool,
}

impl BatchResult {
    pub fn succeeded_names(&self) -> Vec<String> {
        self.succeeded.iter().map(|e| e.name.clone()).collect()
    }
}

impl Pipeline {
    /// Process items one at a time, collecting results in input order.
    ///
    /// A failed item is recorded and the batch moves on. Once the token is
    /// cancelled no further item is started.
    pub async fn process_batch(
        &self,
        items: &[MediaReference],
        workspace: &TempWorkspace,
        token: &CancellationToken,
    ) -> BatchResult {
        let total = items.len();
        let mut result = BatchResult::default();

        for (index, item) in items.iter().enumerate() {
            if token.is_cancelled() {
                tracing::info!("Batch cancelled before item {}/{}", index + 1, total);
                result.cancelled = true;
                break;
            }

            self.progress.item_started(index, total, &item.title);
            tracing::info!("Processing item {}/{}: \"{}\"", index + 1, total, item.title);

            match self.process_item(item, workspace, token).await {
                Ok(processed) => {
                    let read = tokio::fs::read(&processed.audio_path).await;
                    remove_file_best_effort(&processed.audio_path).await;

                    if token.is_cancelled() {
                        result.cancelled = true;
                        break;
                    }

                    match read {
                        Ok(bytes) => {
                            let name =
                                format!("{}.{}", sanitize_filename(&item.title), TARGET_EXTENSION);
                            result.succeeded.push(ArchiveEntry::new(name, bytes));
                            self.progress.item_finished(&item.title, true);
                        }
                        Err(e) => {
                            let error = PipelineError::io(item.title.clone(), e);
                            self.record_failure(&mut result, item, &error);
                        }
                    }
                }
                Err(e) if e.is_cancelled() && token.is_cancelled() => {
                    result.cancelled = true;
                    break;
                }
                Err(e) => self.record_failure(&mut result, item, &e),
            }
        }

        tracing::info!(
            "Batch finished: {} succeeded, {} failed{}",
            result.succeeded.len(),
            result.failed.len(),
            if result.cancelled { " (cancelled)" } else { "" }
        );
        result
    }

    fn record_failure(&self, result: &mut BatchResult, item: &MediaReference, error: &PipelineError) {
        match error.diagnostics() {
            Some(diagnostics) => tracing::warn!(
                diagnostics = %diagnostics,
                "Item \"{}\" failed: {}",
                item.title,
                error
            ),
            None => tracing::warn!("Item \"{}\" failed: {}", item.title, error),
        }

        result.failed.push(FailedItem {
            title: item.title.clone(),
            reason: error.user_message(),
            cancelled: error.is_cancelled(),
        });
        self.progress.item_finished(&item.title, false);
    }
}
