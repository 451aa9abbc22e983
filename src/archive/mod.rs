//! In-memory ZIP packaging of playlist results.

use serde::Serialize;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use zip::result::ZipResult;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::utils::sanitize_filename;

/// A finished audio file destined for the archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// A playlist item that produced no audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub title: String,
    pub reason: String,
    /// The item itself reported cancellation while the batch kept going.
    /// A cancelled request stops the batch instead and builds no archive.
    pub cancelled: bool,
}

impl FailedItem {
    /// Name of the text marker written in place of the audio file
    pub fn marker_name(&self) -> String {
        let prefix = if self.cancelled { "CANCELLED" } else { "ERROR" };
        format!("{}_{}.txt", prefix, sanitize_filename(&self.title))
    }

    fn marker_body(&self) -> String {
        format!("Title: {}\nReason: {}\n", self.title, self.reason)
    }
}

/// Writes entries into a ZIP held entirely in memory.
///
/// Entry names are unique within one archive: a repeated name (compared
/// case-insensitively) gets ` (2)`, ` (3)`, ... inserted before its extension.
pub struct ArchiveBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    used_names: HashSet<String>,
    entries: usize,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
            used_names: HashSet::new(),
            entries: 0,
        }
    }

    /// Add an audio file, returning the name it was stored under.
    ///
    /// MP3 data is already compressed, so it is stored as-is.
    pub fn add_file(&mut self, name: &str, bytes: &[u8]) -> ZipResult<String> {
        self.add(name, bytes, CompressionMethod::Stored)
    }

    /// Add a text marker describing why an item is missing
    pub fn add_failure_marker(&mut self, item: &FailedItem) -> ZipResult<String> {
        self.add(
            &item.marker_name(),
            item.marker_body().as_bytes(),
            CompressionMethod::Deflated,
        )
    }

    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Finish the central directory and return the archive bytes
    pub fn finish(mut self) -> ZipResult<Vec<u8>> {
        Ok(self.writer.finish()?.into_inner())
    }

    fn add(&mut self, name: &str, bytes: &[u8], method: CompressionMethod) -> ZipResult<String> {
        let name = self.unique_name(name);
        let options = FileOptions::default()
            .compression_method(method)
            .unix_permissions(0o644);

        self.writer.start_file(name.as_str(), options)?;
        self.writer.write_all(bytes)?;
        self.entries += 1;
        Ok(name)
    }

    fn unique_name(&mut self, name: &str) -> String {
        if self.used_names.insert(name.to_lowercase()) {
            return name.to_string();
        }

        let (stem, extension) = match name.rfind('.') {
            Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
            _ => (name, ""),
        };

        let mut counter = 2;
        loop {
            let candidate = format!("{} ({}){}", stem, counter, extension);
            if self.used_names.insert(candidate.to_lowercase()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the playlist archive: one entry per success, then one marker per failure
pub fn build(succeeded: &[ArchiveEntry], failed: &[FailedItem]) -> ZipResult<Vec<u8>> {
    let mut builder = ArchiveBuilder::new();

    for entry in succeeded {
        builder.add_file(&entry.name, &entry.bytes)?;
    }
    for item in failed {
        builder.add_failure_marker(item)?;
    }

    tracing::debug!(
        "Archive built with {} entries ({} failed)",
        builder.entry_count(),
        failed.len()
    );
    builder.finish()
}
