//! Filesystem layout for transient images and generated documents.
//!
//! Images land in `{dir}/{conversation}_{source_id}.{ext}`, the generated
//! document in `{dir}/{conversation}.pdf`. Everything in the spool is removed
//! once the document has been delivered.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::store::{ConversationId, ImageRef};

const DEFAULT_IMAGE_EXTENSION: &str = "jpg";
const FALLBACK_SOURCE_ID: &str = "image";

#[derive(Debug, Clone)]
pub struct ImageSpool {
    dir: PathBuf,
}

impl ImageSpool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the spool directory if it does not exist yet.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create images directory {}", self.dir.display()))
    }

    pub fn image_path(
        &self,
        conversation: ConversationId,
        source_id: &str,
        extension: &str,
    ) -> PathBuf {
        let source_id = sanitize_source_id(source_id);
        self.dir
            .join(format!("{conversation}_{source_id}.{extension}"))
    }

    pub fn document_path(&self, conversation: ConversationId) -> PathBuf {
        self.dir.join(format!("{conversation}.pdf"))
    }

    /// Writes an inbound image to disk and returns its reference.
    ///
    /// The extension is sniffed from the bytes; unrecognised content keeps the
    /// `jpg` default and is rejected later by the encoder.
    ///
    /// # Errors
    /// Returns an error if `bytes` is empty or the file cannot be written.
    pub fn store_image(
        &self,
        conversation: ConversationId,
        source_id: &str,
        bytes: &[u8],
    ) -> Result<ImageRef> {
        if bytes.is_empty() {
            bail!("received an empty image");
        }

        self.ensure_dir()?;
        let path = self.image_path(conversation, source_id, image_extension(bytes));
        fs::write(&path, bytes).with_context(|| format!("write image {}", path.display()))?;
        debug!(conversation, path = %path.display(), "stored image");

        Ok(ImageRef {
            path,
            source_id: source_id.to_string(),
        })
    }

    /// Writes the generated document for a conversation.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_document(&self, conversation: ConversationId, pdf: &[u8]) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.document_path(conversation);
        fs::write(&path, pdf).with_context(|| format!("write document {}", path.display()))?;
        Ok(path)
    }

    /// Deletes the given files. Files that are already gone are skipped.
    ///
    /// Every path is attempted even if an earlier one fails.
    ///
    /// # Errors
    /// Returns an error naming the first file that could not be removed and
    /// how many removals failed in total.
    pub fn purge<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) -> Result<()> {
        let mut failures: Vec<(PathBuf, io::Error)> = Vec::new();
        for path in paths {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => failures.push((path.to_path_buf(), err)),
            }
        }

        match failures.first() {
            None => Ok(()),
            Some((path, err)) => bail!(
                "failed to remove {} file(s); first: {}: {err}",
                failures.len(),
                path.display()
            ),
        }
    }
}

/// Maps an arbitrary platform id to a file-name-safe token.
fn sanitize_source_id(source_id: &str) -> String {
    let cleaned: String = source_id
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        FALLBACK_SOURCE_ID.to_string()
    } else {
        cleaned
    }
}

fn image_extension(bytes: &[u8]) -> &'static str {
    infer::get(bytes)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map_or(DEFAULT_IMAGE_EXTENSION, |kind| kind.extension())
}
