//! Conversation image queue and PDF emitter.
//!
//! Per conversation the emitter is either idle (no queue) or accumulating
//! images. A successful convert delivers one PDF and returns the conversation
//! to idle; a failed convert leaves the queue and its files untouched so the
//! user can retry without resending anything.

use std::iter;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashSet;
use snapdf_core::pdf::PdfEncoder;
use snapdf_core::spool::ImageSpool;
use snapdf_core::store::{ConversationId, ConversationStore, ImageRef};
use tracing::{error, info, warn};

use crate::telegram::TelegramClient;

pub const DOCUMENT_FILE_NAME: &str = "converted.pdf";

pub const START_TEXT: &str =
    "📷 Send me images, and I'll convert them into a PDF! Use /convert when you're ready.";
pub const IMAGE_SAVED_TEXT: &str = "✅ Image saved! Send more or use /convert to generate a PDF.";
pub const NO_IMAGES_TEXT: &str = "⚠️ No images found! Please send some images first.";
pub const PDF_SENT_TEXT: &str = "✅ PDF generated and sent successfully!";
pub const CONVERT_FAILED_TEXT: &str = "❌ An error occurred while generating the PDF.";
pub const TRANSFER_FAILED_TEXT: &str = "❌ Failed to save the image. Please try again.";
pub const CONVERT_IN_PROGRESS_TEXT: &str = "⏳ Your PDF is already being generated, please wait.";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("no images queued for this conversation")]
    EmptyQueue,
    #[error("a conversion is already running for this conversation")]
    InProgress,
    #[error("failed to encode the document: {0}")]
    Encoding(#[source] BoxError),
    #[error("failed to deliver the document: {0}")]
    Delivery(#[source] BoxError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("failed to transfer the image: {0}")]
    Transfer(#[source] BoxError),
}

/// Outbound side of the messaging platform.
pub trait ChatOutbox: Send + Sync + 'static {
    fn send_text(
        &self,
        chat_id: ConversationId,
        text: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn deliver_document(
        &self,
        chat_id: ConversationId,
        pdf: Vec<u8>,
        file_name: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl ChatOutbox for TelegramClient {
    async fn send_text(&self, chat_id: ConversationId, text: &str) -> Result<()> {
        self.send_message(chat_id, text).await
    }

    async fn deliver_document(
        &self,
        chat_id: ConversationId,
        pdf: Vec<u8>,
        file_name: &str,
    ) -> Result<()> {
        self.send_document(chat_id, pdf, file_name).await
    }
}

pub struct PdfEmitter<O, E> {
    outbox: O,
    encoder: Arc<E>,
    store: Arc<ConversationStore>,
    spool: ImageSpool,
    converting: DashSet<ConversationId>,
}

impl<O: ChatOutbox, E: PdfEncoder> PdfEmitter<O, E> {
    pub fn new(outbox: O, encoder: E, store: Arc<ConversationStore>, spool: ImageSpool) -> Self {
        Self {
            outbox,
            encoder: Arc::new(encoder),
            store,
            spool,
            converting: DashSet::new(),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn spool(&self) -> &ImageSpool {
        &self.spool
    }

    /// Welcome message. Does not touch the store.
    ///
    /// # Errors
    /// Returns an error if the message cannot be sent.
    pub async fn on_start(&self, chat_id: ConversationId) -> Result<()> {
        self.outbox.send_text(chat_id, START_TEXT).await
    }

    /// Stores an inbound image and appends it to the conversation's queue.
    ///
    /// The queue is only touched once the file is on disk.
    ///
    /// # Errors
    /// Returns [`ReceiveError::Transfer`] if the image cannot be stored; the
    /// user is told and the queue is left as it was.
    pub async fn on_image_received(
        &self,
        chat_id: ConversationId,
        bytes: &[u8],
        source_id: &str,
    ) -> Result<ImageRef, ReceiveError> {
        let image = match self.spool.store_image(chat_id, source_id, bytes) {
            Ok(image) => image,
            Err(err) => return Err(self.on_transfer_failed(chat_id, err).await),
        };

        let queued = self.store.append(chat_id, image.clone());
        info!(chat_id, queued, "image queued");
        self.notify(chat_id, IMAGE_SAVED_TEXT).await;
        Ok(image)
    }

    /// Reports an image that could not be downloaded or stored.
    pub async fn on_transfer_failed(
        &self,
        chat_id: ConversationId,
        err: anyhow::Error,
    ) -> ReceiveError {
        warn!(chat_id, error = %format!("{err:#}"), "image transfer failed");
        self.notify(chat_id, TRANSFER_FAILED_TEXT).await;
        ReceiveError::Transfer(err.into())
    }

    /// Combines every queued image into one PDF, delivers it, then removes
    /// the delivered images and the document from disk.
    ///
    /// Returns the number of pages delivered.
    ///
    /// Only one convert runs per conversation at a time. Images received
    /// while it runs stay queued for the next one.
    ///
    /// # Errors
    /// [`ConvertError::EmptyQueue`] when nothing is queued and
    /// [`ConvertError::InProgress`] when another convert is still running.
    /// Encoding or delivery failures leave the queue intact. The user is
    /// notified in every case.
    pub async fn on_convert_requested(&self, chat_id: ConversationId) -> Result<usize, ConvertError> {
        let Some(_in_flight) = ConvertGuard::acquire(&self.converting, chat_id) else {
            self.notify(chat_id, CONVERT_IN_PROGRESS_TEXT).await;
            return Err(ConvertError::InProgress);
        };

        let images = self.store.snapshot(chat_id);
        if images.is_empty() {
            self.notify(chat_id, NO_IMAGES_TEXT).await;
            return Err(ConvertError::EmptyQueue);
        }

        match self.emit(chat_id, &images).await {
            Ok(document) => {
                let remaining = self.store.release(chat_id, &images);
                let still_queued = self.store.snapshot(chat_id);
                let files = images
                    .iter()
                    .filter(|image| !still_queued.iter().any(|queued| queued.path == image.path))
                    .map(|image| image.path.as_path())
                    .chain(iter::once(document.as_path()));
                if let Err(err) = self.spool.purge(files) {
                    warn!(chat_id, error = %format!("{err:#}"), "cleanup after delivery failed");
                }
                info!(chat_id, pages = images.len(), remaining, "document delivered");
                self.notify(chat_id, PDF_SENT_TEXT).await;
                Ok(images.len())
            }
            Err(err) => {
                error!(chat_id, pages = images.len(), error = %err, "conversion failed");
                self.notify(chat_id, CONVERT_FAILED_TEXT).await;
                Err(err)
            }
        }
    }

    /// Drops the conversation's queue and its files without building a PDF.
    /// Returns how many images were discarded.
    pub async fn on_clear_requested(&self, chat_id: ConversationId) -> usize {
        let images = self.store.take(chat_id);
        if images.is_empty() {
            self.notify(chat_id, NO_IMAGES_TEXT).await;
            return 0;
        }

        if let Err(err) = self.spool.purge(images.iter().map(|image| image.path.as_path())) {
            warn!(chat_id, error = %format!("{err:#}"), "cleanup after clear failed");
        }
        info!(chat_id, discarded = images.len(), "queue cleared");
        self.notify(chat_id, &format!("🗑️ Discarded {} image(s).", images.len()))
            .await;
        images.len()
    }

    async fn emit(&self, chat_id: ConversationId, images: &[ImageRef]) -> Result<PathBuf, ConvertError> {
        let paths: Vec<PathBuf> = images.iter().map(|image| image.path.clone()).collect();
        let encoder = Arc::clone(&self.encoder);
        let pdf = tokio::task::spawn_blocking(move || encoder.encode(&paths))
            .await
            .map_err(|err| ConvertError::Encoding(err.into()))?
            .map_err(|err| ConvertError::Encoding(err.into()))?;

        let document = self
            .spool
            .write_document(chat_id, &pdf)
            .map_err(|err| ConvertError::Encoding(err.into()))?;

        if let Err(err) = self
            .outbox
            .deliver_document(chat_id, pdf, DOCUMENT_FILE_NAME)
            .await
        {
            if let Err(cleanup) = self.spool.purge([document.as_path()]) {
                warn!(chat_id, error = %format!("{cleanup:#}"), "failed to remove undelivered document");
            }
            return Err(ConvertError::Delivery(err.into()));
        }

        Ok(document)
    }

    async fn notify(&self, chat_id: ConversationId, text: &str) {
        if let Err(err) = self.outbox.send_text(chat_id, text).await {
            warn!(chat_id, error = %format!("{err:#}"), "failed to send notice");
        }
    }
}

/// Marks a conversation as converting until dropped.
struct ConvertGuard<'a> {
    converting: &'a DashSet<ConversationId>,
    chat_id: ConversationId,
}

impl<'a> ConvertGuard<'a> {
    fn acquire(converting: &'a DashSet<ConversationId>, chat_id: ConversationId) -> Option<Self> {
        converting
            .insert(chat_id)
            .then_some(Self { converting, chat_id })
    }
}

impl Drop for ConvertGuard<'_> {
    fn drop(&mut self) {
        self.converting.remove(&self.chat_id);
    }
}
