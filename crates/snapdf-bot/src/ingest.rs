use std::collections::HashSet;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::commands::{BotCommand, parse_command};
use crate::telegram::{Document, Message, PhotoSize, TelegramClient};

/// Largest file the Bot API lets a bot download through `getFile`.
const MAX_DOWNLOAD_BYTES: u64 = 20 * 1024 * 1024; // 20MB

pub(crate) const ACCESS_DENIED_TEXT: &str = "Access denied.";
pub(crate) const UNSUPPORTED_TEXT: &str = "Sorry, I can only convert images.";

pub(crate) struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub kind: IncomingKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IncomingKind {
    Command(BotCommand),
    Image(ImageSource),
    Unsupported,
}

/// Remote image that still has to be fetched from Telegram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageSource {
    pub file_id: String,
    /// Stable across bots and re-sends; used for local file names.
    pub source_id: String,
    pub file_size: Option<u64>,
}

impl ImageSource {
    fn new(file_id: &str, file_unique_id: Option<&str>, file_size: Option<u64>) -> Self {
        let source_id = file_unique_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(file_id);
        Self {
            file_id: file_id.to_string(),
            source_id: source_id.to_string(),
            file_size,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Access {
    Allowed(i64),
    Denied(i64),
    Ignored,
}

/// Applies access rules and classifies `message`. `None` means there is
/// nothing for the bot to act on; a denied user has already been told.
pub(crate) async fn parse_incoming_message(
    client: &TelegramClient,
    allowlist_user_ids: &HashSet<i64>,
    message: &Message,
) -> Option<IncomingMessage> {
    let chat_id = message.chat.id;
    let user_id = match check_access(allowlist_user_ids, message) {
        Access::Allowed(user_id) => user_id,
        Access::Ignored => return None,
        Access::Denied(user_id) => {
            info!(chat_id, user_id, "denied user");
            if let Err(err) = client.send_message(chat_id, ACCESS_DENIED_TEXT).await {
                warn!(chat_id, error = %format!("{err:#}"), "failed to send access denial");
            }
            return None;
        }
    };

    let Some(kind) = classify(message) else {
        debug!(chat_id, "ignoring message without image or command");
        return None;
    };

    if kind == IncomingKind::Unsupported && !message.chat.is_private() {
        debug!(chat_id, "ignoring non-image attachment in group chat");
        return None;
    }

    Some(IncomingMessage {
        chat_id,
        message_id: message.message_id,
        user_id,
        kind,
    })
}

/// An empty allowlist admits every human sender.
fn check_access(allowlist_user_ids: &HashSet<i64>, message: &Message) -> Access {
    let Some(user) = message.from.as_ref() else {
        debug!(chat_id = message.chat.id, "ignoring message without sender");
        return Access::Ignored;
    };

    if user.is_bot {
        return Access::Ignored;
    }

    if allowlist_user_ids.is_empty() || allowlist_user_ids.contains(&user.id) {
        Access::Allowed(user.id)
    } else {
        Access::Denied(user.id)
    }
}

fn classify(message: &Message) -> Option<IncomingKind> {
    if let Some(photo) = message.photo.as_deref().and_then(select_best_photo) {
        return Some(IncomingKind::Image(ImageSource::new(
            &photo.file_id,
            photo.file_unique_id.as_deref(),
            photo.file_size,
        )));
    }

    if let Some(document) = message.document.as_ref() {
        if is_image_document(document) {
            return Some(IncomingKind::Image(ImageSource::new(
                &document.file_id,
                document.file_unique_id.as_deref(),
                document.file_size,
            )));
        }
        return Some(IncomingKind::Unsupported);
    }

    message
        .text
        .as_deref()
        .and_then(parse_command)
        .map(IncomingKind::Command)
}

fn select_best_photo(photos: &[PhotoSize]) -> Option<&PhotoSize> {
    photos.iter().max_by_key(|photo| {
        let size = photo.file_size.unwrap_or(0);
        let width = u64::try_from(photo.width.max(0)).unwrap_or(0);
        let height = u64::try_from(photo.height.max(0)).unwrap_or(0);
        let area = width * height;
        (size, area)
    })
}

fn is_image_document(document: &Document) -> bool {
    document
        .mime_type
        .as_deref()
        .is_some_and(|mime| mime.starts_with("image/"))
}

/// Fetches the image bytes behind `source`.
///
/// # Errors
/// Fails if the file is over the download limit, Telegram does not return a
/// path, the transfer fails, or the payload is not an image.
pub(crate) async fn download_image(client: &TelegramClient, source: &ImageSource) -> Result<Vec<u8>> {
    if source.file_size.unwrap_or(0) > MAX_DOWNLOAD_BYTES {
        bail!("image {} exceeds the download limit", source.source_id);
    }

    let file = client.get_file(&source.file_id).await?;
    let Some(file_path) = file.file_path else {
        bail!("Telegram returned no file_path for {}", source.file_id);
    };

    let bytes = client.download_file(&file_path).await?;
    if bytes.len() as u64 > MAX_DOWNLOAD_BYTES {
        bail!("image {} exceeds the download limit", source.source_id);
    }
    if !infer::is_image(&bytes) {
        bail!("downloaded file {file_path} is not an image");
    }
    Ok(bytes)
}
