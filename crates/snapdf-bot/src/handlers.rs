use anyhow::Result;
use tracing::{debug, warn};

use crate::bot::BotContext;
use crate::commands::BotCommand;
use crate::ingest::{self, ImageSource, IncomingKind, UNSUPPORTED_TEXT};
use crate::telegram::Message;

///
/// # Errors
/// Returns an error if a reply that has no fallback cannot be sent.
pub(crate) async fn handle_message(context: &BotContext, message: Message) -> Result<()> {
    let Some(incoming) =
        ingest::parse_incoming_message(context.client(), context.allowlist_user_ids(), &message)
            .await
    else {
        return Ok(());
    };

    let chat_id = incoming.chat_id;
    let emitter = context.emitter();
    match incoming.kind {
        IncomingKind::Command(BotCommand::Start) => emitter.on_start(chat_id).await?,
        IncomingKind::Command(BotCommand::Convert) => {
            // The emitter already told the user what happened.
            if let Err(err) = emitter.on_convert_requested(chat_id).await {
                debug!(chat_id, user_id = incoming.user_id, error = %err, "convert produced no document");
            }
        }
        IncomingKind::Command(BotCommand::Clear) => {
            emitter.on_clear_requested(chat_id).await;
        }
        IncomingKind::Image(source) => {
            receive_image(context, chat_id, incoming.message_id, &source).await;
        }
        IncomingKind::Unsupported => {
            context
                .client()
                .send_message(chat_id, UNSUPPORTED_TEXT)
                .await?;
        }
    }

    Ok(())
}

async fn receive_image(context: &BotContext, chat_id: i64, message_id: i64, source: &ImageSource) {
    let emitter = context.emitter();
    let bytes = match ingest::download_image(context.client(), source).await {
        Ok(bytes) => bytes,
        Err(err) => {
            emitter.on_transfer_failed(chat_id, err).await;
            return;
        }
    };

    if emitter
        .on_image_received(chat_id, &bytes, &source.source_id)
        .await
        .is_err()
    {
        return;
    }

    if let Some(mirror_chat_id) = context.mirror_chat_id()
        && mirror_chat_id != chat_id
        && let Err(err) = context
            .client()
            .copy_message(mirror_chat_id, chat_id, message_id)
            .await
    {
        warn!(chat_id, mirror_chat_id, error = %format!("{err:#}"), "failed to mirror image");
    }
}
