use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use snapdf_core::config::{Config, paths};
use snapdf_core::pdf::ImagePdfEncoder;
use snapdf_core::spool::ImageSpool;
use snapdf_core::store::ConversationStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bot::{BotContext, dispatch_message, new_chat_queues};
use crate::emitter::PdfEmitter;
use crate::telegram::{TelegramClient, TelegramSettings};

mod bot;
mod commands;
pub mod emitter;
mod handlers;
mod health;
mod ingest;
pub mod telegram;

/// Runs the liveness endpoint and the Telegram polling loop until Ctrl-C.
///
/// # Errors
/// Returns an error if no bot token is configured, the image directory cannot
/// be created, or the liveness port cannot be bound.
pub async fn run(config: Config) -> Result<()> {
    let settings = TelegramSettings::from_config(&config)?;
    let config_path = paths::config_path();
    if config_path.exists() {
        info!(path = %config_path.display(), "using config file");
    }

    let spool = ImageSpool::new(config.storage.images_dir.clone());
    spool.ensure_dir()?;

    let bind_addr = config.server.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind liveness endpoint on {bind_addr}"))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let health = tokio::spawn(health::serve(listener, shutdown_rx));

    let result = run_bot(settings, spool).await;

    let _ = shutdown_tx.send(true);
    match health.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %format!("{err:#}"), "liveness endpoint exited with error"),
        Err(err) => warn!(error = %err, "liveness endpoint task failed"),
    }
    result
}

async fn run_bot(settings: TelegramSettings, spool: ImageSpool) -> Result<()> {
    let client = TelegramClient::new(settings.bot_token);
    if let Err(err) = client
        .set_my_commands(&commands::telegram_command_specs())
        .await
    {
        warn!(error = %format!("{err:#}"), "failed to register bot commands");
    }

    let allowlist_user_len = settings.allowlist_user_ids.len();
    let emitter = PdfEmitter::new(
        client.clone(),
        ImagePdfEncoder::new(),
        Arc::new(ConversationStore::new()),
        spool,
    );
    let context = Arc::new(BotContext::new(
        client.clone(),
        emitter,
        settings.allowlist_user_ids,
        settings.mirror_chat_id,
    ));
    let chat_queues = new_chat_queues();

    let mut offset: Option<i64> = None;
    let poll_timeout = settings.poll_timeout;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        allowlist_users = allowlist_user_len,
        mirror = ?settings.mirror_chat_id,
        images_dir = %context.emitter().spool().dir().display(),
        "snapdf bot started, polling for updates"
    );

    loop {
        let current_offset = offset;
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down Telegram bot");
                break;
            }
            updates = client.get_updates(current_offset, poll_timeout) => {
                let updates = match updates {
                    Ok(updates) => updates,
                    Err(err) => {
                        warn!(error = %format!("{err:#}"), "Telegram polling error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                if !updates.is_empty() {
                    debug!(count = updates.len(), "received updates");
                }
                for update in updates {
                    offset = Some(update.update_id + 1);
                    if let Some(message) = update.message {
                        dispatch_message(&chat_queues, &context, message).await;
                    }
                }
            }
        }
    }

    Ok(())
}
