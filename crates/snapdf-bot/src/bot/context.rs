use std::collections::HashSet;

use snapdf_core::pdf::ImagePdfEncoder;

use crate::emitter::PdfEmitter;
use crate::telegram::TelegramClient;

pub(crate) type Emitter = PdfEmitter<TelegramClient, ImagePdfEncoder>;

pub(crate) struct BotContext {
    client: TelegramClient,
    emitter: Emitter,
    allowlist_user_ids: HashSet<i64>,
    mirror_chat_id: Option<i64>,
}

impl BotContext {
    pub(crate) fn new(
        client: TelegramClient,
        emitter: Emitter,
        allowlist_user_ids: HashSet<i64>,
        mirror_chat_id: Option<i64>,
    ) -> Self {
        Self {
            client,
            emitter,
            allowlist_user_ids,
            mirror_chat_id,
        }
    }

    pub(crate) fn client(&self) -> &TelegramClient {
        &self.client
    }

    pub(crate) fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub(crate) fn allowlist_user_ids(&self) -> &HashSet<i64> {
        &self.allowlist_user_ids
    }

    pub(crate) fn mirror_chat_id(&self) -> Option<i64> {
        self.mirror_chat_id
    }
}
