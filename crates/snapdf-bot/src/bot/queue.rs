use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error};

use crate::bot::context::BotContext;
use crate::handlers::handle_message;
use crate::telegram::Message;

const IDLE_WORKER_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// One worker per chat: a chat's updates are handled in arrival order while
/// different chats run concurrently. Workers with nothing to do for
/// `idle_timeout` exit and drop their entry.
pub(crate) struct ChatQueues {
    senders: Mutex<HashMap<i64, mpsc::UnboundedSender<Message>>>,
    idle_timeout: Duration,
}

pub(crate) type ChatQueueMap = Arc<ChatQueues>;

pub(crate) fn new_chat_queues() -> ChatQueueMap {
    chat_queues_with_idle_timeout(IDLE_WORKER_TIMEOUT)
}

fn chat_queues_with_idle_timeout(idle_timeout: Duration) -> ChatQueueMap {
    Arc::new(ChatQueues {
        senders: Mutex::new(HashMap::new()),
        idle_timeout,
    })
}

pub(crate) async fn dispatch_message(
    queues: &ChatQueueMap,
    context: &Arc<BotContext>,
    message: Message,
) {
    let chat_id = message.chat.id;
    let sender = {
        let mut senders = queues.senders.lock().await;
        if let Some(sender) = senders.get(&chat_id) {
            sender.clone()
        } else {
            let (sender, receiver) = mpsc::unbounded_channel();
            spawn_queue_worker(chat_id, receiver, Arc::clone(context), Arc::clone(queues));
            senders.insert(chat_id, sender.clone());
            sender
        }
    };

    if let Err(err) = sender.send(message) {
        // Worker is gone; start a fresh one and retry once.
        let message = err.0;
        let (sender, receiver) = mpsc::unbounded_channel();
        spawn_queue_worker(chat_id, receiver, Arc::clone(context), Arc::clone(queues));
        {
            let mut senders = queues.senders.lock().await;
            senders.insert(chat_id, sender.clone());
        }
        let _ = sender.send(message);
    }
}

fn spawn_queue_worker(
    chat_id: i64,
    mut receiver: mpsc::UnboundedReceiver<Message>,
    context: Arc<BotContext>,
    queues: ChatQueueMap,
) {
    tokio::spawn(async move {
        loop {
            match tokio::time::timeout(queues.idle_timeout, receiver.recv()).await {
                Ok(Some(message)) => {
                    if let Err(err) = handle_message(context.as_ref(), message).await {
                        error!(chat_id, error = %format!("{err:#}"), "message handling failed");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    if retire_idle_worker(&queues, chat_id, &receiver).await {
                        debug!(chat_id, "idle chat worker stopped");
                        break;
                    }
                }
            }
        }
    });
}

/// Drops the chat's entry when nothing is buffered and no dispatcher holds a
/// clone of its sender. Both checks run under the map lock, so no message can
/// be routed to this worker once it returns `true`.
async fn retire_idle_worker(
    queues: &ChatQueues,
    chat_id: i64,
    receiver: &mpsc::UnboundedReceiver<Message>,
) -> bool {
    let mut senders = queues.senders.lock().await;
    let idle = receiver.is_empty()
        && senders
            .get(&chat_id)
            .is_some_and(|sender| sender.strong_count() == 1);
    if idle {
        senders.remove(&chat_id);
    }
    idle
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};
    use serde_json::{Value, json};
    use snapdf_core::pdf::ImagePdfEncoder;
    use snapdf_core::spool::ImageSpool;
    use snapdf_core::store::ConversationStore;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use super::*;
    use crate::emitter::{PDF_SENT_TEXT, PdfEmitter};
    use crate::telegram::TelegramClient;

    const CHAT: i64 = 300;

    fn context(base_url: String, temp: &TempDir) -> Arc<BotContext> {
        let client = TelegramClient::with_base_url("TOKEN".to_string(), base_url);
        let emitter = PdfEmitter::new(
            client.clone(),
            ImagePdfEncoder::new(),
            Arc::new(ConversationStore::new()),
            ImageSpool::new(temp.path()),
        );
        Arc::new(BotContext::new(client, emitter, HashSet::new(), None))
    }

    fn message(from_bot: bool, extra: &Value) -> Message {
        let mut base = json!({
            "message_id": 1,
            "chat": { "id": CHAT, "type": "private" },
            "from": { "id": 7, "is_bot": from_bot },
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(base).unwrap()
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn sent_ok() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": { "message_id": 2, "chat": { "id": CHAT, "type": "private" } }
        }))
    }

    fn is_pdf_sent_notice(request: &Request) -> bool {
        request.url.path().ends_with("/sendMessage")
            && serde_json::from_slice::<Value>(&request.body)
                .is_ok_and(|body| body["text"] == PDF_SENT_TEXT)
    }

    #[tokio::test]
    async fn chat_messages_are_handled_in_arrival_order() {
        let server = MockServer::start().await;
        let temp = TempDir::new().unwrap();
        Mock::given(method("POST"))
            .and(path("/botTOKEN/getFile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": { "file_id": "f1", "file_path": "photos/f1.png" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file/botTOKEN/photos/f1.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(sent_ok())
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendDocument"))
            .respond_with(sent_ok())
            .expect(1)
            .mount(&server)
            .await;

        let context = context(server.uri(), &temp);
        let queues = new_chat_queues();
        let photo = message(
            false,
            &json!({ "photo": [{ "file_id": "f1", "file_unique_id": "u1", "width": 4, "height": 4 }] }),
        );
        dispatch_message(&queues, &context, photo).await;
        dispatch_message(&queues, &context, message(false, &json!({ "text": "/convert" }))).await;

        let delivered = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let requests = server.received_requests().await.unwrap_or_default();
                if requests.iter().any(is_pdf_sent_notice) {
                    return requests;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        let position = |suffix: &str| {
            delivered
                .iter()
                .position(|request| request.url.path().ends_with(suffix))
                .unwrap()
        };
        assert!(position("/getFile") < position("/sendDocument"));
        assert!(!context.emitter().store().contains(CHAT));
    }

    #[tokio::test]
    async fn idle_worker_drops_its_entry_and_is_respawned() {
        let temp = TempDir::new().unwrap();
        let context = context("http://127.0.0.1:9".to_string(), &temp);
        let queues = chat_queues_with_idle_timeout(Duration::from_millis(50));

        dispatch_message(&queues, &context, message(true, &json!({ "text": "hi" }))).await;
        assert!(queues.senders.lock().await.contains_key(&CHAT));

        let retired = tokio::time::timeout(Duration::from_secs(5), async {
            while queues.senders.lock().await.contains_key(&CHAT) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(retired.is_ok());

        dispatch_message(&queues, &context, message(true, &json!({ "text": "again" }))).await;
        assert!(queues.senders.lock().await.contains_key(&CHAT));
    }
}
