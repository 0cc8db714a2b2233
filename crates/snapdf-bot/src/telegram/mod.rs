use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snapdf_core::config::{BOT_TOKEN_ENV, Config};

mod types;

pub use types::{
    BotCommandSpec, Chat, Document, Message, MessageId, PhotoSize, TelegramFile, Update, User,
};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const PDF_MIME: &str = "application/pdf";

pub struct TelegramSettings {
    pub bot_token: String,
    pub allowlist_user_ids: HashSet<i64>,
    pub mirror_chat_id: Option<i64>,
    pub poll_timeout: Duration,
}

impl TelegramSettings {
    ///
    /// # Errors
    /// Returns an error if no bot token is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let Some(token) = config.bot_token() else {
            bail!("telegram.bot_token or {BOT_TOKEN_ENV} is required");
        };

        Ok(Self {
            bot_token: token.to_string(),
            allowlist_user_ids: config.telegram.allowlist_user_ids.iter().copied().collect(),
            mirror_chat_id: config.telegram.mirror_chat_id,
            poll_timeout: config.poll_timeout(),
        })
    }
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, TELEGRAM_API_BASE)
    }

    /// Builds a client against a custom API host (local Bot API server, tests).
    pub fn with_base_url(token: String, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram rejects it.
    pub async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: Some(vec!["message"]),
        };
        self.post("getUpdates", &request).await
    }

    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram rejects it.
    pub async fn get_file(&self, file_id: &str) -> Result<TelegramFile> {
        let request = GetFileRequest { file_id };
        self.post("getFile", &request).await
    }

    ///
    /// # Errors
    /// Returns an error if the download fails or returns a non-success status.
    pub async fn download_file(&self, file_path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/file/bot{}/{}", self.base_url, self.token, file_path);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("Telegram file download failed")?;

        if !response.status().is_success() {
            bail!(
                "Telegram file download failed with status {}",
                response.status()
            );
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read Telegram file bytes")?;
        Ok(bytes.to_vec())
    }

    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram rejects it.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let request = SendMessageRequest { chat_id, text };
        let _: Message = self.post("sendMessage", &request).await?;
        Ok(())
    }

    /// Uploads `bytes` as a PDF document.
    ///
    /// # Errors
    /// Returns an error if the upload fails or Telegram rejects it.
    pub async fn send_document(
        &self,
        chat_id: i64,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<()> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(PDF_MIME)?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);

        let response = self
            .http
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .context("Telegram sendDocument request failed")?;
        let _: Message = decode_response(response).await?;
        Ok(())
    }

    /// Copies an existing message into another chat without a forward header.
    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram rejects it.
    pub async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
    ) -> Result<()> {
        let request = CopyMessageRequest {
            chat_id,
            from_chat_id,
            message_id,
        };
        let _: MessageId = self.post("copyMessage", &request).await?;
        Ok(())
    }

    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram rejects it.
    pub async fn set_my_commands(&self, commands: &[BotCommandSpec]) -> Result<()> {
        let request = SetMyCommandsRequest { commands };
        let _: bool = self.post("setMyCommands", &request).await?;
        Ok(())
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, method: &str, body: &B) -> Result<T> {
        let response = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Telegram {method} request failed"))?;
        decode_response(response).await
    }
}

async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let payload: TelegramResponse<T> = response
        .json()
        .await
        .context("Failed to decode Telegram response")?;

    if !payload.ok {
        let description = payload
            .description
            .unwrap_or_else(|| "Telegram API error".to_string());
        return Err(anyhow!("{description}"));
    }

    payload
        .result
        .ok_or_else(|| anyhow!("Telegram response missing result"))
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_updates: Option<Vec<&'static str>>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GetFileRequest<'a> {
    file_id: &'a str,
}

#[derive(Debug, Serialize)]
struct CopyMessageRequest {
    chat_id: i64,
    from_chat_id: i64,
    message_id: i64,
}

#[derive(Debug, Serialize)]
struct SetMyCommandsRequest<'a> {
    commands: &'a [BotCommandSpec],
}
