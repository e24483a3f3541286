//! Telegram Bot API transport.
//!
//! Sends text, documents, audio, video and photos to a chat and edits
//! previously sent messages. Files are streamed from disk rather than read
//! into memory, since archives can approach the 2 GB document cap.
//!
//! Rate limiting (`429` with `retry_after`) is handled here: the call sleeps
//! for the advertised time and is re-issued, until the per-call flood budget
//! is spent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{Destination, MediaMeta, Payload, Transport};
use crate::domain::{LinkPair, MessageHandle};

/// Errors returned by the transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Message content unchanged")]
    NotModified,

    #[error("Rate limited, retry after {retry_after}s exceeds the flood budget")]
    RateLimited { retry_after: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the Telegram transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Total time one call may spend sleeping on rate limits
    #[serde(default = "default_max_flood_wait")]
    pub max_flood_wait_seconds: u64,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_max_flood_wait() -> u64 {
    300
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: default_api_base(),
            max_flood_wait_seconds: default_max_flood_wait(),
        }
    }
}

/// Response envelope from the Bot API
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Message result from send*/editMessageText
#[derive(Debug, Deserialize)]
struct MessageResult {
    message_id: i64,
    chat: ChatResult,
}

#[derive(Debug, Deserialize)]
struct ChatResult {
    id: i64,
}

/// Request body, rebuilt for every attempt so file streams start fresh
enum RequestBody {
    Json(serde_json::Value),
    Multipart {
        fields: Vec<(&'static str, String)>,
        files: Vec<(&'static str, PathBuf)>,
    },
}

/// Telegram Bot API client
pub struct TelegramTransport {
    bot_token: String,
    api_base: String,
    max_flood_wait: Duration,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            max_flood_wait: Duration::from_secs(config.max_flood_wait_seconds),
            client: reqwest::Client::new(),
        }
    }

    /// Build API URL
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// Issue one API call, sleeping through rate limits while the budget allows
    async fn dispatch(
        &self,
        method: &str,
        body: &RequestBody,
        wait_on_flood: bool,
    ) -> Result<MessageResult, TransportError> {
        let url = self.api_url(method);
        let mut waited = Duration::ZERO;

        loop {
            let request = match body {
                RequestBody::Json(value) => self.client.post(&url).json(value),
                RequestBody::Multipart { fields, files } => {
                    self.client.post(&url).multipart(build_form(fields, files).await?)
                }
            };

            let response: TelegramResponse<MessageResult> = request.send().await?.json().await?;

            if response.ok {
                return response.result.ok_or_else(|| TransportError::Api {
                    code: 0,
                    description: format!("{} returned no message", method),
                });
            }

            let description = response.description.unwrap_or_default();

            if let Some(retry_after) = response.parameters.and_then(|p| p.retry_after) {
                let wait = Duration::from_secs(retry_after);
                if !wait_on_flood || waited + wait > self.max_flood_wait {
                    return Err(TransportError::RateLimited { retry_after });
                }
                warn!(method, retry_after, "Rate limited, waiting before retry");
                tokio::time::sleep(wait).await;
                waited += wait;
                continue;
            }

            if description.contains("message is not modified") {
                return Err(TransportError::NotModified);
            }

            return Err(TransportError::Api {
                code: response.error_code.unwrap_or(0),
                description,
            });
        }
    }

    /// Shared tail of the edit calls: unchanged content and skipped rate
    /// limits both come back as `Ok(None)`
    async fn edit_message(
        &self,
        method: &str,
        value: serde_json::Value,
        wait_on_flood: bool,
    ) -> Result<Option<MessageHandle>, TransportError> {
        match self
            .dispatch(method, &RequestBody::Json(value), wait_on_flood)
            .await
        {
            Ok(result) => Ok(Some(MessageHandle {
                chat_id: result.chat.id,
                message_id: result.message_id,
            })),
            Err(TransportError::NotModified) => Ok(None),
            Err(TransportError::RateLimited { retry_after }) if !wait_on_flood => {
                debug!(method, retry_after, "Skipping edit while rate limited");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

async fn build_form(
    fields: &[(&'static str, String)],
    files: &[(&'static str, PathBuf)],
) -> Result<Form, TransportError> {
    let mut form = Form::new().percent_encode_noop();
    for (name, value) in fields {
        form = form.text(*name, value.clone());
    }
    for (name, path) in files {
        form = form.part(*name, file_part(path).await?);
    }
    Ok(form)
}

async fn file_part(path: &Path) -> Result<Part, TransportError> {
    let file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let file_name = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
    Ok(Part::stream_with_length(body, len).file_name(file_name))
}

/// Inline keyboard with one button per available link
fn link_markup(links: Option<&LinkPair>) -> Option<serde_json::Value> {
    let links = links?;
    let mut row = Vec::new();
    if let Some(direct) = &links.direct {
        row.push(serde_json::json!({ "text": "Direct Link", "url": direct }));
    }
    if let Some(index) = &links.index {
        row.push(serde_json::json!({ "text": "Index Link", "url": index }));
    }
    if row.is_empty() {
        None
    } else {
        Some(serde_json::json!({ "inline_keyboard": [row] }))
    }
}

/// Fields and files of one multipart send
struct MultipartRequest {
    fields: Vec<(&'static str, String)>,
    files: Vec<(&'static str, PathBuf)>,
}

impl MultipartRequest {
    fn new(
        destination: Destination,
        caption: Option<&str>,
        markup: Option<serde_json::Value>,
    ) -> Self {
        let mut request = Self {
            fields: vec![("chat_id", destination.chat_id.to_string())],
            files: Vec::new(),
        };
        if let Some(reply_to) = destination.reply_to {
            request.field("reply_to_message_id", reply_to.to_string());
        }
        if let Some(caption) = caption {
            request.field("caption", caption.to_string());
        }
        if let Some(markup) = markup {
            request.field("reply_markup", markup.to_string());
        }
        request
    }

    fn field(&mut self, name: &'static str, value: String) {
        self.fields.push((name, value));
    }

    fn file(&mut self, name: &'static str, path: PathBuf) {
        self.files.push((name, path));
    }

    fn media(&mut self, meta: &MediaMeta) {
        self.field("duration", meta.duration.to_string());
        if let Some(thumb) = &meta.thumbnail {
            self.file("thumbnail", thumb.clone());
        }
    }

    fn into_body(self) -> RequestBody {
        RequestBody::Multipart {
            fields: self.fields,
            files: self.files,
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(
        &self,
        destination: Destination,
        payload: Payload,
        caption: Option<&str>,
        links: Option<&LinkPair>,
    ) -> Result<MessageHandle, TransportError> {
        let markup = link_markup(links);
        debug!(kind = payload.kind(), chat_id = destination.chat_id, "Sending message");

        let (method, body) = match payload {
            Payload::Text(text) => {
                let mut value = serde_json::json!({
                    "chat_id": destination.chat_id,
                    "text": text,
                    "disable_web_page_preview": true,
                });
                if let Some(reply_to) = destination.reply_to {
                    value["reply_to_message_id"] = reply_to.into();
                }
                if let Some(markup) = markup {
                    value["reply_markup"] = markup;
                }
                ("sendMessage", RequestBody::Json(value))
            }
            Payload::Document(path) => {
                let mut request = MultipartRequest::new(destination, caption, markup);
                request.file("document", path);
                ("sendDocument", request.into_body())
            }
            Payload::Audio { path, meta } => {
                let mut request = MultipartRequest::new(destination, caption, markup);
                request.file("audio", path);
                request.media(&meta);
                if let Some(performer) = meta.performer {
                    request.field("performer", performer);
                }
                if let Some(title) = meta.title {
                    request.field("title", title);
                }
                ("sendAudio", request.into_body())
            }
            Payload::Video { path, meta } => {
                let mut request = MultipartRequest::new(destination, caption, markup);
                request.file("video", path);
                request.media(&meta);
                request.field("width", meta.width.unwrap_or(1920).to_string());
                request.field("height", meta.height.unwrap_or(1080).to_string());
                request.field("supports_streaming", "true".to_string());
                ("sendVideo", request.into_body())
            }
            Payload::Photo(path) => {
                let mut request = MultipartRequest::new(destination, caption, markup);
                request.file("photo", path);
                ("sendPhoto", request.into_body())
            }
        };

        let result = self.dispatch(method, &body, true).await?;
        Ok(MessageHandle {
            chat_id: result.chat.id,
            message_id: result.message_id,
        })
    }

    async fn edit(
        &self,
        message: MessageHandle,
        text: &str,
        links: Option<&LinkPair>,
        wait_on_flood: bool,
    ) -> Result<Option<MessageHandle>, TransportError> {
        let mut value = serde_json::json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(markup) = link_markup(links) {
            value["reply_markup"] = markup;
        }
        self.edit_message("editMessageText", value, wait_on_flood).await
    }

    async fn edit_caption(
        &self,
        message: MessageHandle,
        caption: &str,
        links: Option<&LinkPair>,
        wait_on_flood: bool,
    ) -> Result<Option<MessageHandle>, TransportError> {
        let mut value = serde_json::json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id,
            "caption": caption,
        });
        if let Some(markup) = link_markup(links) {
            value["reply_markup"] = markup;
        }
        self.edit_message("editMessageCaption", value, wait_on_flood).await
    }
}
