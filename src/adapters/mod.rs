//! Adapter interfaces for external systems.
//!
//! The engine only talks to the chat transport and the remote-storage CLI
//! through the traits defined here, so tests can swap in fakes.

pub mod rclone;
pub mod telegram;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::{LinkPair, MessageHandle};

// Re-export the concrete adapters
pub use rclone::{RcloneCli, StorageError};
pub use telegram::{TelegramConfig, TelegramTransport, TransportError};

/// Where a message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub chat_id: i64,
    pub reply_to: Option<i64>,
}

/// Metadata shown by the client for audio and video payloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaMeta {
    pub duration: u32,
    pub performer: Option<String>,
    pub title: Option<String>,
    pub thumbnail: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// What to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Document(PathBuf),
    Audio { path: PathBuf, meta: MediaMeta },
    Video { path: PathBuf, meta: MediaMeta },
    Photo(PathBuf),
}

impl Payload {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Document(_) => "document",
            Payload::Audio { .. } => "audio",
            Payload::Video { .. } => "video",
            Payload::Photo(_) => "photo",
        }
    }
}

/// Chat transport used to post deliveries
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a payload. Links, when present, are attached as buttons.
    async fn send(
        &self,
        destination: Destination,
        payload: Payload,
        caption: Option<&str>,
        links: Option<&LinkPair>,
    ) -> Result<MessageHandle, TransportError>;

    /// Replace the text of an existing message.
    ///
    /// Returns `Ok(None)` when the content was unchanged, or when rate
    /// limited with `wait_on_flood == false`.
    async fn edit(
        &self,
        message: MessageHandle,
        text: &str,
        links: Option<&LinkPair>,
        wait_on_flood: bool,
    ) -> Result<Option<MessageHandle>, TransportError>;

    /// Replace the caption of a media message (cover-art posters).
    ///
    /// Same `Ok(None)` rules as `edit`. Transports without captioned
    /// media fall back to a text edit.
    async fn edit_caption(
        &self,
        message: MessageHandle,
        caption: &str,
        links: Option<&LinkPair>,
        wait_on_flood: bool,
    ) -> Result<Option<MessageHandle>, TransportError> {
        self.edit(message, caption, links, wait_on_flood).await
    }
}

/// Remote object storage driven through its CLI
#[async_trait]
pub trait StorageCli: Send + Sync {
    /// Upload a local file or directory to `remote_path` (relative to the remote root)
    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), StorageError>;

    /// Public link for `remote_path` (relative to the remote root)
    async fn public_link(&self, remote_path: &str) -> Result<String, StorageError>;
}
