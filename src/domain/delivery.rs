//! Delivery session types: who asked, where it goes, and what came out.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::ContentKind;

/// Where delivered content ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Files are sent directly through the chat transport
    #[default]
    Transport,
    /// Files are uploaded to remote storage and links are posted
    RemoteStorage,
}

/// Which links are resolved for uploaded content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    #[default]
    None,
    RemoteOnly,
    IndexOnly,
    Both,
}

impl LinkMode {
    pub fn wants_direct(self) -> bool {
        matches!(self, LinkMode::RemoteOnly | LinkMode::Both)
    }

    pub fn wants_index(self) -> bool {
        matches!(self, LinkMode::IndexOnly | LinkMode::Both)
    }
}

/// Per-kind archive flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArchivePolicy {
    #[serde(default)]
    pub album: bool,
    #[serde(default)]
    pub artist: bool,
    #[serde(default)]
    pub playlist: bool,
}

impl ArchivePolicy {
    /// Whether items of `kind` are delivered as one archive. Tracks never are.
    pub fn archives(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Track => false,
            ContentKind::Album => self.album,
            ContentKind::Artist => self.artist,
            ContentKind::Playlist => self.playlist,
        }
    }
}

/// Resolved delivery preferences for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPreferences {
    pub channel: Channel,
    pub archive: ArchivePolicy,
    /// Upper bound for the content of one archive, in bytes
    pub max_artifact_size: u64,
    /// Concurrency ceiling for fan-out deliveries
    pub concurrency: usize,
    pub link_mode: LinkMode,
    /// Pack the tree into one archive before a remote-storage upload
    #[serde(default)]
    pub archive_uploads: bool,
    /// Post album and playlist cover art before delivering
    #[serde(default)]
    pub art_poster: bool,
}

/// 1.9 GiB, just below the transport's 2 GB document cap
pub const DEFAULT_MAX_ARTIFACT_SIZE: u64 = 2_040_109_465;

impl Default for DeliveryPreferences {
    fn default() -> Self {
        Self {
            channel: Channel::Transport,
            archive: ArchivePolicy::default(),
            max_artifact_size: DEFAULT_MAX_ARTIFACT_SIZE,
            concurrency: 5,
            link_mode: LinkMode::None,
            archive_uploads: false,
            art_poster: false,
        }
    }
}

/// A message previously sent through the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Identity of the requesting session. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryContext {
    /// Staging session id (`{staging}/{session_id}/...`)
    pub session_id: String,
    pub user_id: i64,
    /// Display name, used by `{user}` in captions
    #[serde(default)]
    pub user_name: Option<String>,
    /// Destination chat
    pub chat_id: i64,
    /// Message the deliveries reply to
    #[serde(default)]
    pub reply_to: Option<i64>,
    /// Status message that receives progress updates
    #[serde(default)]
    pub status_message: Option<MessageHandle>,
    /// Cover-art message to update in place with links
    #[serde(default)]
    pub poster_message: Option<MessageHandle>,
    #[serde(default)]
    pub preferences: DeliveryPreferences,
}

/// `(directLink?, indexLink?)`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPair {
    pub direct: Option<String>,
    pub index: Option<String>,
}

impl LinkPair {
    pub fn is_empty(&self) -> bool {
        self.direct.is_none() && self.index.is_none()
    }
}

/// One packed archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePart {
    pub path: PathBuf,
    /// Uncompressed bytes of the files packed into this archive
    pub size_bytes: u64,
    pub file_count: usize,
}

/// Output of packaging, in production order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub parts: Vec<ArchivePart>,
}

impl Artifact {
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.parts.iter().map(|p| &p.path)
    }

    pub fn total_bytes(&self) -> u64 {
        self.parts.iter().map(|p| p.size_bytes).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Lifecycle of one delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Packaged,
    Delivered,
    Failed { reason: String },
}

/// Result record of one orchestration call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub id: Uuid,
    pub title: String,
    pub kind: ContentKind,
    pub state: DeliveryState,
    /// Messages posted for this item
    pub messages: Vec<MessageHandle>,
    /// Whether local artifacts were removed without error
    pub cleaned_up: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeliveryReport {
    pub fn new(title: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            kind,
            state: DeliveryState::Pending,
            messages: Vec::new(),
            cleaned_up: false,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.state == DeliveryState::Delivered
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.state {
            DeliveryState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_mode_flags() {
        assert!(!LinkMode::None.wants_direct());
        assert!(!LinkMode::None.wants_index());
        assert!(LinkMode::RemoteOnly.wants_direct());
        assert!(!LinkMode::RemoteOnly.wants_index());
        assert!(LinkMode::IndexOnly.wants_index());
        assert!(LinkMode::Both.wants_direct() && LinkMode::Both.wants_index());
    }

    #[test]
    fn test_tracks_are_never_archived() {
        let policy = ArchivePolicy {
            album: true,
            artist: true,
            playlist: true,
        };
        assert!(!policy.archives(ContentKind::Track));
        assert!(policy.archives(ContentKind::Playlist));
    }

    #[test]
    fn test_context_defaults_from_yaml() {
        let ctx: DeliveryContext = serde_yaml::from_str(
            r#"
session_id: "42"
user_id: 7
chat_id: -1001
"#,
        )
        .unwrap();
        assert_eq!(ctx.preferences, DeliveryPreferences::default());
        assert!(ctx.status_message.is_none());
    }
}
