//! Orchestrator Integration Tests
//!
//! Drives full deliveries against in-memory transport and storage fakes
//! over real staging trees, checking what was sent and what was left on disk.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use courier::adapters::{
    Destination, Payload, StorageCli, StorageError, Transport, TransportError,
};
use courier::core::{DeliveryError, LinkResolver, Orchestrator};
use courier::domain::{
    Album, ArchivePolicy, Artist, Channel, ContentItem, DeliveryContext, DeliveryPreferences,
    DeliveryState, LinkMode, LinkPair, MediaKind, MessageHandle, Track,
};
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

const CHAT: i64 = -100;

#[derive(Debug, Clone)]
struct Sent {
    kind: &'static str,
    path: Option<PathBuf>,
    text: Option<String>,
    caption: Option<String>,
    links: Option<LinkPair>,
}

/// Holds file sends until released, so deliveries can be observed mid-flight
struct Gate {
    /// Signalled when the first file send arrives
    started: Notify,
    release: Semaphore,
}

/// Records sends and edits; fails sends whose file name contains `fail_on`
#[derive(Default)]
struct FakeTransport {
    sent: Mutex<Vec<Sent>>,
    edits: Mutex<Vec<(MessageHandle, String, bool)>>,
    caption_edits: Mutex<Vec<(MessageHandle, String)>>,
    fail_on: Option<String>,
    gate: Option<Gate>,
    next_id: AtomicI64,
}

impl FakeTransport {
    fn failing_on(name: &str) -> Self {
        Self {
            fail_on: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn gated() -> Self {
        Self {
            gate: Some(Gate {
                started: Notify::new(),
                release: Semaphore::new(0),
            }),
            ..Default::default()
        }
    }

    fn gate(&self) -> &Gate {
        self.gate.as_ref().unwrap()
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn edits(&self) -> Vec<(MessageHandle, String, bool)> {
        self.edits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(
        &self,
        destination: Destination,
        payload: Payload,
        caption: Option<&str>,
        links: Option<&LinkPair>,
    ) -> Result<MessageHandle, TransportError> {
        assert_eq!(destination.chat_id, CHAT);

        let kind = payload.kind();
        let (path, text) = match payload {
            Payload::Text(text) => (None, Some(text)),
            Payload::Document(path) | Payload::Photo(path) => (Some(path), None),
            Payload::Audio { path, .. } | Payload::Video { path, .. } => (Some(path), None),
        };

        if let (Some(gate), Some(_)) = (&self.gate, &path) {
            gate.started.notify_one();
            let _permit = gate.release.acquire().await.unwrap();
        }

        if let Some(path) = &path {
            assert!(path.exists(), "{} sent after removal", path.display());
            if let Some(fail_on) = &self.fail_on {
                if path.to_string_lossy().contains(fail_on.as_str()) {
                    return Err(TransportError::Api {
                        code: 413,
                        description: "Request Entity Too Large".to_string(),
                    });
                }
            }
        }

        self.sent.lock().unwrap().push(Sent {
            kind,
            path,
            text,
            caption: caption.map(str::to_string),
            links: links.cloned(),
        });

        Ok(MessageHandle {
            chat_id: CHAT,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn edit(
        &self,
        message: MessageHandle,
        text: &str,
        _links: Option<&LinkPair>,
        wait_on_flood: bool,
    ) -> Result<Option<MessageHandle>, TransportError> {
        self.edits
            .lock()
            .unwrap()
            .push((message, text.to_string(), wait_on_flood));
        Ok(Some(message))
    }

    async fn edit_caption(
        &self,
        message: MessageHandle,
        caption: &str,
        _links: Option<&LinkPair>,
        wait_on_flood: bool,
    ) -> Result<Option<MessageHandle>, TransportError> {
        assert!(wait_on_flood);
        self.caption_edits
            .lock()
            .unwrap()
            .push((message, caption.to_string()));
        Ok(Some(message))
    }
}

/// Records uploads; `link_root: None` makes every link request fail
#[derive(Default)]
struct FakeStorage {
    uploads: Mutex<Vec<(PathBuf, String)>>,
    link_root: Option<String>,
}

#[async_trait]
impl StorageCli for FakeStorage {
    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), StorageError> {
        assert!(local.exists(), "{} uploaded after removal", local.display());
        self.uploads
            .lock()
            .unwrap()
            .push((local.to_path_buf(), remote_path.to_string()));
        Ok(())
    }

    async fn public_link(&self, remote_path: &str) -> Result<String, StorageError> {
        match &self.link_root {
            Some(root) => Ok(format!("{}/{}", root, remote_path)),
            None => Err(StorageError::Failed {
                command: "link",
                code: 1,
                stderr: "link not supported by this remote".to_string(),
            }),
        }
    }
}

/// Staging tree at `{temp}/staging/42/Qobuz`
struct Staging {
    _temp: TempDir,
    root: PathBuf,
    provider_dir: PathBuf,
}

impl Staging {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("staging");
        let provider_dir = root.join("42").join("Qobuz");
        std::fs::create_dir_all(&provider_dir).unwrap();
        Self {
            _temp: temp,
            root,
            provider_dir,
        }
    }

    fn track(&self, dir: &Path, title: &str, size: usize) -> Track {
        std::fs::create_dir_all(dir).unwrap();
        let local_path = dir.join(format!("{}.flac", title));
        std::fs::write(&local_path, vec![0u8; size]).unwrap();
        Track {
            title: title.to_string(),
            artist: "Miles Davis".to_string(),
            provider: "qobuz".to_string(),
            local_path,
            duration: 545,
            thumbnail_path: None,
            file_extension: "flac".to_string(),
            media: Default::default(),
            album: None,
            track_number: None,
            width: None,
            height: None,
        }
    }

    fn album(&self, dir: &Path, title: &str, count: usize, size: usize) -> Album {
        let tracks = (1..=count)
            .map(|i| self.track(dir, &format!("{:02} Track", i), size))
            .collect();
        Album {
            title: title.to_string(),
            artist: "Miles Davis".to_string(),
            provider: "qobuz".to_string(),
            local_path: dir.to_path_buf(),
            cover_path: None,
            tracks,
        }
    }
}

fn ctx(preferences: DeliveryPreferences) -> DeliveryContext {
    DeliveryContext {
        session_id: "42".to_string(),
        user_id: 7,
        user_name: Some("ana".to_string()),
        chat_id: CHAT,
        reply_to: Some(1),
        status_message: None,
        poster_message: None,
        preferences,
    }
}

fn orchestrator(
    transport: Arc<FakeTransport>,
    storage: Option<Arc<FakeStorage>>,
    mode: LinkMode,
    staging: &Staging,
) -> Orchestrator {
    let storage = storage.map(|s| s as Arc<dyn StorageCli>);
    let links = LinkResolver::new(
        mode,
        storage.clone(),
        Some("https://index.example/music".to_string()),
    );
    Orchestrator::new(transport, storage, links, staging.root.clone())
}

#[tokio::test]
async fn test_track_sent_as_audio_and_removed() {
    let staging = Staging::new();
    let mut track = staging.track(&staging.provider_dir, "So What", 1024);
    let thumbnail = staging.provider_dir.join("So What.jpg");
    std::fs::write(&thumbnail, b"jpg").unwrap();
    track.thumbnail_path = Some(thumbnail.clone());
    let item = ContentItem::Track(track.clone());

    let transport = Arc::new(FakeTransport::default());
    let report = orchestrator(transport.clone(), None, LinkMode::None, &staging)
        .deliver(&item, &ctx(DeliveryPreferences::default()))
        .await
        .unwrap();

    assert_eq!(report.state, DeliveryState::Delivered);
    assert!(report.cleaned_up);
    assert_eq!(report.messages.len(), 1);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, "audio");
    assert_eq!(
        sent[0].caption.as_deref(),
        Some("🎵 So What\n👤 Miles Davis\n🎧 Qobuz")
    );

    assert!(!track.local_path.exists());
    assert!(!thumbnail.exists());
}

#[tokio::test]
async fn test_album_archive_is_split_for_transport() {
    let staging = Staging::new();
    let album_dir = staging.provider_dir.join("Kind of Blue");
    let album = staging.album(&album_dir, "Kind of Blue", 12, 292);
    let item = ContentItem::Album(album);

    let preferences = DeliveryPreferences {
        archive: ArchivePolicy {
            album: true,
            ..Default::default()
        },
        max_artifact_size: 1900,
        ..Default::default()
    };

    let transport = Arc::new(FakeTransport::default());
    let report = orchestrator(transport.clone(), None, LinkMode::None, &staging)
        .deliver(&item, &ctx(preferences))
        .await
        .unwrap();

    assert!(report.is_delivered());

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|s| s.kind == "document"));
    assert_eq!(
        sent[0].path.as_deref(),
        Some(staging.provider_dir.join("Kind of Blue.zip").as_path())
    );
    assert_eq!(
        sent[1].path.as_deref(),
        Some(staging.provider_dir.join("Kind of Blue.part2.zip").as_path())
    );
    assert_eq!(
        sent[0].caption.as_deref(),
        Some("💿 Kind of Blue\n👤 Miles Davis\n🎧 Qobuz\n📦 Part 1/2")
    );
    assert!(sent[1].caption.as_deref().unwrap().ends_with("📦 Part 2/2"));

    // neither the tree nor the archives survive delivery
    assert!(!album_dir.exists());
    assert!(!staging.provider_dir.join("Kind of Blue.zip").exists());
    assert!(!staging.provider_dir.join("Kind of Blue.part2.zip").exists());
}

#[tokio::test]
async fn test_album_fan_out_reports_partial_failure() {
    let staging = Staging::new();
    let album_dir = staging.provider_dir.join("Blue Train");
    let album = staging.album(&album_dir, "Blue Train", 3, 64);
    let item = ContentItem::Album(album);

    let mut context = ctx(DeliveryPreferences {
        concurrency: 2,
        ..Default::default()
    });
    let status = MessageHandle {
        chat_id: CHAT,
        message_id: 500,
    };
    context.status_message = Some(status);

    let transport = Arc::new(FakeTransport::failing_on("02 Track"));
    let failure = orchestrator(transport.clone(), None, LinkMode::None, &staging)
        .deliver(&item, &context)
        .await
        .unwrap_err();

    match &failure.source {
        DeliveryError::Partial { failed, total, .. } => {
            assert_eq!(*failed, 1);
            assert_eq!(*total, 3);
        }
        other => panic!("expected partial failure, got {:?}", other),
    }
    assert!(matches!(failure.report.state, DeliveryState::Failed { .. }));
    assert_eq!(failure.report.messages.len(), 2);

    // siblings of the failed track were still delivered
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|s| s.kind == "audio"));

    // one best-effort progress edit per finished track
    let edits = transport.edits();
    assert_eq!(edits.len(), 3);
    assert!(edits.iter().all(|(message, _, wait)| *message == status && !*wait));
    assert!(edits
        .iter()
        .any(|(_, text, _)| text.ends_with("Progress: 100%")));

    assert!(!album_dir.exists());
}

#[tokio::test]
async fn test_remote_track_keeps_index_link_when_cli_fails() {
    let staging = Staging::new();
    let track = staging.track(&staging.provider_dir, "So What", 128);
    let item = ContentItem::Track(track.clone());

    let preferences = DeliveryPreferences {
        channel: Channel::RemoteStorage,
        link_mode: LinkMode::Both,
        ..Default::default()
    };

    let transport = Arc::new(FakeTransport::default());
    let storage = Arc::new(FakeStorage::default());
    let report = orchestrator(
        transport.clone(),
        Some(storage.clone()),
        LinkMode::Both,
        &staging,
    )
    .deliver(&item, &ctx(preferences))
    .await
    .unwrap();

    assert!(report.is_delivered());

    let uploads = storage.uploads.lock().unwrap().clone();
    assert_eq!(
        uploads,
        vec![(track.local_path.clone(), "42/Qobuz/So What.flac".to_string())]
    );

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, "text");
    let links = sent[0].links.clone().unwrap();
    assert_eq!(links.direct, None);
    assert_eq!(
        links.index.as_deref(),
        Some("https://index.example/music/42/Qobuz/So%20What.flac")
    );

    let text = sent[0].text.clone().unwrap();
    assert!(text.starts_with("🎵 So What"));
    assert!(text.contains("📁 Index Link: https://index.example/music/42/Qobuz/So%20What.flac"));
    assert!(!text.contains("Direct Link"));

    assert!(!track.local_path.exists());
}

#[tokio::test]
async fn test_remote_album_archive_updates_poster() {
    let staging = Staging::new();
    let album_dir = staging.provider_dir.join("Milestones");
    let album = staging.album(&album_dir, "Milestones", 2, 32);
    let item = ContentItem::Album(album);

    let mut context = ctx(DeliveryPreferences {
        channel: Channel::RemoteStorage,
        archive: ArchivePolicy {
            album: true,
            ..Default::default()
        },
        link_mode: LinkMode::RemoteOnly,
        ..Default::default()
    });
    let poster = MessageHandle {
        chat_id: CHAT,
        message_id: 77,
    };
    context.poster_message = Some(poster);

    let transport = Arc::new(FakeTransport::default());
    let storage = Arc::new(FakeStorage {
        link_root: Some("https://share.example".to_string()),
        ..Default::default()
    });
    let report = orchestrator(
        transport.clone(),
        Some(storage.clone()),
        LinkMode::RemoteOnly,
        &staging,
    )
    .deliver(&item, &context)
    .await
    .unwrap();

    assert_eq!(report.messages, vec![poster]);
    assert!(transport.sent().is_empty());

    let uploads = storage.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].1, "42/Qobuz/Milestones");

    // the poster is a photo, so its caption is what gets the links
    assert!(transport.edits().is_empty());
    let caption_edits = transport.caption_edits.lock().unwrap().clone();
    assert_eq!(caption_edits.len(), 1);
    let (message, text) = &caption_edits[0];
    assert_eq!(*message, poster);
    assert!(text.contains("🔗 Direct Link: https://share.example/42/Qobuz/Milestones"));

    assert!(!album_dir.exists());
}

#[tokio::test]
async fn test_archive_uploads_pack_before_upload() {
    let staging = Staging::new();
    let album_dir = staging.provider_dir.join("Sketches of Spain");
    let album = staging.album(&album_dir, "Sketches of Spain", 3, 32);
    let item = ContentItem::Album(album);

    let preferences = DeliveryPreferences {
        channel: Channel::RemoteStorage,
        archive: ArchivePolicy {
            album: true,
            ..Default::default()
        },
        archive_uploads: true,
        link_mode: LinkMode::IndexOnly,
        ..Default::default()
    };

    let transport = Arc::new(FakeTransport::default());
    let storage = Arc::new(FakeStorage::default());
    orchestrator(
        transport.clone(),
        Some(storage.clone()),
        LinkMode::IndexOnly,
        &staging,
    )
    .deliver(&item, &ctx(preferences))
    .await
    .unwrap();

    let uploads = storage.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].1, "42/Qobuz/Sketches of Spain.zip");

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].links.as_ref().and_then(|l| l.index.as_deref()),
        Some("https://index.example/music/42/Qobuz/Sketches%20of%20Spain.zip")
    );

    assert!(!album_dir.exists());
    assert!(!staging.provider_dir.join("Sketches of Spain.zip").exists());
}

#[tokio::test]
async fn test_artist_delivers_every_album() {
    let staging = Staging::new();
    let artist_dir = staging.provider_dir.join("Miles Davis");
    let first = staging.album(&artist_dir.join("Kind of Blue"), "Kind of Blue", 2, 16);
    let second = staging.album(&artist_dir.join("Milestones"), "Milestones", 3, 16);
    let item = ContentItem::Artist(Artist {
        title: "Miles Davis".to_string(),
        provider: "qobuz".to_string(),
        local_path: artist_dir.clone(),
        albums: vec![first, second],
    });

    let transport = Arc::new(FakeTransport::default());
    let report = orchestrator(transport.clone(), None, LinkMode::None, &staging)
        .deliver(&item, &ctx(DeliveryPreferences::default()))
        .await
        .unwrap();

    assert_eq!(report.messages.len(), 5);
    assert_eq!(transport.sent().len(), 5);
    assert!(!artist_dir.exists());
}

#[tokio::test]
async fn test_failed_send_still_cleans_up() {
    let staging = Staging::new();
    let track = staging.track(&staging.provider_dir, "Flamenco Sketches", 256);
    let item = ContentItem::Track(track.clone());

    let transport = Arc::new(FakeTransport::failing_on("Flamenco"));
    let failure = orchestrator(transport, None, LinkMode::None, &staging)
        .deliver(&item, &ctx(DeliveryPreferences::default()))
        .await
        .unwrap_err();

    assert!(matches!(failure.source, DeliveryError::Transport(_)));
    assert_eq!(
        failure.report.failure_reason(),
        Some("Transport error: Telegram API error 413: Request Entity Too Large")
    );
    assert!(failure.report.cleaned_up);
    assert!(!track.local_path.exists());
}

#[tokio::test]
async fn test_missing_source_fails() {
    let staging = Staging::new();
    let item = ContentItem::Album(Album {
        title: "Ghost".to_string(),
        artist: "Nobody".to_string(),
        provider: "qobuz".to_string(),
        local_path: staging.provider_dir.join("Ghost"),
        cover_path: None,
        tracks: Vec::new(),
    });

    let transport = Arc::new(FakeTransport::default());
    let failure = orchestrator(transport.clone(), None, LinkMode::None, &staging)
        .deliver(&item, &ctx(DeliveryPreferences::default()))
        .await
        .unwrap_err();

    assert!(matches!(failure.source, DeliveryError::MissingSource(_)));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_remote_channel_without_storage_fails() {
    let staging = Staging::new();
    let track = staging.track(&staging.provider_dir, "Blue in Green", 16);
    let item = ContentItem::Track(track.clone());

    let preferences = DeliveryPreferences {
        channel: Channel::RemoteStorage,
        ..Default::default()
    };

    let transport = Arc::new(FakeTransport::default());
    let failure = orchestrator(transport, None, LinkMode::None, &staging)
        .deliver(&item, &ctx(preferences))
        .await
        .unwrap_err();

    assert!(matches!(failure.source, DeliveryError::NoStorage));
    assert!(!track.local_path.exists());
}

#[tokio::test]
async fn test_video_track_sent_as_video() {
    let staging = Staging::new();
    let mut track = staging.track(&staging.provider_dir, "Live at Newport", 512);
    track.media = MediaKind::Video;
    track.width = Some(1280);
    track.height = Some(720);
    let item = ContentItem::Track(track.clone());

    let transport = Arc::new(FakeTransport::default());
    let report = orchestrator(transport.clone(), None, LinkMode::None, &staging)
        .deliver(&item, &ctx(DeliveryPreferences::default()))
        .await
        .unwrap();

    assert!(report.is_delivered());
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, "video");
    assert_eq!(
        sent[0].caption.as_deref(),
        Some("🎬 Live at Newport\n👤 Miles Davis\n🎧 Qobuz Music Video")
    );
    assert!(!track.local_path.exists());
}

#[tokio::test]
async fn test_concurrent_delivery_of_same_album_is_rejected() {
    let staging = Staging::new();
    let album_dir = staging.provider_dir.join("Blue Train");
    let album = staging.album(&album_dir, "Blue Train", 1, 64);
    let item = ContentItem::Album(album);
    let context = ctx(DeliveryPreferences::default());

    let transport = Arc::new(FakeTransport::gated());
    let orchestrator = orchestrator(transport.clone(), None, LinkMode::None, &staging);

    let second = async {
        transport.gate().started.notified().await;
        let result = orchestrator.deliver(&item, &context).await;
        transport.gate().release.add_permits(8);
        result
    };
    let (first, second) = tokio::join!(orchestrator.deliver(&item, &context), second);

    assert!(first.unwrap().is_delivered());
    let rejected = second.unwrap_err();
    assert!(matches!(rejected.source, DeliveryError::PathBusy(_)));
    assert!(rejected.report.messages.is_empty());

    assert_eq!(transport.sent().len(), 1);
    assert!(!album_dir.exists());
}

#[tokio::test]
async fn test_track_inside_album_in_flight_is_rejected() {
    let staging = Staging::new();
    let album_dir = staging.provider_dir.join("Blue Train");
    let album = staging.album(&album_dir, "Blue Train", 2, 64);
    let track = album.tracks[0].clone();
    let album_item = ContentItem::Album(album);
    let track_item = ContentItem::Track(track.clone());
    let context = ctx(DeliveryPreferences::default());

    let transport = Arc::new(FakeTransport::gated());
    let orchestrator = orchestrator(transport.clone(), None, LinkMode::None, &staging);

    let nested = async {
        transport.gate().started.notified().await;
        let result = orchestrator.deliver(&track_item, &context).await;
        // the rejected call left the album's file alone
        assert!(track.local_path.exists());
        transport.gate().release.add_permits(8);
        result
    };
    let (album_result, track_result) =
        tokio::join!(orchestrator.deliver(&album_item, &context), nested);

    let rejected = track_result.unwrap_err();
    assert!(matches!(rejected.source, DeliveryError::PathBusy(_)));

    let report = album_result.unwrap();
    assert_eq!(report.messages.len(), 2);
    assert_eq!(transport.sent().len(), 2);
    assert!(!album_dir.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_packaging_failure_removes_partial_archives() {
    let staging = Staging::new();
    let album_dir = staging.provider_dir.join("Kind of Blue");
    let album = staging.album(&album_dir, "Kind of Blue", 12, 292);
    let item = ContentItem::Album(album);

    // the second part cannot be created: its path is a link into nowhere
    let blocked = staging.provider_dir.join("Kind of Blue.part2.zip");
    std::os::unix::fs::symlink(staging.root.join("missing").join("part2.zip"), &blocked)
        .unwrap();

    let preferences = DeliveryPreferences {
        archive: ArchivePolicy {
            album: true,
            ..Default::default()
        },
        max_artifact_size: 1900,
        ..Default::default()
    };

    let transport = Arc::new(FakeTransport::default());
    let failure = orchestrator(transport.clone(), None, LinkMode::None, &staging)
        .deliver(&item, &ctx(preferences))
        .await
        .unwrap_err();

    assert!(matches!(failure.source, DeliveryError::Packaging(_)));
    assert!(failure.report.cleaned_up);
    assert!(transport.sent().is_empty());

    assert!(!staging.provider_dir.join("Kind of Blue.zip").exists());
    assert!(std::fs::symlink_metadata(&blocked).is_err());
    assert!(!album_dir.exists());
}

#[tokio::test]
async fn test_link_mode_none_posts_no_links() {
    let staging = Staging::new();
    let track = staging.track(&staging.provider_dir, "So What", 128);
    let item = ContentItem::Track(track);

    let preferences = DeliveryPreferences {
        channel: Channel::RemoteStorage,
        link_mode: LinkMode::None,
        ..Default::default()
    };

    let transport = Arc::new(FakeTransport::default());
    let storage = Arc::new(FakeStorage {
        link_root: Some("https://share.example".to_string()),
        ..Default::default()
    });
    orchestrator(transport.clone(), Some(storage.clone()), LinkMode::Both, &staging)
        .deliver(&item, &ctx(preferences))
        .await
        .unwrap();

    assert_eq!(storage.uploads.lock().unwrap().len(), 1);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].links.as_ref().map_or(true, LinkPair::is_empty));
    assert!(!sent[0].text.as_deref().unwrap().contains("Link"));
}

#[tokio::test]
async fn test_cover_art_posted_before_tracks() {
    let staging = Staging::new();
    let album_dir = staging.provider_dir.join("Blue Train");
    let mut album = staging.album(&album_dir, "Blue Train", 2, 32);
    let cover = album_dir.join("cover.jpg");
    std::fs::write(&cover, b"jpg").unwrap();
    album.cover_path = Some(cover.clone());
    let item = ContentItem::Album(album);

    let preferences = DeliveryPreferences {
        art_poster: true,
        concurrency: 1,
        ..Default::default()
    };

    let transport = Arc::new(FakeTransport::default());
    let report = orchestrator(transport.clone(), None, LinkMode::None, &staging)
        .deliver(&item, &ctx(preferences))
        .await
        .unwrap();

    let sent = transport.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].kind, "photo");
    assert_eq!(sent[0].path.as_deref(), Some(cover.as_path()));
    assert_eq!(
        sent[0].caption.as_deref(),
        Some("💿 Blue Train\n👤 Miles Davis\n🎧 Qobuz")
    );
    assert!(sent[1..].iter().all(|s| s.kind == "audio"));
    assert_eq!(report.messages.len(), 3);
    assert!(!album_dir.exists());
}

#[tokio::test]
async fn test_posted_cover_receives_remote_links() {
    let staging = Staging::new();
    let album_dir = staging.provider_dir.join("Milestones");
    let mut album = staging.album(&album_dir, "Milestones", 2, 32);
    let cover = staging.provider_dir.join("Milestones.jpg");
    std::fs::write(&cover, b"jpg").unwrap();
    album.cover_path = Some(cover.clone());
    let item = ContentItem::Album(album);

    let preferences = DeliveryPreferences {
        channel: Channel::RemoteStorage,
        archive: ArchivePolicy {
            album: true,
            ..Default::default()
        },
        link_mode: LinkMode::RemoteOnly,
        art_poster: true,
        ..Default::default()
    };

    let transport = Arc::new(FakeTransport::default());
    let storage = Arc::new(FakeStorage {
        link_root: Some("https://share.example".to_string()),
        ..Default::default()
    });
    let report = orchestrator(
        transport.clone(),
        Some(storage),
        LinkMode::RemoteOnly,
        &staging,
    )
    .deliver(&item, &ctx(preferences))
    .await
    .unwrap();

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, "photo");

    let poster = report.messages[0];
    assert_eq!(report.messages, vec![poster]);
    let caption_edits = transport.caption_edits.lock().unwrap().clone();
    assert_eq!(caption_edits.len(), 1);
    assert_eq!(caption_edits[0].0, poster);
    assert!(caption_edits[0].1.contains("https://share.example/42/Qobuz/Milestones"));

    // the cover sat outside the album directory and is removed as well
    assert!(!cover.exists());
    assert!(!album_dir.exists());
}

#[tokio::test]
async fn test_artist_progress_stays_on_artist() {
    let staging = Staging::new();
    let artist_dir = staging.provider_dir.join("Miles Davis");
    let first = staging.album(&artist_dir.join("Kind of Blue"), "Kind of Blue", 2, 16);
    let second = staging.album(&artist_dir.join("Milestones"), "Milestones", 3, 16);
    let item = ContentItem::Artist(Artist {
        title: "Miles Davis".to_string(),
        provider: "qobuz".to_string(),
        local_path: artist_dir.clone(),
        albums: vec![first, second],
    });

    let mut context = ctx(DeliveryPreferences::default());
    let status = MessageHandle {
        chat_id: CHAT,
        message_id: 900,
    };
    context.status_message = Some(status);

    let transport = Arc::new(FakeTransport::default());
    orchestrator(transport.clone(), None, LinkMode::None, &staging)
        .deliver(&item, &context)
        .await
        .unwrap();

    let edits = transport.edits();
    assert_eq!(edits.len(), 2);
    assert!(edits
        .iter()
        .all(|(message, text, _)| *message == status
            && text.starts_with("Uploading artist Miles Davis")));
    assert_eq!(edits[1].1, "Uploading artist Miles Davis\nProgress: 100%");
}
