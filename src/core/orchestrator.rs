//! Delivery orchestrator.
//!
//! Decides per content kind how an item is packaged and delivered, drives
//! the delivery through the transport or remote storage, and removes the
//! item's local files afterwards, whatever happened.
//!
//! Per item: `Pending -> Packaged? -> Delivered`, or `Pending -> Failed`.
//! Cleanup runs after both.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{
    Destination, MediaMeta, Payload, StorageCli, StorageError, Transport, TransportError,
};
use crate::domain::{
    Artifact, Channel, ContentItem, DeliveryContext, DeliveryReport, DeliveryState, LinkPair,
    MediaKind, MessageHandle, Track,
};

use super::caption::{caption_for, part_caption, track_caption, with_links};
use super::links::{relative_path, LinkError, LinkResolver};
use super::packer::{self, PackError};
use super::runner::{ProgressHandle, TaskRunner};

/// Why a delivery failed
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Packaging error: {0}")]
    Packaging(#[from] PackError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Source path does not exist: {0}")]
    MissingSource(PathBuf),

    #[error("Another delivery is already using {0}")]
    PathBusy(PathBuf),

    #[error("Remote storage channel selected but no storage is configured")]
    NoStorage,

    #[error("{failed} of {total} items failed, first: {first}")]
    Partial {
        failed: usize,
        total: usize,
        first: String,
    },
}

/// A failed delivery, after cleanup has run
#[derive(Debug, Error)]
#[error("Delivery of '{}' failed: {source}", .report.title)]
pub struct DeliveryFailure {
    pub report: DeliveryReport,
    #[source]
    pub source: DeliveryError,
}

/// Main delivery orchestrator
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    storage: Option<Arc<dyn StorageCli>>,
    links: LinkResolver,
    /// Root that remote paths are relative to
    staging_root: PathBuf,
    /// Local paths with a top-level delivery in progress
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Option<Arc<dyn StorageCli>>,
        links: LinkResolver,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            storage,
            links,
            staging_root: staging_root.into(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Deliver one item and clean up its local files
    #[instrument(skip(self, item, ctx), fields(kind = %item.kind(), title = %item.title()))]
    pub async fn deliver(
        &self,
        item: &ContentItem,
        ctx: &DeliveryContext,
    ) -> Result<DeliveryReport, DeliveryFailure> {
        let mut report = DeliveryReport::new(item.title(), item.kind());

        // A path claimed by another call is left alone entirely, cleanup included
        let Some(_claim) = PathClaim::acquire(&self.in_flight, item.local_path()) else {
            let source = DeliveryError::PathBusy(item.local_path().to_path_buf());
            warn!(error = %source, "Rejected overlapping delivery");
            report.state = DeliveryState::Failed {
                reason: source.to_string(),
            };
            report.completed_at = Some(Utc::now());
            return Err(DeliveryFailure { report, source });
        };

        self.deliver_claimed(item, ctx, report).await
    }

    /// Children run through here: the parent already holds the claim
    fn deliver_boxed<'a>(
        &'a self,
        item: &'a ContentItem,
        ctx: &'a DeliveryContext,
    ) -> BoxFuture<'a, Result<DeliveryReport, DeliveryFailure>> {
        Box::pin(async move {
            let report = DeliveryReport::new(item.title(), item.kind());
            self.deliver_claimed(item, ctx, report).await
        })
    }

    async fn deliver_claimed(
        &self,
        item: &ContentItem,
        ctx: &DeliveryContext,
        mut report: DeliveryReport,
    ) -> Result<DeliveryReport, DeliveryFailure> {
        info!(
            delivery_id = %report.id,
            channel = ?ctx.preferences.channel,
            tracks = item.track_count(),
            "Starting delivery"
        );

        let outcome = self.deliver_item(item, ctx, &mut report).await;

        report.cleaned_up = self.cleanup(item).await;
        report.completed_at = Some(Utc::now());

        match outcome {
            Ok(()) => {
                transition(&mut report, DeliveryState::Delivered);
                info!(
                    delivery_id = %report.id,
                    messages = report.messages.len(),
                    "Delivery completed"
                );
                Ok(report)
            }
            Err(source) => {
                error!(delivery_id = %report.id, error = %source, "Delivery failed");
                transition(
                    &mut report,
                    DeliveryState::Failed {
                        reason: source.to_string(),
                    },
                );
                Err(DeliveryFailure { report, source })
            }
        }
    }

    async fn deliver_item(
        &self,
        item: &ContentItem,
        ctx: &DeliveryContext,
        report: &mut DeliveryReport,
    ) -> Result<(), DeliveryError> {
        let source = item.local_path();
        if !tokio::fs::try_exists(source).await? {
            return Err(DeliveryError::MissingSource(source.to_path_buf()));
        }

        match item {
            ContentItem::Track(track) => self.deliver_track(track, ctx, report).await,
            ContentItem::Album(album) => {
                let children = album.tracks.iter().cloned().map(ContentItem::Track).collect();
                let concurrency = ctx.preferences.concurrency;
                self.deliver_collection(item, children, concurrency, ctx, report)
                    .await
            }
            ContentItem::Playlist(playlist) => {
                let children = playlist
                    .tracks
                    .iter()
                    .cloned()
                    .map(ContentItem::Track)
                    .collect();
                let concurrency = ctx.preferences.concurrency;
                self.deliver_collection(item, children, concurrency, ctx, report)
                    .await
            }
            ContentItem::Artist(artist) => {
                // albums go one at a time; each album fans out its own tracks
                let children = artist.albums.iter().cloned().map(ContentItem::Album).collect();
                self.deliver_collection(item, children, 1, ctx, report).await
            }
        }
    }

    async fn deliver_track(
        &self,
        track: &Track,
        ctx: &DeliveryContext,
        report: &mut DeliveryReport,
    ) -> Result<(), DeliveryError> {
        let caption = track_caption(track, ctx);

        let handle = match ctx.preferences.channel {
            Channel::Transport => {
                let meta = MediaMeta {
                    duration: track.duration,
                    performer: Some(track.artist.clone()),
                    title: Some(track.title.clone()),
                    thumbnail: track.thumbnail_path.clone(),
                    width: track.width,
                    height: track.height,
                };
                let path = track.local_path.clone();
                let payload = match track.media {
                    MediaKind::Audio => Payload::Audio { path, meta },
                    MediaKind::Video => Payload::Video { path, meta },
                };
                self.transport
                    .send(destination(ctx), payload, Some(&caption), None)
                    .await?
            }
            Channel::RemoteStorage => {
                let links = self.upload_and_link(&track.local_path, ctx).await?;
                self.transport
                    .send(
                        destination(ctx),
                        Payload::Text(with_links(&caption, &links)),
                        None,
                        Some(&links),
                    )
                    .await?
            }
        };

        report.messages.push(handle);
        Ok(())
    }

    async fn deliver_collection(
        &self,
        item: &ContentItem,
        children: Vec<ContentItem>,
        concurrency: usize,
        ctx: &DeliveryContext,
        report: &mut DeliveryReport,
    ) -> Result<(), DeliveryError> {
        let prefs = &ctx.preferences;
        let poster = match ctx.poster_message {
            Some(poster) => Some(poster),
            None => self.post_poster(item, ctx, report).await,
        };

        if !prefs.archive.archives(item.kind()) {
            return self
                .fan_out(item, &children, concurrency, ctx, report)
                .await;
        }

        let caption = caption_for(item, ctx);
        let source = item.local_path();

        match prefs.channel {
            Channel::Transport => {
                let artifact = packer::pack_split(source, prefs.max_artifact_size).await?;
                transition(report, DeliveryState::Packaged);
                self.send_archive(&artifact, &caption, ctx, report).await
            }
            Channel::RemoteStorage => {
                let upload_path = if prefs.archive_uploads {
                    let artifact = packer::pack_single(source).await?;
                    transition(report, DeliveryState::Packaged);
                    match artifact.parts.first() {
                        Some(part) => part.path.clone(),
                        None => source.to_path_buf(),
                    }
                } else {
                    source.to_path_buf()
                };

                let links = self.upload_and_link(&upload_path, ctx).await?;
                let text = with_links(&caption, &links);

                let handle = match poster {
                    Some(poster) => self
                        .transport
                        .edit_caption(poster, &text, Some(&links), true)
                        .await?
                        .unwrap_or(poster),
                    None => {
                        self.transport
                            .send(destination(ctx), Payload::Text(text), None, Some(&links))
                            .await?
                    }
                };
                if !report.messages.contains(&handle) {
                    report.messages.push(handle);
                }
                Ok(())
            }
        }
    }

    /// Post the cover art with the item's caption. Returns the poster, or
    /// None when posters are off, there is no cover, or the send failed.
    async fn post_poster(
        &self,
        item: &ContentItem,
        ctx: &DeliveryContext,
        report: &mut DeliveryReport,
    ) -> Option<MessageHandle> {
        if !ctx.preferences.art_poster {
            return None;
        }
        let cover = item.cover_path()?;
        if !tokio::fs::try_exists(cover).await.unwrap_or(false) {
            debug!(cover = %cover.display(), "Cover art missing, no poster");
            return None;
        }

        let caption = caption_for(item, ctx);
        match self
            .transport
            .send(
                destination(ctx),
                Payload::Photo(cover.to_path_buf()),
                Some(&caption),
                None,
            )
            .await
        {
            Ok(handle) => {
                report.messages.push(handle);
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Failed to post cover art");
                None
            }
        }
    }

    /// Deliver every child independently through the bounded runner
    async fn fan_out(
        &self,
        item: &ContentItem,
        children: &[ContentItem],
        concurrency: usize,
        ctx: &DeliveryContext,
        report: &mut DeliveryReport,
    ) -> Result<(), DeliveryError> {
        let total = children.len();
        let progress = match ctx.status_message {
            Some(message) if total > 1 => Some(ProgressHandle::new(
                self.transport.clone(),
                message,
                format!("Uploading {} {}", item.kind(), item.title()),
                total,
            )),
            _ => None,
        };

        // Status and poster messages belong to the top-level item
        let child_ctx = DeliveryContext {
            status_message: None,
            poster_message: None,
            ..ctx.clone()
        };
        let tasks: Vec<_> = children
            .iter()
            .map(|child| self.deliver_boxed(child, &child_ctx))
            .collect();
        let results = TaskRunner::new(concurrency)
            .run_all(tasks, progress.as_ref())
            .await;

        let mut failed = 0;
        let mut first = None;
        for result in results {
            match result {
                Ok(child) => report.messages.extend(child.messages),
                Err(failure) => {
                    failed += 1;
                    if first.is_none() {
                        first = Some(failure.to_string());
                    }
                    report.messages.extend(failure.report.messages);
                }
            }
        }

        match first {
            None => Ok(()),
            Some(first) => Err(DeliveryError::Partial {
                failed,
                total,
                first,
            }),
        }
    }

    async fn send_archive(
        &self,
        artifact: &Artifact,
        caption: &str,
        ctx: &DeliveryContext,
        report: &mut DeliveryReport,
    ) -> Result<(), DeliveryError> {
        if artifact.is_empty() {
            warn!("Nothing to send, source tree was empty");
            return Ok(());
        }

        let total = artifact.parts.len();
        for (index, part) in artifact.parts.iter().enumerate() {
            let caption = part_caption(caption, index + 1, total);
            let handle = self
                .transport
                .send(
                    destination(ctx),
                    Payload::Document(part.path.clone()),
                    Some(&caption),
                    None,
                )
                .await?;
            report.messages.push(handle);
        }
        Ok(())
    }

    async fn upload_and_link(
        &self,
        path: &Path,
        ctx: &DeliveryContext,
    ) -> Result<LinkPair, DeliveryError> {
        let storage = self.storage.as_ref().ok_or(DeliveryError::NoStorage)?;
        let remote = relative_path(path, &self.staging_root)?;

        storage.upload(path, &remote).await?;
        Ok(self
            .links
            .resolve_as(ctx.preferences.link_mode, path, &self.staging_root)
            .await?)
    }

    /// Remove everything the item left on disk. Returns false if anything
    /// could not be removed; errors are logged, never returned.
    async fn cleanup(&self, item: &ContentItem) -> bool {
        match item {
            ContentItem::Track(track) => {
                let mut clean = remove_file(&track.local_path).await;
                if let Some(thumbnail) = &track.thumbnail_path {
                    clean &= remove_file(thumbnail).await;
                }
                clean
            }
            other => {
                let dir = other.local_path();
                let mut clean = true;
                for archive in packer::existing_archives(dir) {
                    clean &= remove_file(&archive).await;
                }
                if let Some(cover) = other.cover_path() {
                    clean &= remove_file(cover).await;
                }
                clean & remove_dir(dir).await
            }
        }
    }
}

fn destination(ctx: &DeliveryContext) -> Destination {
    Destination {
        chat_id: ctx.chat_id,
        reply_to: ctx.reply_to,
    }
}

fn transition(report: &mut DeliveryReport, next: DeliveryState) {
    debug!(delivery_id = %report.id, from = ?report.state, to = ?next, "State change");
    report.state = next;
}

async fn remove_file(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cleanup failed");
            false
        }
    }
}

async fn remove_dir(path: &Path) -> bool {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cleanup failed");
            false
        }
    }
}

/// Exclusive claim on a local path for the duration of one delivery.
/// Paths above or below a claimed path count as taken too.
struct PathClaim<'a> {
    in_flight: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl<'a> PathClaim<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<PathBuf>>, path: &Path) -> Option<Self> {
        let mut paths = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if paths
            .iter()
            .any(|claimed| claimed.starts_with(path) || path.starts_with(claimed))
        {
            return None;
        }
        paths.insert(path.to_path_buf());
        Some(Self {
            in_flight,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PathClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.path);
    }
}
