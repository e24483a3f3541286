//! Content items staged for delivery.
//!
//! A `ContentItem` is a tagged union over the four content kinds. Each
//! variant carries only the fields that are valid for it, so there is no
//! "optional key with fallback" lookup anywhere downstream.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Discriminant of a `ContentItem`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Track,
    Album,
    Artist,
    Playlist,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentKind::Track => "track",
            ContentKind::Album => "album",
            ContentKind::Artist => "artist",
            ContentKind::Playlist => "playlist",
        };
        write!(f, "{}", s)
    }
}

/// Whether a track is plain audio or a music video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Audio,
    Video,
}

/// A single staged media file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: String,
    pub provider: String,

    /// Staged media file
    pub local_path: PathBuf,

    /// Duration in seconds
    #[serde(default)]
    pub duration: u32,

    /// Cover thumbnail staged next to the media file
    #[serde(default)]
    pub thumbnail_path: Option<PathBuf>,

    /// File extension without the dot (e.g. "flac", "m4a")
    #[serde(default)]
    pub file_extension: String,

    #[serde(default)]
    pub media: MediaKind,

    /// Album title, when the track came from one
    #[serde(default)]
    pub album: Option<String>,

    /// Position on the album
    #[serde(default)]
    pub track_number: Option<u32>,

    /// Video frame size (only meaningful for `MediaKind::Video`)
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// An album directory with its ordered tracks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub title: String,
    pub artist: String,
    pub provider: String,
    pub local_path: PathBuf,
    /// Cover art, posted ahead of the delivery when art posters are on
    #[serde(default)]
    pub cover_path: Option<PathBuf>,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

/// An artist directory holding a discography of albums
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artist {
    /// Artist name
    pub title: String,
    pub provider: String,
    pub local_path: PathBuf,
    #[serde(default)]
    pub albums: Vec<Album>,
}

/// A playlist directory with its ordered tracks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub title: String,
    /// Curator; rendered as "Various Artists" when absent
    #[serde(default)]
    pub artist: Option<String>,
    pub provider: String,
    pub local_path: PathBuf,
    #[serde(default)]
    pub cover_path: Option<PathBuf>,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

/// Any deliverable content
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentItem {
    Track(Track),
    Album(Album),
    Artist(Artist),
    Playlist(Playlist),
}

impl ContentItem {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentItem::Track(_) => ContentKind::Track,
            ContentItem::Album(_) => ContentKind::Album,
            ContentItem::Artist(_) => ContentKind::Artist,
            ContentItem::Playlist(_) => ContentKind::Playlist,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ContentItem::Track(t) => &t.title,
            ContentItem::Album(a) => &a.title,
            ContentItem::Artist(a) => &a.title,
            ContentItem::Playlist(p) => &p.title,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            ContentItem::Track(t) => &t.provider,
            ContentItem::Album(a) => &a.provider,
            ContentItem::Artist(a) => &a.provider,
            ContentItem::Playlist(p) => &p.provider,
        }
    }

    /// File for tracks, directory for everything else
    pub fn local_path(&self) -> &Path {
        match self {
            ContentItem::Track(t) => &t.local_path,
            ContentItem::Album(a) => &a.local_path,
            ContentItem::Artist(a) => &a.local_path,
            ContentItem::Playlist(p) => &p.local_path,
        }
    }

    /// Cover art of albums and playlists
    pub fn cover_path(&self) -> Option<&Path> {
        match self {
            ContentItem::Album(a) => a.cover_path.as_deref(),
            ContentItem::Playlist(p) => p.cover_path.as_deref(),
            ContentItem::Track(_) | ContentItem::Artist(_) => None,
        }
    }

    /// Number of leaf tracks below this item
    pub fn track_count(&self) -> usize {
        match self {
            ContentItem::Track(_) => 1,
            ContentItem::Album(a) => a.tracks.len(),
            ContentItem::Artist(a) => a.albums.iter().map(|al| al.tracks.len()).sum(),
            ContentItem::Playlist(p) => p.tracks.len(),
        }
    }
}
