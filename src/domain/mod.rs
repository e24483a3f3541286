//! Domain types for courier.
//!
//! This module contains the core data structures:
//! - Content: the track/album/artist/playlist tagged union
//! - Delivery: session context, preferences, artifacts and reports

pub mod content;
pub mod delivery;

// Re-export commonly used types
pub use content::{Album, Artist, ContentItem, ContentKind, MediaKind, Playlist, Track};
pub use delivery::{
    ArchivePart, ArchivePolicy, Artifact, Channel, DeliveryContext, DeliveryPreferences,
    DeliveryReport, DeliveryState, LinkMode, LinkPair, MessageHandle,
    DEFAULT_MAX_ARTIFACT_SIZE,
};
