//! Core delivery logic.
//!
//! This module contains:
//! - Fetcher: Downloads with bounded retries
//! - Packer: Single and size-split zip archives
//! - TaskRunner: Bounded fan-out with progress reporting
//! - LinkResolver: Direct and index links for uploaded content
//! - Captions: Per-kind caption templates
//! - ActiveSessions: Anti-flood tracking
//! - Orchestrator: Per-kind delivery policy and cleanup

pub mod caption;
pub mod fetcher;
pub mod links;
pub mod orchestrator;
pub mod packer;
pub mod runner;
pub mod sessions;

// Re-export commonly used types
pub use fetcher::{FetchError, FetchOptions, Fetcher};
pub use links::{LinkError, LinkResolver};
pub use orchestrator::{DeliveryError, DeliveryFailure, Orchestrator};
pub use packer::{pack_single, pack_split, PackError};
pub use runner::{ProgressHandle, TaskRunner};
pub use sessions::{ActiveSessions, AntiSpamMode, SessionBusy, SessionGuard};
