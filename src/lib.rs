//! courier - Media packaging and delivery engine
//!
//! Takes content that a provider has already downloaded into a staging
//! directory and gets it to the requesting chat: directly through the chat
//! transport, or uploaded to remote storage with links posted back.
//!
//! # Architecture
//!
//! Delivery is driven per item:
//! - Tracks are sent as audio/video, or uploaded and announced with links
//! - Albums, artists and playlists are either packed into zip archives
//!   (split to fit the transport's size cap) or fanned out per child
//!   through a bounded task runner
//! - Local files are always removed afterwards, success or failure
//!
//! # Modules
//!
//! - `adapters`: External systems (Telegram transport, rclone storage)
//! - `core`: Delivery logic (Fetcher, Packer, TaskRunner, Orchestrator)
//! - `domain`: Data structures (ContentItem, DeliveryContext, DeliveryReport)
//! - `config`: Config file discovery and environment overrides
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Deliver staged content
//! courier deliver session-42.yaml
//!
//! # Split a directory into transport-sized archives
//! courier pack ./staging/42/Qobuz/Blue\ Train --split
//!
//! # Remove everything a session staged
//! courier clean 42
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{DeliveryError, DeliveryFailure, Orchestrator};
pub use domain::{ContentItem, ContentKind, DeliveryContext, DeliveryReport, DeliveryState};

// Transport and storage adapters
pub use adapters::{RcloneCli, TelegramConfig, TelegramTransport};
