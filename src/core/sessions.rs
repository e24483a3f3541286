//! Anti-flood tracking of sessions with a delivery in progress.
//!
//! A chat (or user, depending on the mode) may only run one delivery at a
//! time. `try_begin` registers the key and hands back a guard; dropping the
//! guard removes the key again, on every exit path.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What identifies a session for flood control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiSpamMode {
    /// No restriction
    #[default]
    Off,
    /// One delivery per chat
    Chat,
    /// One delivery per user
    User,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("A delivery is already running for {0}")]
pub struct SessionBusy(pub i64);

/// Set of keys with a delivery in flight
#[derive(Debug, Default)]
pub struct ActiveSessions {
    mode: AntiSpamMode,
    active: Mutex<HashSet<i64>>,
}

impl ActiveSessions {
    pub fn new(mode: AntiSpamMode) -> Self {
        Self {
            mode,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn mode(&self) -> AntiSpamMode {
        self.mode
    }

    /// Register a delivery for this user/chat, or fail if one is running
    pub fn try_begin(&self, user_id: i64, chat_id: i64) -> Result<SessionGuard<'_>, SessionBusy> {
        let key = match self.mode {
            AntiSpamMode::Off => return Ok(SessionGuard { sessions: self, key: None }),
            AntiSpamMode::Chat => chat_id,
            AntiSpamMode::User => user_id,
        };

        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(key) {
            return Err(SessionBusy(key));
        }

        Ok(SessionGuard {
            sessions: self,
            key: Some(key),
        })
    }

    pub fn is_active(&self, key: i64) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&key)
    }

    fn release(&self, key: i64) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }
}

/// Releases its key from `ActiveSessions` when dropped
#[derive(Debug)]
pub struct SessionGuard<'a> {
    sessions: &'a ActiveSessions,
    key: Option<i64>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            self.sessions.release(key);
        }
    }
}
