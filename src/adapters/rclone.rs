//! rclone adapter for remote object storage.
//!
//! Spawns the `rclone` binary directly with an argument vector (never a
//! shell string), so paths with quotes or spaces cannot alter the command.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::StorageCli;

/// Errors from the storage CLI
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("rclone {command} failed with exit code {code}: {stderr}")]
    Failed {
        command: &'static str,
        code: i32,
        stderr: String,
    },

    #[error("Refusing remote path {0:?}")]
    InvalidPath(String),
}

/// rclone CLI bound to one destination remote (e.g. `gdrive:music`)
pub struct RcloneCli {
    binary_path: String,
    config_file: Option<PathBuf>,
    remote: String,
}

impl RcloneCli {
    /// Create an adapter for `remote` using `rclone` from PATH
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            binary_path: "rclone".to_string(),
            config_file: None,
            remote: remote.into(),
        }
    }

    /// Use a custom binary path
    pub fn with_binary_path(mut self, binary_path: impl Into<String>) -> Self {
        self.binary_path = binary_path.into();
        self
    }

    /// Pass `--config <file>` on every invocation
    pub fn with_config_file(mut self, config_file: impl Into<PathBuf>) -> Self {
        self.config_file = Some(config_file.into());
        self
    }

    /// Full rclone target for a path relative to the remote root
    fn remote_target(&self, remote_path: &str) -> Result<String, StorageError> {
        let relative = sanitize_remote_path(remote_path)?;
        let root = self.remote.trim_end_matches('/');
        if relative.is_empty() {
            Ok(root.to_string())
        } else {
            Ok(format!("{}/{}", root, relative))
        }
    }

    async fn run(&self, command: &'static str, args: Vec<OsString>) -> Result<String, StorageError> {
        let mut cmd = Command::new(&self.binary_path);
        if let Some(config) = &self.config_file {
            cmd.arg("--config").arg(config);
        }
        cmd.arg(command).args(args);

        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| StorageError::Spawn {
                binary: self.binary_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(StorageError::Failed {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Normalise a relative remote path, rejecting anything that could escape
/// the remote root or be read as a flag.
pub fn sanitize_remote_path(remote_path: &str) -> Result<String, StorageError> {
    if remote_path.chars().any(char::is_control) {
        return Err(StorageError::InvalidPath(remote_path.to_string()));
    }

    let mut parts = Vec::new();
    for component in Path::new(remote_path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => return Err(StorageError::InvalidPath(remote_path.to_string())),
        }
    }

    let joined = parts.join("/");
    if joined.starts_with('-') {
        return Err(StorageError::InvalidPath(remote_path.to_string()));
    }
    Ok(joined)
}

#[async_trait]
impl StorageCli for RcloneCli {
    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), StorageError> {
        let target = self.remote_target(remote_path)?;
        // copyto keeps the file name given by the target; copy merges a directory into it
        let command = if local.is_dir() { "copy" } else { "copyto" };
        debug!(local = %local.display(), %target, command, "Uploading to remote storage");

        self.run(command, vec![local.as_os_str().to_owned(), target.into()])
            .await
            .map(|_| ())
    }

    async fn public_link(&self, remote_path: &str) -> Result<String, StorageError> {
        let target = self.remote_target(remote_path)?;
        self.run("link", vec![target.into()]).await
    }
}
