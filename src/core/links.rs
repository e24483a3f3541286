//! Link resolution for uploaded content.
//!
//! Maps a local staging path to the links users receive: a public link
//! from the storage CLI, and/or a browsable index link built from the
//! configured index root. Both halves are optional. A storage CLI failure
//! only drops the direct link.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::adapters::StorageCli;
use crate::domain::{LinkMode, LinkPair};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("{path} is not inside {base}")]
    OutsideBase { path: PathBuf, base: PathBuf },
}

/// Path of `local` relative to `base`, `/`-separated
pub fn relative_path(local: &Path, base: &Path) -> Result<String, LinkError> {
    let relative = local
        .strip_prefix(base)
        .map_err(|_| LinkError::OutsideBase {
            path: local.to_path_buf(),
            base: base.to_path_buf(),
        })?;

    Ok(relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/"))
}

/// Index URL for a relative path; each segment is percent-encoded
pub fn index_link(root: &str, relative: &str) -> String {
    let encoded = relative
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", root.trim_end_matches('/'), encoded)
}

/// Resolves `LinkPair`s according to the configured link mode
#[derive(Clone)]
pub struct LinkResolver {
    mode: LinkMode,
    storage: Option<Arc<dyn StorageCli>>,
    index_root: Option<String>,
}

impl LinkResolver {
    pub fn new(
        mode: LinkMode,
        storage: Option<Arc<dyn StorageCli>>,
        index_root: Option<String>,
    ) -> Self {
        Self {
            mode,
            storage,
            index_root,
        }
    }

    /// A resolver that never produces links
    pub fn disabled() -> Self {
        Self::new(LinkMode::None, None, None)
    }

    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    /// Links for `local` under the resolver's own mode
    pub async fn resolve(&self, local: &Path, base: &Path) -> Result<LinkPair, LinkError> {
        self.resolve_as(self.mode, local, base).await
    }

    /// Links for `local` under `mode`, which overrides the resolver's own
    pub async fn resolve_as(
        &self,
        mode: LinkMode,
        local: &Path,
        base: &Path,
    ) -> Result<LinkPair, LinkError> {
        let relative = relative_path(local, base)?;
        let mut links = LinkPair::default();

        if mode.wants_direct() {
            if let Some(storage) = &self.storage {
                match storage.public_link(&relative).await {
                    Ok(link) if !link.is_empty() => links.direct = Some(link),
                    Ok(_) => debug!(path = %relative, "Storage returned an empty link"),
                    Err(e) => debug!(path = %relative, error = %e, "No direct link"),
                }
            }
        }

        if mode.wants_index() {
            if let Some(root) = &self.index_root {
                links.index = Some(index_link(root, &relative));
            }
        }

        Ok(links)
    }
}
