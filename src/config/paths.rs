//! Staging layout.
//!
//! Fetched content lives under `{staging}/{session_id}/{Provider}/...`.
//! Everything below a session directory belongs to that session and is
//! removed by `courier clean <session>`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::caption::title_case;

/// `{staging}/{session_id}`
pub fn session_dir(staging: &Path, session_id: &str) -> PathBuf {
    staging.join(session_id)
}

/// `{staging}/{session_id}/{Provider}`
pub fn staging_dir(staging: &Path, session_id: &str, provider: &str) -> PathBuf {
    session_dir(staging, session_id).join(title_case(provider))
}

/// Session directory under the configured staging root
pub fn configured_session_dir(session_id: &str) -> Result<PathBuf> {
    Ok(session_dir(&crate::config::staging_root()?, session_id))
}

/// Session ids are single path components
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && !session_id.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_layout() {
        let staging = Path::new("/srv/staging");
        assert_eq!(session_dir(staging, "42"), PathBuf::from("/srv/staging/42"));
        assert_eq!(
            staging_dir(staging, "42", "qobuz"),
            PathBuf::from("/srv/staging/42/Qobuz")
        );
    }

    #[test]
    fn test_session_id_validation() {
        assert!(is_valid_session_id("42"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id(".."));
        assert!(!is_valid_session_id("a/b"));
    }
}
