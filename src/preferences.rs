//! Durable storage of the refresh credential.
//!
//! Preferences live in a small JSON file:
//!
//! ```json
//! {
//!   "refreshToken": "AQD..."
//! }
//! ```
//!
//! A missing or unreadable file is the normal first-run condition and yields
//! empty preferences. Failing to write, on the other hand, is propagated:
//! losing the refresh credential would silently log the user out.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;
use veil::Redact;

use crate::error::Result;

/// The persisted record.
#[derive(Clone, Default, Deserialize, Serialize, Redact, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Long-lived credential exchanged for new access tokens.
    #[redact]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Access to the preference file. Writers through the same store are
/// serialized.
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    writing: Mutex<()>,
}

impl PreferenceStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writing: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the preferences, falling back to empty ones when the file is
    /// missing or corrupt.
    pub async fn load(&self) -> Preferences {
        load_json(&self.path).await.unwrap_or_else(|| {
            debug!("no existing preferences found, starting empty");
            Preferences::default()
        })
    }

    /// Overwrites the whole record. Fields that are not supplied are lost.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the file cannot be written.
    pub async fn save(&self, preferences: &Preferences) -> Result<()> {
        let _writing = self.writing.lock().await;
        self.write(preferences).await
    }

    /// Stores `refresh_token`, keeping the other fields on record.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the file cannot be written.
    pub async fn set_refresh_token(&self, refresh_token: &str) -> Result<()> {
        let _writing = self.writing.lock().await;
        let mut preferences = self.load().await;
        preferences.refresh_token = Some(refresh_token.to_owned());
        self.write(&preferences).await
    }

    /// Replaces the refresh credential with `rotated`, but only while
    /// `current` is still the one on record. Returns whether it was replaced.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the file cannot be written.
    pub async fn rotate_refresh_token(&self, current: &str, rotated: &str) -> Result<bool> {
        let _writing = self.writing.lock().await;
        let mut preferences = self.load().await;
        if preferences.refresh_token.as_deref() != Some(current) {
            debug!("refresh token changed during refresh, not storing rotation");
            return Ok(false);
        }

        preferences.refresh_token = Some(rotated.to_owned());
        self.write(&preferences).await?;
        Ok(true)
    }

    /// Forgets the refresh credential.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the file cannot be written.
    pub async fn clear(&self) -> Result<()> {
        self.save(&Preferences::default()).await?;
        info!("preferences cleared");
        Ok(())
    }

    async fn write(&self, preferences: &Preferences) -> Result<()> {
        save_json(&self.path, preferences).await?;
        debug!("preferences saved to {}", self.path.display());
        Ok(())
    }
}

/// Reads a JSON document, returning `None` when it is absent or invalid.
pub(crate) async fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(e) => {
            trace!("{}: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_slice(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("ignoring corrupt {}: {e}", path.display());
            None
        }
    }
}

/// Writes a JSON document through a temporary file and a rename, so readers
/// never observe a half-written file. Each write has its own temporary file.
pub(crate) async fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_vec_pretty(value)?;

    let mut temporary = path.as_os_str().to_owned();
    temporary.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    let temporary = PathBuf::from(temporary);

    let written = match tokio::fs::write(&temporary, contents).await {
        Ok(()) => tokio::fs::rename(&temporary, path).await,
        Err(e) => Err(e),
    };

    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&temporary).await {
            trace!("{}: {cleanup}", temporary.display());
        }
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn scratch_file() -> PathBuf {
        std::env::temp_dir().join(format!("tunebridge-{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let store = PreferenceStore::new(scratch_file());
        assert_eq!(store.load().await, Preferences::default());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty() {
        let path = scratch_file();
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let store = PreferenceStore::new(&path);
        assert_eq!(store.load().await, Preferences::default());

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn save_then_load_and_clear() {
        let path = scratch_file();
        let store = PreferenceStore::new(&path);

        let preferences = Preferences {
            refresh_token: Some("refresh".to_string()),
        };
        store.save(&preferences).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.contains("\"refreshToken\": \"refresh\""));
        assert_eq!(store.load().await, preferences);

        store.clear().await.unwrap();
        assert_eq!(store.load().await.refresh_token, None);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn rotation_only_replaces_the_expected_token() {
        let path = scratch_file();
        let store = PreferenceStore::new(&path);

        store.set_refresh_token("refresh-1").await.unwrap();
        assert!(!store
            .rotate_refresh_token("refresh-0", "rotated")
            .await
            .unwrap());
        assert_eq!(store.load().await.refresh_token.as_deref(), Some("refresh-1"));

        assert!(store
            .rotate_refresh_token("refresh-1", "rotated")
            .await
            .unwrap());
        assert_eq!(store.load().await.refresh_token.as_deref(), Some("rotated"));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn rotation_after_clear_stays_cleared() {
        let path = scratch_file();
        let store = PreferenceStore::new(&path);

        store.set_refresh_token("refresh-1").await.unwrap();
        store.clear().await.unwrap();

        assert!(!store
            .rotate_refresh_token("refresh-1", "rotated")
            .await
            .unwrap());
        assert_eq!(store.load().await.refresh_token, None);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_file_all_succeed() {
        let path = scratch_file();
        let record = |token: &str| Preferences {
            refresh_token: Some(token.to_string()),
        };
        let (a, b, c, d) = (record("a"), record("b"), record("c"), record("d"));

        let results = tokio::join!(
            save_json(&path, &a),
            save_json(&path, &b),
            save_json(&path, &c),
            save_json(&path, &d),
        );
        assert!(results.0.is_ok());
        assert!(results.1.is_ok());
        assert!(results.2.is_ok());
        assert!(results.3.is_ok());

        let stored = PreferenceStore::new(&path).load().await;
        assert!([a, b, c, d].contains(&stored));

        let parent = path.parent().unwrap();
        let stem = path.file_name().unwrap().to_string_lossy().into_owned();
        let mut entries = tokio::fs::read_dir(parent).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().into_owned();
            assert!(!(name.starts_with(&stem) && name.ends_with(".tmp")));
        }

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn unwritable_location_fails_loudly() {
        let store = PreferenceStore::new(scratch_file().join("nested").join("prefs.json"));
        let err = store.clear().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PersistenceFailure);
    }
}
