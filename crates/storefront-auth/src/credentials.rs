//! Credential storage for the access/refresh pair
//!
//! The store is the single source of truth for "am I logged in". It holds at
//! most one `CredentialPair`, written and cleared as a unit. Operations are
//! synchronous: the session manager reads and writes the store inside its
//! state transitions, which must not contain suspension points.
//!
//! `FileCredentialStore` survives restarts. It keeps the pair in memory so a
//! `set` is visible to every reader as soon as it returns, and persists with
//! an atomic temp-file + rename. `MemoryCredentialStore` is process-local.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The access/refresh credential pair. Both tokens are opaque.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    /// Short-lived bearer token attached to API calls
    pub access_token: String,
    /// Longer-lived token exchanged at the refresh endpoint
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Durable holder of the current credential pair.
///
/// Implementations must make `set`/`clear` visible to all in-process readers
/// before returning, and must never expose half a pair.
pub trait CredentialStore: Send + Sync {
    /// Current pair, or `None` when logged out. Never fails.
    fn get(&self) -> Option<CredentialPair>;

    /// Replace the stored pair. Synchronous; may block on I/O.
    fn set(&self, pair: CredentialPair) -> Result<()>;

    /// Remove both tokens. Synchronous; may block on I/O.
    fn clear(&self) -> Result<()>;
}

/// File-backed store. The file holds `{"accessToken": .., "refreshToken": ..}`
/// and is absent when logged out.
///
/// `set` and `clear` block the calling thread on filesystem I/O, and
/// `SessionManager` calls them while holding its state lock. Keep the file on
/// local storage; a slow disk stalls every request that touches the session.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<Option<CredentialPair>>,
}

impl FileCredentialStore {
    /// Load the pair from `path`. A missing file means logged out; an
    /// unreadable or malformed file is an error.
    pub fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let pair: CredentialPair = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), "loaded credentials");
            Some(pair)
        } else {
            info!(path = %path.display(), "credential file not found, starting logged out");
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<CredentialPair>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<CredentialPair> {
        self.lock().clone()
    }

    /// The in-memory pair is replaced before the file is written, so readers
    /// see the new pair even if persisting fails.
    fn set(&self, pair: CredentialPair) -> Result<()> {
        let mut state = self.lock();
        *state = Some(pair.clone());
        write_atomic(&self.path, &pair)?;
        debug!(path = %self.path.display(), "stored credentials");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.lock();
        *state = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(format!("removing credential file: {e}"))),
        }
        debug!(path = %self.path.display(), "cleared credentials");
        Ok(())
    }
}

/// Process-local store, lost on exit.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<Option<CredentialPair>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            state: Mutex::new(Some(pair)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<CredentialPair> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, pair: CredentialPair) -> Result<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(pair);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Write the pair to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 on unix since the file holds tokens.
fn write_atomic(path: &Path, pair: &CredentialPair) -> Result<()> {
    let json = serde_json::to_string_pretty(pair)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        Some(_) => Path::new("."),
        None => return Err(Error::Io("credential path has no parent directory".into())),
    };

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&tmp_path, perms)
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ACCESS_TOKEN_FIELD, REFRESH_TOKEN_FIELD};
    use std::sync::Arc;

    fn pair(suffix: &str) -> CredentialPair {
        CredentialPair::new(format!("at_{suffix}"), format!("rt_{suffix}"))
    }

    #[test]
    fn missing_file_starts_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).unwrap();
        assert!(store.get().is_none());
        assert!(!path.exists(), "loading must not create the file");
    }

    #[test]
    fn roundtrip_set_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).unwrap();
        store.set(pair("1")).unwrap();

        let reloaded = FileCredentialStore::load(path).unwrap();
        assert_eq!(reloaded.get(), Some(pair("1")));
    }

    #[test]
    fn file_layout_is_two_string_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).unwrap();
        store.set(pair("1")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let fields = raw.as_object().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[ACCESS_TOKEN_FIELD], "at_1");
        assert_eq!(fields[REFRESH_TOKEN_FIELD], "rt_1");
    }

    #[test]
    fn set_overwrites_and_is_visible_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::load(dir.path().join("credentials.json")).unwrap();

        store.set(pair("old")).unwrap();
        store.set(pair("new")).unwrap();

        let current = store.get().unwrap();
        assert_eq!(current.access_token, "at_new");
        assert_eq!(current.refresh_token, "rt_new");
    }

    #[test]
    fn clear_removes_pair_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).unwrap();
        store.set(pair("1")).unwrap();
        store.clear().unwrap();

        assert!(store.get().is_none());
        assert!(!path.exists());
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn set_and_clear_finish_disk_io_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileCredentialStore::load(path.clone()).unwrap();

        store.set(pair("9")).unwrap();
        let on_disk: CredentialPair =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, pair("9"));

        store.clear().unwrap();
        assert!(!path.exists());
        assert!(FileCredentialStore::load(path).unwrap().get().is_none());
    }

    #[test]
    fn corrupt_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"accessToken":"at_only"}"#).unwrap();

        let result = FileCredentialStore::load(path);
        assert!(matches!(result, Err(Error::CredentialParse(_))));
    }

    #[cfg(unix)]
    #[test]
    fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).unwrap();
        store.set(pair("1")).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[test]
    fn debug_redacts_tokens() {
        let debug = format!("{:?}", pair("secret"));
        assert!(!debug.contains("at_secret"));
        assert!(!debug.contains("rt_secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn memory_store_set_get_clear() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().is_none());

        store.set(pair("1")).unwrap();
        assert_eq!(store.get(), Some(pair("1")));

        store.clear().unwrap();
        assert!(store.get().is_none());

        let seeded = MemoryCredentialStore::with_pair(pair("2"));
        assert_eq!(seeded.get().unwrap().access_token, "at_2");
    }

    #[test]
    fn concurrent_sets_never_tear_the_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = Arc::new(FileCredentialStore::load(path.clone()).unwrap());

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || store.set(pair(&i.to_string())).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Whatever write won, access and refresh must come from the same pair
        let current = store.get().unwrap();
        let suffix = current.access_token.strip_prefix("at_").unwrap();
        assert_eq!(current.refresh_token, format!("rt_{suffix}"));

        let on_disk: CredentialPair =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, current);
    }
}
