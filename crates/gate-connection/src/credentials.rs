//! Credential persistence.
//!
//! The store holds three slots: username, password, and the remember flag
//! serialized as text. It offers no transactional guarantee and no at-rest
//! protection beyond file permissions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

/// Errors from credential persistence.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Named slots in the credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    Username,
    Password,
    Remember,
}

impl CredentialKey {
    /// Persistent key name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Username => "gate_username",
            Self::Password => "gate_password",
            Self::Remember => "gate_remember",
        }
    }
}

/// Durable key-value persistence for login credentials.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: CredentialKey) -> Result<Option<String>, CredentialError>;

    fn set(&self, key: CredentialKey, value: &str) -> Result<(), CredentialError>;

    fn remove(&self, key: CredentialKey) -> Result<(), CredentialError>;
}

/// The three credential slots read together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialsRecord {
    pub username: String,
    pub password: String,
    pub remember: bool,
}

impl CredentialsRecord {
    /// Both username and password are present.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Reads all slots. Missing slots read as empty / `false`.
    pub fn load(store: &dyn CredentialStore) -> Result<Self, CredentialError> {
        Ok(Self {
            username: store.get(CredentialKey::Username)?.unwrap_or_default(),
            password: store.get(CredentialKey::Password)?.unwrap_or_default(),
            remember: store
                .get(CredentialKey::Remember)?
                .is_some_and(|v| v == "true"),
        })
    }

    /// Writes all slots.
    pub fn save(&self, store: &dyn CredentialStore) -> Result<(), CredentialError> {
        store.set(CredentialKey::Username, &self.username)?;
        store.set(CredentialKey::Password, &self.password)?;
        store.set(
            CredentialKey::Remember,
            if self.remember { "true" } else { "false" },
        )
    }

    /// Removes username and password and records `remember = false`.
    pub fn forget(store: &dyn CredentialStore) -> Result<(), CredentialError> {
        store.remove(CredentialKey::Username)?;
        store.remove(CredentialKey::Password)?;
        store.set(CredentialKey::Remember, "false")
    }
}

/// Volatile store, for tests and hosts without durable storage.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slots: RwLock<HashMap<CredentialKey, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `record`.
    pub fn with_record(record: &CredentialsRecord) -> Self {
        let store = Self::new();
        {
            let mut slots = store.slots.write().unwrap_or_else(PoisonError::into_inner);
            slots.insert(CredentialKey::Username, record.username.clone());
            slots.insert(CredentialKey::Password, record.password.clone());
            slots.insert(
                CredentialKey::Remember,
                if record.remember { "true" } else { "false" }.to_string(),
            );
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: CredentialKey) -> Result<Option<String>, CredentialError> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(&key).cloned())
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<(), CredentialError> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: CredentialKey) -> Result<(), CredentialError> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.remove(&key);
        Ok(())
    }
}

/// Credential store backed by a JSON file.
///
/// Slots are cached in memory and the whole map is persisted on every write.
pub struct FileCredentialStore {
    path: PathBuf,
    slots: RwLock<HashMap<String, String>>,
}

impl FileCredentialStore {
    /// Opens a store, loading existing slots from disk.
    pub fn new(path: PathBuf) -> Result<Self, CredentialError> {
        let slots = load_slots(&path)?;
        Ok(Self {
            path,
            slots: RwLock::new(slots),
        })
    }

    /// Writes the current slots to disk.
    fn persist(&self) -> Result<(), CredentialError> {
        let map = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let json = serde_json::to_string_pretty(&*map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!("persisted {} credential slot(s) to {:?}", map.len(), self.path);
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: CredentialKey) -> Result<Option<String>, CredentialError> {
        let map = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(key.as_str()).cloned())
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<(), CredentialError> {
        {
            let mut map = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            map.insert(key.as_str().to_string(), value.to_string());
        }
        self.persist()
    }

    fn remove(&self, key: CredentialKey) -> Result<(), CredentialError> {
        {
            let mut map = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            map.remove(key.as_str());
        }
        self.persist()
    }
}

/// Loads slots from a JSON file on disk.
fn load_slots(path: &Path) -> Result<HashMap<String, String>, CredentialError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let slots: HashMap<String, String> = serde_json::from_str(&data)?;
    debug!("loaded {} credential slot(s) from {:?}", slots.len(), path);
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, FileCredentialStore) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("credentials.json");
        let store = FileCredentialStore::new(path).unwrap();
        (tmp, store)
    }

    fn alice(remember: bool) -> CredentialsRecord {
        CredentialsRecord {
            username: "alice".into(),
            password: "secret".into(),
            remember,
        }
    }

    #[test]
    fn empty_store_loads_default_record() {
        let (_tmp, store) = test_store();
        let record = CredentialsRecord::load(&store).unwrap();
        assert_eq!(record, CredentialsRecord::default());
        assert!(!record.is_complete());
    }

    #[test]
    fn save_and_load_record() {
        let (_tmp, store) = test_store();
        alice(true).save(&store).unwrap();
        assert_eq!(CredentialsRecord::load(&store).unwrap(), alice(true));
        assert_eq!(
            store.get(CredentialKey::Remember).unwrap().as_deref(),
            Some("true")
        );
    }

    #[test]
    fn forget_clears_login_and_remember() {
        let store = MemoryCredentialStore::with_record(&alice(true));
        CredentialsRecord::forget(&store).unwrap();
        assert!(store.get(CredentialKey::Username).unwrap().is_none());
        assert!(store.get(CredentialKey::Password).unwrap().is_none());
        assert_eq!(CredentialsRecord::load(&store).unwrap(), CredentialsRecord::default());
    }

    #[test]
    fn persist_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("credentials.json");

        {
            let store = FileCredentialStore::new(path.clone()).unwrap();
            alice(true).save(&store).unwrap();
        }

        let store2 = FileCredentialStore::new(path).unwrap();
        assert_eq!(CredentialsRecord::load(&store2).unwrap(), alice(true));
    }

    #[cfg(unix)]
    #[test]
    fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("credentials.json");
        let store = FileCredentialStore::new(path.clone()).unwrap();
        store.set(CredentialKey::Username, "alice").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn unknown_remember_text_reads_false() {
        let store = MemoryCredentialStore::new();
        store.set(CredentialKey::Remember, "yes").unwrap();
        assert!(!CredentialsRecord::load(&store).unwrap().remember);
    }

    #[test]
    fn load_missing_file_returns_empty() {
        let path = PathBuf::from("/tmp/nonexistent_gate_remote_test_credentials.json");
        assert!(load_slots(&path).unwrap().is_empty());
    }
}
