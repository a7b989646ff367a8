//! Salesperson identity and login.
//!
//! DESIGN
//! ======
//! Identity lives in an injected `KeyValueStore` rather than anywhere global,
//! so the same code backs a browser-style local store, a JSON file on a
//! kiosk's disk, or an in-memory map in tests. Values never expire.
//!
//! A fresh cast client id is minted on every login, so two people sharing a
//! kiosk one after the other are distinct lock holders.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::net::ClientIdentity;
use crate::store::Page;

pub const KEY_CLIENT_ID: &str = "cast_client_id";
pub const KEY_NAME: &str = "salesperson_name";
pub const KEY_ROLE: &str = "user_role";
pub const KEY_PAGE: &str = "current_page";

/// Name shown before anyone logs in.
pub const DEFAULT_NAME: &str = "Salesperson";

// =============================================================================
// STORAGE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// String key/value persistence.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    ///
    /// Backend write failures.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Backend write failures.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

type Entries = BTreeMap<String, String>;

fn lock(entries: &Mutex<Entries>) -> MutexGuard<'_, Entries> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        lock(&self.entries).insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// A single JSON object on disk, rewritten whole on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl FileStore {
    /// Open `path`, starting empty if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Read failures other than not-found, and malformed JSON.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Entries::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Entries::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &Entries) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_owned(), value.to_owned());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

// =============================================================================
// SESSION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sales,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Admin => "admin",
        }
    }

    /// Page shown right after login.
    #[must_use]
    pub fn landing_page(self) -> Page {
        match self {
            Self::Sales => Page::Home,
            Self::Admin => Page::Admin,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "sales" => Some(Self::Sales),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

struct Account {
    username: &'static str,
    password: &'static str,
    display_name: &'static str,
    role: Role,
}

const ACCOUNTS: &[Account] = &[
    Account { username: "sales1", password: "sales123", display_name: "Sales Person 1", role: Role::Sales },
    Account { username: "sales2", password: "sales123", display_name: "Sales Person 2", role: Role::Sales },
    Account { username: "sales3", password: "sales123", display_name: "Sales Person 3", role: Role::Sales },
    Account { username: "sales4", password: "sales123", display_name: "Sales Person 4", role: Role::Sales },
    Account { username: "sales5", password: "sales123", display_name: "Sales Person 5", role: Role::Sales },
    Account { username: "admin", password: "admin123", display_name: "Administrator", role: Role::Admin },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub client_id: String,
    pub display_name: String,
    pub role: Role,
}

impl Session {
    /// Session from a previous login, if one is stored.
    pub fn restore(store: &dyn KeyValueStore) -> Option<Self> {
        let role = Role::parse(&store.get(KEY_ROLE)?)?;
        Some(Self { client_id: store.get(KEY_CLIENT_ID)?, display_name: store.get(KEY_NAME)?, role })
    }

    /// Check credentials and persist a new session.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for unknown users or wrong passwords; storage
    /// failures while persisting.
    pub fn login(store: &dyn KeyValueStore, username: &str, password: &str) -> Result<Self, AuthError> {
        let username = username.trim();
        let Some(account) = ACCOUNTS.iter().find(|a| a.username == username && a.password == password) else {
            warn!(%username, "session: login rejected");
            return Err(AuthError::InvalidCredentials);
        };

        let session = Self {
            client_id: Uuid::new_v4().to_string(),
            display_name: account.display_name.to_owned(),
            role: account.role,
        };
        store.set(KEY_CLIENT_ID, &session.client_id)?;
        store.set(KEY_NAME, &session.display_name)?;
        store.set(KEY_ROLE, session.role.as_str())?;
        save_page(store, session.role.landing_page())?;
        info!(%username, client_id = %session.client_id, role = session.role.as_str(), "session: logged in");
        Ok(session)
    }

    /// Forget the stored session.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub fn logout(store: &dyn KeyValueStore) -> Result<(), StorageError> {
        for key in [KEY_CLIENT_ID, KEY_NAME, KEY_ROLE, KEY_PAGE] {
            store.remove(key)?;
        }
        info!("session: logged out");
        Ok(())
    }

    #[must_use]
    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity::new(self.client_id.clone(), self.display_name.clone())
    }
}

/// Identity for a kiosk nobody has logged into: the stored client id (minted
/// and saved on first use) and name, or the default name.
///
/// # Errors
///
/// Storage failures while saving a new id.
pub fn ensure_identity(store: &dyn KeyValueStore) -> Result<ClientIdentity, StorageError> {
    let client_id = match store.get(KEY_CLIENT_ID) {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            store.set(KEY_CLIENT_ID, &id)?;
            id
        }
    };
    let name = store.get(KEY_NAME).unwrap_or_else(|| DEFAULT_NAME.to_owned());
    Ok(ClientIdentity::new(client_id, name))
}

/// # Errors
///
/// Storage failures.
pub fn save_page(store: &dyn KeyValueStore, page: Page) -> Result<(), StorageError> {
    store.set(KEY_PAGE, &serde_json::to_string(&page)?)
}

#[must_use]
pub fn saved_page(store: &dyn KeyValueStore) -> Option<Page> {
    serde_json::from_str(&store.get(KEY_PAGE)?).ok()
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
