//! Authenticated session
//!
//! Holds the logged-in identity for the process and persists it across restarts.
//! Durability is best-effort: when storage fails the in-memory identity stays valid
//! for the rest of the process lifetime and the failure is reported to the caller.

pub mod storage;

use core::fmt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::PersistenceError;
use crate::types::UserId;

pub use storage::{FileStore, KeyValueStore, MemoryStore};

/// Storage key for the bearer token
pub const TOKEN_KEY: &str = "token";
/// Storage key for the JSON user record
pub const USER_KEY: &str = "user";

// ----------------------------------------------------------------------------
// Identity
// ----------------------------------------------------------------------------

/// Marketplace role of the logged-in user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Customer,
    Driver,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Customer => "customer",
            UserRole::Driver => "driver",
            UserRole::Admin => "admin",
        }
    }
}

impl core::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "customer" => Ok(UserRole::Customer),
            "driver" => Ok(UserRole::Driver),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// User record as returned by the login API and persisted under `user`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "_id")]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub role: UserRole,
}

impl UserProfile {
    pub fn new(id: impl Into<UserId>, role: UserRole) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            phone: None,
            email: None,
            role,
        }
    }
}

/// The authenticated user's record and bearer token
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user: UserProfile,
    pub auth_token: String,
}

impl Identity {
    pub fn new(user: UserProfile, auth_token: impl Into<String>) -> Self {
        Self {
            user,
            auth_token: auth_token.into(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }

    pub fn role(&self) -> UserRole {
        self.user.role
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user", &self.user)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Session Store
// ----------------------------------------------------------------------------

/// Owns the process's identity and its durable copy
pub struct SessionStore<S: KeyValueStore> {
    storage: S,
    current: Option<Identity>,
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            current: None,
        }
    }

    /// Identity for the running process, if logged in
    pub fn current(&self) -> Option<&Identity> {
        self.current.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.is_some()
    }

    /// Adopt and persist an identity, replacing any previous one
    ///
    /// The identity is adopted before the write; on a storage failure it remains
    /// the current identity and the error is returned for logging.
    ///
    /// The token is removed first and written last, so an interrupted save leaves
    /// either the previous identity or no session on disk, never a mix of the two.
    pub fn save(&mut self, identity: Identity) -> Result<(), PersistenceError> {
        let user_json = serde_json::to_string(&identity.user)?;
        let token = identity.auth_token.clone();
        info!("Session started for user {}", identity.user_id());
        self.current = Some(identity);

        let result = self
            .storage
            .remove(TOKEN_KEY)
            .and_then(|_| self.storage.set(USER_KEY, &user_json))
            .and_then(|_| self.storage.set(TOKEN_KEY, &token));
        if let Err(err) = &result {
            warn!("Session persisted in memory only: {}", err);
        }
        result
    }

    /// Restore the persisted identity
    ///
    /// Missing, partial or corrupt records all read as "no session".
    pub fn load(&mut self) -> Option<Identity> {
        let token = match self.storage.get(TOKEN_KEY) {
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(err) => {
                warn!("Failed to read session token: {}", err);
                return None;
            }
        };
        let user_json = match self.storage.get(USER_KEY) {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!("Session token present without user record");
                return None;
            }
            Err(err) => {
                warn!("Failed to read session user: {}", err);
                return None;
            }
        };
        let user: UserProfile = match serde_json::from_str(&user_json) {
            Ok(user) => user,
            Err(err) => {
                warn!("Discarding corrupt session user record: {}", err);
                return None;
            }
        };

        let identity = Identity::new(user, token);
        debug!("Restored session for user {}", identity.user_id());
        self.current = Some(identity.clone());
        Some(identity)
    }

    /// Forget the session in memory and in storage
    ///
    /// Idempotent. The in-memory identity is dropped even if storage fails.
    pub fn clear(&mut self) -> Result<(), PersistenceError> {
        if let Some(identity) = self.current.take() {
            info!("Session ended for user {}", identity.user_id());
        }
        let result = self
            .storage
            .remove(TOKEN_KEY)
            .and_then(|_| self.storage.remove(USER_KEY));
        if let Err(err) = &result {
            warn!("Failed to remove persisted session: {}", err);
        }
        result
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_identity(id: &str) -> Identity {
        let mut user = UserProfile::new(id, UserRole::Customer);
        user.name = "Abebe Kebede".to_string();
        user.phone = Some("+251911000000".to_string());
        Identity::new(user, format!("token-{}", id))
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let identity = create_test_identity("u1");
        let mut store = SessionStore::new(MemoryStore::new());
        store.save(identity.clone()).unwrap();

        let mut restarted = SessionStore::new(MemoryStore::new());
        assert_eq!(restarted.load(), None);

        // Same storage, fresh in-memory state
        let storage = std::mem::take(store.storage_mut());
        let mut reopened = SessionStore::new(storage);
        assert_eq!(reopened.load(), Some(identity.clone()));
        assert_eq!(reopened.current(), Some(&identity));
    }

    #[test]
    fn test_save_failure_keeps_in_memory_identity() {
        let identity = create_test_identity("u2");
        let mut store = SessionStore::new(MemoryStore::unavailable());

        let result = store.save(identity.clone());
        assert!(result.is_err());
        assert_eq!(store.current(), Some(&identity));
        assert!(store.is_authenticated());
    }

    /// Fails writes to one key, passing everything else through
    #[derive(Default)]
    struct FailingKeyStore {
        inner: MemoryStore,
        failing_key: Option<&'static str>,
    }

    impl KeyValueStore for FailingKeyStore {
        fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
            if self.failing_key == Some(key) {
                return Err(PersistenceError::unavailable(format!("{} is read-only", key)));
            }
            self.inner.set(key, value)
        }

        fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_failed_relogin_never_mixes_identities() {
        let mut store = SessionStore::new(FailingKeyStore::default());
        store.save(create_test_identity("alice")).unwrap();

        store.storage_mut().failing_key = Some(USER_KEY);
        let bob = create_test_identity("bob");
        assert!(store.save(bob.clone()).is_err());
        assert_eq!(store.current(), Some(&bob));

        let storage = std::mem::take(store.storage_mut());
        let mut reopened = SessionStore::new(storage);
        assert_eq!(reopened.load(), None);
    }

    #[test]
    fn test_failed_token_write_leaves_no_session() {
        let mut store = SessionStore::new(FailingKeyStore::default());
        store.save(create_test_identity("alice")).unwrap();

        store.storage_mut().failing_key = Some(TOKEN_KEY);
        assert!(store.save(create_test_identity("bob")).is_err());

        let storage = std::mem::take(store.storage_mut());
        let mut reopened = SessionStore::new(storage);
        assert_eq!(reopened.load(), None);
    }

    #[test]
    fn test_load_never_fails() {
        let mut store = SessionStore::new(MemoryStore::unavailable());
        assert_eq!(store.load(), None);

        let mut storage = MemoryStore::new();
        storage.set(TOKEN_KEY, "t").unwrap();
        storage.set(USER_KEY, "{ this is not json").unwrap();
        let mut store = SessionStore::new(storage);
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_partial_record_is_no_session() {
        let mut storage = MemoryStore::new();
        storage.set(TOKEN_KEY, "t").unwrap();
        let mut store = SessionStore::new(storage);
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut store = SessionStore::new(MemoryStore::new());
        store.save(create_test_identity("u3")).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.current().is_none());
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_user_record_accepts_backend_id_alias() {
        let user: UserProfile =
            serde_json::from_str(r#"{"_id":"64f1","name":"Sara","role":"driver"}"#).unwrap();
        assert_eq!(user.id, UserId::new("64f1"));
        assert_eq!(user.role, UserRole::Driver);
    }

    #[test]
    fn test_debug_redacts_token() {
        let identity = create_test_identity("u4");
        let rendered = format!("{:?}", identity);
        assert!(!rendered.contains("token-u4"));
        assert!(rendered.contains("redacted"));
    }
}
