use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::models::{Credential, User};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedSession {
    credential: Option<Credential>,
    user: Option<User>,
}

/// Process-wide holder of the token pair and the signed-in identity.
///
/// This is the only state mutated from multiple call sites (pre-flight
/// refresh, reactive refresh after a 401, logout), so every mutation is a
/// whole-value swap under one write lock. Readers can never observe a
/// half-updated pair.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<PersistedSession>>,
    file_path: Option<PathBuf>,
}

impl SessionStore {
    /// Volatile store with no backing file. Used by tests and as the
    /// fallback when no config directory exists.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(PersistedSession::default())),
            file_path: None,
        }
    }

    /// Restore the persisted session, or start empty with the file path
    /// remembered for later saves.
    pub fn load_or_create() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("tui-comments-app");

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).with_context(|| {
                format!("Failed to create config directory {}", config_dir.display())
            })?;
        }

        let file_path = config_dir.join("session.json");
        let session = match file_path.exists() {
            true => {
                let content =
                    fs::read_to_string(&file_path).context("Failed to read session file")?;
                match serde_json::from_str::<PersistedSession>(&content) {
                    Ok(session) => {
                        info!(session_file = %file_path.display(), "Restored session");
                        session
                    }
                    Err(err) => {
                        // A corrupt session file must not brick startup.
                        warn!(session_file = %file_path.display(), error = %err, "Discarding unreadable session file");
                        PersistedSession::default()
                    }
                }
            }
            false => PersistedSession::default(),
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(session)),
            file_path: Some(file_path),
        })
    }

    pub fn credential(&self) -> Option<Credential> {
        self.inner.read().ok()?.credential.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .ok()?
            .credential
            .as_ref()
            .map(|credential| credential.access.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner
            .read()
            .ok()?
            .credential
            .as_ref()
            .map(|credential| credential.refresh.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.inner.read().ok()?.user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner
            .read()
            .map(|session| session.credential.is_some())
            .unwrap_or(false)
    }

    /// Swap in a new token pair, keeping the identity. Used by refresh.
    pub fn set_credential(&self, credential: Credential) {
        if let Ok(mut session) = self.inner.write() {
            session.credential = Some(credential);
        }
        self.persist();
    }

    /// Swap in a full session after login/registration.
    pub fn sign_in(&self, credential: Credential, user: User) {
        if let Ok(mut session) = self.inner.write() {
            *session = PersistedSession {
                credential: Some(credential),
                user: Some(user),
            };
        }
        self.persist();
    }

    /// Drop everything, in memory and on disk. Called on logout and on
    /// terminal refresh failure.
    pub fn clear(&self) {
        if let Ok(mut session) = self.inner.write() {
            *session = PersistedSession::default();
        }
        if let Some(path) = &self.file_path
            && path.exists()
            && let Err(err) = fs::remove_file(path)
        {
            warn!(session_file = %path.display(), error = %err, "Failed to remove session file");
        }
    }

    fn persist(&self) {
        let Some(path) = &self.file_path else {
            return;
        };
        let snapshot = match self.inner.read() {
            Ok(session) => session.clone(),
            Err(_) => return,
        };
        match serde_json::to_string_pretty(&snapshot) {
            Ok(content) => {
                if let Err(err) = fs::write(path, content) {
                    warn!(session_file = %path.display(), error = %err, "Failed to write session file");
                }
            }
            Err(err) => warn!(error = %err, "Failed to serialize session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(tag: &str) -> Credential {
        Credential {
            access: format!("access-{tag}"),
            refresh: format!("refresh-{tag}"),
        }
    }

    #[test]
    fn swaps_are_whole_value() {
        let store = SessionStore::in_memory();
        assert!(!store.is_authenticated());

        store.sign_in(
            credential("one"),
            User {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                avatar: None,
            },
        );
        assert_eq!(store.access_token().as_deref(), Some("access-one"));
        assert_eq!(store.user().map(|user| user.username).as_deref(), Some("alice"));

        store.set_credential(credential("two"));
        assert_eq!(store.access_token().as_deref(), Some("access-two"));
        assert_eq!(store.refresh_token().as_deref(), Some("refresh-two"));
        // Identity survives a token rotation.
        assert!(store.user().is_some());
    }

    #[test]
    fn clear_empties_everything() {
        let store = SessionStore::in_memory();
        store.sign_in(credential("one"), User::default());
        store.clear();
        assert!(store.credential().is_none());
        assert!(store.user().is_none());
    }

    #[test]
    fn clones_share_state() {
        let store = SessionStore::in_memory();
        let other = store.clone();
        store.set_credential(credential("shared"));
        assert_eq!(other.access_token().as_deref(), Some("access-shared"));
    }
}
