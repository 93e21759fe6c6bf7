//! The session layer (§4.7): an opaque byte map keyed by session id, backed
//! by a pluggable [`SessionStore`], with a default file-backed
//! implementation under the process's `session_dir` (`weir_utils::directories`).

mod codec;
mod file_store;

use std::collections::HashMap;
use std::time::Duration;

use rand::RngCore;

pub use file_store::FileSessionStore;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session data was corrupt")]
    Corrupt,
}

/// Cookie parameters, process-wide (§4.7 "initialized from environment
/// defaults if present").
#[derive(Debug, Clone)]
pub struct CookieParams {
    pub name: String,
    pub lifetime: Duration,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: &'static str,
    /// If set, `Session::save` refreshes the store's timestamp for a clean
    /// (non-dirty) session instead of doing nothing.
    pub auto_update_timestamp: bool,
}

impl Default for CookieParams {
    fn default() -> Self {
        Self {
            name: std::env::var("WEIR_SESSION_NAME").unwrap_or_else(|_| "WEIR_SESSION_ID".to_string()),
            lifetime: std::env::var("WEIR_SESSION_LIFETIME")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(24 * 60 * 60)),
            path: "/".to_string(),
            domain: std::env::var("WEIR_SESSION_DOMAIN").ok(),
            secure: false,
            http_only: true,
            same_site: "Lax",
            auto_update_timestamp: false,
        }
    }
}

/// Probability (1 in N) that a `destroy` call also triggers `gc`, matching
/// the source's PHP-style `session.gc_probability / session.gc_divisor`
/// knob in spirit.
pub const DEFAULT_GC_DIVISOR: u32 = 1000;

/// A unique session identifier: 24 random bytes, hex-encoded.
pub fn generate_session_id() -> String {
    let mut raw = [0u8; 24];
    rand::rng().fill_bytes(&mut raw);
    raw.iter().map(|b| format!("{b:02x}")).collect()
}

/// Capability contract a session backend must implement (§4.7).
pub trait SessionStore: Send + Sync {
    fn open(&self) -> Result<(), SessionError> {
        Ok(())
    }

    fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }

    fn read(&self, id: &str) -> Result<Option<Vec<u8>>, SessionError>;
    fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError>;
    fn update_timestamp(&self, id: &str) -> Result<(), SessionError>;
    fn destroy(&self, id: &str) -> Result<(), SessionError>;
    fn gc(&self, max_lifetime: Duration) -> Result<usize, SessionError>;
}

/// The decoded key/value view over a session's stored bytes, plus the dirty
/// bit every mutator sets (§4.7).
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    values: HashMap<String, Vec<u8>>,
    dirty: bool,
    existed: bool,
}

impl Session {
    /// Loads (or creates) the session named by `id` from `store`.
    pub fn load(store: &dyn SessionStore, id: &str) -> Result<Self, SessionError> {
        match store.read(id)? {
            Some(bytes) => {
                let values = codec::decode_map(&bytes).ok_or(SessionError::Corrupt)?;
                Ok(Self { id: id.to_string(), values, dirty: false, existed: true })
            }
            None => Ok(Self { id: id.to_string(), values: HashMap::new(), dirty: false, existed: false }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.values.get(key).map(Vec::as_slice)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.values.insert(key.into(), value.into());
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.dirty = true;
        }
    }

    pub fn clear(&mut self) {
        if !self.values.is_empty() {
            self.values.clear();
            self.dirty = true;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Persists the session iff dirty; an empty dirty session is destroyed
    /// instead of written. A clean session optionally has its timestamp
    /// refreshed per `auto_update_timestamp`.
    pub fn save(&mut self, store: &dyn SessionStore, cookies: &CookieParams) -> Result<(), SessionError> {
        if self.dirty {
            if self.values.is_empty() {
                store.destroy(&self.id)?;
                maybe_gc(store, cookies.lifetime);
            } else {
                store.write(&self.id, &codec::encode_map(&self.values))?;
            }
            self.dirty = false;
            self.existed = !self.values.is_empty();
        } else if cookies.auto_update_timestamp && self.existed {
            store.update_timestamp(&self.id)?;
        }
        Ok(())
    }

    pub fn destroy(&mut self, store: &dyn SessionStore, cookies: &CookieParams) -> Result<(), SessionError> {
        store.destroy(&self.id)?;
        self.values.clear();
        self.dirty = false;
        self.existed = false;
        maybe_gc(store, cookies.lifetime);
        Ok(())
    }
}

fn maybe_gc(store: &dyn SessionStore, max_lifetime: Duration) {
    if rand::rng().next_u32() % DEFAULT_GC_DIVISOR == 0 {
        if let Err(e) = store.gc(max_lifetime) {
            tracing::warn!("session gc failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use file_store::FileSessionStore;

    #[test]
    fn round_trips_through_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let cookies = CookieParams::default();

        let id = generate_session_id();
        let mut session = Session::load(&store, &id).unwrap();
        assert!(session.is_empty());
        session.set("user_id", b"42".to_vec());
        session.save(&store, &cookies).unwrap();

        let reloaded = Session::load(&store, &id).unwrap();
        assert_eq!(reloaded.get("user_id"), Some(b"42".as_slice()));
    }

    #[test]
    fn emptying_a_session_destroys_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let cookies = CookieParams::default();

        let id = generate_session_id();
        let mut session = Session::load(&store, &id).unwrap();
        session.set("a", b"1".to_vec());
        session.save(&store, &cookies).unwrap();

        session.remove("a");
        session.save(&store, &cookies).unwrap();

        assert!(store.read(&id).unwrap().is_none());
    }
}
