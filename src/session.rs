//! Session stores and the per-request session handle.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use rand::RngCore;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE_NAME: &str = "wharf.session_id";

/// Reserved session key recording the cookie path used at session start.
pub const KEY_COOKIE_PATH: &str = "$sessionCookiePath";
/// Reserved session key recording whether the session cookie was `Secure`.
pub const KEY_COOKIE_SECURE: &str = "$sessionCookieSecure";

/// Backing storage for sessions.
///
/// Implementations own the id space and the key/value data; the engine
/// only moves ids through cookies.
pub trait SessionStore: Send + Sync + 'static {
    /// Creates a new session and returns its id.
    fn create(&self) -> String;
    /// Whether a session with this id exists.
    fn exists(&self, id: &str) -> bool;
    /// Reads one value.
    fn get(&self, id: &str, key: &str) -> Option<String>;
    /// Writes one value.
    fn set(&self, id: &str, key: &str, value: String);
    /// Removes one value.
    fn remove(&self, id: &str, key: &str);
    /// Destroys the session and all its values.
    fn destroy(&self, id: &str);
}

impl fmt::Debug for dyn SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionStore")
    }
}

/// An in-memory [`SessionStore`].
///
/// Sessions live for the lifetime of the process; suitable for tests and
/// single-process deployments.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session store lock").len()
    }

    /// Whether the store has no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn generate_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut id = String::with_capacity(32);
    for b in bytes {
        let _ = fmt::Write::write_fmt(&mut id, format_args!("{b:02x}"));
    }
    id
}

impl SessionStore for MemorySessionStore {
    fn create(&self) -> String {
        let id = generate_id();
        self.sessions
            .lock()
            .expect("session store lock")
            .insert(id.clone(), HashMap::new());
        id
    }

    fn exists(&self, id: &str) -> bool {
        self.sessions
            .lock()
            .expect("session store lock")
            .contains_key(id)
    }

    fn get(&self, id: &str, key: &str) -> Option<String> {
        self.sessions
            .lock()
            .expect("session store lock")
            .get(id)
            .and_then(|s| s.get(key).cloned())
    }

    fn set(&self, id: &str, key: &str, value: String) {
        if let Some(session) = self
            .sessions
            .lock()
            .expect("session store lock")
            .get_mut(id)
        {
            session.insert(key.to_string(), value);
        }
    }

    fn remove(&self, id: &str, key: &str) {
        if let Some(session) = self
            .sessions
            .lock()
            .expect("session store lock")
            .get_mut(id)
        {
            session.remove(key);
        }
    }

    fn destroy(&self, id: &str) {
        self.sessions
            .lock()
            .expect("session store lock")
            .remove(id);
    }
}

/// A handle to one session in a [`SessionStore`].
#[derive(Clone)]
pub struct Session {
    id: String,
    store: Arc<dyn SessionStore>,
}

impl Session {
    pub(crate) fn new(id: String, store: Arc<dyn SessionStore>) -> Self {
        Session { id, store }
    }

    /// The session id, as carried in the session cookie.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Reads one value.
    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(&self.id, key)
    }

    /// Writes one value.
    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.store.set(&self.id, key, value.into());
    }

    /// Removes one value.
    pub fn remove(&self, key: &str) {
        self.store.remove(&self.id, key);
    }

    pub(crate) fn destroy(&self) {
        self.store.destroy(&self.id);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}
