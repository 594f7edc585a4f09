use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::{Transport, TransportSession};

/// Table of live transport sessions keyed by a caller-chosen key.
///
/// Sessions stay registered until their owner removes them, so an upload
/// keeps running after the view that started it is gone. Operations on an
/// unknown key are no-ops.
pub struct SessionRegistry {
    transport: Arc<dyn Transport>,
    sessions: RwLock<HashMap<String, Arc<TransportSession>>>,
}

impl SessionRegistry {
    /// Creates an empty registry whose sessions upload through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the session for `key`, creating it if absent.
    pub fn add_session(&self, key: &str) -> Arc<TransportSession> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(key.to_string()).or_insert_with(|| {
            debug!(session = %key, "session registered");
            Arc::new(TransportSession::new(key, Arc::clone(&self.transport)))
        }))
    }

    pub fn get_session(&self, key: &str) -> Option<Arc<TransportSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Unregisters `key` and detaches its observer.
    pub fn remove_session(&self, key: &str) -> Option<Arc<TransportSession>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Some(session) = &removed {
            session.clear_observer();
            debug!(session = %key, "session removed");
        }
        removed
    }

    /// `true` only if the session exists and has a file bound.
    pub fn has_active_session(&self, key: &str) -> bool {
        self.get_session(key).is_some_and(|s| s.has_file())
    }

    /// Aborts the transfer for `key`. Returns `false` for unknown keys or
    /// when the transport did not acknowledge.
    pub async fn pause(&self, key: &str) -> bool {
        let Some(session) = self.get_session(key) else {
            return false;
        };
        match session.abort().await {
            Ok(ack) => ack,
            Err(e) => {
                debug!(session = %key, error = %e, "pause failed");
                false
            }
        }
    }

    /// Restarts the session for `key`, or calls `on_missing` if no session
    /// is registered under it.
    pub async fn resume_if_exists<F>(&self, key: &str, on_missing: F)
    where
        F: FnOnce(),
    {
        match self.get_session(key) {
            Some(session) => session.start().await,
            None => on_missing(),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every session and detaches their observers.
    pub fn clear(&self) {
        let drained: Vec<_> = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, session) in drained {
            session.clear_observer();
        }
    }
}
