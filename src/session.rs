use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::auth::SessionId;
use crate::user::UserId;

/// Server-side sessions: which user a session cookie belongs to, and until when.
///
/// Implementations must tolerate concurrent use from many requests.
pub trait SessionStore: Send + Sync {
    /// The session's user, unless the session is unknown or has expired.
    fn get(&self, id: &SessionId) -> Option<UserId>;

    fn set(&self, id: SessionId, user: UserId, ttl: Duration);

    /// Removing an unknown session is not an error.
    fn delete(&self, id: &SessionId);

    /// Drops expired sessions, returning how many went.
    fn purge_expired(&self) -> usize;
}

struct Entry {
    user: UserId,
    /// `None` when the ttl reaches past what `Instant` can hold.
    expires: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }
}

#[derive(Default)]
pub struct MemorySessions {
    sessions: RwLock<HashMap<SessionId, Entry>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        match self.sessions.read() {
            Ok(sessions) => sessions.len(),
            Err(_) => 0,
        }
    }
}

impl SessionStore for MemorySessions {
    fn get(&self, id: &SessionId) -> Option<UserId> {
        let sessions = self.sessions.read().map_err(|_| error!("session lock poisoned")).ok()?;
        let entry = sessions.get(id)?;

        if entry.expired(Instant::now()) {
            debug!("session {id} expired");
            return None;
        }

        Some(entry.user)
    }

    fn set(&self, id: SessionId, user: UserId, ttl: Duration) {
        let Ok(mut sessions) = self.sessions.write() else {
            error!("session lock poisoned, dropping session {id}");
            return;
        };

        sessions.insert(
            id,
            Entry {
                user,
                expires: Instant::now().checked_add(ttl),
            },
        );
    }

    fn delete(&self, id: &SessionId) {
        match self.sessions.write() {
            Ok(mut sessions) => {
                sessions.remove(id);
            }
            Err(_) => error!("session lock poisoned, couldn't remove session {id}"),
        }
    }

    fn purge_expired(&self) -> usize {
        let Ok(mut sessions) = self.sessions.write() else {
            error!("session lock poisoned, can't purge");
            return 0;
        };

        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.expired(now));

        before - sessions.len()
    }
}
