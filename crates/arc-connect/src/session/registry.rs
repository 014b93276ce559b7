//! Registry of live sessions.
//!
//! Holds metadata only. The adapter for a session is owned by its bridge task;
//! the registry keeps a cancellation token per session so shutdown can reach
//! every one of them. Entries are removed when the owning [`SessionGuard`]
//! drops, on every exit path.

use super::state::SessionState;
use arc_core::{GatewayError, GatewayResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DRAIN_POLL: Duration = Duration::from_millis(25);

struct SessionEntry {
    remote: SocketAddr,
    target: Option<String>,
    state: SessionState,
    created_at: Instant,
    last_activity: Instant,
    cancel: CancellationToken,
}

/// Listing row for `GET /sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub remote_addr: String,
    /// `user@host:port` once the handshake produced one.
    pub target: Option<String>,
    pub state: SessionState,
    pub age_secs: u64,
    pub idle_secs: u64,
}

struct Inner {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    max_sessions: usize,
    shutdown: CancellationToken,
}

/// Tracks all live sessions and enforces the session cap.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                max_sessions,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register a new session in `CONNECTING`.
    ///
    /// Fails with [`GatewayError::Capacity`] when the cap is reached.
    pub fn reserve(&self, remote: SocketAddr) -> GatewayResult<SessionGuard> {
        let mut sessions = self.inner.sessions.write();
        if sessions.len() >= self.inner.max_sessions {
            return Err(GatewayError::Capacity(self.inner.max_sessions));
        }

        let mut id = generate_session_id();
        while sessions.contains_key(&id) {
            id = generate_session_id();
        }

        let cancel = self.inner.shutdown.child_token();
        let now = Instant::now();
        sessions.insert(
            id.clone(),
            SessionEntry {
                remote,
                target: None,
                state: SessionState::Connecting,
                created_at: now,
                last_activity: now,
                cancel: cancel.clone(),
            },
        );
        debug!(session_id = %id, %remote, active = sessions.len(), "session reserved");

        Ok(SessionGuard {
            id,
            registry: self.clone(),
            cancel,
        })
    }

    /// All live sessions. Never contains credentials.
    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.inner.sessions.read();
        let mut list: Vec<SessionInfo> = sessions
            .iter()
            .map(|(id, s)| SessionInfo {
                id: id.clone(),
                remote_addr: s.remote.to_string(),
                target: s.target.clone(),
                state: s.state,
                age_secs: s.created_at.elapsed().as_secs(),
                idle_secs: s.last_activity.elapsed().as_secs(),
            })
            .collect();
        list.sort_by(|a, b| b.age_secs.cmp(&a.age_secs));
        list
    }

    pub fn count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    pub fn max_sessions(&self) -> usize {
        self.inner.max_sessions
    }

    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.inner.sessions.read().get(id).map(|s| s.state)
    }

    /// Cancel every live session and refuse new ones.
    pub fn shutdown_all(&self) {
        let count = self.count();
        info!(sessions = count, "cancelling all sessions");
        self.inner.shutdown.cancel();
    }

    /// Wait until every session has been removed or `timeout` passes.
    ///
    /// Returns the number of sessions still registered.
    pub async fn drain(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let active = self.count();
            if active == 0 {
                info!("all sessions drained");
                return 0;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(sessions = active, "drain timeout reached, abandoning sessions");
                return active;
            }
            debug!(sessions = active, "waiting for sessions to close");
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn transition(&self, id: &str, next: SessionState) -> bool {
        let mut sessions = self.inner.sessions.write();
        let Some(entry) = sessions.get_mut(id) else {
            warn!(session_id = %id, to = %next, "transition on unknown session");
            return false;
        };
        if !entry.state.can_transition_to(next) {
            warn!(session_id = %id, from = %entry.state, to = %next, "illegal session transition refused");
            return false;
        }
        debug!(session_id = %id, from = %entry.state, to = %next, "session transition");
        entry.state = next;
        true
    }

    fn with_entry<R>(&self, id: &str, f: impl FnOnce(&mut SessionEntry) -> R) -> Option<R> {
        self.inner.sessions.write().get_mut(id).map(f)
    }

    fn remove(&self, id: &str) {
        let removed = self.inner.sessions.write().remove(id);
        if let Some(entry) = removed {
            entry.cancel.cancel();
            debug!(
                session_id = %id,
                state = %entry.state,
                lifetime_secs = entry.created_at.elapsed().as_secs(),
                "session removed"
            );
        }
    }
}

/// Exclusive handle on one registry entry. Dropping it removes the entry.
pub struct SessionGuard {
    id: String,
    registry: SessionRegistry,
    cancel: CancellationToken,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancelled on server shutdown.
    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Move to `next`. Illegal transitions are refused and logged.
    pub fn transition(&self, next: SessionState) -> bool {
        self.registry.transition(&self.id, next)
    }

    pub fn state(&self) -> Option<SessionState> {
        self.registry.state(&self.id)
    }

    pub fn set_target(&self, target: String) {
        self.registry.with_entry(&self.id, |e| e.target = Some(target));
    }

    /// Record that bytes moved.
    pub fn touch(&self) {
        self.registry
            .with_entry(&self.id, |e| e.last_activity = Instant::now());
    }

    /// Time since bytes last moved in either direction.
    pub fn idle_for(&self) -> Duration {
        self.registry
            .with_entry(&self.id, |e| e.last_activity.elapsed())
            .unwrap_or_default()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// 128 random bits, hex encoded.
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "192.168.1.20:51000".parse().unwrap()
    }

    #[test]
    fn ids_are_32_hex_chars() {
        let id = generate_session_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_session_id());
    }

    #[test]
    fn cap_is_enforced() {
        let registry = SessionRegistry::new(2);
        let a = registry.reserve(addr()).unwrap();
        let _b = registry.reserve(addr()).unwrap();
        assert!(matches!(
            registry.reserve(addr()),
            Err(GatewayError::Capacity(2))
        ));
        drop(a);
        assert!(registry.reserve(addr()).is_ok());
    }

    #[test]
    fn guard_drop_removes_entry() {
        let registry = SessionRegistry::new(4);
        let guard = registry.reserve(addr()).unwrap();
        let id = guard.id().to_string();
        assert_eq!(registry.state(&id), Some(SessionState::Connecting));
        drop(guard);
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.state(&id), None);
    }

    #[test]
    fn illegal_transitions_are_refused() {
        let registry = SessionRegistry::new(4);
        let guard = registry.reserve(addr()).unwrap();
        assert!(!guard.transition(SessionState::Active));
        assert!(!guard.transition(SessionState::AuthFailed));
        assert_eq!(guard.state(), Some(SessionState::Connecting));

        assert!(guard.transition(SessionState::Authenticating));
        assert!(guard.transition(SessionState::AuthFailed));
        assert!(!guard.transition(SessionState::Closing));
        assert_eq!(guard.state(), Some(SessionState::AuthFailed));
    }

    #[test]
    fn listing_shows_metadata() {
        let registry = SessionRegistry::new(4);
        let guard = registry.reserve(addr()).unwrap();
        guard.set_target("pi@arc.local:22".into());
        guard.transition(SessionState::Authenticating);
        guard.transition(SessionState::Active);
        guard.touch();

        let list = registry.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, guard.id());
        assert_eq!(list[0].remote_addr, "192.168.1.20:51000");
        assert_eq!(list[0].target.as_deref(), Some("pi@arc.local:22"));
        assert_eq!(list[0].state, SessionState::Active);
        assert!(guard.idle_for() < Duration::from_secs(1));
    }

    #[test]
    fn shutdown_cancels_sessions() {
        let registry = SessionRegistry::new(4);
        let a = registry.reserve(addr()).unwrap();
        let b = registry.reserve(addr()).unwrap();
        assert!(!a.cancelled().is_cancelled());

        registry.shutdown_all();
        assert!(registry.is_shutting_down());
        assert!(a.cancelled().is_cancelled());
        assert!(b.cancelled().is_cancelled());
    }

    #[test]
    fn dropping_one_guard_does_not_cancel_others() {
        let registry = SessionRegistry::new(4);
        let a = registry.reserve(addr()).unwrap();
        let b = registry.reserve(addr()).unwrap();
        let a_token = a.cancelled().clone();
        drop(a);
        assert!(a_token.is_cancelled());
        assert!(!b.cancelled().is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_guards() {
        let registry = SessionRegistry::new(4);
        let guard = registry.reserve(addr()).unwrap();
        registry.shutdown_all();

        let holder = tokio::spawn(async move {
            guard.cancelled().cancelled().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(guard);
        });

        let started = std::time::Instant::now();
        assert_eq!(registry.drain(Duration::from_secs(2)).await, 0);
        assert!(started.elapsed() >= Duration::from_millis(100));
        holder.await.unwrap();
    }

    #[tokio::test]
    async fn drain_gives_up_at_deadline() {
        let registry = SessionRegistry::new(4);
        let _stuck = registry.reserve(addr()).unwrap();

        let started = std::time::Instant::now();
        assert_eq!(registry.drain(Duration::from_millis(80)).await, 1);
        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
