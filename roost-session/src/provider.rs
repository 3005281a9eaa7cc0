// In-process session provider.

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::session::{Session, SessionEvent, SessionEvents, SessionProvider};

/// In-memory session provider for tests and single-process embedding.
///
/// Mutations broadcast the matching [`SessionEvent`]; subscribers that
/// arrived late only see events from their subscription onward.
pub struct MemorySessionProvider {
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl MemorySessionProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            session: RwLock::new(None),
            events,
        }
    }

    /// Establish a session and announce it.
    pub fn sign_in(&self, session: Session) {
        let identity = session.identity.clone();
        *self.session.write() = Some(session);
        let _ = self.events.send(SessionEvent::SignedIn { identity });
    }

    /// End the session and announce it. Safe to call when signed out.
    pub fn sign_out(&self) {
        let had_session = self.session.write().take().is_some();
        if had_session {
            let _ = self.events.send(SessionEvent::SignedOut);
        }
    }

    /// Swap the credential without touching the identity.
    pub fn refresh(&self, access_token: impl Into<String>) {
        let mut guard = self.session.write();
        if let Some(session) = guard.as_mut() {
            session.access_token = access_token.into();
            drop(guard);
            let _ = self.events.send(SessionEvent::TokenRefreshed);
        }
    }

    /// Force the current credential past its expiry. Test hook for the
    /// expired-credential path.
    pub fn expire(&self) {
        let mut guard = self.session.write();
        if let Some(session) = guard.as_mut() {
            session.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        }
    }
}

impl Default for MemorySessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionProvider for MemorySessionProvider {
    async fn current(&self) -> Option<Session> {
        self.session.read().clone()
    }

    fn subscribe(&self) -> SessionEvents {
        SessionEvents::new(self.events.subscribe())
    }
}
