// Session types and the provider contract.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use roost_core::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// An authenticated identity. Created and owned by the session provider;
/// Roost only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<UserId>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            full_name: None,
        }
    }

    pub fn with_full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = Some(name.into());
        self
    }
}

/// A live session: an opaque bearer credential bound to an identity.
///
/// The token's length and format are not contractual - only its presence
/// and non-expiry are, and both must hold before any membership query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub identity: Identity,
}

impl Session {
    pub fn new(access_token: impl Into<String>, identity: Identity) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
            identity,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// A session is valid when it carries a token and is not expired.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.trim().is_empty() {
            return false;
        }
        match self.expires_at {
            Some(at) => at > now,
            None => true,
        }
    }
}

/// Pull the bearer credential out of transport headers, if any.
pub fn extract_bearer_token(headers: &HashMap<String, String>) -> Option<String> {
    let v = headers
        .get("authorization")
        .or_else(|| headers.get("Authorization"))?;
    let v = v.trim();
    let prefix = "Bearer ";
    if v.len() <= prefix.len() || !v.starts_with(prefix) {
        return None;
    }
    Some(v[prefix.len()..].trim().to_string())
}

/// Session lifecycle events a provider broadcasts.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A user signed in (or the provider restored a session).
    SignedIn { identity: Identity },
    /// The session ended.
    SignedOut,
    /// The credential was refreshed; the identity is unchanged.
    TokenRefreshed,
}

impl SessionEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            SessionEvent::SignedIn { .. } => "signed_in",
            SessionEvent::SignedOut => "signed_out",
            SessionEvent::TokenRefreshed => "token_refreshed",
        }
    }
}

/// A cancellable subscription to session events.
///
/// Dropping the handle is the teardown - no listener-removal side
/// channel to forget.
pub struct SessionEvents {
    rx: broadcast::Receiver<SessionEvent>,
}

impl SessionEvents {
    pub fn new(rx: broadcast::Receiver<SessionEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Returns `None` once the provider is gone.
    /// Lagged receivers skip to the oldest retained event.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The external collaborator Roost authenticates against.
#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync {
    /// The current session, if any. A suspension point: real providers
    /// go over the network.
    async fn current(&self) -> Option<Session>;

    /// Subscribe to session lifecycle events.
    fn subscribe(&self) -> SessionEvents;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HashMap::new();
        headers.insert(
            "authorization".to_string(),
            "Bearer abc.def.ghi".to_string(),
        );
        assert_eq!(
            extract_bearer_token(&headers),
            Some("abc.def.ghi".to_string())
        );

        headers.insert("authorization".to_string(), "Basic xyz".to_string());
        assert_eq!(extract_bearer_token(&headers), None);

        headers.remove("authorization");
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn session_validity() {
        let id = Identity::new("u1", "u1@roost.dev");
        let now = Utc::now();

        let fresh = Session::new("tok", id.clone());
        assert!(fresh.is_valid(now));

        let expired =
            Session::new("tok", id.clone()).with_expiry(now - chrono::Duration::seconds(1));
        assert!(!expired.is_valid(now));

        let blank = Session::new("   ", id);
        assert!(!blank.is_valid(now));
    }
}
