//! roost-session: the session-provider boundary for Roost.
//!
//! Roost never issues or refreshes credentials itself. An external
//! provider owns the session; this crate defines the shape Roost depends
//! on (an opaque bearer credential bound to an identity, plus a
//! session-changed event stream) and ships an in-process provider for
//! tests and embedding.

pub mod provider;
pub mod session;

pub use provider::MemorySessionProvider;
pub use session::{
    extract_bearer_token, Identity, Session, SessionEvent, SessionEvents, SessionProvider,
};
