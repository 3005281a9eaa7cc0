//! # Errors
//!
//! Roost uses a single typed taxonomy at the scoped-data boundary. Raw
//! store errors ([`StoreError`]) never escape to feature code: the
//! resolver and the scoped data client both route every failure through
//! [`crate::classify`] first, which yields a [`CoreError`] whose
//! [`ErrorKind`] carries the authorization-denial and retryability
//! semantics callers branch on.

use serde_json::Value;
use thiserror::Error;

/// A convenience result type for Roost core APIs.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// The error taxonomy every classified failure lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No valid session credential is present.
    NoSession,
    /// The session credential was rejected (expired or malformed).
    InvalidCredential,
    /// The store's policy engine denied the operation. Not retryable
    /// without admin remediation.
    PermissionDenied,
    /// The row is missing or policy-hidden; the store does not
    /// distinguish the two and neither do we.
    NotFoundOrDenied,
    /// A scoped operation ran before any scope was configured. Caller
    /// ordering bug.
    ScopeNotConfigured,
    /// A transient store failure; safe to retry.
    TransientStoreError,
    /// Anything the classifier could not place.
    UnknownError,
}

impl ErrorKind {
    /// Stable name, e.g. for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::NoSession => "NoSession",
            ErrorKind::InvalidCredential => "InvalidCredential",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::NotFoundOrDenied => "NotFoundOrDenied",
            ErrorKind::ScopeNotConfigured => "ScopeNotConfigured",
            ErrorKind::TransientStoreError => "TransientStoreError",
            ErrorKind::UnknownError => "UnknownError",
        }
    }

    /// Whether this failure is the policy engine saying no.
    pub fn is_authorization_denial(&self) -> bool {
        matches!(
            self,
            ErrorKind::PermissionDenied | ErrorKind::InvalidCredential
        )
    }

    /// Whether retrying the same operation can succeed without any
    /// state change elsewhere.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientStoreError)
    }
}

/// A classified Roost error: kind + human message, with the raw store
/// error retained as source for diagnostics.
#[derive(Error, Debug, Clone)]
#[error("{}: {}", .kind.name(), .message)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<StoreError>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: StoreError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn is_authorization_denial(&self) -> bool {
        self.kind.is_authorization_denial()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    // ---- Constructors, one per kind ----

    pub fn no_session(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoSession, msg)
    }
    pub fn invalid_credential(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCredential, msg)
    }
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, msg)
    }
    pub fn not_found_or_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFoundOrDenied, msg)
    }
    pub fn scope_not_configured(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ScopeNotConfigured, msg)
    }
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientStoreError, msg)
    }
    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownError, msg)
    }
}

/// The raw, classifiable error shape the underlying store yields. The
/// store does not always attach a structured code, which is why the
/// classifier also sniffs messages.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("store error [{}]: {}", .code.as_deref().unwrap_or("no code"), .message)]
pub struct StoreError {
    /// Structured error code when the store provided one.
    pub code: Option<String>,
    pub message: String,
    /// Extra payload the store attached, passed through untouched.
    pub details: Option<Value>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Case-sensitive code comparison; codes are opaque identifiers.
    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}
