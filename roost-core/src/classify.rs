//! Store error classification.
//!
//! The underlying store does not always return a structured code for
//! policy denials, so classification falls back to case-insensitive
//! message sniffing. That fallback is a deliberate, documented compromise:
//! the matched-term lists live here as consts so swapping them for
//! structured codes later touches this module and nothing else.

use crate::errors::{CoreError, StoreError};

/// Structured code the store emits for an insufficient-privilege denial.
pub const INSUFFICIENT_PRIVILEGE_CODE: &str = "42501";

/// Structured code the store emits for an expired session credential.
pub const EXPIRED_CREDENTIAL_CODE: &str = "PGRST301";

/// Message fragments that mean the policy engine said no.
pub const DENIAL_TERMS: &[&str] = &[
    "permission denied",
    "row-level security",
    "row level security",
    "policy",
    "not authorized",
    "unauthorized",
    "forbidden",
    "insufficient privilege",
];

/// Message fragments that mean the credential itself was rejected.
pub const CREDENTIAL_TERMS: &[&str] = &["jwt expired", "token expired", "invalid token"];

/// Structured codes for failures that clear up on their own.
pub const TRANSIENT_CODES: &[&str] = &["08000", "08003", "08006", "40001", "57014"];

/// Message fragments for failures that clear up on their own.
pub const TRANSIENT_TERMS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "temporarily unavailable",
    "too many requests",
];

fn matches_any(haystack: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| haystack.contains(t))
}

/// Turn a raw store error into the typed taxonomy.
///
/// Precedence: explicit codes win over message sniffing, and denial
/// terms win over transient terms - a policy denial phrased oddly must
/// never be retried as if it were a network blip.
pub fn classify(raw: &StoreError) -> CoreError {
    let lowered = raw.message.to_lowercase();

    if raw.has_code(INSUFFICIENT_PRIVILEGE_CODE) {
        return CoreError::permission_denied(raw.message.clone()).with_source(raw.clone());
    }
    if raw.has_code(EXPIRED_CREDENTIAL_CODE) || matches_any(&lowered, CREDENTIAL_TERMS) {
        return CoreError::invalid_credential(raw.message.clone()).with_source(raw.clone());
    }
    if matches_any(&lowered, DENIAL_TERMS) {
        return CoreError::permission_denied(raw.message.clone()).with_source(raw.clone());
    }
    if raw
        .code
        .as_deref()
        .map(|c| TRANSIENT_CODES.contains(&c))
        .unwrap_or(false)
        || matches_any(&lowered, TRANSIENT_TERMS)
    {
        return CoreError::transient(raw.message.clone()).with_source(raw.clone());
    }

    CoreError::unknown(raw.message.clone()).with_source(raw.clone())
}
