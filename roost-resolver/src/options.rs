// Resolver options and configuration.

use roost_core::Role;
use serde::{Deserialize, Serialize};

/// What a `resolve()` call does when another resolution is already in
/// flight for this resolver.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ResolveConcurrency {
    /// Wait for the in-flight attempt to release, then run. The default:
    /// a queued attempt re-reads memberships and sees whatever the
    /// earlier one committed.
    #[default]
    Queue,
    /// Refuse with [`crate::ResolveError::AlreadyInFlight`].
    Ignore,
}

/// Main resolver configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResolverOptions {
    /// Overlapping-resolution policy.
    pub concurrency: ResolveConcurrency,
    /// Role granted to the onboarding user in the tenant they create.
    pub onboarding_role: Role,
    /// Guidance surfaced alongside a PermissionDenied resolution
    /// failure. Shown to the user; retrying without remediation will
    /// fail the same way.
    pub denial_remediation: String,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            concurrency: ResolveConcurrency::default(),
            onboarding_role: Role::Owner,
            denial_remediation:
                "Your account is not permitted to read workspace memberships. \
                 Ask a workspace administrator to restore your access, then retry."
                    .to_string(),
        }
    }
}

impl ResolverOptions {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.onboarding_role.can_manage_members() {
            return Err(format!(
                "onboarding role must be able to administer the new tenant, got '{}'",
                self.onboarding_role
            ));
        }
        if self.denial_remediation.trim().is_empty() {
            return Err("denial remediation text must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ResolverOptions::default().validate().is_ok());
    }

    #[test]
    fn viewer_cannot_be_the_onboarding_role() {
        let options = ResolverOptions {
            onboarding_role: Role::Viewer,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
