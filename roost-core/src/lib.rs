//! roost-core: tenant model and error taxonomy for Roost.

pub mod classify;
pub mod errors;
pub mod tenant;

pub use classify::classify;
pub use errors::{CoreError, CoreResult, ErrorKind, StoreError};
pub use tenant::{
    Membership, MembershipView, Role, Tenant, TenantContext, TenantId, TenantPlan, TenantStatus,
    UserId,
};
