//! `bookwell-auth` - capability catalog, role resolution and token validation.
//!
//! Decoupled from HTTP and storage; grants arrive through [`GrantStore`].

pub mod authorize;
pub mod capability;
pub mod claims;
pub mod menu;
pub mod operator;
pub mod principal;
pub mod roles;

pub use authorize::{
    AuthorizationExplanation, AuthzError, CapabilitySet, DenialKind, GrantStore, GrantStoreError,
    PermissionResolver, RbacRegistry, authorize, effective_permissions, explain_authorization,
};
pub use capability::{Capability, CapabilityMetadata, UnknownCapability};
pub use claims::{Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError, validate_claims};
pub use menu::{MenuGroup, MenuItem, VisibleGroup, visible_menu};
pub use operator::{
    ChangedBy, GrantCapability, GrantError, GrantsChanged, OperatorAccess, OperatorAccessCommand,
    OperatorAccessEvent, RevokeCapability, SetGrants,
};
pub use principal::Actor;
pub use roles::{Role, UnknownRole};
