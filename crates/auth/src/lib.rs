//! `tokenledger-auth`: the caller-identity boundary of the ledger.
//!
//! This crate is intentionally decoupled from HTTP, sessions and storage: it
//! models an already-verified caller and the pure policy checks the ledger
//! applies to it.

pub mod authorize;
pub mod claims;
pub mod grant;
pub mod principal;
pub mod roles;

pub use authorize::{authorize_group, authorize_view_group, require_role, AuthzError};
pub use claims::{validate_claims, IdentityClaims, TokenValidationError};
pub use grant::GroupGrant;
pub use principal::Principal;
pub use roles::Role;
