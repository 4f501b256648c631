use thiserror::Error;

use tokenledger_core::{GroupName, LedgerError};

use crate::{GroupGrant, Principal, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("operation requires role '{expected}', caller is '{actual}'")]
    WrongRole { expected: Role, actual: Role },

    #[error("issuer {issuer} is not registered for group {group}")]
    GroupNotGranted { issuer: String, group: GroupName },

    #[error("group {group} is not visible to this holder")]
    OutsideGroup { group: GroupName },
}

impl From<AuthzError> for LedgerError {
    fn from(value: AuthzError) -> Self {
        LedgerError::Unauthorized(value.to_string())
    }
}

/// Require the caller to act in `expected` role.
///
/// - No IO
/// - No panics
pub fn require_role(principal: &Principal, expected: Role) -> Result<(), AuthzError> {
    if principal.role() == expected {
        Ok(())
    } else {
        Err(AuthzError::WrongRole {
            expected,
            actual: principal.role(),
        })
    }
}

/// Authorize an issuer to act on holders of `group`.
pub fn authorize_group(
    principal: &Principal,
    grants: &[GroupGrant],
    group: &GroupName,
) -> Result<(), AuthzError> {
    require_role(principal, Role::Issuer)?;

    if GroupGrant::covers(grants, principal.identity(), group) {
        Ok(())
    } else {
        Err(AuthzError::GroupNotGranted {
            issuer: principal.identity().to_string(),
            group: group.clone(),
        })
    }
}

/// Authorize a read over `group`.
///
/// Holders see only their own group (`own_group`); issuers see the groups
/// they are registered for.
pub fn authorize_view_group(
    principal: &Principal,
    own_group: Option<&GroupName>,
    grants: &[GroupGrant],
    group: &GroupName,
) -> Result<(), AuthzError> {
    match principal.role() {
        Role::Issuer => authorize_group(principal, grants, group),
        Role::Holder if own_group == Some(group) => Ok(()),
        Role::Holder => Err(AuthzError::OutsideGroup {
            group: group.clone(),
        }),
    }
}
