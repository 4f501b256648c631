use serde::{Deserialize, Serialize};

use tokenledger_core::{AccountId, GroupName, SubjectName};

/// One row of the issuer authorization table.
///
/// An issuer registered for `(group, subject)` may act on and query the
/// holders of `group`. The triple is unique.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupGrant {
    pub issuer: AccountId,
    pub group: GroupName,
    pub subject: SubjectName,
}

impl GroupGrant {
    pub fn new(issuer: AccountId, group: GroupName, subject: SubjectName) -> Self {
        Self {
            issuer,
            group,
            subject,
        }
    }

    /// Whether any grant in `grants` gives `issuer` reach over `group`.
    pub fn covers(grants: &[GroupGrant], issuer: &AccountId, group: &GroupName) -> bool {
        grants
            .iter()
            .any(|g| &g.issuer == issuer && &g.group == group)
    }
}
