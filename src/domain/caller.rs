use super::ids::UserId;
use crate::error::LedgerError;

/// An authenticated caller, as resolved by the external auth collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Caller {
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }

    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    /// Returns the admin's id, or `Unauthorized`.
    pub fn require_admin(&self) -> Result<UserId, LedgerError> {
        if self.is_admin {
            Ok(self.user_id)
        } else {
            Err(LedgerError::Unauthorized)
        }
    }
}
