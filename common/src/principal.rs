//! The acting principal and permission codes.

use serde::{Deserialize, Serialize};

use crate::PrincipalId;

/// Permission codes understood by the authorization gate.
pub mod permissions {
    pub const CREATE_USERS: &str = "create_users";
    pub const MANAGE_USERS: &str = "manage_users";
    pub const VIEW_USERS: &str = "view_users";
    pub const VIEW_ALL_TRANSACTIONS: &str = "view_all_transactions";
    pub const VIEW_ALL_ACCOUNTS: &str = "view_all_accounts";
    pub const MANAGE_ROLES: &str = "manage_roles";
}

/// An authenticated actor making a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub username: String,
    pub active: bool,
    pub frozen: bool,
}

impl Principal {
    pub fn new(id: PrincipalId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            active: true,
            frozen: false,
        }
    }

    /// Active and not frozen.
    pub fn in_good_standing(&self) -> bool {
        self.active && !self.frozen
    }
}

/// Answers permission questions for a principal.
pub trait PermissionResolver: Send + Sync {
    fn has_permission(&self, principal: &PrincipalId, code: &str) -> bool;
}
