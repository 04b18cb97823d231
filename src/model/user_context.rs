use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::{Id, Permission};

/// Caller identity and permission set resolved for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: Id,
    pub username: String,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub permissions: BTreeSet<Permission>,
}

impl UserContext {
    /// Create a new UserContext with no permissions
    pub fn new(user_id: Id, username: String) -> Self {
        Self {
            user_id,
            username,
            user_email: None,
            user_name: None,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_are_checked_by_membership() {
        let ctx = UserContext::new("u1".to_string(), "alice".to_string())
            .with_permissions([Permission::ReadEntities]);

        assert!(ctx.has(Permission::ReadEntities));
        assert!(!ctx.has(Permission::WriteOverrides));
    }
}
