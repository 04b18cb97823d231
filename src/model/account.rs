use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use subtle::ConstantTimeEq;

use crate::model::{generate_id, generate_token, Id, Permission, UserContext};

/// Dashboard user as held by the account directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(skip_serializing)]
    pub password_salt: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub permissions: BTreeSet<Permission>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        let password_salt = generate_token();
        let password_hash = hash_password(&password_salt, password);
        Self {
            id: generate_id(),
            username: username.into(),
            email: None,
            display_name: None,
            password_salt,
            password_hash,
            permissions: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions.extend(permissions);
        self
    }

    pub fn verify_password(&self, password: &str) -> bool {
        let candidate = hash_password(&self.password_salt, password);
        bool::from(candidate.as_bytes().ct_eq(self.password_hash.as_bytes()))
    }

    pub fn set_password(&mut self, password: &str) {
        self.password_salt = generate_token();
        self.password_hash = hash_password(&self.password_salt, password);
    }

    pub fn context(&self) -> UserContext {
        UserContext {
            user_id: self.id.clone(),
            username: self.username.clone(),
            user_email: self.email.clone(),
            user_name: self.display_name.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

/// Self-service profile changes; `new_password` requires `current_password`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_verification_uses_salt() {
        let mut account = Account::new("alice", "s3cret");
        assert!(account.verify_password("s3cret"));
        assert!(!account.verify_password("S3cret"));

        let old_salt = account.password_salt.clone();
        account.set_password("changed");
        assert_ne!(account.password_salt, old_salt);
        assert!(account.verify_password("changed"));
        assert!(!account.verify_password("s3cret"));
    }

    #[test]
    fn corrupted_stored_hash_never_verifies() {
        let mut account = Account::new("alice", "s3cret");
        account.password_hash.truncate(10);
        assert!(!account.verify_password("s3cret"));

        account.password_hash = String::new();
        assert!(!account.verify_password("s3cret"));
    }

    #[test]
    fn serialized_account_hides_credentials() {
        let account = Account::new("alice", "s3cret");
        let json = serde_json::to_value(&account).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("password_salt").is_none());
    }
}
