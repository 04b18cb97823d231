use crate::model::{Account, EntityKey, EntityKind, Id, OverrideRecord, UpstreamSnapshot, UserContext};
use anyhow::Result;
use serde_json::{Map, Value};

/// Upstream snapshots, written only by the sync pipeline
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get_snapshot(&self, key: &EntityKey) -> Result<Option<UpstreamSnapshot>>;
    async fn list_snapshots(&self, kind: EntityKind) -> Result<Vec<UpstreamSnapshot>>;
    /// Replace the whole snapshot for its key in one atomic write
    async fn replace_snapshot(&self, snapshot: UpstreamSnapshot) -> Result<()>;
}

/// Local overrides, written only through the API
#[async_trait::async_trait]
pub trait OverrideStore: Send + Sync {
    /// `None` means no record exists, which differs from a record whose fields are all null
    async fn get_override(&self, key: &EntityKey) -> Result<Option<OverrideRecord>>;
    async fn list_overrides(&self, kind: EntityKind) -> Result<Vec<OverrideRecord>>;
    async fn upsert_override(&self, record: OverrideRecord) -> Result<()>;
    /// Fold `patch` into the stored record in one atomic write, creating it when absent
    async fn patch_override(&self, key: &EntityKey, patch: Map<String, Value>, updated_by: &str) -> Result<OverrideRecord>;
    async fn delete_override(&self, key: &EntityKey) -> Result<bool>;
}

/// Accounts, sessions and permission sets owned by the identity collaborator
#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, id: &Id) -> Result<Option<Account>>;
    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>>;
    async fn upsert_account(&self, account: Account) -> Result<()>;
    /// Open a session and return its bearer token
    async fn create_session(&self, user_id: &Id) -> Result<String>;
    /// Resolve a bearer token into the caller's identity and permissions
    async fn resolve_session(&self, token: &str) -> Result<Option<UserContext>>;
    async fn delete_session(&self, token: &str) -> Result<bool>;
    /// Issue a single-use password reset token
    async fn create_password_reset(&self, user_id: &Id) -> Result<String>;
    /// Consume a reset token, returning its user if it was valid and unexpired
    async fn consume_password_reset(&self, token: &str) -> Result<Option<Id>>;
}

pub trait Store: SnapshotStore + OverrideStore + AccountStore + Send + Sync {}
