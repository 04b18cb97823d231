use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::model::{
    generate_token, Account, EntityKey, EntityKind, Id, OverrideRecord, UpstreamSnapshot,
    UserContext,
};
use crate::store::traits::{AccountStore, OverrideStore, SnapshotStore, Store};

/// Session lifetime (12 hours)
const SESSION_TTL_SECS: i64 = 12 * 3600;
/// Password reset token lifetime (1 hour)
const RESET_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone)]
struct TokenEntry {
    user_id: Id,
    expires_at: DateTime<Utc>,
}

impl TokenEntry {
    fn new(user_id: &Id, ttl_secs: i64) -> Self {
        Self {
            user_id: user_id.clone(),
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// Process-local store used by tests and `backend = "memory"` runs.
///
/// Each write holds the lock for exactly one entity, so readers never see a
/// half-replaced snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: RwLock<HashMap<EntityKey, UpstreamSnapshot>>,
    overrides: RwLock<HashMap<EntityKey, OverrideRecord>>,
    accounts: RwLock<HashMap<Id, Account>>,
    sessions: RwLock<HashMap<String, TokenEntry>>,
    password_resets: RwLock<HashMap<String, TokenEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_id<T>(mut items: Vec<T>, key: impl Fn(&T) -> &EntityKey) -> Vec<T> {
    items.sort_by(|a, b| key(a).id.cmp(&key(b).id));
    items
}

#[async_trait::async_trait]
impl SnapshotStore for MemoryStore {
    async fn get_snapshot(&self, key: &EntityKey) -> Result<Option<UpstreamSnapshot>> {
        Ok(self.snapshots.read().get(key).cloned())
    }

    async fn list_snapshots(&self, kind: EntityKind) -> Result<Vec<UpstreamSnapshot>> {
        let items = self
            .snapshots
            .read()
            .values()
            .filter(|s| s.key.kind == kind)
            .cloned()
            .collect();
        Ok(sorted_by_id(items, |s| &s.key))
    }

    async fn replace_snapshot(&self, snapshot: UpstreamSnapshot) -> Result<()> {
        self.snapshots.write().insert(snapshot.key.clone(), snapshot);
        Ok(())
    }
}

#[async_trait::async_trait]
impl OverrideStore for MemoryStore {
    async fn get_override(&self, key: &EntityKey) -> Result<Option<OverrideRecord>> {
        Ok(self.overrides.read().get(key).cloned())
    }

    async fn list_overrides(&self, kind: EntityKind) -> Result<Vec<OverrideRecord>> {
        let items = self
            .overrides
            .read()
            .values()
            .filter(|o| o.key.kind == kind)
            .cloned()
            .collect();
        Ok(sorted_by_id(items, |o| &o.key))
    }

    async fn upsert_override(&self, record: OverrideRecord) -> Result<()> {
        self.overrides.write().insert(record.key.clone(), record);
        Ok(())
    }

    async fn patch_override(&self, key: &EntityKey, patch: Map<String, Value>, updated_by: &str) -> Result<OverrideRecord> {
        let mut overrides = self.overrides.write();
        let record = match overrides.get_mut(key) {
            Some(existing) => {
                existing.apply_patch(patch, updated_by);
                existing.clone()
            }
            None => {
                let record = OverrideRecord::new(key.clone(), patch, updated_by);
                overrides.insert(key.clone(), record.clone());
                record
            }
        };
        Ok(record)
    }

    async fn delete_override(&self, key: &EntityKey) -> Result<bool> {
        Ok(self.overrides.write().remove(key).is_some())
    }
}

#[async_trait::async_trait]
impl AccountStore for MemoryStore {
    async fn get_account(&self, id: &Id) -> Result<Option<Account>> {
        Ok(self.accounts.read().get(id).cloned())
    }

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .read()
            .values()
            .find(|a| a.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn upsert_account(&self, account: Account) -> Result<()> {
        self.accounts.write().insert(account.id.clone(), account);
        Ok(())
    }

    async fn create_session(&self, user_id: &Id) -> Result<String> {
        let token = generate_token();
        let mut sessions = self.sessions.write();
        sessions.retain(|_, entry| entry.is_live());
        sessions.insert(token.clone(), TokenEntry::new(user_id, SESSION_TTL_SECS));
        Ok(token)
    }

    async fn resolve_session(&self, token: &str) -> Result<Option<UserContext>> {
        let user_id = {
            let mut sessions = self.sessions.write();
            match sessions.get(token) {
                Some(entry) if entry.is_live() => entry.user_id.clone(),
                Some(_) => {
                    sessions.remove(token);
                    return Ok(None);
                }
                None => return Ok(None),
            }
        };

        Ok(self.accounts.read().get(&user_id).map(Account::context))
    }

    async fn delete_session(&self, token: &str) -> Result<bool> {
        Ok(self.sessions.write().remove(token).is_some())
    }

    async fn create_password_reset(&self, user_id: &Id) -> Result<String> {
        let token = generate_token();
        let mut resets = self.password_resets.write();
        // A new request supersedes the account's earlier tokens
        resets.retain(|_, entry| entry.is_live() && &entry.user_id != user_id);
        resets.insert(token.clone(), TokenEntry::new(user_id, RESET_TTL_SECS));
        Ok(token)
    }

    async fn consume_password_reset(&self, token: &str) -> Result<Option<Id>> {
        Ok(self
            .password_resets
            .write()
            .remove(token)
            .filter(TokenEntry::is_live)
            .map(|entry| entry.user_id))
    }
}

impl Store for MemoryStore {}
