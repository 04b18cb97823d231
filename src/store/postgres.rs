use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::model::{
    generate_token, Account, EntityKey, EntityKind, Id, OverrideRecord, Permission,
    UpstreamSnapshot, UserContext,
};
use crate::store::traits::{AccountStore, OverrideStore, SnapshotStore, Store};

const SESSION_TTL_HOURS: i64 = 12;
const RESET_TTL_HOURS: i64 = 1;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Run embedded migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }
}

fn parse_kind(row: &PgRow) -> Result<EntityKind> {
    let raw: String = row.get("entity_type");
    raw.parse::<EntityKind>().map_err(|e| anyhow!(e))
}

fn snapshot_from_row(row: &PgRow) -> Result<UpstreamSnapshot> {
    let fields: Json<Map<String, Value>> = row.get("fields");
    Ok(UpstreamSnapshot {
        key: EntityKey::new(parse_kind(row)?, row.get::<String, _>("entity_id")),
        fields: fields.0,
        synced_at: row.get("synced_at"),
    })
}

fn override_from_row(row: &PgRow) -> Result<OverrideRecord> {
    let fields: Json<Map<String, Value>> = row.get("fields");
    Ok(OverrideRecord {
        key: EntityKey::new(parse_kind(row)?, row.get::<String, _>("entity_id")),
        fields: fields.0,
        updated_by: row.get("updated_by"),
        updated_at: row.get("updated_at"),
    })
}

fn account_from_row(row: &PgRow) -> Account {
    let permissions: Vec<String> = row.get("permissions");
    Account {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        password_salt: row.get("password_salt"),
        password_hash: row.get("password_hash"),
        permissions: permissions
            .iter()
            .filter_map(|p| match p.parse::<Permission>() {
                Ok(permission) => Some(permission),
                Err(e) => {
                    log::warn!("Ignoring stored permission: {}", e);
                    None
                }
            })
            .collect(),
        created_at: row.get("created_at"),
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, username, email, display_name, password_salt, password_hash, permissions, created_at";

#[async_trait::async_trait]
impl SnapshotStore for PostgresStore {
    async fn get_snapshot(&self, key: &EntityKey) -> Result<Option<UpstreamSnapshot>> {
        let row = sqlx::query(
            "SELECT entity_type, entity_id, fields, synced_at FROM upstream_snapshots WHERE entity_type = $1 AND entity_id = $2",
        )
        .bind(key.kind.as_str())
        .bind(&key.id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch snapshot")?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn list_snapshots(&self, kind: EntityKind) -> Result<Vec<UpstreamSnapshot>> {
        let rows = sqlx::query(
            "SELECT entity_type, entity_id, fields, synced_at FROM upstream_snapshots WHERE entity_type = $1 ORDER BY entity_id",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list snapshots")?;

        rows.iter().map(snapshot_from_row).collect()
    }

    async fn replace_snapshot(&self, snapshot: UpstreamSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO upstream_snapshots (entity_type, entity_id, fields, synced_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                fields = EXCLUDED.fields,
                synced_at = EXCLUDED.synced_at
            "#,
        )
        .bind(snapshot.key.kind.as_str())
        .bind(&snapshot.key.id)
        .bind(Json(&snapshot.fields))
        .bind(snapshot.synced_at)
        .execute(&self.pool)
        .await
        .context("Failed to replace snapshot")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl OverrideStore for PostgresStore {
    async fn get_override(&self, key: &EntityKey) -> Result<Option<OverrideRecord>> {
        let row = sqlx::query(
            "SELECT entity_type, entity_id, fields, updated_by, updated_at FROM entity_overrides WHERE entity_type = $1 AND entity_id = $2",
        )
        .bind(key.kind.as_str())
        .bind(&key.id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch override")?;

        row.as_ref().map(override_from_row).transpose()
    }

    async fn list_overrides(&self, kind: EntityKind) -> Result<Vec<OverrideRecord>> {
        let rows = sqlx::query(
            "SELECT entity_type, entity_id, fields, updated_by, updated_at FROM entity_overrides WHERE entity_type = $1 ORDER BY entity_id",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list overrides")?;

        rows.iter().map(override_from_row).collect()
    }

    async fn upsert_override(&self, record: OverrideRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entity_overrides (entity_type, entity_id, fields, updated_by, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                fields = EXCLUDED.fields,
                updated_by = EXCLUDED.updated_by,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.key.kind.as_str())
        .bind(&record.key.id)
        .bind(Json(&record.fields))
        .bind(&record.updated_by)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert override")?;

        Ok(())
    }

    async fn patch_override(&self, key: &EntityKey, patch: Map<String, Value>, updated_by: &str) -> Result<OverrideRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO entity_overrides (entity_type, entity_id, fields, updated_by, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                fields = entity_overrides.fields || EXCLUDED.fields,
                updated_by = EXCLUDED.updated_by,
                updated_at = EXCLUDED.updated_at
            RETURNING entity_type, entity_id, fields, updated_by, updated_at
            "#,
        )
        .bind(key.kind.as_str())
        .bind(&key.id)
        .bind(Json(&patch))
        .bind(updated_by)
        .fetch_one(&self.pool)
        .await
        .context("Failed to patch override")?;

        override_from_row(&row)
    }

    async fn delete_override(&self, key: &EntityKey) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entity_overrides WHERE entity_type = $1 AND entity_id = $2")
            .bind(key.kind.as_str())
            .bind(&key.id)
            .execute(&self.pool)
            .await
            .context("Failed to delete override")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl AccountStore for PostgresStore {
    async fn get_account(&self, id: &Id) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch account")?;

        Ok(row.as_ref().map(account_from_row))
    }

    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE LOWER(username) = LOWER($1)",
            ACCOUNT_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account by username")?;

        Ok(row.as_ref().map(account_from_row))
    }

    async fn upsert_account(&self, account: Account) -> Result<()> {
        let permissions: Vec<String> = account
            .permissions
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO accounts (id, username, email, display_name, password_salt, password_hash, permissions, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                email = EXCLUDED.email,
                display_name = EXCLUDED.display_name,
                password_salt = EXCLUDED.password_salt,
                password_hash = EXCLUDED.password_hash,
                permissions = EXCLUDED.permissions
            "#,
        )
        .bind(&account.id)
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.display_name)
        .bind(&account.password_salt)
        .bind(&account.password_hash)
        .bind(&permissions)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert account")?;

        Ok(())
    }

    async fn create_session(&self, user_id: &Id) -> Result<String> {
        let token = generate_token();
        let expires_at: DateTime<Utc> = Utc::now() + Duration::hours(SESSION_TTL_HOURS);

        sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .context("Failed to prune expired sessions")?;

        sqlx::query("INSERT INTO sessions (token, account_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .context("Failed to create session")?;

        Ok(token)
    }

    async fn resolve_session(&self, token: &str) -> Result<Option<UserContext>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM accounts
            WHERE id = (SELECT account_id FROM sessions WHERE token = $1 AND expires_at > NOW())
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to resolve session")?;

        Ok(row.as_ref().map(|row| account_from_row(row).context()))
    }

    async fn delete_session(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .context("Failed to delete session")?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_password_reset(&self, user_id: &Id) -> Result<String> {
        let token = generate_token();
        let expires_at: DateTime<Utc> = Utc::now() + Duration::hours(RESET_TTL_HOURS);

        // A new request supersedes the account's earlier tokens
        sqlx::query("DELETE FROM password_resets WHERE account_id = $1 OR expires_at <= NOW()")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to prune password resets")?;

        sqlx::query("INSERT INTO password_resets (token, account_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .context("Failed to create password reset")?;

        Ok(token)
    }

    async fn consume_password_reset(&self, token: &str) -> Result<Option<Id>> {
        let row = sqlx::query(
            "DELETE FROM password_resets WHERE token = $1 RETURNING account_id, expires_at",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to consume password reset")?;

        Ok(row.and_then(|row| {
            let expires_at: DateTime<Utc> = row.get("expires_at");
            (expires_at > Utc::now()).then(|| row.get("account_id"))
        }))
    }
}

impl Store for PostgresStore {}
