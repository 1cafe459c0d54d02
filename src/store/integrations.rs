//! Integration rows: one user's link to one provider.
//!
//! At most one row per (user_id, provider). Tokens are stored as encrypted
//! blobs produced by the vault. Disconnecting clears the tokens and flips
//! `is_active`; rows are never physically deleted.

use crate::error::SyncError;
use crate::providers::Provider;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

/// A persisted integration row. Token fields hold vault ciphertext.
#[derive(Clone, Debug)]
pub struct IntegrationRecord {
    pub user_id: String,
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Absent means the token does not expire.
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
}

pub struct IntegrationStore {
    conn: Mutex<Connection>,
}

impl IntegrationStore {
    /// Opens (or creates) the integrations table at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, SyncError> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS integrations (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_sync_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, provider)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_integrations_user_provider
             ON integrations(user_id, provider)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Inserts or replaces the row for (user_id, provider).
    pub fn upsert(&self, record: &IntegrationRecord) -> Result<(), SyncError> {
        let now = Utc::now().to_rfc3339();
        self.conn.lock().unwrap().execute(
            r#"
            INSERT INTO integrations (
                user_id, provider, access_token, refresh_token,
                expires_at, is_active, last_sync_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT(user_id, provider) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                is_active = excluded.is_active,
                last_sync_at = excluded.last_sync_at,
                updated_at = excluded.updated_at
            "#,
            params![
                record.user_id,
                record.provider.as_str(),
                record.access_token,
                record.refresh_token,
                record.expires_at.map(|dt| dt.to_rfc3339()),
                record.is_active,
                record.last_sync_at.map(|dt| dt.to_rfc3339()),
                now,
            ],
        )?;
        Ok(())
    }

    /// Loads the row for (user_id, provider), active or not.
    pub fn get(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<IntegrationRecord>, SyncError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"
                SELECT user_id, provider, access_token, refresh_token,
                       expires_at, is_active, last_sync_at
                FROM integrations
                WHERE user_id = ?1 AND provider = ?2
                "#,
                params![user_id, provider.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(
            |(user_id, provider_raw, access_token, refresh_token, expires_at, is_active, last_sync_at)| {
                IntegrationRecord {
                    user_id,
                    provider: Provider::parse(&provider_raw).unwrap_or(provider),
                    access_token,
                    refresh_token,
                    expires_at: parse_timestamp(expires_at.as_deref()),
                    is_active,
                    last_sync_at: parse_timestamp(last_sync_at.as_deref()),
                }
            },
        ))
    }

    /// Advances `last_sync_at`. Called on sync completion, success or partial.
    pub fn set_last_sync(
        &self,
        user_id: &str,
        provider: Provider,
        when: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        self.conn.lock().unwrap().execute(
            "UPDATE integrations SET last_sync_at = ?3, updated_at = ?4
             WHERE user_id = ?1 AND provider = ?2",
            params![
                user_id,
                provider.as_str(),
                when.to_rfc3339(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Disconnects the integration: clears tokens and deactivates. The row
    /// itself stays.
    pub fn deactivate(&self, user_id: &str, provider: Provider) -> Result<(), SyncError> {
        self.conn.lock().unwrap().execute(
            r#"
            UPDATE integrations
            SET access_token = '', refresh_token = NULL, expires_at = NULL,
                is_active = 0, updated_at = ?3
            WHERE user_id = ?1 AND provider = ?2
            "#,
            params![user_id, provider.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// User ids of every active integration for one provider.
    pub fn list_active(&self, provider: Provider) -> Result<Vec<String>, SyncError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_id FROM integrations WHERE provider = ?1 AND is_active = 1",
        )?;
        let rows = stmt.query_map(params![provider.as_str()], |row| row.get(0))?;
        let mut user_ids = Vec::new();
        for row in rows {
            user_ids.push(row?);
        }
        Ok(user_ids)
    }

    /// Every active (user_id, provider) pair, for the scheduler batch.
    pub fn list_all_active(&self) -> Result<Vec<(String, Provider)>, SyncError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT user_id, provider FROM integrations WHERE is_active = 1")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut pairs = Vec::new();
        for row in rows {
            let (user_id, provider_raw) = row?;
            match Provider::parse(&provider_raw) {
                Some(provider) => pairs.push((user_id, provider)),
                None => warn!(provider = %provider_raw, "Skipping unknown provider in store"),
            }
        }
        Ok(pairs)
    }
}

/// Timestamps are written by this store; an unparsable value is treated as
/// absent rather than failing the whole read.
fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => {
            warn!(raw = %raw, "Ignoring unparsable timestamp in integrations table");
            None
        }
    }
}
