//! Durable API key store.
//!
//! Keys live in a single SQLite table. Records are never physically
//! deleted: revocation and expiry both clear `is_active`, keeping the
//! audit trail intact. The connection sits behind a mutex; every
//! operation is a point lookup or a single-row update, so the critical
//! section stays short enough for the request hot path.

use std::path::Path;
use std::sync::Mutex;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use lingualink_core::{Error, Result};
use rand::TryRngCore;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

const SECRET_PREFIX: &str = "lls_";
const SECRET_BYTES: usize = 32;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS api_keys (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    api_key      TEXT NOT NULL UNIQUE,
    name         TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    expires_at   TEXT,
    is_active    INTEGER NOT NULL DEFAULT 1,
    usage_count  INTEGER NOT NULL DEFAULT 0,
    rate_limit   INTEGER,
    description  TEXT,
    created_by   TEXT NOT NULL DEFAULT 'system',
    last_used_at TEXT,
    is_admin     INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_api_keys_key ON api_keys (api_key);
";

/// One credential record, without the secret itself.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    pub id: i64,
    /// First eight characters of the secret, for operator display.
    pub key_prefix: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub usage_count: u64,
    pub rate_limit: Option<i64>,
    pub description: Option<String>,
    pub created_by: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_admin: bool,
}

impl ApiKeyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Active and not past its expiry.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }
}

/// Parameters for [`KeyStore::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateKey {
    pub name: Option<String>,
    pub ttl_days: Option<i64>,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub admin: bool,
}

/// Aggregate counters over the whole table.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct KeyStoreStats {
    pub total: u64,
    pub active: u64,
    pub revoked: u64,
    pub expired: u64,
    pub admin: u64,
}

/// SQLite-backed credential store.
pub struct KeyStore {
    conn: Mutex<Connection>,
}

impl KeyStore {
    /// Open (or create) the store at `path`, creating parent directories
    /// and the schema as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        tracing::info!(path = %path.display(), "key store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Generate and persist a new key, returning the secret. The secret
    /// is `lls_` plus 32 bytes of OS randomness, URL-safe encoded; on the
    /// vanishingly unlikely collision the generation is retried.
    pub fn create(&self, req: CreateKey) -> Result<String> {
        let now = Utc::now();
        let expires_at = req.ttl_days.map(|days| now + Duration::days(days));
        let created_by = req.created_by.unwrap_or_else(|| "system".to_string());
        let conn = self.conn.lock().expect("key store lock poisoned");

        loop {
            let secret = generate_secret()?;
            let name = req
                .name
                .clone()
                .unwrap_or_else(|| format!("key_{}", &secret[..SECRET_PREFIX.len() + 4]));
            let inserted = conn.execute(
                "INSERT INTO api_keys
                     (api_key, name, created_at, expires_at, is_active, usage_count,
                      description, created_by, is_admin)
                 VALUES (?1, ?2, ?3, ?4, 1, 0, ?5, ?6, ?7)",
                params![secret, name, now, expires_at, req.description, created_by, req.admin],
            );
            match inserted {
                Ok(_) => {
                    tracing::info!(name = %name, admin = req.admin, "api key created");
                    return Ok(secret);
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    continue;
                }
                Err(e) => return Err(store_err(e)),
            }
        }
    }

    /// Check a secret and, when valid, bump its usage counter and
    /// last-used timestamp in the same critical section.
    ///
    /// Returns `(valid, admin)`; for an absent record the admin flag is
    /// `false`, for a present-but-invalid record it is the stored flag.
    pub fn verify(&self, secret: &str) -> Result<(bool, bool)> {
        let now = Utc::now();
        let conn = self.conn.lock().expect("key store lock poisoned");

        let row = conn
            .query_row(
                "SELECT is_active, expires_at, is_admin FROM api_keys WHERE api_key = ?1",
                params![secret],
                |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, Option<DateTime<Utc>>>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(store_err)?;

        let Some((is_active, expires_at, is_admin)) = row else {
            return Ok((false, false));
        };

        let valid = is_active && expires_at.is_none_or(|at| at > now);
        if !valid {
            return Ok((false, is_admin));
        }

        conn.execute(
            "UPDATE api_keys
                SET usage_count = usage_count + 1, last_used_at = ?1
              WHERE api_key = ?2",
            params![now, secret],
        )
        .map_err(store_err)?;

        Ok((true, is_admin))
    }

    /// Best-effort usage bump for the cache-hit path. Only touches
    /// records that are still valid; silently does nothing otherwise.
    pub fn touch(&self, secret: &str) -> Result<()> {
        let now = Utc::now();
        let conn = self.conn.lock().expect("key store lock poisoned");
        conn.execute(
            "UPDATE api_keys
                SET usage_count = usage_count + 1, last_used_at = ?1
              WHERE api_key = ?2
                AND is_active = 1
                AND (expires_at IS NULL OR expires_at > ?1)",
            params![now, secret],
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Clear the active flag. Returns `true` only when the call changed
    /// state, so a second revoke of the same key reports `false`.
    pub fn revoke(&self, secret: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("key store lock poisoned");
        let changed = conn
            .execute(
                "UPDATE api_keys SET is_active = 0 WHERE api_key = ?1 AND is_active = 1",
                params![secret],
            )
            .map_err(store_err)?;
        if changed > 0 {
            tracing::info!(prefix = %prefix_of(secret), "api key revoked");
        }
        Ok(changed > 0)
    }

    /// Set or clear the admin flag. Returns `false` for unknown keys.
    pub fn set_admin(&self, secret: &str, admin: bool) -> Result<bool> {
        let conn = self.conn.lock().expect("key store lock poisoned");
        let changed = conn
            .execute(
                "UPDATE api_keys SET is_admin = ?1 WHERE api_key = ?2",
                params![admin, secret],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }

    /// Replace the free-text description. Returns `false` for unknown keys.
    pub fn update_description(&self, secret: &str, description: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("key store lock poisoned");
        let changed = conn
            .execute(
                "UPDATE api_keys SET description = ?1 WHERE api_key = ?2",
                params![description, secret],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }

    /// All records, optionally including revoked ones.
    pub fn list(&self, include_revoked: bool) -> Result<Vec<ApiKeyRecord>> {
        let conn = self.conn.lock().expect("key store lock poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT id, api_key, name, created_at, expires_at, is_active, usage_count,
                        rate_limit, description, created_by, last_used_at, is_admin
                   FROM api_keys
                  WHERE is_active = 1 OR ?1
                  ORDER BY id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![include_revoked], row_to_record)
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(rows)
    }

    /// Look up a single record by its secret.
    pub fn get(&self, secret: &str) -> Result<Option<ApiKeyRecord>> {
        let conn = self.conn.lock().expect("key store lock poisoned");
        conn.query_row(
            "SELECT id, api_key, name, created_at, expires_at, is_active, usage_count,
                    rate_limit, description, created_by, last_used_at, is_admin
               FROM api_keys
              WHERE api_key = ?1",
            params![secret],
            row_to_record,
        )
        .optional()
        .map_err(store_err)
    }

    /// Deactivate every record whose expiry has passed. Returns the
    /// number of records flipped; safe to call periodically.
    pub fn cleanup_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let conn = self.conn.lock().expect("key store lock poisoned");
        let changed = conn
            .execute(
                "UPDATE api_keys
                    SET is_active = 0
                  WHERE is_active = 1
                    AND expires_at IS NOT NULL
                    AND expires_at <= ?1",
                params![now],
            )
            .map_err(store_err)?;
        if changed > 0 {
            tracing::info!(count = changed, "expired api keys deactivated");
        }
        Ok(changed as u64)
    }

    /// Aggregate counters over the table.
    pub fn stats(&self) -> Result<KeyStoreStats> {
        let now = Utc::now();
        let conn = self.conn.lock().expect("key store lock poisoned");
        conn.query_row(
            "SELECT COUNT(*),
                    SUM(is_active),
                    SUM(CASE WHEN is_active = 0 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN expires_at IS NOT NULL AND expires_at <= ?1 THEN 1 ELSE 0 END),
                    SUM(is_admin)
               FROM api_keys",
            params![now],
            |row| {
                Ok(KeyStoreStats {
                    total: row.get::<_, Option<u64>>(0)?.unwrap_or(0),
                    active: row.get::<_, Option<u64>>(1)?.unwrap_or(0),
                    revoked: row.get::<_, Option<u64>>(2)?.unwrap_or(0),
                    expired: row.get::<_, Option<u64>>(3)?.unwrap_or(0),
                    admin: row.get::<_, Option<u64>>(4)?.unwrap_or(0),
                })
            },
        )
        .map_err(store_err)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiKeyRecord> {
    let secret: String = row.get(1)?;
    Ok(ApiKeyRecord {
        id: row.get(0)?,
        key_prefix: prefix_of(&secret),
        name: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        is_active: row.get(5)?,
        usage_count: row.get(6)?,
        rate_limit: row.get(7)?,
        description: row.get(8)?,
        created_by: row.get(9)?,
        last_used_at: row.get(10)?,
        is_admin: row.get(11)?,
    })
}

fn generate_secret() -> Result<String> {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rngs::OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Internal(format!("os rng unavailable: {e}")))?;
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    Ok(format!("{SECRET_PREFIX}{encoded}"))
}

fn prefix_of(secret: &str) -> String {
    secret.chars().take(8).collect()
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}
