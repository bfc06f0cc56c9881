use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::helpers::{parse_datetime, parse_optional_datetime, to_u32};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AccountRecord {
    pub uid: String,
    pub email: String,
    pub password_hash: String,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

fn row_to_account(row: &Row) -> Result<AccountRecord> {
    let created_at: String = row.get("created_at")?;
    let last_login_at: Option<String> = row.get("last_login_at")?;
    let locked_until: Option<String> = row.get("locked_until")?;
    let failed_attempts: i64 = row.get("failed_attempts")?;

    Ok(AccountRecord {
        uid: row.get("uid")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        failed_attempts: to_u32(failed_attempts, "failed_attempts")?,
        locked_until: parse_optional_datetime(locked_until, "locked_until")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        last_login_at: parse_optional_datetime(last_login_at, "last_login_at")?,
    })
}

/// Emails are stored lowercased; lookups are case-insensitive.
pub(crate) fn find_account_by_email(
    conn: &Connection,
    email: &str,
) -> Result<Option<AccountRecord>> {
    let mut stmt = conn.prepare(
        "SELECT uid, email, password_hash, failed_attempts, locked_until, created_at,
                last_login_at
         FROM accounts
         WHERE email = ?1",
    )?;

    let mut rows = stmt.query(params![email.to_lowercase()])?;
    match rows.next()? {
        Some(row) => row_to_account(row).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn insert_account(
    conn: &Connection,
    uid: &str,
    email: &str,
    password_hash: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO accounts (uid, email, password_hash, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![uid, email.to_lowercase(), password_hash, Utc::now().to_rfc3339()],
    )
    .context("failed to insert account")?;
    Ok(())
}

/// Bumps the failure counter and returns its new value.
pub(crate) fn record_failed_login(conn: &Connection, uid: &str) -> Result<u32> {
    let attempts: Option<i64> = conn
        .query_row(
            "UPDATE accounts
             SET failed_attempts = failed_attempts + 1
             WHERE uid = ?1
             RETURNING failed_attempts",
            params![uid],
            |row| row.get(0),
        )
        .optional()
        .context("failed to record failed login")?;

    to_u32(attempts.unwrap_or_default(), "failed_attempts")
}

/// Refuses logins until `until` and starts a fresh failure count.
pub(crate) fn lock_account(conn: &Connection, uid: &str, until: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE accounts
         SET failed_attempts = 0,
             locked_until = ?2
         WHERE uid = ?1",
        params![uid, until.to_rfc3339()],
    )
    .context("failed to lock account")?;
    Ok(())
}

pub(crate) fn record_successful_login(conn: &Connection, uid: &str) -> Result<()> {
    conn.execute(
        "UPDATE accounts
         SET failed_attempts = 0,
             locked_until = NULL,
             last_login_at = ?2
         WHERE uid = ?1",
        params![uid, Utc::now().to_rfc3339()],
    )
    .context("failed to record login")?;
    Ok(())
}
