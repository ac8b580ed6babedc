//! Outbound email send log with hourly rate limiting.
//!
//! The actual SMTP/Gmail delivery lives behind the messaging boundary; this
//! module owns the queue rows and the safety gate. Rate-limit rejection
//! happens before any row is written, so a rejected enqueue has no partial
//! side effect.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Result, StorageError};
use crate::settings;

/// Default per-hour outbound cap when `email_hourly_limit` is unset.
const DEFAULT_HOURLY_LIMIT: i64 = 10;

#[derive(Debug, Clone)]
pub struct QueuedEmail {
    pub id: String,
    pub account: String,
    pub recipients: String,
    pub subject: String,
    pub content_hash: String,
    pub hour_bucket: String,
    pub requires_confirmation: bool,
}

fn hour_bucket(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H").to_string()
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Queue an email for sending. Rejects with [`StorageError::RateLimited`]
/// when the current hour bucket is full; the send log and bucket counter are
/// written atomically otherwise.
pub fn enqueue_email(
    db: &Database,
    account: &str,
    recipients: &str,
    subject: &str,
    content: &str,
    send_at: Option<&str>,
    requires_confirmation: bool,
) -> Result<QueuedEmail> {
    let now = Utc::now();
    let bucket = hour_bucket(now);
    let limit = settings::get_setting(db, "email_hourly_limit")
        .ok()
        .flatten()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(DEFAULT_HOURLY_LIMIT);

    let sent: i64 = db
        .fetch_one(
            "SELECT emails_sent FROM email_rate_buckets WHERE hour_bucket = ?1",
            [&bucket],
            |row| row.get(0),
        )?
        .unwrap_or(0);
    if sent >= limit {
        return Err(StorageError::RateLimited {
            hour_bucket: bucket,
            sent,
            max: limit,
        });
    }

    let id = Uuid::new_v4().to_string();
    let hash = content_hash(content);
    db.transaction(|tx| {
        tx.execute(
            "INSERT INTO email_send_log
             (id, account, recipients, subject, content, content_hash, status,
              queued_at, send_at, hour_bucket, requires_confirmation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', ?7, ?8, ?9, ?10)",
            rusqlite::params![
                id,
                account,
                recipients,
                subject,
                content,
                hash,
                now.to_rfc3339(),
                send_at,
                bucket,
                requires_confirmation as i64,
            ],
        )?;
        tx.execute(
            "INSERT INTO email_rate_buckets (hour_bucket, emails_sent) VALUES (?1, 1)
             ON CONFLICT(hour_bucket) DO UPDATE SET emails_sent = emails_sent + 1",
            [&bucket],
        )?;
        Ok(())
    })?;

    Ok(QueuedEmail {
        id,
        account: account.to_string(),
        recipients: recipients.to_string(),
        subject: subject.to_string(),
        content_hash: hash,
        hour_bucket: bucket,
        requires_confirmation,
    })
}

pub fn mark_email_sent(db: &Database, id: &str) -> Result<bool> {
    let n = db.execute(
        "UPDATE email_send_log SET status = 'sent', sent_at = ?1 WHERE id = ?2",
        rusqlite::params![Utc::now().to_rfc3339(), id],
    )?;
    Ok(n > 0)
}

pub fn cancel_email(db: &Database, id: &str) -> Result<bool> {
    let n = db.execute(
        "UPDATE email_send_log SET status = 'cancelled' WHERE id = ?1 AND status = 'queued'",
        [id],
    )?;
    Ok(n > 0)
}

pub fn confirm_email(db: &Database, id: &str) -> Result<bool> {
    let n = db.execute(
        "UPDATE email_send_log SET confirmed_at = ?1 WHERE id = ?2 AND requires_confirmation = 1",
        rusqlite::params![Utc::now().to_rfc3339(), id],
    )?;
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_records_hash_and_bucket() {
        let db = Database::open_in_memory().unwrap();
        let email = enqueue_email(&db, "work", "a@b.c", "hi", "body", None, false).unwrap();
        assert_eq!(email.content_hash, content_hash("body"));
        assert_eq!(email.hour_bucket.len(), "2026-01-01T00".len());

        let sent: Option<i64> = db
            .fetch_one(
                "SELECT emails_sent FROM email_rate_buckets WHERE hour_bucket = ?1",
                [&email.hour_bucket],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(sent, Some(1));
    }

    #[test]
    fn rate_limit_rejects_without_side_effects() {
        let db = Database::open_in_memory().unwrap();
        settings::set_setting(&db, "email_hourly_limit", "2").unwrap();

        enqueue_email(&db, "work", "a@b.c", "1", "x", None, false).unwrap();
        enqueue_email(&db, "work", "a@b.c", "2", "y", None, false).unwrap();
        let err = enqueue_email(&db, "work", "a@b.c", "3", "z", None, false).unwrap_err();
        assert!(matches!(err, StorageError::RateLimited { sent: 2, max: 2, .. }));

        // The rejected email left no row behind.
        let rows: Option<i64> = db
            .fetch_one("SELECT COUNT(*) FROM email_send_log", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, Some(2));
    }

    #[test]
    fn cancel_only_hits_queued() {
        let db = Database::open_in_memory().unwrap();
        let email = enqueue_email(&db, "work", "a@b.c", "hi", "body", None, false).unwrap();
        assert!(mark_email_sent(&db, &email.id).unwrap());
        assert!(!cancel_email(&db, &email.id).unwrap());
    }
}
