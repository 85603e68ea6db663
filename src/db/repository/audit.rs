use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::{encode_timestamp, DatabaseError};

/// One buffered audit row: who did what to which route.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub entity: String,
}

/// Insert a batch of audit entries into the audit_log table.
/// Insert all entries or none of them.
pub fn insert_audit_entries(conn: &Connection, entries: &[AuditRecord]) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO audit_log (timestamp, user_id, action, entity) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for entry in entries {
            stmt.execute(params![
                encode_timestamp(&entry.timestamp),
                entry.user_id.map(|id| id.to_string()),
                entry.action,
                entry.entity,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Delete audit entries older than `retention_days`.
pub fn prune_audit_log(
    conn: &Connection,
    now: DateTime<Utc>,
    retention_days: i64,
) -> Result<usize, DatabaseError> {
    let cutoff = now - chrono::Duration::days(retention_days);
    let deleted = conn.execute(
        "DELETE FROM audit_log WHERE timestamp < ?1",
        params![encode_timestamp(&cutoff)],
    )?;
    Ok(deleted)
}

/// Audit rows for one user, newest first: `(timestamp, action, entity)`.
pub fn query_audit_by_user(
    conn: &Connection,
    user_id: &Uuid,
    limit: u32,
) -> Result<Vec<(String, String, String)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, action, entity FROM audit_log
         WHERE user_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![user_id.to_string(), limit], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
