use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::{count_rows, ScopeTarget, SqlFilter};
use crate::access::Scope;
use crate::db::{decode_json_as, decode_timestamp, decode_uuid, encode_timestamp, DatabaseError};
use crate::models::*;

const THREAD_SELECT: &str = "SELECT t.id, t.patient_id, t.subject, t.created_by, t.is_urgent,
     t.is_closed, t.created_at, t.updated_at, p.first_name || ' ' || p.last_name";

const THREAD_FROM: &str = "FROM communication_threads t JOIN patients p ON p.id = t.patient_id";

const MESSAGE_SELECT: &str = "SELECT m.id, m.thread_id, m.sender_id, m.message_type, m.content,
     m.is_ai_generated, m.ai_template_used, m.attached_files, m.referenced_visits, m.created_at,
     TRIM(u.first_name || ' ' || u.last_name)";

const MESSAGE_FROM: &str = "FROM messages m JOIN users u ON u.id = m.sender_id";

// ═══════════════════════════════════════════════════════════
// Threads
// ═══════════════════════════════════════════════════════════

pub fn insert_thread(conn: &Connection, thread: &CommunicationThread) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO communication_threads (id, patient_id, subject, created_by, is_urgent,
         is_closed, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            thread.id.to_string(),
            thread.patient_id.to_string(),
            thread.subject,
            thread.created_by.to_string(),
            thread.is_urgent as i32,
            thread.is_closed as i32,
            encode_timestamp(&thread.created_at),
            encode_timestamp(&thread.updated_at),
        ],
    )?;
    Ok(())
}

/// A thread with its patient's display name.
pub fn get_thread(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<(CommunicationThread, String)>, DatabaseError> {
    let sql = format!("{THREAD_SELECT} {THREAD_FROM} WHERE t.id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![id.to_string()], thread_row_from_rusqlite);
    match result {
        Ok(row) => Ok(Some(thread_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Threads the scope admits, most recent activity first.
pub fn list_threads(
    conn: &Connection,
    scope: &Scope,
    filter: &ThreadFilter,
    page: &Page,
) -> Result<Paged<(CommunicationThread, String)>, DatabaseError> {
    let mut f = SqlFilter::new();
    f.scope(scope, ScopeTarget::Threads { thread_id: "t.id" });
    if let Some(patient_id) = filter.patient_id {
        f.and_eq("t.patient_id", patient_id.to_string());
    }
    if let Some(urgent) = filter.is_urgent {
        f.and_eq("t.is_urgent", urgent as i32);
    }
    if let Some(closed) = filter.is_closed {
        f.and_eq("t.is_closed", closed as i32);
    }
    if let Some(search) = &filter.search {
        f.and_contains_any(&["t.subject", "p.first_name", "p.last_name"], search);
    }

    let count = count_rows(conn, THREAD_FROM, &f)?;
    let sql = f.paged(
        &format!("{THREAD_SELECT} {THREAD_FROM}"),
        "t.updated_at DESC, t.id",
        page.limit(),
        page.offset(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(f.params().as_slice(), |row| Ok(thread_row_from_rusqlite(row)))?;
    let mut results = Vec::new();
    for row in rows {
        results.push(thread_from_row(row??)?);
    }
    Ok(Paged { count, results })
}

/// Bump the thread's activity timestamp.
pub fn touch_thread(conn: &Connection, id: &Uuid, now: DateTime<Utc>) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE communication_threads SET updated_at = ?2 WHERE id = ?1",
        params![id.to_string(), encode_timestamp(&now)],
    )?;
    Ok(())
}

pub fn set_thread_urgent(
    conn: &Connection,
    id: &Uuid,
    urgent: bool,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE communication_threads SET is_urgent = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), urgent as i32, encode_timestamp(&now)],
    )?;
    Ok(())
}

/// Close an open thread. Returns `false` if it was already closed.
pub fn close_thread(conn: &Connection, id: &Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE communication_threads SET is_closed = 1, updated_at = ?2
         WHERE id = ?1 AND is_closed = 0",
        params![id.to_string(), encode_timestamp(&now)],
    )?;
    Ok(changed == 1)
}

// ── Participants ────────────────────────────────────────────

/// Add participants, ignoring ones already present. Returns how many were new.
pub fn add_thread_participants(
    conn: &Connection,
    thread_id: &Uuid,
    user_ids: &[Uuid],
) -> Result<usize, DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO thread_participants (thread_id, user_id) VALUES (?1, ?2)",
    )?;
    let mut added = 0;
    for user_id in user_ids {
        added += stmt.execute(params![thread_id.to_string(), user_id.to_string()])?;
    }
    Ok(added)
}

pub fn remove_thread_participant(
    conn: &Connection,
    thread_id: &Uuid,
    user_id: &Uuid,
) -> Result<bool, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM thread_participants WHERE thread_id = ?1 AND user_id = ?2",
        params![thread_id.to_string(), user_id.to_string()],
    )?;
    Ok(deleted > 0)
}

pub fn get_thread_participants(conn: &Connection, thread_id: &Uuid) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT user_id FROM thread_participants WHERE thread_id = ?1")?;
    let rows = stmt.query_map(params![thread_id.to_string()], |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(decode_uuid("thread_participants.user_id", &row?)?);
    }
    Ok(ids)
}

// ═══════════════════════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════════════════════

pub fn insert_message(conn: &Connection, message: &Message) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO messages (id, thread_id, sender_id, message_type, content, is_ai_generated,
         ai_template_used, attached_files, referenced_visits, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            message.id.to_string(),
            message.thread_id.to_string(),
            message.sender_id.to_string(),
            message.message_type.as_str(),
            message.content,
            message.is_ai_generated as i32,
            message.ai_template_used,
            id_list_json(&message.attached_files),
            id_list_json(&message.referenced_visits),
            encode_timestamp(&message.created_at),
        ],
    )?;
    Ok(())
}

fn id_list_json(ids: &[Uuid]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".into())
}

/// A message with its sender's display name.
pub fn get_message(conn: &Connection, id: &Uuid) -> Result<Option<(Message, String)>, DatabaseError> {
    let sql = format!("{MESSAGE_SELECT} {MESSAGE_FROM} WHERE m.id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![id.to_string()], message_row_from_rusqlite);
    match result {
        Ok(row) => Ok(Some(message_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Every message of a thread, oldest first.
pub fn get_thread_messages(
    conn: &Connection,
    thread_id: &Uuid,
) -> Result<Vec<(Message, String)>, DatabaseError> {
    let sql = format!(
        "{MESSAGE_SELECT} {MESSAGE_FROM} WHERE m.thread_id = ?1 ORDER BY m.created_at, m.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![thread_id.to_string()], |row| {
        Ok(message_row_from_rusqlite(row))
    })?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(message_from_row(row??)?);
    }
    Ok(messages)
}

pub fn last_thread_message(
    conn: &Connection,
    thread_id: &Uuid,
) -> Result<Option<(Message, String)>, DatabaseError> {
    let sql = format!(
        "{MESSAGE_SELECT} {MESSAGE_FROM} WHERE m.thread_id = ?1
         ORDER BY m.created_at DESC, m.id DESC LIMIT 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![thread_id.to_string()], message_row_from_rusqlite);
    match result {
        Ok(row) => Ok(Some(message_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Messages in threads `reader` participates in, newest first.
pub fn list_messages(
    conn: &Connection,
    reader: &Uuid,
    filter: &MessageFilter,
    page: &Page,
) -> Result<Paged<(Message, String)>, DatabaseError> {
    let mut f = SqlFilter::new();
    f.scope(&Scope::Participant(*reader), ScopeTarget::Threads { thread_id: "m.thread_id" });
    if let Some(thread_id) = filter.thread_id {
        f.and_eq("m.thread_id", thread_id.to_string());
    }
    if let Some(kind) = filter.message_type {
        f.and_eq("m.message_type", kind.as_str());
    }

    let count = count_rows(conn, MESSAGE_FROM, &f)?;
    let sql = f.paged(
        &format!("{MESSAGE_SELECT} {MESSAGE_FROM}"),
        "m.created_at DESC, m.id",
        page.limit(),
        page.offset(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(f.params().as_slice(), |row| Ok(message_row_from_rusqlite(row)))?;
    let mut results = Vec::new();
    for row in rows {
        results.push(message_from_row(row??)?);
    }
    Ok(Paged { count, results })
}

// ── Read tracking ───────────────────────────────────────────

/// Record `user_id` as having read every message in the thread. Existing
/// read rows keep their original `read_at`. Returns newly recorded rows.
pub fn mark_thread_read(
    conn: &Connection,
    thread_id: &Uuid,
    user_id: &Uuid,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO message_read_status (message_id, user_id, read_at)
         SELECT id, ?2, ?3 FROM messages WHERE thread_id = ?1",
        params![thread_id.to_string(), user_id.to_string(), encode_timestamp(&now)],
    )?;
    Ok(inserted)
}

pub fn mark_message_read(
    conn: &Connection,
    message_id: &Uuid,
    user_id: &Uuid,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO message_read_status (message_id, user_id, read_at)
         VALUES (?1, ?2, ?3)",
        params![message_id.to_string(), user_id.to_string(), encode_timestamp(&now)],
    )?;
    Ok(inserted > 0)
}

/// Reader ids per message id for one thread.
pub fn get_thread_read_status(
    conn: &Connection,
    thread_id: &Uuid,
) -> Result<BTreeMap<Uuid, Vec<Uuid>>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT r.message_id, r.user_id FROM message_read_status r
         JOIN messages m ON m.id = r.message_id
         WHERE m.thread_id = ?1 ORDER BY r.read_at",
    )?;
    let rows = stmt.query_map(params![thread_id.to_string()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut readers: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
    for row in rows {
        let (message_id, user_id) = row?;
        readers
            .entry(decode_uuid("message_read_status.message_id", &message_id)?)
            .or_default()
            .push(decode_uuid("message_read_status.user_id", &user_id)?);
    }
    Ok(readers)
}

pub fn get_message_readers(conn: &Connection, message_id: &Uuid) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM message_read_status WHERE message_id = ?1 ORDER BY read_at",
    )?;
    let rows = stmt.query_map(params![message_id.to_string()], |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(decode_uuid("message_read_status.user_id", &row?)?);
    }
    Ok(ids)
}

/// `(unread by reader, total)` message counts for a thread.
pub fn thread_message_counts(
    conn: &Connection,
    thread_id: &Uuid,
    reader: &Uuid,
) -> Result<(i64, i64), DatabaseError> {
    let counts = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM messages m WHERE m.thread_id = ?1
               AND NOT EXISTS (SELECT 1 FROM message_read_status r
                               WHERE r.message_id = m.id AND r.user_id = ?2)),
            (SELECT COUNT(*) FROM messages WHERE thread_id = ?1)",
        params![thread_id.to_string(), reader.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(counts)
}

// ═══════════════════════════════════════════════════════════
// Statistics
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CommunicationStats {
    pub total_threads: i64,
    pub active_threads: i64,
    pub urgent_threads: i64,
    pub unread_messages: i64,
    pub messages_by_type: BTreeMap<String, i64>,
    pub top_participants: Vec<ParticipantActivity>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ParticipantActivity {
    pub user_id: Uuid,
    pub full_name: String,
    pub message_count: i64,
}

/// Messaging statistics over the threads `reader` participates in.
pub fn communication_stats(conn: &Connection, reader: &Uuid) -> Result<CommunicationStats, DatabaseError> {
    let reader_id = reader.to_string();
    let in_threads = "thread_id IN (SELECT thread_id FROM thread_participants WHERE user_id = ?1)";

    let (total_threads, active_threads, urgent_threads): (i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN t.is_closed = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN t.is_urgent = 1 AND t.is_closed = 0 THEN 1 ELSE 0 END), 0)
         FROM communication_threads t
         JOIN thread_participants tp ON tp.thread_id = t.id AND tp.user_id = ?1",
        params![reader_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let unread_messages: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM messages m WHERE m.{in_threads}
             AND NOT EXISTS (SELECT 1 FROM message_read_status r
                             WHERE r.message_id = m.id AND r.user_id = ?1)"
        ),
        params![reader_id],
        |row| row.get(0),
    )?;

    let mut messages_by_type = BTreeMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT message_type, COUNT(*) FROM messages WHERE {in_threads} GROUP BY message_type"
        ))?;
        let rows = stmt.query_map(params![reader_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, count) = row?;
            messages_by_type.insert(kind, count);
        }
    }

    let mut top_participants = Vec::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT u.id, TRIM(u.first_name || ' ' || u.last_name), COUNT(*) AS n
             FROM messages m JOIN users u ON u.id = m.sender_id
             WHERE m.{in_threads}
             GROUP BY u.id ORDER BY n DESC, u.username LIMIT 5"
        ))?;
        let rows = stmt.query_map(params![reader_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?;
        for row in rows {
            let (id, full_name, message_count) = row?;
            top_participants.push(ParticipantActivity {
                user_id: decode_uuid("users.id", &id)?,
                full_name,
                message_count,
            });
        }
    }

    Ok(CommunicationStats {
        total_threads,
        active_threads,
        urgent_threads,
        unread_messages,
        messages_by_type,
        top_participants,
    })
}

// ── Row mapping ─────────────────────────────────────────────

struct ThreadRow {
    id: String,
    patient_id: String,
    subject: String,
    created_by: String,
    is_urgent: i32,
    is_closed: i32,
    created_at: String,
    updated_at: String,
    patient_name: String,
}

fn thread_row_from_rusqlite(row: &Row<'_>) -> Result<ThreadRow, rusqlite::Error> {
    Ok(ThreadRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        subject: row.get(2)?,
        created_by: row.get(3)?,
        is_urgent: row.get(4)?,
        is_closed: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        patient_name: row.get(8)?,
    })
}

fn thread_from_row(row: ThreadRow) -> Result<(CommunicationThread, String), DatabaseError> {
    let thread = CommunicationThread {
        id: decode_uuid("communication_threads.id", &row.id)?,
        patient_id: decode_uuid("communication_threads.patient_id", &row.patient_id)?,
        subject: row.subject,
        created_by: decode_uuid("communication_threads.created_by", &row.created_by)?,
        is_urgent: row.is_urgent != 0,
        is_closed: row.is_closed != 0,
        created_at: decode_timestamp("communication_threads.created_at", &row.created_at)?,
        updated_at: decode_timestamp("communication_threads.updated_at", &row.updated_at)?,
    };
    Ok((thread, row.patient_name))
}

struct MessageRow {
    id: String,
    thread_id: String,
    sender_id: String,
    message_type: String,
    content: String,
    is_ai_generated: i32,
    ai_template_used: Option<String>,
    attached_files: String,
    referenced_visits: String,
    created_at: String,
    sender_name: String,
}

fn message_row_from_rusqlite(row: &Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        sender_id: row.get(2)?,
        message_type: row.get(3)?,
        content: row.get(4)?,
        is_ai_generated: row.get(5)?,
        ai_template_used: row.get(6)?,
        attached_files: row.get(7)?,
        referenced_visits: row.get(8)?,
        created_at: row.get(9)?,
        sender_name: row.get(10)?,
    })
}

fn message_from_row(row: MessageRow) -> Result<(Message, String), DatabaseError> {
    let message = Message {
        id: decode_uuid("messages.id", &row.id)?,
        thread_id: decode_uuid("messages.thread_id", &row.thread_id)?,
        sender_id: decode_uuid("messages.sender_id", &row.sender_id)?,
        message_type: MessageType::from_str(&row.message_type)?,
        content: row.content,
        is_ai_generated: row.is_ai_generated != 0,
        ai_template_used: row.ai_template_used,
        attached_files: decode_json_as("messages.attached_files", &row.attached_files)?,
        referenced_visits: decode_json_as("messages.referenced_visits", &row.referenced_visits)?,
        created_at: decode_timestamp("messages.created_at", &row.created_at)?,
    };
    Ok((message, row.sender_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::patient::tests::make_patient;
    use crate::db::repository::user::tests::make_user;
    use crate::db::sqlite::open_memory_database;

    fn setup(conn: &Connection) -> (User, User, CommunicationThread) {
        let u1 = make_user(conn, "u1", Role::Nurse);
        let u2 = make_user(conn, "u2", Role::Physician);
        let patient = make_patient(conn, "T1", None);
        let now = Utc::now();
        let thread = CommunicationThread {
            id: Uuid::new_v4(),
            patient_id: patient.id,
            subject: "Wound care plan".into(),
            created_by: u1.id,
            is_urgent: false,
            is_closed: false,
            created_at: now,
            updated_at: now,
        };
        insert_thread(conn, &thread).unwrap();
        add_thread_participants(conn, &thread.id, &[u1.id, u2.id]).unwrap();
        (u1, u2, thread)
    }

    fn post(conn: &Connection, thread: &CommunicationThread, sender: &User, text: &str) -> Message {
        let message = Message {
            id: Uuid::new_v4(),
            thread_id: thread.id,
            sender_id: sender.id,
            message_type: MessageType::General,
            content: text.into(),
            is_ai_generated: false,
            ai_template_used: None,
            attached_files: vec![],
            referenced_visits: vec![],
            created_at: Utc::now(),
        };
        insert_message(conn, &message).unwrap();
        message
    }

    #[test]
    fn mark_read_is_idempotent_and_clears_unread() {
        let conn = open_memory_database().unwrap();
        let (u1, u2, thread) = setup(&conn);
        post(&conn, &thread, &u2, "hello");
        post(&conn, &thread, &u2, "again");

        assert_eq!(thread_message_counts(&conn, &thread.id, &u1.id).unwrap(), (2, 2));
        assert_eq!(mark_thread_read(&conn, &thread.id, &u1.id, Utc::now()).unwrap(), 2);
        assert_eq!(mark_thread_read(&conn, &thread.id, &u1.id, Utc::now()).unwrap(), 0);
        assert_eq!(thread_message_counts(&conn, &thread.id, &u1.id).unwrap(), (0, 2));
    }

    #[test]
    fn participants_are_unique() {
        let conn = open_memory_database().unwrap();
        let (u1, _, thread) = setup(&conn);
        assert_eq!(add_thread_participants(&conn, &thread.id, &[u1.id]).unwrap(), 0);
        assert_eq!(get_thread_participants(&conn, &thread.id).unwrap().len(), 2);
        assert!(remove_thread_participant(&conn, &thread.id, &u1.id).unwrap());
        assert_eq!(get_thread_participants(&conn, &thread.id).unwrap().len(), 1);
    }

    #[test]
    fn thread_list_scoped_to_participants() {
        let conn = open_memory_database().unwrap();
        let (u1, _, _) = setup(&conn);
        let outsider = make_user(&conn, "out", Role::Admin);
        let page = Page::default();
        let mine = list_threads(&conn, &Scope::Participant(u1.id), &ThreadFilter::default(), &page).unwrap();
        assert_eq!(mine.count, 1);
        let theirs =
            list_threads(&conn, &Scope::Participant(outsider.id), &ThreadFilter::default(), &page).unwrap();
        assert_eq!(theirs.count, 0);
    }

    #[test]
    fn close_only_once() {
        let conn = open_memory_database().unwrap();
        let (_, _, thread) = setup(&conn);
        assert!(close_thread(&conn, &thread.id, Utc::now()).unwrap());
        assert!(!close_thread(&conn, &thread.id, Utc::now()).unwrap());
    }

    #[test]
    fn stats_count_reader_threads() {
        let conn = open_memory_database().unwrap();
        let (u1, u2, thread) = setup(&conn);
        post(&conn, &thread, &u2, "one");
        set_thread_urgent(&conn, &thread.id, true, Utc::now()).unwrap();

        let stats = communication_stats(&conn, &u1.id).unwrap();
        assert_eq!(stats.total_threads, 1);
        assert_eq!(stats.urgent_threads, 1);
        assert_eq!(stats.unread_messages, 1);
        assert_eq!(stats.messages_by_type.get("general"), Some(&1));
        assert_eq!(stats.top_participants[0].user_id, u2.id);
    }
}
