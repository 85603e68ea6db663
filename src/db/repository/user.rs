use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{decode_timestamp, decode_uuid, encode_timestamp, DatabaseError};
use crate::models::*;

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, role, license_number,
     phone, is_verified, is_active, created_at, updated_at";

pub fn insert_user(conn: &Connection, user: &User, password_hash: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO users (id, username, email, first_name, last_name, role, license_number,
         phone, is_verified, is_active, password_hash, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            user.id.to_string(),
            user.username,
            user.email,
            user.first_name,
            user.last_name,
            user.role.as_str(),
            user.license_number,
            user.phone,
            user.is_verified as i32,
            user.is_active as i32,
            password_hash,
            encode_timestamp(&user.created_at),
            encode_timestamp(&user.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>, DatabaseError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    query_one_user(conn, &sql, &id.to_string())
}

pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>, DatabaseError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1");
    query_one_user(conn, &sql, username)
}

fn query_one_user(conn: &Connection, sql: &str, key: &str) -> Result<Option<User>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let result = stmt.query_row(params![key], user_row_from_rusqlite);
    match result {
        Ok(row) => Ok(Some(user_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Users with the given ids, in username order. Unknown ids are skipped.
pub fn get_users(conn: &Connection, ids: &[Uuid]) -> Result<Vec<User>, DatabaseError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id IN ({}) ORDER BY username",
        placeholders.join(", ")
    );
    let id_strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(id_strings.iter()), |row| {
        Ok(user_row_from_rusqlite(row))
    })?;

    let mut users = Vec::new();
    for row in rows {
        users.push(user_from_row(row??)?);
    }
    Ok(users)
}

pub fn username_exists(conn: &Connection, username: &str) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn get_password_hash(conn: &Connection, id: &Uuid) -> Result<Option<String>, DatabaseError> {
    let result = conn.query_row(
        "SELECT password_hash FROM users WHERE id = ?1",
        params![id.to_string()],
        |row| row.get::<_, String>(0),
    );
    match result {
        Ok(hash) => Ok(Some(hash)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn update_user_profile(conn: &Connection, user: &User) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE users SET email = ?2, first_name = ?3, last_name = ?4, phone = ?5,
         license_number = ?6, updated_at = ?7 WHERE id = ?1",
        params![
            user.id.to_string(),
            user.email,
            user.first_name,
            user.last_name,
            user.phone,
            user.license_number,
            encode_timestamp(&user.updated_at),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "User".into(),
            id: user.id.to_string(),
        });
    }
    Ok(())
}

pub fn set_password_hash(
    conn: &Connection,
    id: &Uuid,
    password_hash: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), password_hash, encode_timestamp(&now)],
    )?;
    Ok(())
}

// ── Groups ──────────────────────────────────────────────────

/// Returns `false` when the user already had the group.
pub fn add_user_group(
    conn: &Connection,
    user_id: &Uuid,
    group: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO user_groups (user_id, group_name, assigned_at) VALUES (?1, ?2, ?3)",
        params![user_id.to_string(), group, encode_timestamp(&now)],
    )?;
    Ok(inserted > 0)
}

/// Returns `false` when the user did not have the group.
pub fn remove_user_group(conn: &Connection, user_id: &Uuid, group: &str) -> Result<bool, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM user_groups WHERE user_id = ?1 AND group_name = ?2",
        params![user_id.to_string(), group],
    )?;
    Ok(deleted > 0)
}

pub fn get_user_groups(conn: &Connection, user_id: &Uuid) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT group_name FROM user_groups WHERE user_id = ?1 ORDER BY group_name",
    )?;
    let rows = stmt.query_map(params![user_id.to_string()], |row| row.get::<_, String>(0))?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

// ── Row mapping ─────────────────────────────────────────────

struct UserRow {
    id: String,
    username: String,
    email: String,
    first_name: String,
    last_name: String,
    role: String,
    license_number: Option<String>,
    phone: Option<String>,
    is_verified: i32,
    is_active: i32,
    created_at: String,
    updated_at: String,
}

fn user_row_from_rusqlite(row: &Row<'_>) -> Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        role: row.get(5)?,
        license_number: row.get(6)?,
        phone: row.get(7)?,
        is_verified: row.get(8)?,
        is_active: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn user_from_row(row: UserRow) -> Result<User, DatabaseError> {
    Ok(User {
        id: decode_uuid("users.id", &row.id)?,
        username: row.username,
        email: row.email,
        first_name: row.first_name,
        last_name: row.last_name,
        role: Role::from_str(&row.role)?,
        license_number: row.license_number,
        phone: row.phone,
        is_verified: row.is_verified != 0,
        is_active: row.is_active != 0,
        created_at: decode_timestamp("users.created_at", &row.created_at)?,
        updated_at: decode_timestamp("users.updated_at", &row.updated_at)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    pub(crate) fn make_user(conn: &Connection, username: &str, role: Role) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: username.into(),
            email: format!("{username}@example.org"),
            first_name: username.to_uppercase(),
            last_name: "Tester".into(),
            role,
            license_number: None,
            phone: None,
            is_verified: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        insert_user(conn, &user, "hash").unwrap();
        user
    }

    #[test]
    fn insert_and_fetch_user() {
        let conn = open_memory_database().unwrap();
        let user = make_user(&conn, "nurse1", Role::Nurse);

        let fetched = get_user(&conn, &user.id).unwrap().unwrap();
        assert_eq!(fetched.username, "nurse1");
        assert_eq!(fetched.role, Role::Nurse);

        let by_name = get_user_by_username(&conn, "nurse1").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        assert!(get_user_by_username(&conn, "ghost").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_unique_violation() {
        let conn = open_memory_database().unwrap();
        let user = make_user(&conn, "dup", Role::Nurse);
        let mut clone = user.clone();
        clone.id = Uuid::new_v4();
        let err = insert_user(&conn, &clone, "hash").unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn groups_are_idempotent() {
        let conn = open_memory_database().unwrap();
        let user = make_user(&conn, "pt1", Role::PhysicalTherapist);
        assert!(add_user_group(&conn, &user.id, "wound_care", Utc::now()).unwrap());
        assert!(!add_user_group(&conn, &user.id, "wound_care", Utc::now()).unwrap());
        assert_eq!(get_user_groups(&conn, &user.id).unwrap(), vec!["wound_care"]);
        assert!(remove_user_group(&conn, &user.id, "wound_care").unwrap());
        assert!(!remove_user_group(&conn, &user.id, "wound_care").unwrap());
    }

    #[test]
    fn get_users_skips_unknown_ids() {
        let conn = open_memory_database().unwrap();
        let a = make_user(&conn, "a", Role::Nurse);
        let b = make_user(&conn, "b", Role::Physician);
        let users = get_users(&conn, &[b.id, Uuid::new_v4(), a.id]).unwrap();
        let names: Vec<_> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
