use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::db::{decode_opt_timestamp, decode_timestamp, decode_uuid, encode_timestamp, DatabaseError};
use crate::models::*;

pub fn insert_token(conn: &Connection, token: &AuthToken) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO auth_tokens (token_hash, user_id, kind, parent_hash, issued_at, expires_at, revoked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            token.token_hash,
            token.user_id.to_string(),
            token.kind.as_str(),
            token.parent_hash,
            encode_timestamp(&token.issued_at),
            encode_timestamp(&token.expires_at),
            token.revoked_at.as_ref().map(encode_timestamp),
        ],
    )?;
    Ok(())
}

pub fn get_token(conn: &Connection, token_hash: &str) -> Result<Option<AuthToken>, DatabaseError> {
    let result = conn.query_row(
        "SELECT token_hash, user_id, kind, parent_hash, issued_at, expires_at, revoked_at
         FROM auth_tokens WHERE token_hash = ?1",
        params![token_hash],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        },
    );

    match result {
        Ok((token_hash, user_id, kind, parent_hash, issued_at, expires_at, revoked_at)) => {
            Ok(Some(AuthToken {
                token_hash,
                user_id: decode_uuid("auth_tokens.user_id", &user_id)?,
                kind: TokenKind::from_str(&kind)?,
                parent_hash,
                issued_at: decode_timestamp("auth_tokens.issued_at", &issued_at)?,
                expires_at: decode_timestamp("auth_tokens.expires_at", &expires_at)?,
                revoked_at: decode_opt_timestamp("auth_tokens.revoked_at", revoked_at)?,
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Revoke a token and every token minted from it. Returns the number of rows revoked.
pub fn revoke_token_family(
    conn: &Connection,
    token_hash: &str,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let revoked = conn.execute(
        "UPDATE auth_tokens SET revoked_at = ?2
         WHERE (token_hash = ?1 OR parent_hash = ?1) AND revoked_at IS NULL",
        params![token_hash, encode_timestamp(&now)],
    )?;
    Ok(revoked)
}

/// Delete tokens that expired before `cutoff`. Revoked refresh tokens are
/// kept until expiry so reuse keeps failing.
pub fn prune_expired_tokens(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM auth_tokens WHERE expires_at < ?1",
        params![encode_timestamp(&cutoff)],
    )?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::user::tests::make_user;
    use crate::db::sqlite::open_memory_database;

    fn token(user: &User, hash: &str, kind: TokenKind, parent: Option<&str>) -> AuthToken {
        let now = Utc::now();
        AuthToken {
            token_hash: hash.into(),
            user_id: user.id,
            kind,
            parent_hash: parent.map(String::from),
            issued_at: now,
            expires_at: now + chrono::Duration::minutes(5),
            revoked_at: None,
        }
    }

    #[test]
    fn revoking_refresh_revokes_children() {
        let conn = open_memory_database().unwrap();
        let user = make_user(&conn, "u", Role::Nurse);
        insert_token(&conn, &token(&user, "r1", TokenKind::Refresh, None)).unwrap();
        insert_token(&conn, &token(&user, "a1", TokenKind::Access, Some("r1"))).unwrap();
        insert_token(&conn, &token(&user, "a2", TokenKind::Access, None)).unwrap();

        assert_eq!(revoke_token_family(&conn, "r1", Utc::now()).unwrap(), 2);
        assert!(get_token(&conn, "r1").unwrap().unwrap().revoked_at.is_some());
        assert!(get_token(&conn, "a1").unwrap().unwrap().revoked_at.is_some());
        assert!(get_token(&conn, "a2").unwrap().unwrap().revoked_at.is_none());

        // Second revocation is a no-op
        assert_eq!(revoke_token_family(&conn, "r1", Utc::now()).unwrap(), 0);
    }

    #[test]
    fn prune_removes_only_expired() {
        let conn = open_memory_database().unwrap();
        let user = make_user(&conn, "u", Role::Nurse);
        let mut old = token(&user, "old", TokenKind::Access, None);
        old.expires_at = Utc::now() - chrono::Duration::days(1);
        insert_token(&conn, &old).unwrap();
        insert_token(&conn, &token(&user, "fresh", TokenKind::Access, None)).unwrap();

        assert_eq!(prune_expired_tokens(&conn, Utc::now()).unwrap(), 1);
        assert!(get_token(&conn, "old").unwrap().is_none());
        assert!(get_token(&conn, "fresh").unwrap().is_some());
    }
}
