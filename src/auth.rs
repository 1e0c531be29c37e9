// 🔑 Identity - users and bearer tokens
//
// Only the SHA-256 of a token is stored; the plain token is shown once at creation.

use crate::db::{parse_timestamp, timestamp};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let created_at: String = row.get(2)?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Create a user and return it together with its freshly issued token
pub fn create_user(conn: &Connection, username: &str) -> Result<(User, String)> {
    let username = username.trim();
    if username.is_empty() || username.len() > 150 {
        return Err(Error::validation(
            "username",
            "must be between 1 and 150 characters",
        ));
    }

    let token = uuid::Uuid::new_v4().simple().to_string();
    let created_at = Utc::now();

    let result = conn.execute(
        "INSERT INTO users (username, token_hash, created_at) VALUES (?1, ?2, ?3)",
        params![username, hash_token(&token), timestamp(created_at)],
    );

    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(Error::validation(
                "username",
                format!("'{username}' already exists"),
            ));
        }
        Err(e) => return Err(e.into()),
    }

    let user = User {
        id: conn.last_insert_rowid(),
        username: username.to_string(),
        created_at,
    };
    Ok((user, token))
}

/// Resolve a bearer token to its user
pub fn authenticate(conn: &Connection, token: &str) -> Result<Option<User>> {
    let token = token.trim();
    if token.is_empty() {
        return Ok(None);
    }
    let user = conn
        .query_row(
            "SELECT id, username, created_at FROM users WHERE token_hash = ?1",
            [hash_token(token)],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}
