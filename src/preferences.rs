// ⭐ User Preference Layer - favorite comparisons and recent searches
//
// Every operation is scoped to one user id. A row owned by someone else is
// treated exactly like a row that does not exist.

use crate::db::{parse_timestamp, timestamp, UnitOfWork};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Recent searches retained per user
pub const LAST_SEARCH_LIMIT: usize = 5;

/// Payload shared by favorites and last searches
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ComparisonInput {
    pub country1: Option<String>,
    pub country2: Option<String>,
    /// Indicator code
    pub index: Option<String>,
}

impl ComparisonInput {
    pub fn new(country1: &str, country2: &str, index: &str) -> Self {
        ComparisonInput {
            country1: Some(country1.to_string()),
            country2: Some(country2.to_string()),
            index: Some(index.to_string()),
        }
    }

    /// (country1, country2, indicator) with all three present and non-blank
    fn fields(&self) -> Result<(&str, &str, &str)> {
        fn non_blank(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }
        match (
            non_blank(&self.country1),
            non_blank(&self.country2),
            non_blank(&self.index),
        ) {
            (Some(country1), Some(country2), Some(index)) => Ok((country1, country2, index)),
            _ => Err(Error::validation(
                "comparison",
                "country1, country2 and index are required",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FavoriteComparison {
    pub id: i64,
    pub country1: String,
    pub country2: String,
    pub index: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastSearch {
    pub id: i64,
    pub country1: String,
    pub country2: String,
    pub indicator: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FavoriteSummary {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastSearchSummary {
    pub id: i64,
    pub name: String,
    pub date: String,
}

fn display_name(country1: &str, country2: &str, indicator: &str) -> String {
    format!("{country1} vs {country2} -- {indicator}")
}

// ============================================================================
// FAVORITES
// ============================================================================

pub fn add_favorite(
    conn: &Connection,
    user_id: i64,
    input: &ComparisonInput,
) -> Result<FavoriteComparison> {
    let (country1, country2, index) = input.fields()?;
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO favorite_comparisons (user_id, country1, country2, indicator_code, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, country1, country2, index, timestamp(created_at)],
    )?;

    Ok(FavoriteComparison {
        id: conn.last_insert_rowid(),
        country1: country1.to_string(),
        country2: country2.to_string(),
        index: index.to_string(),
        created_at,
    })
}

/// Newest first; the indicator is shown by name when it is known locally
pub fn list_favorites(conn: &Connection, user_id: i64) -> Result<Vec<FavoriteSummary>> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.country1, f.country2, COALESCE(i.name, f.indicator_code)
         FROM favorite_comparisons f
         LEFT JOIN indicators i ON i.code = f.indicator_code
         WHERE f.user_id = ?1
         ORDER BY f.created_at DESC, f.id DESC",
    )?;
    let favorites = stmt
        .query_map([user_id], |row| {
            let country1: String = row.get(1)?;
            let country2: String = row.get(2)?;
            let indicator: String = row.get(3)?;
            Ok(FavoriteSummary {
                id: row.get(0)?,
                name: display_name(&country1, &country2, &indicator),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    tracing::debug!(user_id, count = favorites.len(), "Listed favorites");
    Ok(favorites)
}

pub fn get_favorite(conn: &Connection, user_id: i64, id: i64) -> Result<FavoriteComparison> {
    conn.query_row(
        "SELECT id, country1, country2, indicator_code, created_at
         FROM favorite_comparisons WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
        |row| {
            let created_at: String = row.get(4)?;
            Ok(FavoriteComparison {
                id: row.get(0)?,
                country1: row.get(1)?,
                country2: row.get(2)?,
                index: row.get(3)?,
                created_at: parse_timestamp(&created_at)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| Error::not_found("favorite", id.to_string()))
}

/// Returns whether a row was removed; other users' rows are never touched
pub fn delete_favorite(conn: &Connection, user_id: i64, id: i64) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM favorite_comparisons WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
    )?;
    if deleted > 0 {
        tracing::info!(user_id, favorite_id = id, "Favorite deleted");
    }
    Ok(deleted > 0)
}

// ============================================================================
// LAST SEARCHES
// ============================================================================

/// Record a search and evict everything past the newest `LAST_SEARCH_LIMIT`
pub fn add_last_search(
    conn: &mut Connection,
    user_id: i64,
    input: &ComparisonInput,
) -> Result<LastSearch> {
    let (country1, country2, indicator) = input.fields()?;
    let created_at = Utc::now();

    let uow = UnitOfWork::begin(conn)?;
    uow.conn().execute(
        "INSERT INTO last_searches (user_id, country1, country2, indicator_code, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, country1, country2, indicator, timestamp(created_at)],
    )?;
    let id = uow.conn().last_insert_rowid();

    let evicted = uow.conn().execute(
        "DELETE FROM last_searches
         WHERE user_id = ?1 AND id NOT IN (
            SELECT id FROM last_searches
            WHERE user_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
         )",
        params![user_id, LAST_SEARCH_LIMIT as i64],
    )?;
    uow.commit()?;

    if evicted > 0 {
        tracing::debug!(user_id, evicted, "Evicted old searches");
    }

    Ok(LastSearch {
        id,
        country1: country1.to_string(),
        country2: country2.to_string(),
        indicator: indicator.to_string(),
        created_at,
    })
}

pub fn list_last_searches(conn: &Connection, user_id: i64) -> Result<Vec<LastSearchSummary>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.country1, s.country2, COALESCE(i.name, s.indicator_code), s.created_at
         FROM last_searches s
         LEFT JOIN indicators i ON i.code = s.indicator_code
         WHERE s.user_id = ?1
         ORDER BY s.created_at DESC, s.id DESC
         LIMIT ?2",
    )?;
    let searches = stmt
        .query_map(params![user_id, LAST_SEARCH_LIMIT as i64], |row| {
            let country1: String = row.get(1)?;
            let country2: String = row.get(2)?;
            let indicator: String = row.get(3)?;
            let created_at: String = row.get(4)?;
            Ok(LastSearchSummary {
                id: row.get(0)?,
                name: display_name(&country1, &country2, &indicator),
                date: parse_timestamp(&created_at)?
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(searches)
}

pub fn clear_last_searches(conn: &Connection, user_id: i64) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM last_searches WHERE user_id = ?1", [user_id])?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::create_user;
    use crate::db::setup_database;

    fn test_db() -> (Connection, i64, i64) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let (alice, _) = create_user(&conn, "alice").unwrap();
        let (bob, _) = create_user(&conn, "bob").unwrap();
        conn.execute(
            "INSERT INTO indicators (code, name) VALUES ('NY.GDP.MKTP.CD', 'GDP (current US$)')",
            [],
        )
        .unwrap();
        (conn, alice.id, bob.id)
    }

    fn search_count(conn: &Connection, user_id: i64) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM last_searches WHERE user_id = ?1",
            [user_id],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_favorite_names_use_indicator_name() {
        let (conn, alice, _) = test_db();
        add_favorite(&conn, alice, &ComparisonInput::new("USA", "DEU", "NY.GDP.MKTP.CD")).unwrap();
        add_favorite(&conn, alice, &ComparisonInput::new("FRA", "ITA", "UNKNOWN.CODE")).unwrap();

        let favorites = list_favorites(&conn, alice).unwrap();

        // Newest first, unknown indicator falls back to its code
        assert_eq!(favorites[0].name, "FRA vs ITA -- UNKNOWN.CODE");
        assert_eq!(favorites[1].name, "USA vs DEU -- GDP (current US$)");
    }

    #[test]
    fn test_favorites_are_private() {
        let (conn, alice, bob) = test_db();
        let fav = add_favorite(&conn, alice, &ComparisonInput::new("USA", "DEU", "X")).unwrap();

        assert!(list_favorites(&conn, bob).unwrap().is_empty());
        assert!(get_favorite(&conn, bob, fav.id).unwrap_err().is_not_found());
        assert!(!delete_favorite(&conn, bob, fav.id).unwrap());

        assert_eq!(get_favorite(&conn, alice, fav.id).unwrap().country2, "DEU");
        assert!(delete_favorite(&conn, alice, fav.id).unwrap());
        assert!(!delete_favorite(&conn, alice, fav.id).unwrap());
    }

    #[test]
    fn test_incomplete_input_is_rejected() {
        let (mut conn, alice, _) = test_db();
        let input = ComparisonInput {
            country1: Some("USA".to_string()),
            country2: Some("  ".to_string()),
            index: Some("X".to_string()),
        };

        assert!(matches!(
            add_favorite(&conn, alice, &input).unwrap_err(),
            Error::Validation { .. }
        ));
        assert!(add_last_search(&mut conn, alice, &ComparisonInput::default()).is_err());
    }

    #[test]
    fn test_last_searches_capped_at_five() {
        let (mut conn, alice, bob) = test_db();
        add_last_search(&mut conn, bob, &ComparisonInput::new("JPN", "KOR", "X")).unwrap();

        for i in 0..8 {
            add_last_search(&mut conn, alice, &ComparisonInput::new("USA", &format!("C{i}"), "X"))
                .unwrap();
            assert!(search_count(&conn, alice) <= LAST_SEARCH_LIMIT as i64);
        }

        let searches = list_last_searches(&conn, alice).unwrap();
        let names: Vec<_> = searches.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["USA vs C7 -- X", "USA vs C6 -- X", "USA vs C5 -- X", "USA vs C4 -- X", "USA vs C3 -- X"]
        );
        assert_eq!(searches[0].date.len(), "2024-01-01 00:00:00".len());

        // Bob's history is untouched by Alice's evictions
        assert_eq!(search_count(&conn, bob), 1);
    }

    #[test]
    fn test_clear_last_searches_only_affects_owner() {
        let (mut conn, alice, bob) = test_db();
        add_last_search(&mut conn, alice, &ComparisonInput::new("USA", "DEU", "X")).unwrap();
        add_last_search(&mut conn, bob, &ComparisonInput::new("USA", "DEU", "X")).unwrap();

        assert_eq!(clear_last_searches(&conn, alice).unwrap(), 1);
        assert!(list_last_searches(&conn, alice).unwrap().is_empty());
        assert_eq!(list_last_searches(&conn, bob).unwrap().len(), 1);
    }
}
