use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{Article, DeliveryOrder, NewArticle};

use super::schema::SCHEMA;

const ARTICLE_COLUMNS: &str = "id, title, url, source, published_at, created_at, delivered_at";

/// Durable, url-deduplicated article store.
///
/// All access goes through one `tokio_rusqlite` connection, which runs every
/// call on a single background thread, so writes are serialized.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Insert unless an article with the same url already exists.
    ///
    /// Returns `true` when a new row was created. A duplicate url is not an
    /// error and leaves the existing row untouched.
    pub async fn insert_if_absent(&self, article: NewArticle) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT OR IGNORE INTO articles (title, url, source, published_at) VALUES (?1, ?2, ?3, ?4)",
                    params![article.title, article.url, article.source, article.published_at],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    /// The next article waiting for delivery, if any. Read-only.
    pub async fn next_pending(&self, order: DeliveryOrder) -> Result<Option<Article>> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE delivered_at IS NULL ORDER BY id {} LIMIT 1",
            order.sql()
        );
        let article = self
            .conn
            .call(move |conn| {
                let article = conn.query_row(&sql, [], article_from_row).optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    /// Stamp `delivered_at` on the given article.
    ///
    /// An already delivered article keeps its original timestamp. Returns
    /// `false` when no row has this id.
    pub async fn mark_delivered(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE articles SET delivered_at = COALESCE(delivered_at, datetime('now')) WHERE id = ?1",
                    params![id],
                )?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            tracing::warn!(id, "No article updated, id not found");
        }
        Ok(changed > 0)
    }

    /// Mark every pending article of the given sources as delivered.
    ///
    /// Used to retire a source without flushing its backlog into the chat.
    /// Future inserts for these sources are unaffected.
    pub async fn retire_sources(&self, sources: &BTreeSet<String>) -> Result<usize> {
        if sources.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; sources.len()].join(", ");
        let sql = format!(
            "UPDATE articles SET delivered_at = datetime('now') WHERE delivered_at IS NULL AND source IN ({placeholders})"
        );
        let names: Vec<String> = sources.iter().cloned().collect();

        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(&sql, params_from_iter(names.iter()))?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            tracing::info!(?sources, "No pending articles to retire");
        }
        Ok(changed)
    }

    #[cfg(test)]
    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1");
        let article = self
            .conn
            .call(move |conn| {
                let article = conn
                    .query_row(&sql, params![id], article_from_row)
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    #[cfg(test)]
    pub async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?1");
        let url = url.to_string();
        let article = self
            .conn
            .call(move |conn| {
                let article = conn
                    .query_row(&sql, params![url], article_from_row)
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn pending_count(&self) -> Result<i64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM articles WHERE delivered_at IS NULL",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // SQLite datetime('now') format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        source: row.get(3)?,
        published_at: row.get(4)?,
        created_at: row
            .get::<_, String>(5)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        delivered_at: row
            .get::<_, Option<String>>(6)?
            // a row is pending only while the column is NULL
            .map(|s| parse_datetime(&s).unwrap_or_else(Utc::now)),
    })
}
