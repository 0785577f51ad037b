use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::models::{NewPost, PostRow};
use crate::postprocess::slug_from_title;

const POST_COLUMNS: &str = "id, title, slug, excerpt, content_markdown, content_html, category, status, author, provider, published_at";

/// Insert a post with its tags in one transaction. Returns the new post id.
///
/// The slug gets a numeric suffix when it is already taken.
pub async fn insert_post(pool: &SqlitePool, post: &NewPost) -> Result<String> {
    let mut tx = pool.begin().await.context("starting post transaction")?;

    let mut slug = post.slug.clone();
    let mut suffix = 2;
    loop {
        let taken: Option<(String,)> = sqlx::query_as("SELECT id FROM posts WHERE slug = ?")
            .bind(&slug)
            .fetch_optional(&mut *tx)
            .await
            .context("checking slug")?;
        if taken.is_none() {
            break;
        }
        slug = format!("{}-{suffix}", post.slug);
        suffix += 1;
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO posts (id, title, slug, excerpt, content_markdown, content_html, category, author, provider)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&post.title)
    .bind(&slug)
    .bind(&post.excerpt)
    .bind(&post.content_markdown)
    .bind(&post.content_html)
    .bind(&post.category)
    .bind(&post.author)
    .bind(&post.provider)
    .execute(&mut *tx)
    .await
    .context("inserting post")?;

    for tag in &post.tags {
        let tag_slug = slug_from_title(tag);
        sqlx::query("INSERT INTO tags (id, name, slug) VALUES (?, ?, ?) ON CONFLICT DO NOTHING")
            .bind(Uuid::new_v4().to_string())
            .bind(tag)
            .bind(&tag_slug)
            .execute(&mut *tx)
            .await
            .context("inserting tag")?;

        let (tag_id,): (String,) = sqlx::query_as("SELECT id FROM tags WHERE name = ? OR slug = ? LIMIT 1")
            .bind(tag)
            .bind(&tag_slug)
            .fetch_one(&mut *tx)
            .await
            .context("looking up tag")?;

        sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?, ?)")
            .bind(&id)
            .bind(&tag_id)
            .execute(&mut *tx)
            .await
            .context("linking tag")?;
    }

    tx.commit().await.context("committing post")?;

    debug!(id = %id, slug = %slug, tags = post.tags.len(), "stored post");
    Ok(id)
}

pub async fn get_post(pool: &SqlitePool, id: &str) -> Result<Option<PostRow>> {
    let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?");
    let post = sqlx::query_as::<_, PostRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("fetching post")?;
    Ok(post)
}

pub async fn get_post_tags(pool: &SqlitePool, post_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT t.name FROM tags t JOIN post_tags pt ON pt.tag_id = t.id WHERE pt.post_id = ? ORDER BY t.name",
    )
    .bind(post_id)
    .fetch_all(pool)
    .await
    .context("fetching post tags")?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// (requests, tokens) recorded for one provider/user/day.
pub async fn usage_for_day(pool: &SqlitePool, provider: &str, user_id: &str, day: NaiveDate) -> Result<(u64, u64)> {
    let row: Option<(i64, i64)> =
        sqlx::query_as("SELECT requests, tokens FROM provider_usage WHERE provider = ? AND user_id = ? AND day = ?")
            .bind(provider)
            .bind(user_id)
            .bind(day_key(day))
            .fetch_optional(pool)
            .await
            .context("reading provider usage")?;
    Ok(row.map_or((0, 0), |(r, t)| (r.max(0) as u64, t.max(0) as u64)))
}

pub async fn add_usage(pool: &SqlitePool, provider: &str, user_id: &str, day: NaiveDate, tokens: u64) -> Result<()> {
    sqlx::query(
        "INSERT INTO provider_usage (provider, user_id, day, requests, tokens) VALUES (?, ?, ?, 1, ?)
         ON CONFLICT(provider, user_id, day) DO UPDATE SET
             requests = requests + 1,
             tokens = tokens + excluded.tokens",
    )
    .bind(provider)
    .bind(user_id)
    .bind(day_key(day))
    .bind(i64::try_from(tokens).unwrap_or(i64::MAX))
    .execute(pool)
    .await
    .context("recording provider usage")?;
    Ok(())
}

/// Delete usage rows for days strictly before `day`. Returns the number removed.
pub async fn delete_usage_before(pool: &SqlitePool, day: NaiveDate) -> Result<u64> {
    let result = sqlx::query("DELETE FROM provider_usage WHERE day < ?")
        .bind(day_key(day))
        .execute(pool)
        .await
        .context("deleting old provider usage")?;
    Ok(result.rows_affected())
}

/// Persistence seen by the writer: posts on auto-publish and per-user usage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn create_post(&self, post: &NewPost) -> Result<String>;

    /// Tokens the user consumed on `provider` during the current UTC day.
    async fn usage_today(&self, provider: &str, user_id: &str) -> Result<u64>;

    async fn record_usage(&self, provider: &str, user_id: &str, tokens: u64) -> Result<()>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn create_post(&self, post: &NewPost) -> Result<String> {
        insert_post(&self.pool, post).await
    }

    async fn usage_today(&self, provider: &str, user_id: &str) -> Result<u64> {
        let (_, tokens) = usage_for_day(&self.pool, provider, user_id, Utc::now().date_naive()).await?;
        Ok(tokens)
    }

    async fn record_usage(&self, provider: &str, user_id: &str, tokens: u64) -> Result<()> {
        add_usage(&self.pool, provider, user_id, Utc::now().date_naive(), tokens).await
    }
}
