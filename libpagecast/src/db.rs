//! Database operations for Pagecast

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{
    fmt_datetime, parse_datetime, MediaRef, PostKind, PostStatus, RecurringTimeRule,
    ScheduledPost,
};
use chrono::{NaiveDate, NaiveDateTime};

/// Input record for a new scheduled post.
#[derive(Debug, Clone)]
pub struct NewScheduledPost {
    pub page_id: String,
    pub message: String,
    pub link: String,
    pub images: Vec<MediaRef>,
    pub video_url: String,
    pub video_path: String,
    pub kind: PostKind,
    pub share_to_story: bool,
    pub scheduled_time: NaiveDateTime,
    pub timezone: String,
    pub created_by: i64,
}

/// Filters for listing scheduled posts.
#[derive(Debug, Clone, Default)]
pub struct PostQuery {
    pub status: Option<PostStatus>,
    pub page_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub order_by: Option<String>,
    pub descending: bool,
}

/// Aggregate counts over the scheduled-post table.
#[derive(Debug, Clone, Default)]
pub struct PostStatistics {
    pub total: i64,
    pub scheduled: i64,
    pub scheduled_remote: i64,
    pub published: i64,
    pub failed: i64,
    pub today: i64,
    pub this_week: i64,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Use forward slashes for SQLite URL (works on both Windows and Unix)
        // Use mode=rwc to allow creating the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// In-memory database with migrations applied, for tests.
    ///
    /// Pinned to one pooled connection that never retires: every pooled
    /// connection to `sqlite::memory:` would otherwise get its own empty
    /// database.
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;
        Ok(Self { pool })
    }

    // ========================================================================
    // Scheduled posts
    // ========================================================================

    /// Insert a new scheduled post and return its id.
    pub async fn insert_post(&self, post: &NewScheduledPost, now: &NaiveDateTime) -> Result<i64> {
        let images = serde_json::to_string(&post.images).unwrap_or_else(|_| "[]".to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_posts
                (page_id, message, link, images, video_url, video_path, kind,
                 share_to_story, scheduled_time, timezone, status, created_by,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'scheduled', ?, ?, ?)
            "#,
        )
        .bind(&post.page_id)
        .bind(&post.message)
        .bind(&post.link)
        .bind(images)
        .bind(&post.video_url)
        .bind(&post.video_path)
        .bind(post.kind.as_str())
        .bind(post.share_to_story as i32)
        .bind(fmt_datetime(&post.scheduled_time))
        .bind(&post.timezone)
        .bind(post.created_by)
        .bind(fmt_datetime(now))
        .bind(fmt_datetime(now))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    /// Insert a post only if its (date, HH:MM) slot is not already occupied
    /// by a post with a slot-holding status. The occupancy check and the
    /// insert run in one transaction so two concurrent bulk-schedule calls
    /// cannot double-book the same slot.
    ///
    /// Returns `None` when the slot is taken.
    pub async fn insert_post_if_slot_free(
        &self,
        post: &NewScheduledPost,
        now: &NaiveDateTime,
    ) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let date = post.scheduled_time.date().to_string();
        let slot = post.scheduled_time.format("%H:%M").to_string();

        let occupied: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM scheduled_posts
            WHERE date(scheduled_time) = ?
              AND strftime('%H:%M', scheduled_time) = ?
              AND status IN ('scheduled', 'scheduled_remote')
            "#,
        )
        .bind(&date)
        .bind(&slot)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        if occupied > 0 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(None);
        }

        let images = serde_json::to_string(&post.images).unwrap_or_else(|_| "[]".to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_posts
                (page_id, message, link, images, video_url, video_path, kind,
                 share_to_story, scheduled_time, timezone, status, created_by,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'scheduled', ?, ?, ?)
            "#,
        )
        .bind(&post.page_id)
        .bind(&post.message)
        .bind(&post.link)
        .bind(images)
        .bind(&post.video_url)
        .bind(&post.video_path)
        .bind(post.kind.as_str())
        .bind(post.share_to_story as i32)
        .bind(fmt_datetime(&post.scheduled_time))
        .bind(&post.timezone)
        .bind(post.created_by)
        .bind(fmt_datetime(now))
        .bind(fmt_datetime(now))
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        let id = result.last_insert_rowid();
        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(Some(id))
    }

    /// Get a scheduled post by id.
    pub async fn get_post(&self, post_id: i64) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query("SELECT * FROM scheduled_posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| map_post_row(&r)))
    }

    /// Guarded transition into `publishing`. Only `scheduled` and `failed`
    /// rows can be claimed, so a duplicate trigger fire (or a race between a
    /// manual retry and the scheduled trigger) is a no-op for the loser.
    pub async fn claim_for_publishing(&self, post_id: i64, now: &NaiveDateTime) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'publishing', updated_at = ?
            WHERE id = ? AND status IN ('scheduled', 'failed')
            "#,
        )
        .bind(fmt_datetime(now))
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a successful publish.
    pub async fn mark_published(
        &self,
        post_id: i64,
        remote_post_id: &str,
        permalink: &str,
        now: &NaiveDateTime,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'published', remote_post_id = ?, permalink = ?,
                error_message = '', published_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(remote_post_id)
        .bind(permalink)
        .bind(fmt_datetime(now))
        .bind(fmt_datetime(now))
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Record a failed publish attempt, bumping the retry counter.
    /// Returns the post-increment retry count.
    pub async fn mark_failed(
        &self,
        post_id: i64,
        error_message: &str,
        now: &NaiveDateTime,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'failed', error_message = ?, retry_count = retry_count + 1,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error_message)
        .bind(fmt_datetime(now))
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        let retry_count: i64 =
            sqlx::query_scalar("SELECT retry_count FROM scheduled_posts WHERE id = ?")
                .bind(post_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(retry_count)
    }

    /// Record that the remote service accepted the post into its own
    /// scheduler.
    pub async fn mark_scheduled_remote(
        &self,
        post_id: i64,
        remote_post_id: &str,
        now: &NaiveDateTime,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'scheduled_remote', remote_post_id = ?, updated_at = ?
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(remote_post_id)
        .bind(fmt_datetime(now))
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Partial update of message / link / scheduled time.
    pub async fn update_post_fields(
        &self,
        post_id: i64,
        message: Option<&str>,
        link: Option<&str>,
        scheduled_time: Option<&NaiveDateTime>,
        now: &NaiveDateTime,
    ) -> Result<bool> {
        let mut sets = Vec::new();
        if message.is_some() {
            sets.push("message = ?");
        }
        if link.is_some() {
            sets.push("link = ?");
        }
        if scheduled_time.is_some() {
            sets.push("scheduled_time = ?");
        }
        if sets.is_empty() {
            return Ok(false);
        }
        sets.push("updated_at = ?");

        let query_str = format!(
            "UPDATE scheduled_posts SET {} WHERE id = ?",
            sets.join(", ")
        );

        let mut query = sqlx::query(&query_str);
        if let Some(m) = message {
            query = query.bind(m);
        }
        if let Some(l) = link {
            query = query.bind(l);
        }
        if let Some(t) = scheduled_time {
            query = query.bind(fmt_datetime(t));
        }
        query = query.bind(fmt_datetime(now)).bind(post_id);

        let result = query.execute(&self.pool).await.map_err(DbError::SqlxError)?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a scheduled post row. Returns whether a row existed.
    pub async fn delete_post(&self, post_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduled_posts WHERE id = ?")
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(result.rows_affected() > 0)
    }

    /// List posts with optional status/page filters.
    pub async fn list_posts(&self, query: &PostQuery) -> Result<Vec<ScheduledPost>> {
        // Build the WHERE clause dynamically
        let mut where_clauses = vec!["1=1"];
        if query.status.is_some() {
            where_clauses.push("status = ?");
        }
        if query.page_id.is_some() {
            where_clauses.push("page_id = ?");
        }

        // Only whitelisted columns can be ordered by.
        let order_by = match query.order_by.as_deref() {
            Some("id") => "id",
            Some("created_at") => "created_at",
            Some("status") => "status",
            _ => "scheduled_time",
        };
        let order = if query.descending { "DESC" } else { "ASC" };
        let limit = if query.limit == 0 { 20 } else { query.limit };

        let query_str = format!(
            "SELECT * FROM scheduled_posts WHERE {} ORDER BY {} {} LIMIT ? OFFSET ?",
            where_clauses.join(" AND "),
            order_by,
            order
        );

        let mut q = sqlx::query(&query_str);
        if let Some(status) = query.status {
            q = q.bind(status.as_str());
        }
        if let Some(page_id) = &query.page_id {
            q = q.bind(page_id);
        }
        q = q.bind(limit as i64).bind(query.offset as i64);

        let rows = q.fetch_all(&self.pool).await.map_err(DbError::SqlxError)?;
        Ok(rows.iter().map(map_post_row).collect())
    }

    /// Posts still waiting on the local trigger, used at daemon boot to
    /// re-register triggers.
    pub async fn locally_scheduled_posts(&self) -> Result<Vec<(i64, NaiveDateTime)>> {
        let rows = sqlx::query(
            "SELECT id, scheduled_time FROM scheduled_posts WHERE status = 'scheduled'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| {
                (
                    r.get::<i64, _>("id"),
                    parse_datetime(&r.get::<String, _>("scheduled_time")).unwrap_or_default(),
                )
            })
            .collect())
    }

    /// Failed posts still under the retry ceiling, with their retry counts.
    /// Used at daemon boot: in-process backoff triggers do not survive a
    /// restart.
    pub async fn failed_retryable_posts(&self, max_retries: i64) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query(
            "SELECT id, retry_count FROM scheduled_posts WHERE status = 'failed' AND retry_count < ?",
        )
        .bind(max_retries)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<i64, _>("id"), r.get::<i64, _>("retry_count")))
            .collect())
    }

    /// Occupied HH:MM slots on a date: posts in a slot-holding status.
    pub async fn occupied_slots(&self, date: NaiveDate) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT strftime('%H:%M', scheduled_time) AS slot
            FROM scheduled_posts
            WHERE date(scheduled_time) = ?
              AND status IN ('scheduled', 'scheduled_remote')
            ORDER BY scheduled_time
            "#,
        )
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(|r| r.get::<String, _>("slot")).collect())
    }

    /// (date, time, status) of every post in a date range, for the calendar
    /// month projection. Time and status only; post content stays out of the
    /// calendar surface.
    pub async fn posts_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, String, PostStatus)>> {
        let rows = sqlx::query(
            r#"
            SELECT date(scheduled_time) AS date,
                   strftime('%H:%M', scheduled_time) AS time,
                   status
            FROM scheduled_posts
            WHERE date(scheduled_time) BETWEEN ? AND ?
            ORDER BY scheduled_time
            "#,
        )
        .bind(start.to_string())
        .bind(end.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .filter_map(|r| {
                let date = r.get::<String, _>("date").parse::<NaiveDate>().ok()?;
                let status = PostStatus::from_str(&r.get::<String, _>("status"))?;
                Some((date, r.get::<String, _>("time"), status))
            })
            .collect())
    }

    /// Aggregate post counts. `today` and the week bounds are computed by
    /// the caller in the system timezone.
    pub async fn statistics(
        &self,
        today: NaiveDate,
        week_start: NaiveDate,
        week_end: NaiveDate,
    ) -> Result<PostStatistics> {
        let mut stats = PostStatistics::default();

        stats.total = sqlx::query_scalar("SELECT COUNT(*) FROM scheduled_posts")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM scheduled_posts GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        for row in rows {
            let count: i64 = row.get("count");
            match PostStatus::from_str(&row.get::<String, _>("status")) {
                Some(PostStatus::Scheduled) => stats.scheduled = count,
                Some(PostStatus::ScheduledRemote) => stats.scheduled_remote = count,
                Some(PostStatus::Published) => stats.published = count,
                Some(PostStatus::Failed) => stats.failed = count,
                _ => {}
            }
        }

        stats.today = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM scheduled_posts
            WHERE date(scheduled_time) = ?
              AND status IN ('scheduled', 'scheduled_remote')
            "#,
        )
        .bind(today.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        stats.this_week = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM scheduled_posts
            WHERE date(scheduled_time) BETWEEN ? AND ?
              AND status IN ('scheduled', 'scheduled_remote')
            "#,
        )
        .bind(week_start.to_string())
        .bind(week_end.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(stats)
    }

    /// Retention sweep: delete published rows older than the cutoff.
    pub async fn delete_published_before(&self, cutoff: &NaiveDateTime) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM scheduled_posts WHERE status = 'published' AND published_at < ?",
        )
        .bind(fmt_datetime(cutoff))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Credential envelopes
    // ========================================================================

    pub async fn upsert_page_token(
        &self,
        page_id: &str,
        envelope: &str,
        now: &NaiveDateTime,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO page_tokens (page_id, token_data, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(page_id) DO UPDATE SET token_data = excluded.token_data,
                                               updated_at = excluded.updated_at
            "#,
        )
        .bind(page_id)
        .bind(envelope)
        .bind(fmt_datetime(now))
        .bind(fmt_datetime(now))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn get_page_token_envelope(&self, page_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT token_data FROM page_tokens WHERE page_id = ?")
            .bind(page_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(row.map(|r| r.get("token_data")))
    }

    pub async fn delete_page_token(&self, page_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM page_tokens WHERE page_id = ?")
            .bind(page_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn list_page_token_envelopes(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT page_id, token_data FROM page_tokens")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(rows
            .iter()
            .map(|r| (r.get("page_id"), r.get("token_data")))
            .collect())
    }

    pub async fn upsert_user_token(
        &self,
        user_id: i64,
        envelope: &str,
        now: &NaiveDateTime,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_tokens (user_id, token_data, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET token_data = excluded.token_data,
                                               updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(envelope)
        .bind(fmt_datetime(now))
        .bind(fmt_datetime(now))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn get_user_token_envelope(&self, user_id: i64) -> Result<Option<String>> {
        let row = sqlx::query("SELECT token_data FROM user_tokens WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(row.map(|r| r.get("token_data")))
    }

    pub async fn delete_user_token(&self, user_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM user_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    // ========================================================================
    // Recurring time rules
    // ========================================================================

    pub async fn insert_rule(
        &self,
        time: &str,
        days_csv: &str,
        now: &NaiveDateTime,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO recurring_times (time, days, active, created_at, updated_at)
            VALUES (?, ?, 1, ?, ?)
            "#,
        )
        .bind(time)
        .bind(days_csv)
        .bind(fmt_datetime(now))
        .bind(fmt_datetime(now))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update_rule(
        &self,
        rule_id: i64,
        time: Option<&str>,
        days_csv: Option<&str>,
        active: Option<bool>,
        now: &NaiveDateTime,
    ) -> Result<bool> {
        let mut sets = Vec::new();
        if time.is_some() {
            sets.push("time = ?");
        }
        if days_csv.is_some() {
            sets.push("days = ?");
        }
        if active.is_some() {
            sets.push("active = ?");
        }
        if sets.is_empty() {
            return Ok(false);
        }
        sets.push("updated_at = ?");

        let query_str = format!(
            "UPDATE recurring_times SET {} WHERE id = ?",
            sets.join(", ")
        );

        let mut query = sqlx::query(&query_str);
        if let Some(t) = time {
            query = query.bind(t);
        }
        if let Some(d) = days_csv {
            query = query.bind(d);
        }
        if let Some(a) = active {
            query = query.bind(a as i32);
        }
        query = query.bind(fmt_datetime(now)).bind(rule_id);

        let result = query.execute(&self.pool).await.map_err(DbError::SqlxError)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_rule(&self, rule_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM recurring_times WHERE id = ?")
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn list_rules(&self, active_only: bool) -> Result<Vec<RecurringTimeRule>> {
        let query_str = if active_only {
            "SELECT * FROM recurring_times WHERE active = 1 ORDER BY time ASC"
        } else {
            "SELECT * FROM recurring_times ORDER BY time ASC"
        };

        let rows = sqlx::query(query_str)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| RecurringTimeRule {
                id: r.get("id"),
                time: r.get("time"),
                days: r
                    .get::<String, _>("days")
                    .split(',')
                    .filter_map(|d| d.parse::<u8>().ok())
                    .collect(),
                active: r.get::<i32, _>("active") != 0,
                created_at: parse_datetime(&r.get::<String, _>("created_at"))
                    .unwrap_or_default(),
                updated_at: parse_datetime(&r.get::<String, _>("updated_at"))
                    .unwrap_or_default(),
            })
            .collect())
    }
}

fn map_post_row(r: &sqlx::sqlite::SqliteRow) -> ScheduledPost {
    ScheduledPost {
        id: r.get("id"),
        page_id: r.get("page_id"),
        message: r.get("message"),
        link: r.get("link"),
        images: serde_json::from_str(&r.get::<String, _>("images")).unwrap_or_default(),
        video_url: r.get("video_url"),
        video_path: r.get("video_path"),
        kind: PostKind::from_str(&r.get::<String, _>("kind")).unwrap_or(PostKind::Single),
        share_to_story: r.get::<i32, _>("share_to_story") != 0,
        scheduled_time: parse_datetime(&r.get::<String, _>("scheduled_time")).unwrap_or_default(),
        timezone: r.get("timezone"),
        status: PostStatus::from_str(&r.get::<String, _>("status")).unwrap_or(PostStatus::Failed),
        remote_post_id: r.get("remote_post_id"),
        permalink: r.get("permalink"),
        error_message: r.get("error_message"),
        retry_count: r.get("retry_count"),
        created_by: r.get("created_by"),
        created_at: parse_datetime(&r.get::<String, _>("created_at")).unwrap_or_default(),
        updated_at: parse_datetime(&r.get::<String, _>("updated_at")).unwrap_or_default(),
        published_at: r
            .get::<Option<String>, _>("published_at")
            .and_then(|s| parse_datetime(&s)),
    }
}
