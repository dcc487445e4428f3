//! Publish orchestrator
//!
//! Owns the scheduled-post lifecycle:
//!
//! ```text
//! scheduled -> scheduled_remote | publishing -> published | failed
//!                                    ^                        |
//!                                    +---- retry w/ backoff --+
//! ```
//!
//! Posts are persisted first, then armed with a local single-shot trigger;
//! when remote-native scheduling is enabled and the instant clears the
//! service's 10-minute floor, the post is additionally handed to the remote
//! scheduler and the local trigger stands down. Every state transition is a
//! guarded UPDATE on the current status, so duplicate or racing trigger
//! fires collapse into no-ops.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::api::{PagesApi, PostPayload, PostUpdate};
use crate::blob::BlobStore;
use crate::calendar::normalize_time;
use crate::credentials::CredentialManager;
use crate::db::{Database, NewScheduledPost, PostQuery, PostStatistics};
use crate::error::{CredentialError, PagecastError, Result};
use crate::pairing::PairedUnit;
use crate::trigger::TriggerScheduler;
use crate::types::{MediaRef, PostKind, PostStatus, ScheduledPost};

/// Automatic publish attempts stop once the retry counter reaches this.
const MAX_RETRIES: i64 = 3;

/// Backoff base: the n-th retry waits 1h * 2^n.
const RETRY_BASE_SECS: i64 = 3600;

/// The remote scheduler refuses instants closer than this.
const REMOTE_FLOOR_SECS: i64 = 600;

/// A single-post scheduling request.
#[derive(Debug, Clone)]
pub struct NewPostRequest {
    pub page_id: String,
    pub message: String,
    pub link: String,
    pub images: Vec<MediaRef>,
    pub video: Option<MediaRef>,
    pub share_to_story: bool,
    /// Naive local time in the system timezone.
    pub scheduled_time: NaiveDateTime,
    pub created_by: i64,
}

/// Partial edit of a scheduled post.
#[derive(Debug, Clone, Default)]
pub struct PostEdit {
    pub message: Option<String>,
    pub link: Option<String>,
    pub scheduled_time: Option<NaiveDateTime>,
}

/// Result of one bulk-scheduling run. Partial success is expected: the
/// batch never fails atomically once the slot count checks out.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub scheduled_count: usize,
    pub post_ids: Vec<i64>,
    /// (unit index, error message) for every unit that did not schedule.
    pub errors: Vec<(usize, String)>,
}

/// What a publish attempt amounted to. Trigger callbacks consume this
/// instead of an error: nothing escapes into the trigger layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published,
    /// The trigger fired early; the post is left untouched.
    NotDue,
    /// Missing row, terminal status, or a lost claim race. Duplicate fires
    /// land here.
    Skipped,
    /// The attempt failed; a retry trigger was registered unless the
    /// ceiling was reached.
    Failed {
        error: String,
        retry_scheduled: bool,
    },
    /// Infrastructure failure before any state transition.
    Aborted(String),
}

pub struct Scheduler {
    db: Database,
    credentials: Arc<CredentialManager>,
    api: Arc<dyn PagesApi>,
    triggers: Arc<dyn TriggerScheduler>,
    blobs: Arc<dyn BlobStore>,
    tz: Tz,
    use_remote_scheduling: bool,
}

impl Scheduler {
    pub fn new(
        db: Database,
        credentials: Arc<CredentialManager>,
        api: Arc<dyn PagesApi>,
        triggers: Arc<dyn TriggerScheduler>,
        blobs: Arc<dyn BlobStore>,
        tz: Tz,
        use_remote_scheduling: bool,
    ) -> Self {
        Self {
            db,
            credentials,
            api,
            triggers,
            blobs,
            tz,
            use_remote_scheduling,
        }
    }

    fn now_local(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }

    /// Convert a naive local instant to UTC. An ambiguous local time (DST
    /// fold) resolves to its earlier reading; a nonexistent one (DST gap) is
    /// a validation error.
    fn local_to_utc(&self, local: &NaiveDateTime) -> Result<DateTime<Utc>> {
        match self.tz.from_local_datetime(local) {
            chrono::LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            chrono::LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
            chrono::LocalResult::None => Err(PagecastError::Validation(format!(
                "{} does not exist in timezone {}",
                local, self.tz
            ))),
        }
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Validate and persist a single post, arm its local trigger, and hand
    /// it to the remote scheduler when possible. Returns the post id.
    pub async fn schedule(&self, request: &NewPostRequest) -> Result<i64> {
        self.schedule_inner(request, false).await
    }

    async fn schedule_inner(&self, request: &NewPostRequest, check_slot: bool) -> Result<i64> {
        if request.page_id.trim().is_empty() {
            return Err(PagecastError::Validation(
                "A target page is required".to_string(),
            ));
        }
        if request.message.trim().is_empty() {
            return Err(PagecastError::Validation(
                "The post message must not be empty".to_string(),
            ));
        }

        let now = self.now_local();
        if request.scheduled_time <= now {
            return Err(PagecastError::Validation(
                "Scheduled time must be in the future".to_string(),
            ));
        }
        // Reject instants the timezone cannot represent before persisting.
        let when_utc = self.local_to_utc(&request.scheduled_time)?;

        let row = NewScheduledPost {
            page_id: request.page_id.clone(),
            message: request.message.clone(),
            link: request.link.clone(),
            images: request.images.clone(),
            video_url: request.video.as_ref().map(|v| v.url.clone()).unwrap_or_default(),
            video_path: request
                .video
                .as_ref()
                .map(|v| v.local_path.clone())
                .unwrap_or_default(),
            kind: if request.images.len() > 1 {
                PostKind::Carousel
            } else {
                PostKind::Single
            },
            share_to_story: request.share_to_story,
            scheduled_time: request.scheduled_time,
            timezone: self.tz.to_string(),
            created_by: request.created_by,
        };

        let post_id = if check_slot {
            self.db
                .insert_post_if_slot_free(&row, &now)
                .await?
                .ok_or_else(|| {
                    PagecastError::Conflict(format!(
                        "Slot {} on {} is already taken",
                        request.scheduled_time.format("%H:%M"),
                        request.scheduled_time.date()
                    ))
                })?
        } else {
            self.db.insert_post(&row, &now).await?
        };

        // Belt and braces: the local trigger is armed even when remote
        // scheduling takes over below.
        self.triggers.register(post_id, when_utc);
        tracing::info!(post_id, scheduled = %request.scheduled_time, "Post scheduled");

        if self.use_remote_scheduling {
            self.try_remote_schedule(post_id, &row, when_utc).await;
        }

        Ok(post_id)
    }

    /// Hand a freshly scheduled post to the remote service's own scheduler.
    /// Failure is not an error: the post stays on the local trigger.
    async fn try_remote_schedule(
        &self,
        post_id: i64,
        row: &NewScheduledPost,
        when_utc: DateTime<Utc>,
    ) {
        let floor = Utc::now() + Duration::seconds(REMOTE_FLOOR_SECS);
        if when_utc < floor {
            tracing::info!(
                post_id,
                "Instant is inside the remote scheduler's 10-minute floor, keeping local trigger"
            );
            return;
        }

        let token = match self.credentials.get_page_token(&row.page_id).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::warn!(post_id, page_id = %row.page_id,
                    "No valid page credential, keeping local trigger");
                return;
            }
            Err(e) => {
                tracing::warn!(post_id, error = %e, "Credential lookup failed, keeping local trigger");
                return;
            }
        };

        let payload = PostPayload {
            message: row.message.clone(),
            link: row.link.clone(),
            images: row.images.clone(),
            video: if row.video_url.is_empty() && row.video_path.is_empty() {
                None
            } else {
                Some(MediaRef {
                    url: row.video_url.clone(),
                    local_path: row.video_path.clone(),
                })
            },
            scheduled_publish_time: Some(when_utc.timestamp()),
        };

        match self
            .api
            .create_post(&row.page_id, &token.access_token, &payload)
            .await
        {
            Ok(created) => {
                let now = self.now_local();
                if let Err(e) = self.db.mark_scheduled_remote(post_id, &created.id, &now).await {
                    tracing::error!(post_id, error = %e, "Failed to record remote scheduling");
                    return;
                }
                // The remote service owns the timing now.
                self.triggers.cancel(post_id);
                tracing::info!(post_id, remote_post_id = %created.id,
                    "Post handed to the remote scheduler");
            }
            Err(e) => {
                tracing::warn!(post_id, error = %e,
                    "Remote scheduling failed, post stays on the local trigger");
            }
        }
    }

    /// Bulk scheduling: pair-engine units against a date plus the available
    /// slots for it. Requires one slot per unit up front; after that the
    /// batch degrades per-unit rather than atomically.
    pub async fn schedule_batch(
        &self,
        page_id: &str,
        units: &[PairedUnit],
        date: NaiveDate,
        slots: &[String],
        share_to_story: bool,
        created_by: i64,
    ) -> Result<BatchOutcome> {
        if units.is_empty() || slots.is_empty() {
            return Err(PagecastError::Validation(
                "No posts or time slots provided".to_string(),
            ));
        }

        let now = self.now_local();
        if date < now.date() {
            return Err(PagecastError::Validation(
                "Selected date must be today or in the future".to_string(),
            ));
        }

        if units.len() > slots.len() {
            return Err(PagecastError::Conflict(format!(
                "Not enough available time slots: {} posts, {} slots",
                units.len(),
                slots.len()
            )));
        }

        tracing::info!(count = units.len(), %date, "Bulk scheduling batch");

        let mut outcome = BatchOutcome::default();
        let floor = now + Duration::seconds(REMOTE_FLOOR_SECS);

        for (index, unit) in units.iter().enumerate() {
            let Some(slot) = normalize_time(&slots[index]) else {
                outcome
                    .errors
                    .push((index, format!("Invalid time slot: {}", slots[index])));
                continue;
            };
            // normalize_time only emits parseable HH:MM values.
            let Ok(time) = chrono::NaiveTime::parse_from_str(&slot, "%H:%M") else {
                outcome
                    .errors
                    .push((index, format!("Invalid time slot: {}", slot)));
                continue;
            };
            let when = date.and_time(time);

            if when < floor {
                outcome.errors.push((
                    index,
                    format!(
                        "Scheduled time {} must be at least 10 minutes in the future",
                        when
                    ),
                ));
                continue;
            }

            let request = NewPostRequest {
                page_id: page_id.to_string(),
                message: unit.caption.clone(),
                link: String::new(),
                images: unit.media.iter().map(|m| m.media.clone()).collect(),
                video: None,
                share_to_story,
                scheduled_time: when,
                created_by,
            };

            match self.schedule_inner(&request, true).await {
                Ok(post_id) => {
                    outcome.scheduled_count += 1;
                    outcome.post_ids.push(post_id);
                }
                Err(e) => {
                    tracing::warn!(index, error = %e, "Batch unit failed to schedule");
                    outcome.errors.push((index, e.to_string()));
                }
            }
        }

        tracing::info!(
            scheduled = outcome.scheduled_count,
            failed = outcome.errors.len(),
            "Bulk scheduling finished"
        );
        Ok(outcome)
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// The trigger callback. Safe against duplicate and early fires; never
    /// lets an error escape.
    pub async fn publish(&self, post_id: i64) -> PublishOutcome {
        let post = match self.db.get_post(post_id).await {
            Ok(Some(post)) => post,
            Ok(None) => {
                tracing::warn!(post_id, "Trigger fired for a post that no longer exists");
                return PublishOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(post_id, error = %e, "Failed to load post for publishing");
                return PublishOutcome::Aborted(e.to_string());
            }
        };

        if !matches!(post.status, PostStatus::Scheduled | PostStatus::Failed) {
            tracing::debug!(post_id, status = %post.status, "Ignoring trigger for non-publishable post");
            return PublishOutcome::Skipped;
        }

        // Triggers can fire early under clock skew; not being due is a
        // no-op, not a failure.
        let now = self.now_local();
        if post.scheduled_time > now {
            tracing::info!(post_id, "Post not due yet");
            return PublishOutcome::NotDue;
        }

        // Claim the row before the remote call so an in-flight crash is
        // externally visible. Losing the claim means another fire won.
        match self.db.claim_for_publishing(post_id, &now).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(post_id, "Lost the publishing claim, ignoring duplicate fire");
                return PublishOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(post_id, error = %e, "Failed to claim post for publishing");
                return PublishOutcome::Aborted(e.to_string());
            }
        }

        match self.attempt_publish(&post).await {
            Ok((remote_id, permalink)) => {
                let now = self.now_local();
                if let Err(e) = self
                    .db
                    .mark_published(post_id, &remote_id, &permalink, &now)
                    .await
                {
                    tracing::error!(post_id, error = %e, "Published remotely but failed to record it");
                    return PublishOutcome::Aborted(e.to_string());
                }

                self.cleanup_media(&post).await;
                tracing::info!(post_id, remote_post_id = %remote_id, "Post published");
                PublishOutcome::Published
            }
            Err(e) => self.handle_publish_failure(post_id, &e).await,
        }
    }

    async fn attempt_publish(&self, post: &ScheduledPost) -> Result<(String, String)> {
        let token = self
            .credentials
            .get_page_token(&post.page_id)
            .await?
            .ok_or_else(|| CredentialError::Missing(format!("page {}", post.page_id)))?;

        let payload = PostPayload {
            message: post.message.clone(),
            link: post.link.clone(),
            images: post.images.clone(),
            video: if post.has_video() {
                Some(MediaRef {
                    url: post.video_url.clone(),
                    local_path: post.video_path.clone(),
                })
            } else {
                None
            },
            scheduled_publish_time: None,
        };

        let created = self
            .api
            .create_post(&post.page_id, &token.access_token, &payload)
            .await?;

        let permalink = created.permalink_url.clone().unwrap_or_else(|| {
            format!(
                "https://www.facebook.com/{}/posts/{}",
                post.page_id, created.id
            )
        });

        Ok((created.id, permalink))
    }

    async fn handle_publish_failure(&self, post_id: i64, error: &PagecastError) -> PublishOutcome {
        let now = self.now_local();
        let retry_count = match self.db.mark_failed(post_id, &error.to_string(), &now).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(post_id, error = %e, "Failed to record publish failure");
                return PublishOutcome::Aborted(e.to_string());
            }
        };

        let retry_scheduled = retry_count < MAX_RETRIES;
        if retry_scheduled {
            let delay = Duration::seconds(RETRY_BASE_SECS * (1 << retry_count));
            let next = Utc::now() + delay;
            self.triggers.register(post_id, next);
            tracing::warn!(
                post_id,
                retry_count,
                next_attempt = %next,
                error = %error,
                "Publish failed, retry scheduled"
            );
        } else {
            tracing::error!(
                post_id,
                retry_count,
                error = %error,
                "Publish failed terminally, no further automatic attempts"
            );
        }

        PublishOutcome::Failed {
            error: error.to_string(),
            retry_scheduled,
        }
    }

    async fn cleanup_media(&self, post: &ScheduledPost) {
        use futures::future::join_all;

        let deletions = post.local_media_paths().into_iter().map(|path| async move {
            let result = self.blobs.delete(&path).await;
            (path, result)
        });

        for (path, result) in join_all(deletions).await {
            if let Err(e) = result {
                tracing::warn!(post_id = post.id, file = %path, error = %e,
                    "Failed to delete local media file");
            }
        }
    }

    // ========================================================================
    // Editing and deletion
    // ========================================================================

    /// Edit a post that has not been published yet. A time change re-arms
    /// the local trigger and, for remotely scheduled posts, updates the
    /// remote side too.
    pub async fn update_post(&self, post_id: i64, edit: &PostEdit) -> Result<()> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| PagecastError::Validation(format!("Post {} not found", post_id)))?;

        if !post.status.is_editable() {
            return Err(PagecastError::Validation(format!(
                "Post {} can no longer be edited (status {})",
                post_id, post.status
            )));
        }

        if let Some(message) = &edit.message {
            if message.trim().is_empty() {
                return Err(PagecastError::Validation(
                    "The post message must not be empty".to_string(),
                ));
            }
        }

        let mut new_time_utc = None;
        if let Some(when) = &edit.scheduled_time {
            if *when <= self.now_local() {
                return Err(PagecastError::Validation(
                    "Scheduled time must be in the future".to_string(),
                ));
            }
            new_time_utc = Some(self.local_to_utc(when)?);
        }

        let now = self.now_local();
        self.db
            .update_post_fields(
                post_id,
                edit.message.as_deref(),
                edit.link.as_deref(),
                edit.scheduled_time.as_ref(),
                &now,
            )
            .await?;

        if let Some(when_utc) = new_time_utc {
            self.triggers.cancel(post_id);
            self.triggers.register(post_id, when_utc);
        }

        // Remotely scheduled posts carry the edit to the remote side;
        // failure there is logged, not fatal, since the local row already
        // reflects the change.
        if post.status == PostStatus::ScheduledRemote && !post.remote_post_id.is_empty() {
            let update = PostUpdate {
                message: edit.message.clone(),
                scheduled_publish_time: new_time_utc.map(|dt| dt.timestamp()),
            };
            if update.message.is_some() || update.scheduled_publish_time.is_some() {
                match self.credentials.get_page_token(&post.page_id).await {
                    Ok(Some(token)) => {
                        if let Err(e) = self
                            .api
                            .update_post(&post.remote_post_id, &token.access_token, &update)
                            .await
                        {
                            tracing::warn!(post_id, error = %e, "Remote post update failed");
                        }
                    }
                    Ok(None) => {
                        tracing::warn!(post_id, "No credential to update the remote post");
                    }
                    Err(e) => {
                        tracing::warn!(post_id, error = %e, "Credential lookup failed for remote update");
                    }
                }
            }
        }

        tracing::info!(post_id, "Post updated");
        Ok(())
    }

    /// Delete a post in any state: cancel its trigger, attempt remote
    /// deletion when a remote id exists, remove local media, drop the row.
    /// Returns `false` when the post did not exist.
    pub async fn delete_post(&self, post_id: i64) -> Result<bool> {
        let Some(post) = self.db.get_post(post_id).await? else {
            return Ok(false);
        };

        self.triggers.cancel(post_id);

        if !post.remote_post_id.is_empty() {
            match self.credentials.get_page_token(&post.page_id).await {
                Ok(Some(token)) => {
                    if let Err(e) = self
                        .api
                        .delete_post(&post.remote_post_id, &token.access_token)
                        .await
                    {
                        tracing::warn!(post_id, error = %e, "Remote post deletion failed");
                    }
                }
                Ok(None) => {
                    tracing::warn!(post_id, "No credential to delete the remote post");
                }
                Err(e) => {
                    tracing::warn!(post_id, error = %e, "Credential lookup failed for remote deletion");
                }
            }
        }

        self.cleanup_media(&post).await;
        let deleted = self.db.delete_post(post_id).await?;
        tracing::info!(post_id, "Post deleted");
        Ok(deleted)
    }

    // ========================================================================
    // Queries and maintenance
    // ========================================================================

    pub async fn get_post(&self, post_id: i64) -> Result<Option<ScheduledPost>> {
        self.db.get_post(post_id).await
    }

    pub async fn list_posts(&self, query: &PostQuery) -> Result<Vec<ScheduledPost>> {
        self.db.list_posts(query).await
    }

    pub async fn statistics(&self) -> Result<PostStatistics> {
        let today = self.now_local().date();
        let week = today.week(Weekday::Mon);
        self.db
            .statistics(today, week.first_day(), week.last_day())
            .await
    }

    /// Retention sweep: drop published rows older than `days`.
    pub async fn cleanup_old_posts(&self, days: i64) -> Result<u64> {
        let cutoff = self.now_local() - Duration::days(days);
        let deleted = self.db.delete_published_before(&cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, days, "Retention cleanup removed published posts");
        }
        Ok(deleted)
    }

    /// Re-arm local triggers after a daemon restart: one per `scheduled`
    /// post (overdue ones fire immediately), plus one per `failed` post
    /// still under the retry ceiling, at its backoff distance.
    pub async fn restore_triggers(&self) -> Result<usize> {
        let pending = self.db.locally_scheduled_posts().await?;
        let mut count = pending.len();

        for (post_id, when) in pending {
            let when_utc = match self.local_to_utc(&when) {
                Ok(dt) => dt,
                // A stored instant inside a DST gap still deserves a fire.
                Err(_) => Utc::now(),
            };
            self.triggers.register(post_id, when_utc);
        }

        for (post_id, retry_count) in self.db.failed_retryable_posts(MAX_RETRIES).await? {
            let delay = Duration::seconds(RETRY_BASE_SECS * (1 << retry_count));
            self.triggers.register(post_id, Utc::now() + delay);
            count += 1;
        }

        if count > 0 {
            tracing::info!(count, "Restored publish triggers");
        }
        Ok(count)
    }
}
