//! Core types for Pagecast

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Storage format for naive local datetimes in the configured zone.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a naive local datetime the way it is stored.
pub fn fmt_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// Parse a stored naive local datetime.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).ok()
}

/// Decrypted access-token payload for a user or page credential.
///
/// `expires_at == 0` means the token never expires (page tokens).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenData {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub is_long_lived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_name: Option<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl TokenData {
    pub fn new(access_token: String) -> Self {
        Self {
            access_token,
            token_type: default_token_type(),
            expires_in: 0,
            expires_at: 0,
            created_at: chrono::Utc::now().timestamp(),
            is_long_lived: false,
            page_id: None,
            page_name: None,
        }
    }

    /// Whether the token has a real expiry that is already behind `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at > 0 && self.expires_at < now
    }
}

/// Lifecycle state of a scheduled post.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PostStatus {
    /// Waiting on the local trigger.
    Scheduled,
    /// Handed to the remote service with a scheduled publish time.
    ScheduledRemote,
    /// A publish attempt is in flight.
    Publishing,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::ScheduledRemote => "scheduled_remote",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(PostStatus::Scheduled),
            "scheduled_remote" => Some(PostStatus::ScheduledRemote),
            "publishing" => Some(PostStatus::Publishing),
            "published" => Some(PostStatus::Published),
            "failed" => Some(PostStatus::Failed),
            _ => None,
        }
    }

    /// Statuses that occupy a calendar slot.
    pub fn occupies_slot(&self) -> bool {
        matches!(self, PostStatus::Scheduled | PostStatus::ScheduledRemote)
    }

    /// Statuses the operator may still edit.
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            PostStatus::Scheduled | PostStatus::ScheduledRemote | PostStatus::Failed
        )
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shape of a post's media payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PostKind {
    Single,
    Carousel,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostKind::Single => "single",
            PostKind::Carousel => "carousel",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "single" => Some(PostKind::Single),
            "carousel" => Some(PostKind::Carousel),
            _ => None,
        }
    }
}

/// A stored media file: public URL plus the local path it was written to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    pub url: String,
    pub local_path: String,
}

/// A durable scheduled-post row.
#[derive(Debug, Clone)]
pub struct ScheduledPost {
    pub id: i64,
    pub page_id: String,
    pub message: String,
    pub link: String,
    /// One entry for a single-image post, several for a carousel, empty for
    /// text/link/video posts.
    pub images: Vec<MediaRef>,
    pub video_url: String,
    pub video_path: String,
    pub kind: PostKind,
    pub share_to_story: bool,
    /// Naive local time in `timezone`.
    pub scheduled_time: NaiveDateTime,
    pub timezone: String,
    pub status: PostStatus,
    pub remote_post_id: String,
    pub permalink: String,
    pub error_message: String,
    pub retry_count: i64,
    pub created_by: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub published_at: Option<NaiveDateTime>,
}

impl ScheduledPost {
    pub fn has_video(&self) -> bool {
        !self.video_url.is_empty() || !self.video_path.is_empty()
    }

    /// Local file paths that belong to this post and are removed once the
    /// post is published or deleted.
    pub fn local_media_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .images
            .iter()
            .filter(|m| !m.local_path.is_empty())
            .map(|m| m.local_path.clone())
            .collect();
        if !self.video_path.is_empty() {
            paths.push(self.video_path.clone());
        }
        paths
    }
}

/// A weekly recurring time-slot rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringTimeRule {
    pub id: i64,
    /// Zero-padded "HH:MM".
    pub time: String,
    /// Weekday numbers, 0 = Sunday .. 6 = Saturday.
    pub days: Vec<u8>,
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
