//! Remote publishing API abstraction
//!
//! The Graph-shaped publishing service is a network collaborator: it accepts
//! a page-scoped credential and a post payload and returns an opaque post id
//! or a structured error. This module defines the trait seam the rest of the
//! system talks through, the wire types, and two implementations: the real
//! `reqwest` client and a configurable mock for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{MediaRef, TokenData};

pub mod graph;
pub mod mock;

pub use graph::GraphClient;
pub use mock::MockPagesApi;

/// Scopes a page token must carry before it is usable for publishing.
pub const REQUIRED_SCOPES: [&str; 2] = ["pages_manage_posts", "pages_show_list"];

/// Result of the remote `debug_token` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenIntrospection {
    pub is_valid: bool,
    /// Unix seconds; 0 = never expires.
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenIntrospection {
    /// Whether the token is usable for publishing right now: marked valid,
    /// not expired, and carrying every required scope.
    pub fn is_usable_at(&self, now: i64) -> bool {
        if !self.is_valid {
            return false;
        }
        if self.expires_at > 0 && self.expires_at < now {
            return false;
        }
        REQUIRED_SCOPES
            .iter()
            .all(|s| self.scopes.iter().any(|have| have == s))
    }

    /// Required scopes the token does not carry.
    pub fn missing_scopes(&self) -> Vec<&'static str> {
        REQUIRED_SCOPES
            .iter()
            .filter(|s| !self.scopes.iter().any(|have| have == **s))
            .copied()
            .collect()
    }
}

/// A page the connected user manages, as returned by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub fan_count: i64,
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// Payload for creating a post, shaped by its media content.
#[derive(Debug, Clone, Default)]
pub struct PostPayload {
    pub message: String,
    pub link: String,
    /// Ordered media; one entry means a photo post, several mean a carousel.
    pub images: Vec<MediaRef>,
    pub video: Option<MediaRef>,
    /// UTC epoch seconds; set when the remote service should hold the post
    /// and publish it itself.
    pub scheduled_publish_time: Option<i64>,
}

/// The endpoint a payload is sent to, selected by content shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Feed,
    Photos,
    Videos,
}

impl PostPayload {
    pub fn endpoint(&self) -> Endpoint {
        if self.video.is_some() {
            Endpoint::Videos
        } else if self.images.len() == 1 {
            Endpoint::Photos
        } else {
            // No media, or a carousel: both go through the feed endpoint
            // (a carousel attaches its uploaded photos to one feed post).
            Endpoint::Feed
        }
    }

    pub fn is_carousel(&self) -> bool {
        self.images.len() > 1
    }
}

/// Fields that can be changed on an already-created remote post.
#[derive(Debug, Clone, Default)]
pub struct PostUpdate {
    pub message: Option<String>,
    pub scheduled_publish_time: Option<i64>,
}

/// Response from creating a post.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedPost {
    pub id: String,
    #[serde(default)]
    pub permalink_url: Option<String>,
}

/// A post as read back from the remote service.
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePost {
    pub id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub permalink_url: Option<String>,
}

/// Trait for the remote publishing service.
///
/// All calls carry a bearer credential and run under a bounded timeout.
/// There is no transport-level retry: retries are the orchestrator's
/// explicit backoff policy.
#[async_trait]
pub trait PagesApi: Send + Sync {
    /// Exchange a short-lived token for a long-lived one.
    async fn exchange_token(&self, token: &str) -> Result<TokenData>;

    /// Introspect a token's validity, expiry and scopes.
    async fn debug_token(&self, token: &str) -> Result<TokenIntrospection>;

    /// Fetch every page the user manages, following pagination.
    async fn fetch_user_pages(&self, user_token: &str) -> Result<Vec<RemotePage>>;

    /// Create a post (or hand one to the remote scheduler when the payload
    /// carries a scheduled publish time).
    async fn create_post(
        &self,
        page_id: &str,
        token: &str,
        payload: &PostPayload,
    ) -> Result<CreatedPost>;

    /// Update a not-yet-published remote post.
    async fn update_post(&self, post_id: &str, token: &str, update: &PostUpdate) -> Result<()>;

    /// Delete a remote post.
    async fn delete_post(&self, post_id: &str, token: &str) -> Result<()>;

    /// Read a remote post back.
    async fn get_post(&self, post_id: &str, token: &str) -> Result<RemotePost>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(url: &str) -> MediaRef {
        MediaRef {
            url: url.to_string(),
            local_path: String::new(),
        }
    }

    #[test]
    fn test_endpoint_selection_feed_for_text() {
        let payload = PostPayload {
            message: "plain".to_string(),
            ..Default::default()
        };
        assert_eq!(payload.endpoint(), Endpoint::Feed);
        assert!(!payload.is_carousel());
    }

    #[test]
    fn test_endpoint_selection_photos_for_single_image() {
        let payload = PostPayload {
            message: "pic".to_string(),
            images: vec![media("https://cdn.example/a.jpg")],
            ..Default::default()
        };
        assert_eq!(payload.endpoint(), Endpoint::Photos);
    }

    #[test]
    fn test_endpoint_selection_feed_for_carousel() {
        let payload = PostPayload {
            message: "pics".to_string(),
            images: vec![media("a"), media("b"), media("c")],
            ..Default::default()
        };
        assert_eq!(payload.endpoint(), Endpoint::Feed);
        assert!(payload.is_carousel());
    }

    #[test]
    fn test_endpoint_selection_video_wins() {
        let payload = PostPayload {
            message: "vid".to_string(),
            images: vec![media("a")],
            video: Some(MediaRef {
                url: "https://cdn.example/v.mp4".to_string(),
                local_path: String::new(),
            }),
            ..Default::default()
        };
        assert_eq!(payload.endpoint(), Endpoint::Videos);
    }

    #[test]
    fn test_introspection_usability() {
        let now = 1_700_000_000;

        let good = TokenIntrospection {
            is_valid: true,
            expires_at: 0,
            scopes: vec![
                "pages_manage_posts".to_string(),
                "pages_show_list".to_string(),
                "pages_read_engagement".to_string(),
            ],
        };
        assert!(good.is_usable_at(now));
        assert!(good.missing_scopes().is_empty());

        let invalid = TokenIntrospection {
            is_valid: false,
            ..good.clone()
        };
        assert!(!invalid.is_usable_at(now));

        let expired = TokenIntrospection {
            expires_at: now - 10,
            ..good.clone()
        };
        assert!(!expired.is_usable_at(now));

        let missing = TokenIntrospection {
            scopes: vec!["pages_show_list".to_string()],
            ..good
        };
        assert!(!missing.is_usable_at(now));
        assert_eq!(missing.missing_scopes(), vec!["pages_manage_posts"]);
    }
}
