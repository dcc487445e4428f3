//! Mock publishing API for testing
//!
//! A configurable stand-in for the remote service: success/failure toggles,
//! call counters, and recorded payloads so tests can assert on what would
//! have crossed the wire. Available to all builds so integration tests can
//! use it too.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{
    CreatedPost, PagesApi, PostPayload, PostUpdate, RemotePage, RemotePost, TokenIntrospection,
    REQUIRED_SCOPES,
};
use crate::error::{ApiError, Result};
use crate::types::TokenData;

#[derive(Default)]
pub struct MockPagesApi {
    /// Pages returned by `fetch_user_pages`.
    pub pages: Mutex<Vec<RemotePage>>,
    /// Introspection returned by `debug_token`; defaults to a fully valid
    /// token carrying the required scopes.
    pub introspection: Mutex<Option<TokenIntrospection>>,

    fail_creates: AtomicBool,
    fail_exchange: AtomicBool,
    fail_updates: AtomicBool,
    fail_deletes: AtomicBool,

    pub exchange_calls: AtomicUsize,
    pub debug_calls: AtomicUsize,
    pub fetch_pages_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,

    /// Every (page_id, payload) handed to `create_post`.
    pub created: Mutex<Vec<(String, PostPayload)>>,
    /// Every post id handed to `delete_post`.
    pub deleted: Mutex<Vec<String>>,
}

impl MockPagesApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create_post` calls fail with a remote error.
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_exchange(&self, fail: bool) {
        self.fail_exchange.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Replace the introspection result returned by `debug_token`.
    pub fn set_introspection(&self, introspection: TokenIntrospection) {
        *self.introspection.lock().unwrap() = Some(introspection);
    }

    pub fn set_pages(&self, pages: Vec<RemotePage>) {
        *self.pages.lock().unwrap() = pages;
    }

    fn remote_error() -> ApiError {
        ApiError::Remote {
            code: 1,
            message: "An unknown error occurred".to_string(),
        }
    }
}

#[async_trait]
impl PagesApi for MockPagesApi {
    async fn exchange_token(&self, token: &str) -> Result<TokenData> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(Self::remote_error().into());
        }
        let mut exchanged = TokenData::new(format!("long-lived-{}", token));
        exchanged.is_long_lived = true;
        Ok(exchanged)
    }

    async fn debug_token(&self, _token: &str) -> Result<TokenIntrospection> {
        self.debug_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .introspection
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| TokenIntrospection {
                is_valid: true,
                expires_at: 0,
                scopes: REQUIRED_SCOPES.iter().map(|s| s.to_string()).collect(),
            }))
    }

    async fn fetch_user_pages(&self, _user_token: &str) -> Result<Vec<RemotePage>> {
        self.fetch_pages_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.lock().unwrap().clone())
    }

    async fn create_post(
        &self,
        page_id: &str,
        _token: &str,
        payload: &PostPayload,
    ) -> Result<CreatedPost> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Self::remote_error().into());
        }
        self.created
            .lock()
            .unwrap()
            .push((page_id.to_string(), payload.clone()));
        Ok(CreatedPost {
            id: format!("{}_{}", page_id, call),
            permalink_url: None,
        })
    }

    async fn update_post(&self, _post_id: &str, _token: &str, _update: &PostUpdate) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::remote_error().into());
        }
        Ok(())
    }

    async fn delete_post(&self, post_id: &str, _token: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::remote_error().into());
        }
        self.deleted.lock().unwrap().push(post_id.to_string());
        Ok(())
    }

    async fn get_post(&self, post_id: &str, _token: &str) -> Result<RemotePost> {
        Ok(RemotePost {
            id: post_id.to_string(),
            message: None,
            is_published: false,
            permalink_url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_creates() {
        let api = MockPagesApi::new();
        let payload = PostPayload {
            message: "hello".to_string(),
            ..Default::default()
        };

        let created = api.create_post("page-1", "tok", &payload).await.unwrap();
        assert_eq!(created.id, "page-1_1");
        assert_eq!(api.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.created.lock().unwrap()[0].0, "page-1");
    }

    #[tokio::test]
    async fn test_mock_failure_toggle() {
        let api = MockPagesApi::new();
        api.set_fail_creates(true);
        let payload = PostPayload::default();
        assert!(api.create_post("page-1", "tok", &payload).await.is_err());

        api.set_fail_creates(false);
        assert!(api.create_post("page-1", "tok", &payload).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_default_introspection_is_usable() {
        let api = MockPagesApi::new();
        let info = api.debug_token("tok").await.unwrap();
        assert!(info.is_usable_at(chrono::Utc::now().timestamp()));
    }
}
