//! Credential lifecycle management
//!
//! Keeps the delegated-access tokens the publisher depends on valid: user
//! tokens from the OAuth flow, one page token per target page. Tokens are
//! stored encrypted (see `crypto`), exchanged for long-lived variants when
//! possible, validated against the remote introspection endpoint before use,
//! and refreshed from the owner's page list when validation fails.
//!
//! Every failure on a read path degrades to "absent credential": the caller
//! sees `None`, the log sees why. Token values never reach the log.

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;

use crate::api::PagesApi;
use crate::crypto::TokenCipher;
use crate::db::Database;
use crate::error::Result;
use crate::types::TokenData;

/// Page credentials expiring within this horizon get re-exchanged by the
/// maintenance sweep.
const REFRESH_HORIZON_SECS: i64 = 7 * 24 * 3600;

pub struct CredentialManager {
    db: Database,
    cipher: Arc<TokenCipher>,
    api: Arc<dyn PagesApi>,
    tz: Tz,
    /// The connected operator account whose pages back the refresh path.
    owner_user: i64,
}

impl CredentialManager {
    pub fn new(
        db: Database,
        cipher: Arc<TokenCipher>,
        api: Arc<dyn PagesApi>,
        tz: Tz,
        owner_user: i64,
    ) -> Self {
        Self {
            db,
            cipher,
            api,
            tz,
            owner_user,
        }
    }

    fn now_local(&self) -> chrono::NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }

    fn decode(&self, envelope: &str, context: &str) -> Option<TokenData> {
        let plaintext = match self.cipher.decrypt(envelope) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(context, error = %e, "Failed to decrypt stored credential");
                return None;
            }
        };
        match serde_json::from_str::<TokenData>(&plaintext) {
            Ok(token) if !token.access_token.is_empty() => Some(token),
            Ok(_) => {
                tracing::warn!(context, "Stored credential has an empty access token");
                None
            }
            Err(e) => {
                tracing::warn!(context, error = %e, "Stored credential payload is malformed");
                None
            }
        }
    }

    // ========================================================================
    // User credentials
    // ========================================================================

    /// Encrypt and store a user token, replacing any prior credential.
    pub async fn store_user_token(&self, user_id: i64, token: &TokenData) -> Result<()> {
        let plaintext = serde_json::to_string(token).unwrap_or_default();
        let envelope = self.cipher.encrypt(&plaintext)?;
        let now = self.now_local();
        self.db.upsert_user_token(user_id, &envelope, &now).await?;
        tracing::info!(user_id, "User token stored");
        Ok(())
    }

    /// The stored user token, or `None` if missing, undecryptable,
    /// malformed, or expired.
    pub async fn get_user_token(&self, user_id: i64) -> Result<Option<TokenData>> {
        let Some(envelope) = self.db.get_user_token_envelope(user_id).await? else {
            return Ok(None);
        };
        let Some(token) = self.decode(&envelope, "user token") else {
            return Ok(None);
        };

        if token.is_expired_at(Utc::now().timestamp()) {
            tracing::warn!(user_id, "User token has expired");
            return Ok(None);
        }
        Ok(Some(token))
    }

    /// Delete a user token. Absence is not an error.
    pub async fn remove_user_token(&self, user_id: i64) -> Result<()> {
        self.db.delete_user_token(user_id).await?;
        tracing::info!(user_id, "User token removed");
        Ok(())
    }

    // ========================================================================
    // Page credentials
    // ========================================================================

    /// Store a page token, upgrading it to a long-lived one first when the
    /// incoming payload is not already marked as such. Exchange failure is
    /// non-fatal: the original payload is stored with a warning.
    ///
    /// Returns the payload that was actually persisted.
    pub async fn store_page_token(&self, page_id: &str, token: &TokenData) -> Result<TokenData> {
        let mut token = token.clone();

        if !token.is_long_lived {
            match self.api.exchange_token(&token.access_token).await {
                Ok(exchanged) => {
                    tracing::info!(page_id, "Exchanged page token for a long-lived token");
                    token = TokenData {
                        page_id: token.page_id.clone().or(Some(page_id.to_string())),
                        page_name: token.page_name.clone(),
                        ..exchanged
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        page_id,
                        error = %e,
                        "Long-lived exchange failed, storing original token"
                    );
                }
            }
        }

        let plaintext = serde_json::to_string(&token).unwrap_or_default();
        let envelope = self.cipher.encrypt(&plaintext)?;
        let now = self.now_local();
        self.db.upsert_page_token(page_id, &envelope, &now).await?;
        tracing::info!(page_id, "Page token stored");
        Ok(token)
    }

    /// The validated token for a page, or `None`.
    ///
    /// The stored token is introspected against the remote service before
    /// use; an invalid result triggers one automatic refresh attempt through
    /// the owner's page list.
    pub async fn get_page_token(&self, page_id: &str) -> Result<Option<TokenData>> {
        let Some(envelope) = self.db.get_page_token_envelope(page_id).await? else {
            tracing::warn!(page_id, "No token stored for page");
            return Ok(None);
        };
        let Some(token) = self.decode(&envelope, "page token") else {
            return Ok(None);
        };

        let now = Utc::now().timestamp();
        if token.is_expired_at(now) {
            tracing::warn!(page_id, "Stored page token has expired");
            return self.refresh_page_token(page_id).await;
        }

        match self.api.debug_token(&token.access_token).await {
            Ok(info) if info.is_usable_at(now) => Ok(Some(token)),
            Ok(info) => {
                tracing::warn!(
                    page_id,
                    is_valid = info.is_valid,
                    missing_scopes = ?info.missing_scopes(),
                    "Page token failed validation, attempting refresh"
                );
                self.refresh_page_token(page_id).await
            }
            Err(e) => {
                tracing::warn!(page_id, error = %e, "Token introspection failed, attempting refresh");
                self.refresh_page_token(page_id).await
            }
        }
    }

    /// Re-fetch the owner's pages and store the fresh token for this page if
    /// it is among them.
    async fn refresh_page_token(&self, page_id: &str) -> Result<Option<TokenData>> {
        let Some(user_token) = self.get_user_token(self.owner_user).await? else {
            tracing::warn!(page_id, "No valid user token available for page token refresh");
            return Ok(None);
        };

        let pages = match self.api.fetch_user_pages(&user_token.access_token).await {
            Ok(pages) => pages,
            Err(e) => {
                tracing::warn!(page_id, error = %e, "Failed to fetch pages for token refresh");
                return Ok(None);
            }
        };

        let Some(page) = pages
            .iter()
            .find(|p| p.id == page_id && !p.access_token.is_empty())
        else {
            tracing::warn!(page_id, "Page not found among the owner's pages");
            return Ok(None);
        };

        let fresh = TokenData {
            page_id: Some(page.id.clone()),
            page_name: Some(page.name.clone()),
            // Page tokens from the accounts listing do not expire.
            expires_at: 0,
            ..TokenData::new(page.access_token.clone())
        };

        let stored = self.store_page_token(page_id, &fresh).await?;
        tracing::info!(page_id, "Page token refreshed");
        Ok(Some(stored))
    }

    /// Delete a page token. Absence is not an error.
    pub async fn remove_page_token(&self, page_id: &str) -> Result<()> {
        self.db.delete_page_token(page_id).await?;
        tracing::info!(page_id, "Page token removed");
        Ok(())
    }

    /// Maintenance sweep: re-exchange every page token with a real expiry
    /// inside the 7-day horizon. Returns how many were refreshed.
    pub async fn refresh_all_tokens(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let mut refreshed = 0;

        for (page_id, envelope) in self.db.list_page_token_envelopes().await? {
            let Some(token) = self.decode(&envelope, "page token") else {
                continue;
            };
            if token.expires_at == 0 || token.expires_at - now >= REFRESH_HORIZON_SECS {
                continue;
            }

            match self.api.exchange_token(&token.access_token).await {
                Ok(exchanged) => {
                    let merged = TokenData {
                        page_id: token.page_id.clone().or(Some(page_id.clone())),
                        page_name: token.page_name.clone(),
                        ..exchanged
                    };
                    let plaintext = serde_json::to_string(&merged).unwrap_or_default();
                    let sealed = self.cipher.encrypt(&plaintext)?;
                    let local_now = self.now_local();
                    self.db.upsert_page_token(&page_id, &sealed, &local_now).await?;
                    tracing::info!(page_id = %page_id, "Token refreshed");
                    refreshed += 1;
                }
                Err(e) => {
                    tracing::warn!(page_id = %page_id, error = %e, "Failed to refresh token");
                }
            }
        }

        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockPagesApi, RemotePage, TokenIntrospection};

    async fn manager() -> (CredentialManager, Arc<MockPagesApi>) {
        let db = Database::in_memory().await.unwrap();
        let cipher = Arc::new(TokenCipher::from_key(&[9u8; 32]));
        let api = Arc::new(MockPagesApi::new());
        let manager =
            CredentialManager::new(db, cipher, api.clone(), chrono_tz::UTC, 1);
        (manager, api)
    }

    fn page(id: &str, token: &str) -> RemotePage {
        RemotePage {
            id: id.to_string(),
            name: format!("Page {}", id),
            access_token: token.to_string(),
            category: String::new(),
            fan_count: 0,
            tasks: vec![],
        }
    }

    #[tokio::test]
    async fn test_user_token_roundtrip() {
        let (manager, _) = manager().await;
        let token = TokenData::new("user-secret".to_string());

        manager.store_user_token(1, &token).await.unwrap();
        let loaded = manager.get_user_token(1).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "user-secret");
    }

    #[tokio::test]
    async fn test_user_token_absent() {
        let (manager, _) = manager().await;
        assert!(manager.get_user_token(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_user_token_never_returned() {
        let (manager, _) = manager().await;
        let mut token = TokenData::new("stale".to_string());
        token.expires_at = Utc::now().timestamp() - 60;

        manager.store_user_token(1, &token).await.unwrap();
        assert!(manager.get_user_token(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undecryptable_envelope_is_absent() {
        let (manager, _) = manager().await;
        let now = manager.now_local();
        manager
            .db
            .upsert_user_token(1, "not an envelope", &now)
            .await
            .unwrap();
        assert!(manager.get_user_token(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_stored_encrypted() {
        let (manager, _) = manager().await;
        let token = TokenData::new("visible-secret".to_string());
        manager.store_user_token(1, &token).await.unwrap();

        let envelope = manager
            .db
            .get_user_token_envelope(1)
            .await
            .unwrap()
            .unwrap();
        assert!(!envelope.contains("visible-secret"));
    }

    #[tokio::test]
    async fn test_store_page_token_exchanges_short_lived() {
        let (manager, api) = manager().await;
        let token = TokenData::new("short".to_string());

        let stored = manager.store_page_token("p1", &token).await.unwrap();
        assert_eq!(api.exchange_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(stored.is_long_lived);
        assert_eq!(stored.access_token, "long-lived-short");
        assert_eq!(stored.page_id, Some("p1".to_string()));
    }

    #[tokio::test]
    async fn test_store_page_token_skips_exchange_for_long_lived() {
        let (manager, api) = manager().await;
        let mut token = TokenData::new("already-long".to_string());
        token.is_long_lived = true;

        let stored = manager.store_page_token("p1", &token).await.unwrap();
        assert_eq!(api.exchange_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(stored.access_token, "already-long");
    }

    #[tokio::test]
    async fn test_store_page_token_exchange_failure_keeps_original() {
        let (manager, api) = manager().await;
        api.set_fail_exchange(true);
        let token = TokenData::new("short".to_string());

        let stored = manager.store_page_token("p1", &token).await.unwrap();
        assert_eq!(stored.access_token, "short");
        assert!(!stored.is_long_lived);

        // And the stored row holds the original too.
        api.set_fail_exchange(false);
        let loaded = manager.get_page_token("p1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "short");
    }

    #[tokio::test]
    async fn test_get_page_token_validates_and_returns() {
        let (manager, api) = manager().await;
        let mut token = TokenData::new("page-token".to_string());
        token.is_long_lived = true;
        manager.store_page_token("p1", &token).await.unwrap();

        let loaded = manager.get_page_token("p1").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "page-token");
        assert!(api.debug_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_invalid_token_triggers_refresh() {
        let (manager, api) = manager().await;

        let mut stale = TokenData::new("stale-token".to_string());
        stale.is_long_lived = true;
        manager.store_page_token("p1", &stale).await.unwrap();

        // Introspection says invalid, but the owner still manages the page.
        api.set_introspection(TokenIntrospection {
            is_valid: false,
            expires_at: 0,
            scopes: vec![],
        });
        api.set_pages(vec![page("p1", "fresh-token"), page("p2", "other")]);
        manager
            .store_user_token(1, &TokenData::new("user-token".to_string()))
            .await
            .unwrap();

        let refreshed = manager.get_page_token("p1").await.unwrap().unwrap();
        // The refreshed token goes through the long-lived exchange on store.
        assert_eq!(refreshed.access_token, "long-lived-fresh-token");
        assert_eq!(refreshed.page_name, Some("Page p1".to_string()));
        assert_eq!(
            api.fetch_pages_calls.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_invalid_token_without_user_token_is_absent() {
        let (manager, api) = manager().await;
        let mut stale = TokenData::new("stale".to_string());
        stale.is_long_lived = true;
        manager.store_page_token("p1", &stale).await.unwrap();

        api.set_introspection(TokenIntrospection {
            is_valid: false,
            expires_at: 0,
            scopes: vec![],
        });

        assert!(manager.get_page_token("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_scope_fails_validation() {
        let (manager, api) = manager().await;
        let mut token = TokenData::new("partial".to_string());
        token.is_long_lived = true;
        manager.store_page_token("p1", &token).await.unwrap();

        api.set_introspection(TokenIntrospection {
            is_valid: true,
            expires_at: 0,
            scopes: vec!["pages_show_list".to_string()],
        });

        // Valid but missing pages_manage_posts: unusable, no refresh path.
        assert!(manager.get_page_token("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_page_token_never_returned() {
        let (manager, _) = manager().await;
        let mut token = TokenData::new("stale-page".to_string());
        token.is_long_lived = true;
        token.expires_at = Utc::now().timestamp() - 60;
        manager.store_page_token("p1", &token).await.unwrap();

        // Expired, and no user token to refresh from: absent, even though
        // the row is still in storage.
        assert!(manager.get_page_token("p1").await.unwrap().is_none());
        assert!(manager
            .db
            .get_page_token_envelope("p1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (manager, _) = manager().await;
        manager.remove_page_token("ghost").await.unwrap();
        manager.remove_user_token(42).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_all_tokens_horizon() {
        let (manager, api) = manager().await;
        let now = Utc::now().timestamp();

        // Expiring in 3 days: inside the horizon.
        let mut expiring = TokenData::new("expiring".to_string());
        expiring.is_long_lived = true;
        expiring.expires_at = now + 3 * 24 * 3600;
        manager.store_page_token("soon", &expiring).await.unwrap();

        // Never expires: left alone.
        let mut forever = TokenData::new("forever".to_string());
        forever.is_long_lived = true;
        manager.store_page_token("never", &forever).await.unwrap();

        let refreshed = manager.refresh_all_tokens().await.unwrap();
        assert_eq!(refreshed, 1);
        assert_eq!(api.exchange_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let updated = manager.get_page_token("soon").await.unwrap().unwrap();
        assert_eq!(updated.access_token, "long-lived-expiring");
        let untouched = manager.get_page_token("never").await.unwrap().unwrap();
        assert_eq!(untouched.access_token, "forever");
    }
}
