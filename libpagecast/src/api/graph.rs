//! Graph API client
//!
//! Thin `reqwest` wrapper around the remote publishing endpoints. Every call
//! has a bounded timeout and returns a structured error; callers decide what
//! to do with failures.

use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{
    CreatedPost, Endpoint, PagesApi, PostPayload, PostUpdate, RemotePage, RemotePost,
    TokenIntrospection,
};
use crate::config::RemoteConfig;
use crate::error::{ApiError, Result};
use crate::types::TokenData;

/// Pagination safety limits when fetching the user's pages.
const MAX_PAGES: usize = 200;
const MAX_BATCHES: usize = 10;

pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    app_secret: String,
}

impl GraphClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("pagecast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::from)?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            app_secret: config.app_secret.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// App access token used by the token introspection endpoint.
    fn app_access_token(&self) -> String {
        format!("{}|{}", self.app_id, self.app_secret)
    }

    async fn get_json(&self, url: &str, params: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(ApiError::from)?;
        let body = response.text().await.map_err(ApiError::from)?;
        parse_body(&body)
    }

    async fn post_form(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        let response = self
            .http
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(ApiError::from)?;
        let body = response.text().await.map_err(ApiError::from)?;
        parse_body(&body)
    }

    async fn post_multipart(&self, url: &str, form: reqwest::multipart::Form) -> Result<Value> {
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(ApiError::from)?;
        let body = response.text().await.map_err(ApiError::from)?;
        parse_body(&body)
    }

    /// Upload one photo to a page. `published = false` keeps the photo out
    /// of the timeline so it can be attached to a carousel post.
    async fn upload_photo(
        &self,
        page_id: &str,
        token: &str,
        image_url: &str,
        image_path: &str,
        caption: Option<&str>,
        published: bool,
        scheduled_publish_time: Option<i64>,
    ) -> Result<Value> {
        let url = self.url(&format!("{}/photos", page_id));

        let use_local_file = !image_path.is_empty() && Path::new(image_path).exists();
        if use_local_file {
            let bytes = tokio::fs::read(image_path)
                .await
                .map_err(|e| ApiError::Transport(format!("failed to read {}: {}", image_path, e)))?;
            let file_name = Path::new(image_path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "upload".to_string());

            let mut form = reqwest::multipart::Form::new()
                .text("access_token", token.to_string())
                .part(
                    "source",
                    reqwest::multipart::Part::bytes(bytes).file_name(file_name),
                );
            if let Some(caption) = caption {
                form = form.text("caption", caption.to_string());
            }
            if !published {
                form = form.text("published", "false".to_string());
            }
            if let Some(ts) = scheduled_publish_time {
                form = form
                    .text("published", "false".to_string())
                    .text("scheduled_publish_time", ts.to_string());
            }
            self.post_multipart(&url, form).await
        } else {
            let mut params: Vec<(&str, String)> = vec![
                ("access_token", token.to_string()),
                ("url", image_url.to_string()),
            ];
            if let Some(caption) = caption {
                params.push(("caption", caption.to_string()));
            }
            if !published {
                params.push(("published", "false".to_string()));
            }
            if let Some(ts) = scheduled_publish_time {
                params.push(("published", "false".to_string()));
                params.push(("scheduled_publish_time", ts.to_string()));
            }
            self.post_form(&url, &params).await
        }
    }
}

#[async_trait]
impl PagesApi for GraphClient {
    async fn exchange_token(&self, token: &str) -> Result<TokenData> {
        let url = self.url("oauth/access_token");
        let data = self
            .get_json(
                &url,
                &[
                    ("grant_type", "fb_exchange_token"),
                    ("client_id", &self.app_id),
                    ("client_secret", &self.app_secret),
                    ("fb_exchange_token", token),
                ],
            )
            .await?;

        let access_token = data
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ApiError::InvalidResponse("exchange response missing access_token".to_string())
            })?
            .to_string();

        let expires_in = data.get("expires_in").and_then(Value::as_i64).unwrap_or(0);
        let now = chrono::Utc::now().timestamp();

        Ok(TokenData {
            access_token,
            token_type: data
                .get("token_type")
                .and_then(Value::as_str)
                .unwrap_or("bearer")
                .to_string(),
            expires_in,
            // 0 means the exchanged token never expires.
            expires_at: if expires_in > 0 { now + expires_in } else { 0 },
            created_at: now,
            is_long_lived: true,
            page_id: None,
            page_name: None,
        })
    }

    async fn debug_token(&self, token: &str) -> Result<TokenIntrospection> {
        let url = self.url("debug_token");
        let app_token = self.app_access_token();
        let data = self
            .get_json(
                &url,
                &[("input_token", token), ("access_token", app_token.as_str())],
            )
            .await?;

        let info = data.get("data").ok_or_else(|| {
            ApiError::InvalidResponse("debug_token response missing data".to_string())
        })?;

        Ok(TokenIntrospection {
            is_valid: info.get("is_valid").and_then(Value::as_bool).unwrap_or(false),
            expires_at: info.get("expires_at").and_then(Value::as_i64).unwrap_or(0),
            scopes: info
                .get("scopes")
                .and_then(Value::as_array)
                .map(|scopes| {
                    scopes
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    async fn fetch_user_pages(&self, user_token: &str) -> Result<Vec<RemotePage>> {
        let mut pages = Vec::new();
        let mut next_url: Option<String> = None;
        let mut batches = 0;

        loop {
            batches += 1;
            let data = match &next_url {
                Some(url) => self.get_json(url, &[]).await?,
                None => {
                    let url = self.url("me/accounts");
                    self.get_json(
                        &url,
                        &[
                            ("access_token", user_token),
                            ("fields", "id,name,access_token,category,fan_count,tasks"),
                            ("limit", "25"),
                        ],
                    )
                    .await?
                }
            };

            if let Some(batch) = data.get("data").and_then(Value::as_array) {
                for page in batch {
                    if let Ok(page) = serde_json::from_value::<RemotePage>(page.clone()) {
                        pages.push(page);
                    }
                }
            }

            next_url = data
                .get("paging")
                .and_then(|p| p.get("next"))
                .and_then(Value::as_str)
                .map(str::to_string);

            if next_url.is_none() || pages.len() >= MAX_PAGES || batches >= MAX_BATCHES {
                break;
            }
        }

        tracing::debug!(count = pages.len(), "Fetched user pages");
        Ok(pages)
    }

    async fn create_post(
        &self,
        page_id: &str,
        token: &str,
        payload: &PostPayload,
    ) -> Result<CreatedPost> {
        let data = match payload.endpoint() {
            Endpoint::Photos => {
                let image = &payload.images[0];
                // The photo endpoint takes the text as `caption`, not
                // `message`.
                self.upload_photo(
                    page_id,
                    token,
                    &image.url,
                    &image.local_path,
                    Some(&payload.message),
                    true,
                    payload.scheduled_publish_time,
                )
                .await?
            }
            Endpoint::Videos => {
                let url = self.url(&format!("{}/videos", page_id));
                let video = payload.video.as_ref().ok_or_else(|| {
                    ApiError::InvalidResponse("video payload without video".to_string())
                })?;

                if !video.local_path.is_empty() && Path::new(&video.local_path).exists() {
                    let bytes = tokio::fs::read(&video.local_path).await.map_err(|e| {
                        ApiError::Transport(format!("failed to read {}: {}", video.local_path, e))
                    })?;
                    let file_name = Path::new(&video.local_path)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| "video".to_string());

                    let mut form = reqwest::multipart::Form::new()
                        .text("access_token", token.to_string())
                        .text("description", payload.message.clone())
                        .part(
                            "source",
                            reqwest::multipart::Part::bytes(bytes).file_name(file_name),
                        );
                    if let Some(ts) = payload.scheduled_publish_time {
                        form = form
                            .text("published", "false".to_string())
                            .text("scheduled_publish_time", ts.to_string());
                    }
                    self.post_multipart(&url, form).await?
                } else {
                    let mut params: Vec<(&str, String)> = vec![
                        ("access_token", token.to_string()),
                        ("description", payload.message.clone()),
                        ("file_url", video.url.clone()),
                    ];
                    if let Some(ts) = payload.scheduled_publish_time {
                        params.push(("published", "false".to_string()));
                        params.push(("scheduled_publish_time", ts.to_string()));
                    }
                    self.post_form(&url, &params).await?
                }
            }
            Endpoint::Feed if payload.is_carousel() => {
                // Upload every photo unpublished, then attach them in order
                // to a single feed post.
                let mut media_ids = Vec::with_capacity(payload.images.len());
                for image in &payload.images {
                    let uploaded = self
                        .upload_photo(
                            page_id,
                            token,
                            &image.url,
                            &image.local_path,
                            None,
                            false,
                            None,
                        )
                        .await?;
                    let id = uploaded
                        .get("id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            ApiError::InvalidResponse(
                                "photo upload response missing id".to_string(),
                            )
                        })?
                        .to_string();
                    media_ids.push(id);
                }

                let url = self.url(&format!("{}/feed", page_id));
                let mut params: Vec<(String, String)> = vec![
                    ("access_token".to_string(), token.to_string()),
                    ("message".to_string(), payload.message.clone()),
                ];
                for (i, media_id) in media_ids.iter().enumerate() {
                    params.push((
                        format!("attached_media[{}]", i),
                        format!(r#"{{"media_fbid":"{}"}}"#, media_id),
                    ));
                }
                if let Some(ts) = payload.scheduled_publish_time {
                    params.push(("published".to_string(), "false".to_string()));
                    params.push(("scheduled_publish_time".to_string(), ts.to_string()));
                }

                let owned: Vec<(&str, String)> = params
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.clone()))
                    .collect();
                self.post_form(&url, &owned).await?
            }
            Endpoint::Feed => {
                let url = self.url(&format!("{}/feed", page_id));
                let mut params: Vec<(&str, String)> = vec![
                    ("access_token", token.to_string()),
                    ("message", payload.message.clone()),
                ];
                if !payload.link.is_empty() {
                    params.push(("link", payload.link.clone()));
                }
                if let Some(ts) = payload.scheduled_publish_time {
                    params.push(("published", "false".to_string()));
                    params.push(("scheduled_publish_time", ts.to_string()));
                }
                self.post_form(&url, &params).await?
            }
        };

        let id = data
            .get("post_id")
            .or_else(|| data.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::InvalidResponse("create response missing id".to_string()))?
            .to_string();

        Ok(CreatedPost {
            id,
            permalink_url: data
                .get("permalink_url")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn update_post(&self, post_id: &str, token: &str, update: &PostUpdate) -> Result<()> {
        let url = self.url(post_id);
        let mut params: Vec<(&str, String)> = vec![("access_token", token.to_string())];
        if let Some(message) = &update.message {
            params.push(("message", message.clone()));
        }
        if let Some(ts) = update.scheduled_publish_time {
            params.push(("scheduled_publish_time", ts.to_string()));
        }
        self.post_form(&url, &params).await?;
        Ok(())
    }

    async fn delete_post(&self, post_id: &str, token: &str) -> Result<()> {
        let url = self.url(post_id);
        let response = self
            .http
            .delete(&url)
            .query(&[("access_token", token)])
            .send()
            .await
            .map_err(ApiError::from)?;
        let body = response.text().await.map_err(ApiError::from)?;
        let data = parse_body(&body)?;

        if data.get("success").and_then(Value::as_bool) == Some(true) {
            Ok(())
        } else {
            Err(ApiError::InvalidResponse("delete did not report success".to_string()).into())
        }
    }

    async fn get_post(&self, post_id: &str, token: &str) -> Result<RemotePost> {
        let url = self.url(post_id);
        let data = self
            .get_json(
                &url,
                &[
                    ("access_token", token),
                    (
                        "fields",
                        "id,message,created_time,scheduled_publish_time,is_published,permalink_url",
                    ),
                ],
            )
            .await?;

        serde_json::from_value(data)
            .map_err(|e| ApiError::InvalidResponse(format!("malformed post: {}", e)).into())
    }
}

/// Parse a response body, surfacing the service's structured error when
/// present.
fn parse_body(body: &str) -> Result<Value> {
    let data: Value = serde_json::from_str(body)
        .map_err(|e| ApiError::InvalidResponse(format!("invalid JSON response: {}", e)))?;

    if let Some(error) = data.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(ApiError::Remote { code, message }.into());
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PagecastError;

    #[test]
    fn test_parse_body_success() {
        let value = parse_body(r#"{"id":"123_456","permalink_url":"https://fb/p"}"#).unwrap();
        assert_eq!(value["id"], "123_456");
    }

    #[test]
    fn test_parse_body_structured_error() {
        let err = parse_body(
            r#"{"error":{"message":"Invalid OAuth access token","type":"OAuthException","code":190}}"#,
        )
        .unwrap_err();

        match err {
            PagecastError::Api(ApiError::Remote { code, message }) => {
                assert_eq!(code, 190);
                assert_eq!(message, "Invalid OAuth access token");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_body_invalid_json() {
        let err = parse_body("<html>gateway timeout</html>").unwrap_err();
        assert!(matches!(
            err,
            PagecastError::Api(ApiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_client_url_joining() {
        let config = RemoteConfig {
            app_id: "1".to_string(),
            app_secret: "2".to_string(),
            api_base_url: "https://graph.facebook.com/v23.0/".to_string(),
            timeout_secs: 5,
        };
        let client = GraphClient::new(&config).unwrap();
        assert_eq!(
            client.url("me/accounts"),
            "https://graph.facebook.com/v23.0/me/accounts"
        );
        assert_eq!(client.app_access_token(), "1|2");
    }
}
