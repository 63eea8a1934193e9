//! REST fallback surface consumed by the reconciliation layer and the
//! notification feed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::events::{NotificationEntry, WireMessage};

#[derive(Debug, Clone, Error)]
pub enum RestError {
    /// The server answered with a non-success status.
    #[error("{status}: {message}")]
    Status { status: u16, message: String },
    /// The request never completed.
    #[error("request failed: {0}")]
    Transport(String),
}

impl RestError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, RestError::Status { status: 401 | 403, .. })
    }

    /// Permanent failures are surfaced instead of retried; everything else
    /// (5xx, transport) stays eligible for the retry window.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RestError::Status { status, .. } if (400..500).contains(status))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateMessageRequest {
    pub channel_id: String,
    pub content: String,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocialPostDraft {
    pub project_id: String,
    pub content: String,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SocialPostRecord {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub platform: String,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPage {
    pub entries: Vec<NotificationEntry>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    /// Authoritative unread total when the server includes one.
    #[serde(default)]
    pub unread_total: Option<u64>,
}

/// Everything the realtime layer asks of the REST backend. Abstracted so
/// component tests substitute canned responses.
#[async_trait]
pub trait RestApi: Send + Sync {
    async fn create_message(
        &self,
        idempotency_key: &str,
        request: &CreateMessageRequest,
    ) -> Result<WireMessage, RestError>;
    async fn update_message(&self, message_id: &str, content: &str)
        -> Result<WireMessage, RestError>;
    async fn delete_message(&self, message_id: &str) -> Result<(), RestError>;

    async fn create_social_post(
        &self,
        idempotency_key: &str,
        draft: &SocialPostDraft,
    ) -> Result<SocialPostRecord, RestError>;
    async fn update_social_post(
        &self,
        post_id: &str,
        draft: &SocialPostDraft,
    ) -> Result<SocialPostRecord, RestError>;
    async fn delete_social_post(&self, post_id: &str) -> Result<(), RestError>;
    async fn list_social_posts(&self, project_id: &str) -> Result<Vec<SocialPostRecord>, RestError>;

    async fn add_project_member(
        &self,
        idempotency_key: &str,
        project_id: &str,
        member_id: &str,
    ) -> Result<(), RestError>;
    async fn remove_project_member(
        &self,
        project_id: &str,
        member_id: &str,
        reason: Option<&str>,
    ) -> Result<(), RestError>;

    async fn list_notifications(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<NotificationPage, RestError>;
    async fn mark_notification_read(&self, notification_id: &str) -> Result<(), RestError>;
    async fn mark_all_notifications_read(&self) -> Result<(), RestError>;
    async fn delete_notification(&self, notification_id: &str) -> Result<(), RestError>;
    async fn notification_unread_count(&self) -> Result<u64, RestError>;
}

/// Production client: bearer auth on every call, `Idempotency-Key` on
/// creates so a retried request cannot double-create server-side.
pub struct HttpRestClient {
    http: reqwest::Client,
    base_url: String,
    credential: String,
}

impl HttpRestClient {
    pub fn new(base_url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential: credential.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, RestError> {
        let response = request
            .bearer_auth(&self.credential)
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let code = status.as_u16();
        let message = response
            .json::<ApiErrorBody>()
            .await
            .map(|body| body.error.message)
            .unwrap_or_else(|_| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        Err(RestError::Status {
            status: code,
            message,
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RestError> {
        response
            .json::<T>()
            .await
            .map_err(|e| RestError::Transport(format!("malformed response body: {e}")))
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Deserialize)]
struct CountBody {
    count: u64,
}

#[async_trait]
impl RestApi for HttpRestClient {
    async fn create_message(
        &self,
        idempotency_key: &str,
        request: &CreateMessageRequest,
    ) -> Result<WireMessage, RestError> {
        let response = self
            .execute(
                self.http
                    .post(self.url(&format!("/channels/{}/messages", request.channel_id)))
                    .header("Idempotency-Key", idempotency_key)
                    .json(&json!({
                        "content": request.content,
                        "reply_to": request.reply_to,
                    })),
            )
            .await?;
        Self::decode(response).await
    }

    async fn update_message(
        &self,
        message_id: &str,
        content: &str,
    ) -> Result<WireMessage, RestError> {
        let response = self
            .execute(
                self.http
                    .patch(self.url(&format!("/messages/{message_id}")))
                    .json(&json!({ "content": content })),
            )
            .await?;
        Self::decode(response).await
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), RestError> {
        self.execute(self.http.delete(self.url(&format!("/messages/{message_id}"))))
            .await?;
        Ok(())
    }

    async fn create_social_post(
        &self,
        idempotency_key: &str,
        draft: &SocialPostDraft,
    ) -> Result<SocialPostRecord, RestError> {
        let response = self
            .execute(
                self.http
                    .post(self.url("/social-posts"))
                    .header("Idempotency-Key", idempotency_key)
                    .json(draft),
            )
            .await?;
        Self::decode(response).await
    }

    async fn update_social_post(
        &self,
        post_id: &str,
        draft: &SocialPostDraft,
    ) -> Result<SocialPostRecord, RestError> {
        let response = self
            .execute(
                self.http
                    .patch(self.url(&format!("/social-posts/{post_id}")))
                    .json(draft),
            )
            .await?;
        Self::decode(response).await
    }

    async fn delete_social_post(&self, post_id: &str) -> Result<(), RestError> {
        self.execute(
            self.http
                .delete(self.url(&format!("/social-posts/{post_id}"))),
        )
        .await?;
        Ok(())
    }

    async fn list_social_posts(
        &self,
        project_id: &str,
    ) -> Result<Vec<SocialPostRecord>, RestError> {
        let response = self
            .execute(
                self.http
                    .get(self.url(&format!("/projects/{project_id}/social-posts"))),
            )
            .await?;
        Self::decode(response).await
    }

    async fn add_project_member(
        &self,
        idempotency_key: &str,
        project_id: &str,
        member_id: &str,
    ) -> Result<(), RestError> {
        self.execute(
            self.http
                .put(self.url(&format!("/projects/{project_id}/members/{member_id}")))
                .header("Idempotency-Key", idempotency_key),
        )
        .await?;
        Ok(())
    }

    async fn remove_project_member(
        &self,
        project_id: &str,
        member_id: &str,
        reason: Option<&str>,
    ) -> Result<(), RestError> {
        self.execute(
            self.http
                .delete(self.url(&format!("/projects/{project_id}/members/{member_id}")))
                .json(&json!({ "reason": reason })),
        )
        .await?;
        Ok(())
    }

    async fn list_notifications(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<NotificationPage, RestError> {
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let response = self
            .execute(self.http.get(self.url("/notifications")).query(&query))
            .await?;
        Self::decode(response).await
    }

    async fn mark_notification_read(&self, notification_id: &str) -> Result<(), RestError> {
        self.execute(
            self.http
                .put(self.url(&format!("/notifications/{notification_id}/read"))),
        )
        .await?;
        Ok(())
    }

    async fn mark_all_notifications_read(&self) -> Result<(), RestError> {
        self.execute(self.http.put(self.url("/notifications/read-all")))
            .await?;
        Ok(())
    }

    async fn delete_notification(&self, notification_id: &str) -> Result<(), RestError> {
        self.execute(
            self.http
                .delete(self.url(&format!("/notifications/{notification_id}"))),
        )
        .await?;
        Ok(())
    }

    async fn notification_unread_count(&self) -> Result<u64, RestError> {
        let response = self
            .execute(self.http.get(self.url("/notifications/unread-count")))
            .await?;
        let body: CountBody = Self::decode(response).await?;
        Ok(body.count)
    }
}
