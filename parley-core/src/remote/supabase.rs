//! Supabase over REST: PostgREST tables, storage buckets and GoTrue auth.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use parking_lot::RwLock;
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::instrument;

use super::ObjectStorage;
use crate::auth::{AuthEvent, AuthProvider, Session};
use crate::storage::{
    Attachment, Conversation, ConversationId, Message, MessageId, MessageRole, SyncStatus,
};
use crate::sync::{RemoteStore, SettingsRecord, SettingsRemote};

const DEFAULT_BUCKET: &str = "attachments";
const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=minimal";
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    pub anon_key: String,
    pub bucket: String,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            bucket: DEFAULT_BUCKET.to_string(),
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// From `SUPABASE_URL`, `SUPABASE_ANON_KEY` and optional `SUPABASE_BUCKET`.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SUPABASE_URL").ok().filter(|v| !v.is_empty())?;
        let anon_key = std::env::var("SUPABASE_ANON_KEY").ok().filter(|v| !v.is_empty())?;
        let config = Self::new(url, anon_key);
        Some(match std::env::var("SUPABASE_BUCKET") {
            Ok(bucket) if !bucket.is_empty() => config.with_bucket(bucket),
            _ => config,
        })
    }
}

fn to_rfc3339(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_rfc3339(value: &str) -> Result<i64> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid timestamp {value:?}"))?
        .timestamp_millis())
}

#[derive(Debug, Serialize, Deserialize)]
struct ConversationRow {
    id: String,
    user_id: String,
    title: String,
    model: String,
    created_at: String,
    updated_at: String,
    #[serde(default, skip_serializing)]
    messages: Vec<MessageRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageRow {
    id: String,
    conversation_id: String,
    role: MessageRole,
    content: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
    created_at: String,
}

impl ConversationRow {
    fn from_conversation(conversation: &Conversation, user_id: &str) -> Self {
        Self {
            id: conversation.id.to_string(),
            user_id: user_id.to_string(),
            title: conversation.title.clone(),
            model: conversation.model.clone(),
            created_at: to_rfc3339(conversation.created_at),
            updated_at: to_rfc3339(conversation.updated_at),
            messages: Vec::new(),
        }
    }

    fn into_conversation(self) -> Result<Conversation> {
        let updated_at = from_rfc3339(&self.updated_at)?;
        let mut messages = self
            .messages
            .into_iter()
            .map(MessageRow::into_message)
            .collect::<Result<Vec<_>>>()?;
        messages.sort_by_key(|m| m.timestamp);
        Ok(Conversation {
            id: ConversationId::from_string(self.id),
            title: self.title,
            messages,
            created_at: from_rfc3339(&self.created_at)?,
            updated_at,
            model: self.model,
            user_id: Some(self.user_id),
            sync_status: SyncStatus::Synced,
            synced_at: Some(updated_at),
        })
    }
}

impl MessageRow {
    fn from_message(message: &Message, conversation_id: &ConversationId) -> Self {
        Self {
            id: message.id.to_string(),
            conversation_id: conversation_id.to_string(),
            role: message.role,
            content: message.content.clone(),
            // Inline payloads stay on the device.
            attachments: message
                .attachments
                .iter()
                .map(|a| Attachment {
                    data: None,
                    ..a.clone()
                })
                .collect(),
            created_at: to_rfc3339(message.timestamp),
        }
    }

    fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: MessageId::from_string(self.id),
            role: self.role,
            content: self.content,
            timestamp: from_rfc3339(&self.created_at)?,
            is_streaming: false,
            attachments: self.attachments,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsRow {
    user_id: String,
    #[serde(flatten)]
    record: SettingsRecord,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: UserResponse,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            user_id: self.user.id,
            email: self.user.email,
            expires_at,
        }
    }
}

/// Hosted backend client: conversation and settings tables, the
/// attachment bucket and the auth session.
pub struct SupabaseClient {
    config: SupabaseConfig,
    http: reqwest::Client,
    session: RwLock<Option<Session>>,
    auth_events: broadcast::Sender<AuthEvent>,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Self {
        let (auth_events, _) = broadcast::channel(16);
        Self {
            config,
            http: reqwest::Client::new(),
            session: RwLock::new(None),
            auth_events,
        }
    }

    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.url, path)
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.config.url, self.config.bucket, path)
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.url, self.config.bucket, path
        )
    }

    fn bearer(&self) -> String {
        self.session
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.config.anon_key.clone())
    }

    /// Attach the project key and the caller's token.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.anon_key)
            .bearer_auth(self.bearer())
    }

    async fn check(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        bail!(
            "{} failed with status {}: {}",
            what,
            status.as_u16(),
            llm::traffic_log::truncate_for_log(body.trim(), MAX_ERROR_BODY_CHARS)
        )
    }

    fn set_current(&self, session: Option<Session>, event: AuthEvent) {
        *self.session.write() = session;
        let _ = self.auth_events.send(event);
    }

    async fn fetch_user(&self, access_token: &str) -> Result<Response> {
        Ok(self
            .http
            .get(self.auth_url("user"))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?)
    }

    /// Exchange a refresh token for a new session.
    #[instrument(level = "debug", skip_all)]
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        let response = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let token: TokenResponse = Self::check(response, "token refresh").await?.json().await?;
        let session = token.into_session();
        self.set_current(Some(session.clone()), AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl RemoteStore for SupabaseClient {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_page(&self, user_id: &str, offset: usize, limit: usize) -> Result<Vec<Conversation>> {
        let user_filter = format!("eq.{user_id}");
        let request = self.http.get(self.rest_url("conversations")).query(&[
            ("select", "*,messages(*)"),
            ("user_id", user_filter.as_str()),
            ("order", "updated_at.desc,id.asc"),
            ("messages.order", "created_at.asc"),
            ("offset", offset.to_string().as_str()),
            ("limit", limit.to_string().as_str()),
        ]);
        let response = self.authorize(request).send().await?;
        let rows: Vec<ConversationRow> = Self::check(response, "fetching conversations").await?.json().await?;
        rows.into_iter().map(ConversationRow::into_conversation).collect()
    }

    #[instrument(level = "debug", skip(self, conversation), fields(conversation = %conversation.id))]
    async fn push(&self, conversation: &Conversation, user_id: &str) -> Result<()> {
        let row = ConversationRow::from_conversation(conversation, user_id);
        let request = self
            .http
            .post(self.rest_url("conversations"))
            .header("Prefer", MERGE_DUPLICATES)
            .json(&[row]);
        Self::check(self.authorize(request).send().await?, "pushing conversation").await?;

        let messages: Vec<MessageRow> = conversation
            .messages
            .iter()
            .filter(|m| !m.is_streaming)
            .map(|m| MessageRow::from_message(m, &conversation.id))
            .collect();
        if messages.is_empty() {
            return Ok(());
        }
        let request = self
            .http
            .post(self.rest_url("messages"))
            .header("Prefer", MERGE_DUPLICATES)
            .json(&messages);
        Self::check(self.authorize(request).send().await?, "pushing messages").await?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete(&self, id: &ConversationId, user_id: &str) -> Result<()> {
        let id_filter = format!("eq.{id}");
        let user_filter = format!("eq.{user_id}");

        let request = self
            .http
            .delete(self.rest_url("messages"))
            .query(&[("conversation_id", id_filter.as_str())]);
        Self::check(self.authorize(request).send().await?, "deleting messages").await?;

        let request = self
            .http
            .delete(self.rest_url("conversations"))
            .query(&[("id", id_filter.as_str()), ("user_id", user_filter.as_str())]);
        Self::check(self.authorize(request).send().await?, "deleting conversation").await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsRemote for SupabaseClient {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, user_id: &str) -> Result<Option<SettingsRecord>> {
        let user_filter = format!("eq.{user_id}");
        let request = self
            .http
            .get(self.rest_url("user_settings"))
            .query(&[("select", "*"), ("user_id", user_filter.as_str()), ("limit", "1")]);
        let response = self.authorize(request).send().await?;
        let rows: Vec<SettingsRow> = Self::check(response, "fetching settings").await?.json().await?;
        Ok(rows.into_iter().next().map(|row| row.record))
    }

    #[instrument(level = "debug", skip(self, record))]
    async fn upsert(&self, user_id: &str, record: &SettingsRecord) -> Result<()> {
        let row = SettingsRow {
            user_id: user_id.to_string(),
            record: record.clone(),
        };
        let request = self
            .http
            .post(self.rest_url("user_settings"))
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", MERGE_DUPLICATES)
            .json(&[row]);
        Self::check(self.authorize(request).send().await?, "pushing settings").await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for SupabaseClient {
    #[instrument(level = "debug", skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let request = self
            .http
            .post(self.object_url(path))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(bytes);
        Self::check(self.authorize(request).send().await?, "uploading object").await?;
        Ok(self.public_url(path))
    }

    #[instrument(level = "debug", skip(self))]
    async fn remove(&self, path: &str) -> Result<()> {
        let request = self.http.delete(self.object_url(path));
        Self::check(self.authorize(request).send().await?, "removing object").await?;
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for SupabaseClient {
    async fn get_session(&self) -> Result<Option<Session>> {
        Ok(self.session.read().clone())
    }

    /// Validate stored tokens, refreshing them if the access token expired.
    async fn set_session(&self, access_token: &str, refresh_token: &str) -> Result<Session> {
        let response = self.fetch_user(access_token).await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            tracing::debug!("Access token rejected, refreshing");
            return self.refresh_session(refresh_token).await;
        }
        let user: UserResponse = Self::check(response, "fetching user").await?.json().await?;
        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            user_id: user.id,
            email: user.email,
            expires_at: None,
        };
        self.set_current(Some(session.clone()), AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_events.subscribe()
    }

    /// Forget the session locally even if the server call fails.
    async fn sign_out(&self) -> Result<()> {
        let had_session = self.session.read().is_some();
        let result = if had_session {
            let request = self.http.post(self.auth_url("logout"));
            match self.authorize(request).send().await {
                Ok(response) => Self::check(response, "signing out").await.map(|_| ()),
                Err(e) => Err(anyhow!(e)),
            }
        } else {
            Ok(())
        };
        self.set_current(None, AuthEvent::SignedOut);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_round_trip_through_rfc3339() {
        let millis = 1_717_171_717_123;
        let text = to_rfc3339(millis);
        assert_eq!(text, "2024-05-31T16:08:37.123Z");
        assert_eq!(from_rfc3339(&text).unwrap(), millis);
        assert_eq!(from_rfc3339("2024-05-31T16:08:37.123456+00:00").unwrap(), millis);
    }

    #[test]
    fn test_message_rows_drop_inline_payloads() {
        let message = Message::user("look", 0).with_attachments(vec![
            Attachment::image("https://cdn/x.png", "x.png", "image/png").with_data("aGVsbG8="),
        ]);
        let row = MessageRow::from_message(&message, &ConversationId::from_string("c1"));
        assert!(row.attachments[0].data.is_none());
        assert_eq!(row.conversation_id, "c1");
    }

    #[test]
    fn test_public_url() {
        let client = SupabaseClient::new(SupabaseConfig::new("https://proj.supabase.co/", "anon"));
        assert_eq!(
            client.public_url("u1/c1/m1/a-x.png"),
            "https://proj.supabase.co/storage/v1/object/public/attachments/u1/c1/m1/a-x.png"
        );
    }
}
