use std::collections::HashSet;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use futures_util::future::join_all;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde_json::Value;
use url::Url;

use crate::api::models::{ChatMessage, ChatPatch, DirectoryUser, NewChatMessage, extract_items};
use crate::app::Session;
use crate::conversations::Conversation;
use crate::error::{ClientError, Result};
use crate::identity::{Directory, Identity};

/// REST and SSE access to the chat content type.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: HttpClient,
    base: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(session: &Session) -> Result<Self> {
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base: session.base_url().clone(),
            token: session.token().map(str::to_string),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    fn with_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn checked(req: RequestBuilder, endpoint: &Url) -> Result<Response> {
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status {
                status: resp.status().as_u16(),
                endpoint: endpoint.path().to_string(),
            });
        }
        Ok(resp)
    }

    /// `GET /api/Chat?where=<field>=<value>`. The backend only supports a
    /// single equality predicate per request.
    pub async fn list_chats(&self, field: &str, value: &str) -> Result<Vec<ChatMessage>> {
        let mut url = self.endpoint("api/Chat")?;
        url.query_pairs_mut()
            .append_pair("where", &format!("{field}={value}"))
            .append_pair("orderby", "createdDate");
        let resp = Self::checked(self.with_auth(self.http.get(url.clone())), &url).await?;
        let json: Value = resp.json().await?;
        Ok(ChatMessage::list_from_value(&json))
    }

    /// Every record where the user is sender or receiver, under either of
    /// their identifiers. Failed queries are logged and skipped.
    pub async fn fetch_my_messages(&self, identity: &Identity) -> Vec<ChatMessage> {
        let queries = message_queries(identity);
        let results = join_all(queries.iter().map(|(field, value)| self.list_chats(field, value))).await;
        union_by_id(queries.iter().zip(results).map(|((field, value), result)| {
            result.map_err(|e| log::warn!("chat query {field}={value} failed: {e}")).ok()
        }))
    }

    /// Posts a message into `conversation`. Blank bodies are refused before
    /// anything is sent.
    pub async fn send_message(&self, identity: &Identity, conversation: &Conversation, text: &str) -> Result<ChatMessage> {
        let body = text.trim();
        if body.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let draft = NewChatMessage {
            sender_id: identity.email().to_string(),
            receiver_id: conversation.other_user_id.clone(),
            chat_room_id: conversation.id.clone(),
            message: body.to_string(),
            is_read: false,
            created_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        let url = self.endpoint("api/Chat")?;
        let resp = Self::checked(self.with_auth(self.http.post(url.clone()).json(&draft)), &url).await?;
        let echoed = resp
            .json::<Value>()
            .await
            .ok()
            .and_then(|json| ChatMessage::from_value(&json));
        Ok(echoed.unwrap_or_else(|| {
            log::debug!("server did not echo the new message; keeping local copy");
            let local_id = format!("local-{}", Utc::now().timestamp_millis());
            draft.into_local(local_id)
        }))
    }

    pub async fn mark_read(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("api/Chat/{id}"))?;
        let patch = ChatPatch { is_read: Some(true) };
        Self::checked(self.with_auth(self.http.put(url.clone()).json(&patch)), &url).await?;
        Ok(())
    }

    /// Marks the unread messages `identity` received. Returns how many were
    /// updated; individual failures are logged.
    pub async fn mark_conversation_read(&self, identity: &Identity, messages: &mut [ChatMessage]) -> usize {
        let mut marked = 0;
        for msg in messages.iter_mut().filter(|m| !m.is_read && identity.is_receiver(m)) {
            match self.mark_read(&msg.id).await {
                Ok(()) => {
                    msg.is_read = true;
                    marked += 1;
                }
                Err(e) => log::warn!("could not mark {} read: {e}", msg.id),
            }
        }
        marked
    }

    pub async fn delete_message(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("api/Chat/{id}"))?;
        Self::checked(self.with_auth(self.http.delete(url.clone())), &url).await?;
        Ok(())
    }

    /// User directory for display names and legacy name resolution.
    pub async fn users(&self) -> Result<Directory> {
        let url = self.endpoint("api/users")?;
        let resp = Self::checked(self.with_auth(self.http.get(url.clone())), &url).await?;
        let json: Value = resp.json().await?;
        let users = extract_items(&json)
            .iter()
            .filter_map(DirectoryUser::from_value)
            .collect();
        Ok(Directory::new(users))
    }

    /// Directory lookups are best effort; names fall back to raw ids.
    pub async fn users_or_empty(&self) -> Directory {
        self.users().await.unwrap_or_else(|e| {
            log::warn!("user directory unavailable: {e}");
            Directory::default()
        })
    }

    /// Opens the event stream for one room. The caller decodes the body.
    pub async fn open_stream(&self, room: &str) -> Result<Response> {
        let mut url = self.endpoint("api/sse/Chat")?;
        url.query_pairs_mut().append_pair("where", &format!("chatRoomId={room}"));
        let req = self
            .with_auth(self.http.get(url.clone()))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        Self::checked(req, &url).await
    }
}

/// The single-predicate queries covering `identity`: sender and receiver
/// for the email, and again for a distinct legacy username.
pub fn message_queries(identity: &Identity) -> Vec<(&'static str, &str)> {
    let mut queries = vec![("senderId", identity.email()), ("receiverId", identity.email())];
    if let Some(name) = identity.username() {
        queries.push(("senderId", name));
        queries.push(("receiverId", name));
    }
    queries
}

/// Concatenates query batches in order, keeping the first record seen for
/// each id. `None` stands for a failed query.
pub fn union_by_id<I>(batches: I) -> Vec<ChatMessage>
where
    I: IntoIterator<Item = Option<Vec<ChatMessage>>>,
{
    let mut seen = HashSet::new();
    batches
        .into_iter()
        .flatten()
        .flatten()
        .filter(|m| seen.insert(m.id.clone()))
        .collect()
}
