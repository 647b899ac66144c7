use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{Backend, ConversationPage, PageRequest};
use crate::conversations::{Conversation, ConversationId, DraftMessage, Message, MessageId, UserId};
use crate::error::{Result, SyncError};

/// `reqwest` client for the chat REST API.
#[derive(Debug, Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMessageBody<'a> {
    chat_id: &'a ConversationId,
    content: &'a str,
    sender_id: &'a UserId,
    date: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateMessageBody<'a> {
    content: &'a str,
    chat_id: &'a ConversationId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationBody<'a> {
    sender_id: &'a UserId,
    receiver_id: &'a UserId,
}

impl RestBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(url, status = status.as_u16(), "Backend response");
        if !status.is_success() {
            return Err(SyncError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, url: &str) -> Result<T> {
        let response = self.send(request, url).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Query pairs for a page request; absent fields fall back to the latest page.
pub(crate) fn page_query(page: PageRequest) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(limit) = page.limit {
        query.push(("limit", limit.to_string()));
    }
    if let Some(offset) = page.offset {
        query.push(("offset", offset.to_string()));
    }
    query
}

#[async_trait]
impl Backend for RestBackend {
    async fn fetch_conversation(
        &self,
        id: &ConversationId,
        page: PageRequest,
    ) -> Result<ConversationPage> {
        let url = self.url(&format!("chats/{id}"));
        let request = self.client.get(&url).query(&page_query(page));
        self.send_json(request, &url).await
    }

    async fn message_count(&self, id: &ConversationId) -> Result<usize> {
        let url = self.url("messages/length");
        let request = self.client.get(&url).query(&[("chatId", id.as_str())]);
        self.send_json(request, &url).await
    }

    async fn create_message(
        &self,
        conversation: &ConversationId,
        draft: &DraftMessage,
    ) -> Result<Message> {
        let url = self.url("messages/");
        let body = CreateMessageBody {
            chat_id: conversation,
            content: &draft.content,
            sender_id: &draft.author,
            date: draft.timestamp.timestamp_millis(),
        };
        self.send_json(self.client.post(&url).json(&body), &url).await
    }

    async fn update_message(
        &self,
        id: &MessageId,
        content: &str,
        conversation: &ConversationId,
    ) -> Result<Message> {
        let url = self.url(&format!("messages/{id}"));
        let body = UpdateMessageBody {
            content,
            chat_id: conversation,
        };
        self.send_json(self.client.put(&url).json(&body), &url).await
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        let url = self.url(&format!("messages/{id}"));
        self.send(self.client.delete(&url), &url).await?;
        Ok(())
    }

    async fn message(&self, id: &MessageId) -> Result<Message> {
        let url = self.url(&format!("messages/{id}"));
        self.send_json(self.client.get(&url), &url).await
    }

    async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>> {
        let url = self.url(&format!("chats/user/{user}"));
        self.send_json(self.client.get(&url), &url).await
    }

    async fn create_conversation(&self, sender: &UserId, receiver: &UserId) -> Result<Conversation> {
        let url = self.url("chats/");
        let body = CreateConversationBody {
            sender_id: sender,
            receiver_id: receiver,
        };
        self.send_json(self.client.post(&url).json(&body), &url).await
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<()> {
        let url = self.url(&format!("chats/{id}"));
        self.send(self.client.delete(&url), &url).await?;
        Ok(())
    }
}
