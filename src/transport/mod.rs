//! Push transport boundary.
//!
//! Inbound events reach the bridge through an mpsc receiver handed out when
//! the transport is created. Outbound requests go through [`PushTransport`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversations::{ConversationId, Message, MessageId};
use crate::error::{Result, SyncError};

pub use ws::WsTransport;

mod ws;

pub const EVENT_JOIN: &str = "join_chat";
pub const EVENT_LEAVE: &str = "leave_room";
pub const EVENT_SEND: &str = "send_message";
pub const EVENT_NEW: &str = "new_message";
pub const EVENT_UPDATE: &str = "update_message";
pub const EVENT_DELETE: &str = "delete_message";

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    NewMessage(Message),
    UpdateMessage(Message),
    DeleteMessage { id: MessageId },
}

/// Locally confirmed mutations republished for other subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Publish {
    Created(Message),
    Updated(Message),
    Deleted {
        conversation: ConversationId,
        id: MessageId,
    },
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn join(&self, conversation: &ConversationId) -> Result<()>;

    async fn leave(&self, conversation: &ConversationId) -> Result<()>;

    async fn publish(&self, event: Publish) -> Result<()>;
}

/// A single JSON frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Deserialize)]
struct DeletePayload {
    #[serde(alias = "messageId")]
    id: MessageId,
}

impl Frame {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    pub fn join(conversation: &ConversationId) -> Self {
        Self::new(EVENT_JOIN, Value::String(conversation.to_string()))
    }

    pub fn leave(conversation: &ConversationId) -> Self {
        Self::new(EVENT_LEAVE, Value::String(conversation.to_string()))
    }

    pub fn publish(event: &Publish) -> Result<Self> {
        Ok(match event {
            Publish::Created(message) => Self::new(EVENT_SEND, serde_json::to_value(message)?),
            Publish::Updated(message) => Self::new(EVENT_UPDATE, serde_json::to_value(message)?),
            Publish::Deleted { conversation, id } => Self::new(
                EVENT_DELETE,
                serde_json::json!({ "id": id, "chatId": conversation }),
            ),
        })
    }

    /// Maps an inbound frame onto a transport event. Unknown event names
    /// yield `Ok(None)`.
    pub fn into_event(self) -> Result<Option<TransportEvent>> {
        let event = match self.event.as_str() {
            EVENT_NEW => TransportEvent::NewMessage(serde_json::from_value(self.data)?),
            EVENT_UPDATE => TransportEvent::UpdateMessage(serde_json::from_value(self.data)?),
            EVENT_DELETE => {
                let payload: DeletePayload = serde_json::from_value(self.data)?;
                TransportEvent::DeleteMessage { id: payload.id }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(SyncError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_carries_conversation_id() {
        let text = Frame::join(&"c1".into()).encode().unwrap();
        assert_eq!(text, r#"{"event":"join_chat","data":"c1"}"#);
    }

    #[test]
    fn delete_accepts_either_id_key() {
        for body in [
            r#"{"event":"delete_message","data":{"id":"m1"}}"#,
            r#"{"event":"delete_message","data":{"messageId":"m1"}}"#,
        ] {
            let event = Frame::decode(body).unwrap().into_event().unwrap();
            assert_eq!(event, Some(TransportEvent::DeleteMessage { id: "m1".into() }));
        }
    }

    #[test]
    fn new_message_frame_decodes() {
        let body = r#"{"event":"new_message","data":{"id":1,"chatId":"c1","senderId":"u","content":"hey","date":3}}"#;
        match Frame::decode(body).unwrap().into_event().unwrap() {
            Some(TransportEvent::NewMessage(m)) => {
                assert_eq!(m.id, MessageId::new("1"));
                assert_eq!(m.content, "hey");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_events_are_ignored() {
        let frame = Frame::decode(r#"{"event":"typing","data":{}}"#).unwrap();
        assert_eq!(frame.into_event().unwrap(), None);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let frame = Frame::decode(r#"{"event":"new_message","data":{"id":1}}"#).unwrap();
        assert!(frame.into_event().is_err());
    }
}
