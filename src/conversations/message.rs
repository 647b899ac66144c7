use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

const IMAGE_SENTINEL: &str = "|$|";

macro_rules! opaque_id {
    ($name:ident) => {
        /// Opaque identifier. The backend sends these as JSON strings or numbers.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum Raw {
                    Text(String),
                    Int(i64),
                    Uint(u64),
                }

                Ok(match Raw::deserialize(deserializer)? {
                    Raw::Text(s) => Self(s),
                    Raw::Int(n) => Self(n.to_string()),
                    Raw::Uint(n) => Self(n.to_string()),
                })
            }
        }
    };
}

opaque_id!(MessageId);
opaque_id!(ConversationId);
opaque_id!(UserId);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "chatId")]
    pub conversation_id: ConversationId,
    #[serde(rename = "senderId")]
    pub author_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    pub content: String,
    #[serde(rename = "date", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn body(&self) -> MessageBody {
        MessageBody::parse(&self.content)
    }
}

/// A locally composed message that has not been accepted by the backend yet.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftMessage {
    pub content: String,
    pub author: UserId,
    pub timestamp: DateTime<Utc>,
}

impl DraftMessage {
    pub fn new(author: UserId, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            author,
            timestamp: Utc::now(),
        }
    }
}

/// Display view of a message body with the embedded image reference split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBody {
    pub text: String,
    pub image_url: Option<String>,
}

impl MessageBody {
    /// Extracts the first `|$|url|$|` span; the remaining text is trimmed.
    pub fn parse(raw: &str) -> Self {
        if let Some(start) = raw.find(IMAGE_SENTINEL) {
            let after = start + IMAGE_SENTINEL.len();
            if let Some(len) = raw[after..].find(IMAGE_SENTINEL) {
                let url = &raw[after..after + len];
                let end = after + len + IMAGE_SENTINEL.len();
                let text = format!("{}{}", &raw[..start], &raw[end..]);
                return Self {
                    text: text.trim().to_string(),
                    image_url: Some(url.to_string()),
                };
            }
        }

        Self {
            text: raw.trim().to_string(),
            image_url: None,
        }
    }

    pub fn compose(text: &str, image_url: Option<&str>) -> String {
        match image_url {
            Some(url) if text.is_empty() => format!("{IMAGE_SENTINEL}{url}{IMAGE_SENTINEL}"),
            Some(url) => format!("{text} {IMAGE_SENTINEL}{url}{IMAGE_SENTINEL}"),
            None => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_numeric_and_string_ids() {
        let json = r#"{"id":42,"chatId":"c1","senderId":7,"content":"hi","date":1700000000000}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, MessageId::new("42"));
        assert_eq!(msg.conversation_id, ConversationId::new("c1"));
        assert_eq!(msg.author_id, UserId::new("7"));
        assert_eq!(msg.receiver_id, None);
        assert_eq!(msg.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn serializes_backend_field_names() {
        let msg = Message {
            id: "m1".into(),
            conversation_id: "c1".into(),
            author_id: "u1".into(),
            receiver_id: Some("u2".into()),
            content: "yo".to_string(),
            timestamp: DateTime::from_timestamp_millis(5).unwrap(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["chatId"], "c1");
        assert_eq!(value["senderId"], "u1");
        assert_eq!(value["receiverId"], "u2");
        assert_eq!(value["date"], 5);
    }

    #[test]
    fn splits_embedded_image() {
        let body = MessageBody::parse("look at this |$|https://img/x.png|$|  ");
        assert_eq!(body.text, "look at this");
        assert_eq!(body.image_url.as_deref(), Some("https://img/x.png"));
    }

    #[test]
    fn unterminated_sentinel_is_plain_text() {
        let body = MessageBody::parse(" price |$| 5 ");
        assert_eq!(body.text, "price |$| 5");
        assert!(body.image_url.is_none());
    }

    #[test]
    fn compose_then_parse_recovers_parts() {
        let raw = MessageBody::compose("caption", Some("u"));
        let body = MessageBody::parse(&raw);
        assert_eq!(body.text, "caption");
        assert_eq!(body.image_url.as_deref(), Some("u"));

        assert_eq!(MessageBody::compose("", Some("u")), "|$|u|$|");
    }
}
