use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// A chat record as the backend stores it. Field names vary between
/// backend revisions, so records are read from raw JSON through the alias
/// tables below rather than derived.
#[derive(Debug, Serialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub chat_room_id: String,
    pub message: String,
    pub is_read: bool,
    pub created_date: String,
}

const ID_KEYS: &[&str] = &["id", "contentItemId", "ContentItemId"];
const CREATED_KEYS: &[&str] = &[
    "createdDate",
    "CreatedDate",
    "createdUtc",
    "CreatedUtc",
    "createdAt",
    "created_at",
    "timestamp",
];

fn first_str(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| item.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn lenient_bool(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

impl ChatMessage {
    /// Reads one record, defaulting missing fields. Returns `None` only when
    /// no usable id is present.
    pub fn from_value(item: &Value) -> Option<Self> {
        let id = first_str(item, ID_KEYS)?;
        Some(Self {
            id,
            sender_id: first_str(item, &["senderId", "SenderId"]).unwrap_or_default(),
            receiver_id: first_str(item, &["receiverId", "ReceiverId"]).unwrap_or_default(),
            chat_room_id: first_str(item, &["chatRoomId", "ChatRoomId"]).unwrap_or_default(),
            message: first_str(item, &["message", "Message"]).unwrap_or_default(),
            is_read: lenient_bool(item.get("isRead").or_else(|| item.get("IsRead"))),
            created_date: first_str(item, CREATED_KEYS).unwrap_or_default(),
        })
    }

    /// Parses every item of a list payload, dropping records without an id.
    pub fn list_from_value(json: &Value) -> Vec<Self> {
        extract_items(json)
            .iter()
            .filter_map(|item| {
                let parsed = Self::from_value(item);
                if parsed.is_none() {
                    log::debug!("dropping chat record without id: {item}");
                }
                parsed
            })
            .collect()
    }

    /// Creation time, or `None` when the backend sent something unparsable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_date)
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// The backend answers list queries either with a bare array or wrapped
/// under one of a few keys.
pub fn extract_items(json: &Value) -> Vec<Value> {
    if let Some(arr) = json.as_array() {
        arr.clone()
    } else {
        ["items", "data", "chats"]
            .iter()
            .find_map(|k| json.get(*k).and_then(|v| v.as_array()))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewChatMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub chat_room_id: String,
    pub message: String,
    pub is_read: bool,
    pub created_date: String,
}

impl NewChatMessage {
    pub fn into_local(self, id: String) -> ChatMessage {
        ChatMessage {
            id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            chat_room_id: self.chat_room_id,
            message: self.message,
            is_read: self.is_read,
            created_date: self.created_date,
        }
    }
}

/// Partial update body for `PUT /api/Chat/{id}`.
#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq, Default)]
pub struct DirectoryUser {
    pub email: Option<String>,
    pub user_name: Option<String>,
    pub display_name: Option<String>,
}

impl DirectoryUser {
    pub fn from_value(item: &Value) -> Option<Self> {
        let user = Self {
            email: first_str(item, &["email", "Email"]),
            user_name: first_str(item, &["userName", "UserName", "username"]),
            display_name: first_str(item, &["displayName", "DisplayName", "name"]),
        };
        if user.email.is_none() && user.user_name.is_none() {
            return None;
        }
        Some(user)
    }

    pub fn label(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .or(self.user_name.as_deref())
            .or(self.email.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_aliased_fields() {
        let item = json!({
            "ContentItemId": "4x9",
            "senderId": "a@x.com",
            "receiverId": "bob",
            "chatRoomId": "bob-a@x.com",
            "message": "hi",
            "isRead": "true",
            "CreatedUtc": "2024-03-01T10:00:00Z"
        });
        let msg = ChatMessage::from_value(&item).unwrap();
        assert_eq!(msg.id, "4x9");
        assert!(msg.is_read);
        assert_eq!(msg.created_date, "2024-03-01T10:00:00Z");
        assert!(msg.timestamp().is_some());
    }

    #[test]
    fn reads_pascal_case_revision() {
        let item = json!({
            "ContentItemId": "9",
            "SenderId": "bob",
            "ReceiverId": "a@x.com",
            "ChatRoomId": "bob-a@x.com",
            "Message": "yo",
            "IsRead": 1,
            "CreatedDate": "2024-03-01T10:00:00Z"
        });
        let msg = ChatMessage::from_value(&item).unwrap();
        assert_eq!(
            msg,
            ChatMessage {
                id: "9".into(),
                sender_id: "bob".into(),
                receiver_id: "a@x.com".into(),
                chat_room_id: "bob-a@x.com".into(),
                message: "yo".into(),
                is_read: true,
                created_date: "2024-03-01T10:00:00Z".into(),
            }
        );
    }

    #[test]
    fn missing_fields_default_and_missing_id_drops() {
        let payload = json!({ "items": [
            { "id": "1", "senderId": "a@x.com" },
            { "senderId": "nobody" }
        ]});
        let list = ChatMessage::list_from_value(&payload);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].receiver_id, "");
        assert!(!list[0].is_read);
        assert!(list[0].timestamp().is_none());
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let ts = parse_timestamp("2024-03-01T10:00:00.250").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:00:00.250+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn patch_only_serializes_set_fields() {
        let body = serde_json::to_value(ChatPatch { is_read: Some(true) }).unwrap();
        assert_eq!(body, json!({ "isRead": true }));
        let empty = serde_json::to_value(ChatPatch::default()).unwrap();
        assert_eq!(empty, json!({}));
    }

    #[test]
    fn directory_user_needs_an_identifier() {
        assert!(DirectoryUser::from_value(&json!({ "displayName": "Ghost" })).is_none());
        let user = DirectoryUser::from_value(&json!({ "UserName": "bob", "Email": "bob@x.com" })).unwrap();
        assert_eq!(user.label(), Some("bob"));
    }
}
