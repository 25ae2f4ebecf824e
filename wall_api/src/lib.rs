use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifier of a wall post, assigned by the backend.
pub type PostId = Uuid;

/// Table holding the wall posts on the backend.
pub const POSTS_TABLE: &str = "wall_posts";

pub const PHOENIX_TOPIC: &str = "phoenix";
pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_CHANGES: &str = "postgres_changes";

/// A single entry on the community wall, as stored by the backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: PostId,
    pub user_id: Uuid,
    pub user_name: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub media_urls: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Insert body for a new post. Id and timestamp are filled in by the backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub user_id: Uuid,
    pub user_name: String,
    pub content: Option<String>,
    pub media_urls: Vec<String>,
}

fn null_as_empty<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(de)?.unwrap_or_default())
}

/// Kind of row change reported by the realtime channel.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// Frame exchanged on the realtime websocket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Envelope {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Envelope {
    /// Join a channel, asking for insert and delete changes on `table`.
    pub fn join(topic: &str, table: &str, access_token: &str, reference: String) -> Self {
        let filter = |event: &str| json!({"event": event, "schema": "public", "table": table});
        Self {
            topic: topic.into(),
            event: EVENT_JOIN.into(),
            payload: json!({
                "config": {
                    "broadcast": {"self": false},
                    "presence": {"key": ""},
                    "postgres_changes": [filter("INSERT"), filter("DELETE")],
                },
                "access_token": access_token,
            }),
            reference: Some(reference),
        }
    }

    pub fn leave(topic: &str, reference: String) -> Self {
        Self {
            topic: topic.into(),
            event: EVENT_LEAVE.into(),
            payload: json!({}),
            reference: Some(reference),
        }
    }

    pub fn heartbeat(reference: String) -> Self {
        Self {
            topic: PHOENIX_TOPIC.into(),
            event: EVENT_HEARTBEAT.into(),
            payload: json!({}),
            reference: Some(reference),
        }
    }

    /// True for a `phx_reply` carrying `status: ok`.
    pub fn is_ok_reply(&self) -> bool {
        self.event == EVENT_REPLY && self.payload.get("status").and_then(Value::as_str) == Some("ok")
    }
}

/// Payload of a `postgres_changes` event.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChangePayload {
    pub data: Change,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Change {
    #[serde(default)]
    pub schema: String,
    pub table: String,
    #[serde(rename = "type")]
    pub kind: ChangeType,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
}

impl Change {
    /// Decode the inserted row, if this is an insert.
    pub fn inserted_post(&self) -> Result<Option<Post>, serde_json::Error> {
        match (self.kind, &self.record) {
            (ChangeType::Insert, Some(record)) => serde_json::from_value(record.clone()).map(Some),
            _ => Ok(None),
        }
    }

    /// Id of the removed row, if this is a delete.
    pub fn deleted_id(&self) -> Option<PostId> {
        if self.kind != ChangeType::Delete {
            return None;
        }
        self.old_record
            .as_ref()?
            .get("id")?
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip() {
        let env = Envelope::join("realtime:wall", POSTS_TABLE, "token", "1".into());
        let s = serde_json::to_string(&env).unwrap();
        assert!(s.contains("\"ref\":\"1\""));
        let de: Envelope = serde_json::from_str(&s).unwrap();
        assert_eq!(env, de);
    }

    #[test]
    fn post_with_null_media() {
        let raw = r#"{
            "id": "6f1c1c0e-8f5e-4a53-9d4b-2f4b0e0c6a11",
            "user_id": "0b5c7a2e-1111-4c3a-9d4b-2f4b0e0c6a11",
            "user_name": "Marta",
            "content": null,
            "media_urls": null,
            "created_at": "2024-03-01T18:30:00.123456+00:00"
        }"#;
        let post: Post = serde_json::from_str(raw).unwrap();
        assert!(post.content.is_none());
        assert!(post.media_urls.is_empty());
        assert_eq!(post.created_at.year(), 2024);
    }

    #[test]
    fn decodes_changes() {
        let insert = json!({
            "ids": [1],
            "data": {
                "schema": "public",
                "table": "wall_posts",
                "type": "INSERT",
                "record": {
                    "id": "6f1c1c0e-8f5e-4a53-9d4b-2f4b0e0c6a11",
                    "user_id": "0b5c7a2e-1111-4c3a-9d4b-2f4b0e0c6a11",
                    "user_name": "Marta",
                    "content": "assaig dijous",
                    "media_urls": [],
                    "created_at": "2024-03-01T18:30:00Z"
                },
                "old_record": null
            }
        });
        let p: ChangePayload = serde_json::from_value(insert).unwrap();
        let post = p.data.inserted_post().unwrap().unwrap();
        assert_eq!(post.content.as_deref(), Some("assaig dijous"));
        assert!(p.data.deleted_id().is_none());

        let delete = json!({
            "data": {
                "table": "wall_posts",
                "type": "DELETE",
                "old_record": {"id": "6f1c1c0e-8f5e-4a53-9d4b-2f4b0e0c6a11"}
            }
        });
        let p: ChangePayload = serde_json::from_value(delete).unwrap();
        assert_eq!(p.data.deleted_id(), Some(post.id));
        assert!(p.data.inserted_post().unwrap().is_none());
    }

    #[test]
    fn ok_reply() {
        let env: Envelope = serde_json::from_value(json!({
            "topic": "realtime:wall",
            "event": "phx_reply",
            "payload": {"status": "ok", "response": {}},
            "ref": "1"
        }))
        .unwrap();
        assert!(env.is_ok_reply());
    }
}
