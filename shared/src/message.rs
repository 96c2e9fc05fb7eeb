//! Typed bodies for `message` and `upgrade` payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Credential push carrying a fresh [`ServerUser`]
pub const SERVER_USER: &str = "server-user";
/// Control message the server sends before closing a connection
pub const CLOSE_CONNECTION: &str = "close-connection";
/// Close reason for a session replaced by a newer connection of the same user
pub const DUPLICATED_CONNECTION: &str = "duplicated-connection";

/// Routing group of an action message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageGroup {
    ClientAction,
    ServerResponse,
    /// Out-of-band identity updates, never part of normal gameplay traffic
    Credential,
    #[serde(other)]
    Other,
}

/// Data of a `message` payload
///
/// `status` absent or zero means success, a positive value is an error code.
/// `id` is the correlation id a client action carries and its reply echoes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMessage {
    pub group: MessageGroup,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ActionMessage {
    /// Creates a client action with a freshly generated correlation id
    pub fn client_action(name: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            group: MessageGroup::ClientAction,
            name: name.into(),
            id: Some(Uuid::new_v4().to_string()),
            status: None,
            data,
        }
    }

    pub fn is_client_action(&self) -> bool {
        self.group == MessageGroup::ClientAction
    }

    pub fn is_server_response(&self) -> bool {
        self.group == MessageGroup::ServerResponse
    }

    pub fn is_credential(&self) -> bool {
        self.group == MessageGroup::Credential
    }

    pub fn is_error(&self) -> bool {
        self.status.is_some_and(|status| status > 0)
    }

    /// True when this is a successful `server-user` credential push
    pub fn is_server_user_push(&self) -> bool {
        self.is_credential() && self.name == SERVER_USER && !self.is_error()
    }

    /// True when the server closes this session because another one replaced it
    pub fn is_duplicate_session_close(&self) -> bool {
        self.name == CLOSE_CONNECTION
            && self.data.as_ref().and_then(Value::as_str) == Some(DUPLICATED_CONNECTION)
    }

    /// Whether this message answers the request `name` sent with `correlation_id`
    pub fn answers(&self, name: &str, correlation_id: &str) -> bool {
        self.name == name && self.id.as_deref() == Some(correlation_id)
    }
}

/// Identity snapshot the server associates with an authenticated connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerUser {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl ServerUser {
    /// Profiles without a nickname still have to finish registration
    pub fn needs_registration(&self) -> bool {
        self.nickname.as_deref().map_or(true, str::is_empty)
    }
}

/// Client half of the authentication handoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRequest {
    pub token: String,
}

/// Server answer to an [`UpgradeRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeResult {
    #[serde(default)]
    pub status: i64,
    #[serde(
        default,
        rename = "userData",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_data: Option<ServerUser>,
}

impl UpgradeResult {
    pub fn is_rejected(&self) -> bool {
        self.status > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: Value) -> ActionMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_client_action_has_unique_correlation_ids() {
        let first = ActionMessage::client_action("ready", Some(json!(true)));
        let second = ActionMessage::client_action("ready", Some(json!(true)));

        assert!(first.is_client_action());
        assert!(first.id.is_some());
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_status_semantics() {
        let ok = message(json!({"group": "server-response", "name": "submit"}));
        assert!(!ok.is_error());

        let zero = message(json!({"group": "server-response", "name": "submit", "status": 0}));
        assert!(!zero.is_error());

        let failed = message(json!({"group": "server-response", "name": "submit", "status": 3}));
        assert!(failed.is_error());
    }

    #[test]
    fn test_unknown_group_is_preserved_as_other() {
        let msg = message(json!({"group": "broadcast", "name": "chat"}));
        assert_eq!(msg.group, MessageGroup::Other);
        assert!(!msg.is_client_action());
        assert!(!msg.is_server_response());
    }

    #[test]
    fn test_server_user_push_requires_success() {
        let push = message(json!({
            "group": "credential",
            "name": "server-user",
            "status": 0,
            "data": {"uid": "u1", "level": 2, "score": 10}
        }));
        assert!(push.is_server_user_push());

        let failed = message(json!({"group": "credential", "name": "server-user", "status": 1}));
        assert!(!failed.is_server_user_push());

        let wrong_group = message(json!({"group": "server-response", "name": "server-user"}));
        assert!(!wrong_group.is_server_user_push());
    }

    #[test]
    fn test_duplicate_session_close() {
        let close = message(json!({
            "group": "server-response",
            "name": "close-connection",
            "data": "duplicated-connection"
        }));
        assert!(close.is_duplicate_session_close());

        let other_reason = message(json!({
            "group": "server-response",
            "name": "close-connection",
            "data": "maintenance"
        }));
        assert!(!other_reason.is_duplicate_session_close());
    }

    #[test]
    fn test_answers_requires_name_and_id() {
        let reply = message(json!({"group": "server-response", "name": "ready", "id": "c-1"}));
        assert!(reply.answers("ready", "c-1"));
        assert!(!reply.answers("ready", "c-2"));
        assert!(!reply.answers("submit", "c-1"));

        let anonymous = message(json!({"group": "server-response", "name": "ready"}));
        assert!(!anonymous.answers("ready", "c-1"));
    }

    #[test]
    fn test_needs_registration() {
        let mut user = ServerUser {
            uid: "u1".to_string(),
            nickname: None,
            level: 1,
            score: 0,
            avatar: None,
        };
        assert!(user.needs_registration());

        user.nickname = Some(String::new());
        assert!(user.needs_registration());

        user.nickname = Some("mint".to_string());
        assert!(!user.needs_registration());
    }

    #[test]
    fn test_client_action_wire_shape() {
        let mut action = ActionMessage::client_action("get-leaderboard", None);
        action.id = Some("fixed".to_string());

        let wire = serde_json::to_value(&action).unwrap();
        assert_eq!(
            wire,
            json!({"group": "client-action", "name": "get-leaderboard", "id": "fixed"})
        );
    }
}
