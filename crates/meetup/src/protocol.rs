use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel name the backend uses for per-activity chat rooms.
pub const ACTIVITY_CHANNEL: &str = "ActivityChannel";

/// Action performed on the chat channel to post a message.
pub const SEND_MESSAGE_ACTION: &str = "send_message";

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Message identifier. The backend hands out integers, older payloads used strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Int(i64),
    Str(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Int(id) => write!(f, "{id}"),
            MessageId::Str(id) => write!(f, "{id}"),
        }
    }
}

/// Author attached to a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    pub id: i64,
    pub username: String,
}

/// A chat message as broadcast on the channel and returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub body: String,
    pub created_at: String,
    #[serde(rename = "user")]
    pub sender: MessageSender,
}

/// Subscription parameters for one activity room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    pub channel: String,
    pub activity_id: i64,
}

impl ChannelParams {
    pub fn activity(activity_id: i64) -> Self {
        Self {
            channel: ACTIVITY_CHANNEL.to_string(),
            activity_id,
        }
    }

    /// The identifier string the cable protocol uses to name this subscription.
    pub fn identifier(&self) -> String {
        // Field order is fixed by the struct, so equal params give equal identifiers.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Cable frames
// ---------------------------------------------------------------------------

/// A frame sent from the client to the cable server.
///
/// `identifier` and `data` are JSON documents encoded as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CableCommand {
    Subscribe { identifier: String },
    Unsubscribe { identifier: String },
    Message { identifier: String, data: String },
}

/// A frame received from the cable server.
///
/// Control frames carry a `type`; broadcasts carry only `identifier` and `message`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CableFrame {
    Control(CableControl),
    Broadcast {
        identifier: String,
        message: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CableControl {
    Welcome,
    Ping {
        #[serde(default)]
        message: Option<serde_json::Value>,
    },
    ConfirmSubscription {
        identifier: String,
    },
    RejectSubscription {
        identifier: String,
    },
    Disconnect {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        reconnect: Option<bool>,
    },
}

// ---------------------------------------------------------------------------
// Description generation
// ---------------------------------------------------------------------------

/// Body of a generation submission: `{ "activity": { ... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub activity: serde_json::Value,
}

/// Opaque id of an accepted generation request. Backends hand out either
/// strings or integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Int(i64),
    Str(String),
}

impl RequestId {
    /// The id as a path segment, or `None` for a blank string.
    pub fn usable(&self) -> Option<String> {
        match self {
            RequestId::Int(id) => Some(id.to_string()),
            RequestId::Str(id) if !id.trim().is_empty() => Some(id.clone()),
            RequestId::Str(_) => None,
        }
    }
}

/// Response to a generation submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationAccepted {
    #[serde(default)]
    pub request_id: Option<RequestId>,
}

/// Decoded status of a generation task, as reported by a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Completed,
    Error,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationStatus::Pending => write!(f, "pending"),
            GenerationStatus::Completed => write!(f, "completed"),
            GenerationStatus::Error => write!(f, "error"),
            GenerationStatus::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Response to a status poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationPoll {
    pub status: GenerationStatus,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Activities and users
// ---------------------------------------------------------------------------

/// A user reference embedded in activities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: i64,
    pub username: String,
}

/// A participant listed on an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub age: Option<u32>,
}

/// An activity as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    pub start_time: String,
    pub max_participants: u32,
    pub minimum_age: u32,
    pub maximum_age: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<UserRef>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// Payload for creating or editing an activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityForm {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub location: String,
    pub start_time: String,
    pub max_participants: u32,
    pub minimum_age: u32,
    pub maximum_age: u32,
}

impl Default for ActivityForm {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            location: String::new(),
            start_time: String::new(),
            max_participants: 5,
            minimum_age: 18,
            maximum_age: 26,
        }
    }
}

impl From<&Activity> for ActivityForm {
    fn from(activity: &Activity) -> Self {
        Self {
            title: activity.title.clone(),
            description: activity.description.clone(),
            location: activity.location.clone(),
            start_time: activity.start_time.clone(),
            max_participants: activity.max_participants,
            minimum_age: activity.minimum_age,
            maximum_age: activity.maximum_age,
        }
    }
}

/// The authenticated user returned by `current_user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub personality: Option<u32>,
}

/// Public profile returned by `users/{username}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    #[serde(default)]
    pub personality: Option<u32>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub joined_activities: Vec<Activity>,
    #[serde(default)]
    pub created_activities: Vec<Activity>,
}

/// Error body the backend attaches to rejected requests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorBody {
    /// Flatten `errors` (string or list) or `error` into one line.
    pub fn message(&self) -> Option<String> {
        match &self.errors {
            Some(serde_json::Value::String(s)) => return Some(s.clone()),
            Some(serde_json::Value::Array(items)) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                if !parts.is_empty() {
                    return Some(parts.join(", "));
                }
            }
            Some(serde_json::Value::Null) | None => {}
            Some(other) => return Some(other.to_string()),
        }
        self.error.clone()
    }
}
