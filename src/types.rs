use serde::{Deserialize, Serialize};

/// A single text message addressed to one recipient.
///
/// This is both the body the relay accepts on `POST /message` and the
/// payload the load generator emits.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub recipient: i64,
    #[serde(default)]
    pub originator: String,
    #[serde(default, rename = "message")]
    pub body: String,
}

impl Message {
    pub fn new(recipient: i64, originator: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient,
            originator: originator.into(),
            body: body.into(),
        }
    }
}

#[derive(Serialize)]
pub struct AcceptedResponse {
    #[serde(flatten)]
    pub message: Message,
    pub parts: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub queued: usize,
}
