//! JSON request/response messages exchanged with UI clients.
//!
//! Requests are objects tagged by `type` (`pomo:start`, `pomo:pause`,
//! `pomo:get`, `pomo:getState`) with camelCase fields. An optional `id` is
//! echoed on the reply so clients can match answers to concurrent requests.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::session::{Rejection, Session};

const KNOWN_TYPES: [&str; 4] = ["pomo:start", "pomo:pause", "pomo:get", "pomo:getState"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "pomo:start", rename_all = "camelCase")]
    Start {
        problem_key: String,
        #[serde(default)]
        focus_min: Option<u32>,
        #[serde(default)]
        break_min: Option<u32>,
    },
    #[serde(rename = "pomo:pause", rename_all = "camelCase")]
    Pause { problem_key: String },
    #[serde(rename = "pomo:get", rename_all = "camelCase")]
    Get { problem_key: String },
    #[serde(rename = "pomo:getState", rename_all = "camelCase")]
    GetState { problem_key: String },
}

impl Request {
    pub fn problem_key(&self) -> &str {
        match self {
            Request::Start { problem_key, .. }
            | Request::Pause { problem_key }
            | Request::Get { problem_key }
            | Request::GetState { problem_key } => problem_key,
        }
    }
}

/// A request plus the client's correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub request: Request,
}

impl Envelope {
    /// Decode one JSON request.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownCommand`] for a `type` this host does not
    /// serve, [`ProtocolError::Malformed`] for anything else that does not
    /// decode.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing string field `type`".into()))?;
        if !KNOWN_TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownCommand(kind.to_string()));
        }
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// `{ok: true}` or `{ok: false, error: "...", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(flatten)]
    pub rejection: Option<Rejection>,
}

impl From<Result<(), Rejection>> for Ack {
    fn from(result: Result<(), Rejection>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                rejection: None,
            },
            Err(rejection) => Self {
                ok: false,
                rejection: Some(rejection),
            },
        }
    }
}

/// Reply to `pomo:getState`. `state` is null for keys never started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateReply {
    pub ok: bool,
    pub state: Option<Session>,
    pub cooldown_remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ack(Ack),
    Session(Session),
    State(StateReply),
}

impl Response {
    /// False only for refused commands.
    pub fn is_ok(&self) -> bool {
        match self {
            Response::Ack(ack) => ack.ok,
            Response::Session(_) => true,
            Response::State(reply) => reply.ok,
        }
    }
}

/// A response addressed back to the request's `id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub response: Response,
}
