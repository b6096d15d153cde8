//! Wire protocol between chat clients and the server.
//!
//! Each WebSocket text frame carries one JSON object naming the event and,
//! when the event has one, its payload:
//!
//! ```text
//! {"event": "findPartner", "data": {"userName": "SwiftPanda42"}}
//! {"event": "typing"}
//! {"event": "receiveMessage", "data": {"message": "hi", "timestamp": 1700000000000}}
//! ```

use serde::{Deserialize, Serialize};

use crate::{ChatError, ConnectionId};

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Ask to be paired with the longest-waiting visitor, or wait for one.
    ///
    /// The payload may be omitted or `null`.
    FindPartner(Option<FindPartnerRequest>),
    /// Chat text for the current partner.
    SendMessage { message: String },
    /// The user started typing.
    Typing,
    /// The user stopped typing.
    StopTyping,
    /// Leave the current chat (or the waiting queue) but stay connected.
    EndChat,
}

/// Payload of a findPartner request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindPartnerRequest {
    /// Display name to show the partner; blank or missing means "Anonymous".
    #[serde(rename = "userName", default)]
    pub user_name: Option<String>,
}

impl ClientEvent {
    /// findPartner carrying the given display name.
    pub fn find_partner(user_name: Option<&str>) -> Self {
        ClientEvent::FindPartner(Some(FindPartnerRequest {
            user_name: user_name.map(str::to_string),
        }))
    }

    /// Decode a client event from a text frame.
    pub fn decode(frame: &str) -> Result<Self, ChatError> {
        serde_json::from_str(frame)
            .map_err(|e| ChatError::protocol(format!("invalid client event: {}", e)))
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::FindPartner(_) => "findPartner",
            ClientEvent::SendMessage { .. } => "sendMessage",
            ClientEvent::Typing => "typing",
            ClientEvent::StopTyping => "stopTyping",
            ClientEvent::EndChat => "endChat",
        }
    }
}

/// Events the server sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Queued; no partner available yet.
    Waiting,
    /// Paired with another visitor.
    PartnerFound {
        #[serde(rename = "partnerId")]
        partner_id: ConnectionId,
        #[serde(rename = "partnerName")]
        partner_name: String,
    },
    /// Chat text relayed from the partner.
    ReceiveMessage {
        message: String,
        /// Server relay time, milliseconds since the Unix epoch.
        timestamp: i64,
    },
    /// The partner started typing.
    PartnerTyping,
    /// The partner stopped typing.
    PartnerStoppedTyping,
    /// The partner left the chat or lost their connection.
    PartnerDisconnected,
}

impl ServerEvent {
    /// Encode the event as a text frame.
    pub fn encode(&self) -> Result<String, ChatError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether the event moves the recipient to a new pairing state.
    ///
    /// A client that misses one of these disagrees with the server about who
    /// it is talking to, so they are never silently dropped.
    pub fn is_state_change(&self) -> bool {
        matches!(
            self,
            ServerEvent::Waiting | ServerEvent::PartnerFound { .. } | ServerEvent::PartnerDisconnected
        )
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Waiting => "waiting",
            ServerEvent::PartnerFound { .. } => "partnerFound",
            ServerEvent::ReceiveMessage { .. } => "receiveMessage",
            ServerEvent::PartnerTyping => "partnerTyping",
            ServerEvent::PartnerStoppedTyping => "partnerStoppedTyping",
            ServerEvent::PartnerDisconnected => "partnerDisconnected",
        }
    }
}
