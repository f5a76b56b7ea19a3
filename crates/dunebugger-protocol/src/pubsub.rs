//! Web PubSub JSON subprotocol frames.
//!
//! The bus speaks `json.webpubsub.azure.v1`: every WebSocket text frame is a
//! JSON object tagged by `type`. Only the subset the dashboard needs is
//! modelled; unrecognised frames decode to [`ServiceFrame::Unknown`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// WebSocket subprotocol negotiated with the service.
pub const SUBPROTOCOL: &str = "json.webpubsub.azure.v1";

/// Errors raised while encoding or decoding protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid device command: {0}")]
    InvalidCommand(String),

    #[error("Invalid frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encoding of message data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Json,
    Text,
    Binary,
    Protobuf,
}

/// Frames sent by the client to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Subscribe this connection to a group.
    JoinGroup {
        group: String,
        #[serde(rename = "ackId", default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<u64>,
    },

    /// Publish data to every connection in a group.
    SendToGroup {
        group: String,
        #[serde(rename = "ackId", default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<u64>,
        /// Do not deliver the message back to the sender.
        #[serde(rename = "noEcho", default)]
        no_echo: bool,
        #[serde(rename = "dataType")]
        data_type: DataType,
        data: serde_json::Value,
    },
}

impl ClientFrame {
    /// Creates a join group frame.
    pub fn join_group(group: impl Into<String>, ack_id: u64) -> Self {
        Self::JoinGroup {
            group: group.into(),
            ack_id: Some(ack_id),
        }
    }

    /// Creates a JSON send-to-group frame that is not echoed back.
    pub fn send_to_group(group: impl Into<String>, data: serde_json::Value, ack_id: u64) -> Self {
        Self::SendToGroup {
            group: group.into(),
            ack_id: Some(ack_id),
            no_echo: true,
            data_type: DataType::Json,
            data,
        }
    }

    /// Serializes the frame for a WebSocket text message.
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Error detail attached to a negative ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckError {
    pub name: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Frames sent by the service to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServiceFrame {
    /// Outcome of a frame carrying an `ackId`.
    Ack {
        #[serde(rename = "ackId")]
        ack_id: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<AckError>,
    },

    /// Data published to a group or sent by the server.
    Message {
        /// `"group"` or `"server"`.
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
        #[serde(rename = "dataType", default, skip_serializing_if = "Option::is_none")]
        data_type: Option<DataType>,
        #[serde(default)]
        data: serde_json::Value,
    },

    /// Connection lifecycle notification.
    System(SystemEvent),

    #[serde(other)]
    Unknown,
}

impl ServiceFrame {
    /// Parses a WebSocket text message.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Returns the data of a group message, `None` for anything else.
    pub fn into_group_data(self) -> Option<serde_json::Value> {
        match self {
            ServiceFrame::Message { from, data, .. } if from == "group" => Some(data),
            _ => None,
        }
    }
}

/// System events, tagged by `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SystemEvent {
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: String,
        #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(
            rename = "reconnectionToken",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        reconnection_token: Option<String>,
    },

    Disconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(other)]
    Other,
}
