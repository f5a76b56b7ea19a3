//! Application envelopes carried as group message data.

use serde::{Deserialize, Serialize};

/// Destination value meaning "every connection in the group".
pub const BROADCAST_DESTINATION: &str = "broadcast";

/// Message received from the device controller through the group.
///
/// The controller shares one group with every dashboard watching the same
/// device, so each envelope names its `destination`: either
/// [`BROADCAST_DESTINATION`] or the connection id of a single client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Tag selecting the state slot or action.
    pub subject: String,

    /// Payload; shape depends on `subject`.
    #[serde(default)]
    pub body: serde_json::Value,

    /// Addressing: broadcast marker or a specific connection id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Connection id of the original requester, echoed by the controller.
    #[serde(
        default,
        rename = "connectionId",
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_id: Option<String>,
}

impl InboundEnvelope {
    /// Creates an envelope addressed to every connection in the group.
    pub fn broadcast(subject: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            subject: subject.into(),
            body,
            destination: Some(BROADCAST_DESTINATION.to_string()),
            connection_id: None,
        }
    }

    /// Creates an envelope addressed to a single connection.
    pub fn addressed(
        subject: impl Into<String>,
        body: serde_json::Value,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            body,
            destination: Some(destination.into()),
            connection_id: None,
        }
    }

    /// Returns true if the envelope is meant for the given connection.
    ///
    /// Broadcast envelopes are accepted by everyone. Addressed envelopes
    /// are accepted only when `own_connection_id` matches. An envelope
    /// without a destination is never accepted.
    pub fn is_addressed_to(&self, own_connection_id: Option<&str>) -> bool {
        match self.destination.as_deref() {
            Some(BROADCAST_DESTINATION) => true,
            Some(destination) => own_connection_id == Some(destination),
            None => false,
        }
    }
}

/// Request sent to the device controller through the group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub subject: String,

    pub body: serde_json::Value,

    /// Connection id the controller should answer to.
    #[serde(rename = "connectionId")]
    pub connection_id: Option<String>,
}

impl OutboundRequest {
    pub fn new(
        subject: impl Into<String>,
        body: serde_json::Value,
        connection_id: Option<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            body,
            connection_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_accepted_by_anyone() {
        let envelope = InboundEnvelope::broadcast("gpio_state", json!({}));
        assert!(envelope.is_addressed_to(Some("abc")));
        assert!(envelope.is_addressed_to(None));
    }

    #[test]
    fn test_addressed_only_accepted_by_owner() {
        let envelope = InboundEnvelope::addressed("gpio_state", json!({}), "xyz");
        assert!(envelope.is_addressed_to(Some("xyz")));
        assert!(!envelope.is_addressed_to(Some("abc")));
        assert!(!envelope.is_addressed_to(None));
    }

    #[test]
    fn test_missing_destination_rejected() {
        let envelope: InboundEnvelope =
            serde_json::from_str(r#"{"subject":"log","body":"hello"}"#).unwrap();
        assert_eq!(envelope.destination, None);
        assert!(!envelope.is_addressed_to(Some("abc")));
        assert!(!envelope.is_addressed_to(None));
    }

    #[test]
    fn test_inbound_parses_connection_id_field() {
        let envelope: InboundEnvelope = serde_json::from_str(
            r#"{"subject":"heartbeat","body":"pong","destination":"c1","connectionId":"c1"}"#,
        )
        .unwrap();
        assert_eq!(envelope.subject, "heartbeat");
        assert_eq!(envelope.body, json!("pong"));
        assert_eq!(envelope.connection_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_inbound_body_defaults_to_null() {
        let envelope: InboundEnvelope =
            serde_json::from_str(r#"{"subject":"refresh","destination":"broadcast"}"#).unwrap();
        assert!(envelope.body.is_null());
    }

    #[test]
    fn test_outbound_serializes_camel_case_connection_id() {
        let request = OutboundRequest::new("heartbeat", json!("I am here"), Some("c1".into()));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"subject": "heartbeat", "body": "I am here", "connectionId": "c1"})
        );
    }

    #[test]
    fn test_outbound_without_connection_id_serializes_null() {
        let request = OutboundRequest::new("refresh", json!("null"), None);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value["connectionId"].is_null());
    }
}
