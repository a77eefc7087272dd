//! Wire protocol for the pairing server
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`; `data` is omitted for events
//! that carry nothing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifies one live client connection. Never reused after close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one two-party session; also the scope for relayed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An uninterpreted blob relayed verbatim between the two members of a session
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub serde_json::Value);

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Matching preferences sent with `start-search`.
///
/// Interests are carried on the waiting entry but not consulted yet: every
/// pair of waiters is considered compatible.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub interests: Vec<String>,
}

impl Preferences {
    pub fn is_compatible_with(&self, _other: &Preferences) -> bool {
        true
    }
}

/// Events sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    StartSearch(Option<Preferences>),
    NextPartner,
    Leave,
    #[serde(rename_all = "camelCase")]
    Signal {
        session_id: SessionId,
        signal: Payload,
    },
    #[serde(rename_all = "camelCase")]
    Message {
        session_id: SessionId,
        text: Payload,
    },
}

impl FromStr for ClientEvent {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `start-search` may be sent without `data`; adjacently tagged newtype
        // variants require the content field, so default it to null.
        let mut value: serde_json::Value = serde_json::from_str(s)?;
        if let Some(object) = value.as_object_mut() {
            object
                .entry("data")
                .or_insert(serde_json::Value::Null);
        }
        serde_json::from_value(value)
    }
}

/// Events sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    IdAssigned(ConnectionId),
    Waiting,
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        session_id: SessionId,
        is_initiator: bool,
    },
    Signal {
        from: ConnectionId,
        signal: Payload,
    },
    Message {
        from: ConnectionId,
        text: Payload,
    },
    PartnerLeft,
    SearchingNewPartner,
    PresenceCount(usize),
    Error(String),
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl FromStr for ServerEvent {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_search_accepts_missing_data() {
        let event: ClientEvent = r#"{"event":"start-search"}"#.parse().unwrap();
        assert_eq!(event, ClientEvent::StartSearch(None));

        let event: ClientEvent = r#"{"event":"start-search","data":{"interests":["chess"]}}"#
            .parse()
            .unwrap();
        assert_eq!(
            event,
            ClientEvent::StartSearch(Some(Preferences {
                interests: vec!["chess".into()]
            }))
        );
    }

    #[test]
    fn signal_payload_is_kept_verbatim() {
        let session_id = SessionId::new();
        let raw = json!({
            "event": "signal",
            "data": {
                "sessionId": session_id,
                "signal": {"type": "offer", "sdp": "v=0\r\n", "nested": [1, null, true]}
            }
        });
        let event: ClientEvent = raw.to_string().parse().unwrap();
        match event {
            ClientEvent::Signal {
                session_id: parsed,
                signal,
            } => {
                assert_eq!(parsed, session_id);
                assert_eq!(signal.0, raw["data"]["signal"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn server_events_use_kebab_case_names_and_camel_case_fields() {
        let session_id = SessionId::new();
        let value = serde_json::to_value(ServerEvent::SessionStarted {
            session_id,
            is_initiator: true,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({
                "event": "session-started",
                "data": {"sessionId": session_id, "isInitiator": true}
            })
        );

        assert_eq!(
            ServerEvent::PartnerLeft.to_string(),
            r#"{"event":"partner-left"}"#
        );
        assert_eq!(
            ServerEvent::PresenceCount(3).to_string(),
            r#"{"event":"presence-count","data":3}"#
        );
    }

    #[test]
    fn unknown_event_is_rejected() {
        assert!(r#"{"event":"teleport"}"#.parse::<ClientEvent>().is_err());
        assert!("not json".parse::<ClientEvent>().is_err());
    }
}
