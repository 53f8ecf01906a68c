//! ==============================================================================
//! protocol.rs - socket.io v4 framing for the sensor stream
//! ==============================================================================
//!
//! purpose:
//!     the backend pushes readings through a socket.io server. we only speak
//!     its websocket transport, so every websocket text frame is one
//!     engine.io packet, and engine.io `message` packets carry socket.io
//!     packets.
//!
//! wire format:
//!
//! ```text
//!     engine.io   <type digit><payload>
//!                 0 open  1 close  2 ping  3 pong  4 message  5 upgrade  6 noop
//!
//!     socket.io   <type digit>[/namespace,][ack id][json]
//!                 0 connect  1 disconnect  2 event  3 ack  4 connect_error
//!
//!     e.g.  42/sensors,["newSensorData",{"id":4,...}]
//! ```
//!
//! relationships:
//!     - used by: channel.rs (decode inbound frames, encode outbound ones)
//!     - produces: domain.rs SensorReading batches
//!
//! ==============================================================================

use crate::domain::SensorReading;
use crate::error::{MonitorError, Result};
use serde::Deserialize;
use serde_json::Value;

/// client→server: ask for recent history (no arguments)
pub const REQUEST_BACKLOG_EVENT: &str = "requestSensorData";
/// server→client: backlog batch, newest first
pub const BACKLOG_EVENT: &str = "sensorData";
/// server→client: one new reading
pub const UPDATE_EVENT: &str = "newSensorData";

/// engine.io open handshake
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| MonitorError::Protocol("empty engine.io frame".to_string()))?;
        let payload = chars.as_str();

        Ok(match kind {
            '0' => EnginePacket::Open(serde_json::from_str(payload)?),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(payload.to_string()),
            '3' => EnginePacket::Pong(payload.to_string()),
            '4' => EnginePacket::Message(payload.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            other => {
                return Err(MonitorError::Protocol(format!("unknown engine.io packet type '{}'", other)))
            }
        })
    }

    pub fn encode(&self) -> String {
        match self {
            // only the server sends open; echo the sid so the shape is valid
            EnginePacket::Open(h) => format!(
                "0{}",
                serde_json::json!({"sid": h.sid, "pingInterval": h.ping_interval, "pingTimeout": h.ping_timeout})
            ),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(p) => format!("2{}", p),
            EnginePacket::Pong(p) => format!("3{}", p),
            EnginePacket::Message(m) => format!("4{}", m),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect { nsp: String, data: Option<Value> },
    Disconnect { nsp: String },
    Event { nsp: String, id: Option<u64>, data: Value },
    Ack { nsp: String, id: Option<u64>, data: Value },
    ConnectError { nsp: String, data: Option<Value> },
}

impl SocketPacket {
    pub fn nsp(&self) -> &str {
        match self {
            SocketPacket::Connect { nsp, .. }
            | SocketPacket::Disconnect { nsp }
            | SocketPacket::Event { nsp, .. }
            | SocketPacket::Ack { nsp, .. }
            | SocketPacket::ConnectError { nsp, .. } => nsp,
        }
    }

    /// Decode the payload of an engine.io `message` packet
    pub fn decode(message: &str) -> Result<Self> {
        let mut chars = message.chars();
        let kind = chars
            .next()
            .ok_or_else(|| MonitorError::Protocol("empty socket.io packet".to_string()))?;
        let mut rest = chars.as_str();

        let nsp = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let nsp = &rest[..idx];
                    rest = &rest[idx + 1..];
                    nsp.to_string()
                }
                None => {
                    let nsp = rest.to_string();
                    rest = "";
                    nsp
                }
            }
        } else {
            "/".to_string()
        };

        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        let id = if digits > 0 {
            let id = rest[..digits]
                .parse()
                .map_err(|e| MonitorError::Protocol(format!("bad ack id: {}", e)))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data: Option<Value> = if rest.is_empty() { None } else { Some(serde_json::from_str(rest)?) };

        Ok(match kind {
            '0' => SocketPacket::Connect { nsp, data },
            '1' => SocketPacket::Disconnect { nsp },
            '2' => SocketPacket::Event {
                nsp,
                id,
                data: data.ok_or_else(|| MonitorError::Protocol("event without payload".to_string()))?,
            },
            '3' => SocketPacket::Ack { nsp, id, data: data.unwrap_or(Value::Array(Vec::new())) },
            '4' => SocketPacket::ConnectError { nsp, data },
            '5' | '6' => {
                return Err(MonitorError::Protocol("binary socket.io packets are not supported".to_string()))
            }
            other => {
                return Err(MonitorError::Protocol(format!("unknown socket.io packet type '{}'", other)))
            }
        })
    }

    /// Encode as the payload of an engine.io `message` packet
    pub fn encode(&self) -> String {
        let prefix = |kind: char, nsp: &str| {
            if nsp == "/" {
                kind.to_string()
            } else {
                format!("{}{},", kind, nsp)
            }
        };
        match self {
            SocketPacket::Connect { nsp, data } => {
                let mut out = prefix('0', nsp);
                if let Some(d) = data {
                    out.push_str(&d.to_string());
                }
                out
            }
            SocketPacket::Disconnect { nsp } => prefix('1', nsp),
            SocketPacket::Event { nsp, id, data } | SocketPacket::Ack { nsp, id, data } => {
                let kind = if matches!(self, SocketPacket::Event { .. }) { '2' } else { '3' };
                let mut out = prefix(kind, nsp);
                if let Some(id) = id {
                    out.push_str(&id.to_string());
                }
                out.push_str(&data.to_string());
                out
            }
            SocketPacket::ConnectError { nsp, data } => {
                let mut out = prefix('4', nsp);
                if let Some(d) = data {
                    out.push_str(&d.to_string());
                }
                out
            }
        }
    }

    /// `[name, args...]` of an event packet
    pub fn event_parts(&self) -> Option<(&str, &[Value])> {
        let SocketPacket::Event { data: Value::Array(items), .. } = self else {
            return None;
        };
        let (name, args) = items.split_first()?;
        Some((name.as_str()?, args))
    }
}

/// full websocket text frame for a socket.io packet
pub fn frame(packet: &SocketPacket) -> String {
    EnginePacket::Message(packet.encode()).encode()
}

pub fn connect_frame(nsp: &str) -> String {
    frame(&SocketPacket::Connect { nsp: nsp.to_string(), data: None })
}

pub fn disconnect_frame(nsp: &str) -> String {
    frame(&SocketPacket::Disconnect { nsp: nsp.to_string() })
}

pub fn backlog_request_frame(nsp: &str) -> String {
    frame(&SocketPacket::Event {
        nsp: nsp.to_string(),
        id: None,
        data: serde_json::json!([REQUEST_BACKLOG_EVENT]),
    })
}

/// the two inbound telemetry shapes
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// newest first, as delivered
    Backlog(Vec<SensorReading>),
    Update(SensorReading),
}

impl TelemetryEvent {
    /// Parse a socket.io event into a telemetry event.
    ///
    /// `Ok(None)` for events this client does not consume; an error when a
    /// telemetry event carries a payload of the wrong shape.
    pub fn from_event(name: &str, args: &[Value]) -> Result<Option<Self>> {
        let first = || {
            args.first()
                .cloned()
                .ok_or_else(|| MonitorError::Protocol(format!("'{}' carried no payload", name)))
        };
        match name {
            BACKLOG_EVENT => Ok(Some(TelemetryEvent::Backlog(serde_json::from_value(first()?)?))),
            UPDATE_EVENT => Ok(Some(TelemetryEvent::Update(serde_json::from_value(first()?)?))),
            _ => Ok(None),
        }
    }

    /// Normalize into one chronological (oldest first) batch
    pub fn into_batch(self) -> Vec<SensorReading> {
        match self {
            TelemetryEvent::Backlog(mut readings) => {
                readings.reverse();
                readings
            }
            TelemetryEvent::Update(reading) => vec![reading],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reading_json(id: u64) -> Value {
        json!({"id": id, "timestamp": format!("10:0{}", id), "temperature": 21.0, "humidity": 40.0})
    }

    #[test]
    fn test_decode_open_handshake() {
        let frame = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":5000,"maxPayload":1000000}"#;
        let EnginePacket::Open(h) = EnginePacket::decode(frame).unwrap() else {
            panic!("expected open");
        };
        assert_eq!(h.sid, "abc");
        assert_eq!(h.ping_interval, 25_000);
        assert_eq!(h.ping_timeout, 5_000);
    }

    #[test]
    fn test_ping_is_answered_with_matching_pong() {
        let EnginePacket::Ping(p) = EnginePacket::decode("2probe").unwrap() else {
            panic!("expected ping");
        };
        assert_eq!(EnginePacket::Pong(p).encode(), "3probe");
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
    }

    #[test]
    fn test_outbound_frames() {
        assert_eq!(connect_frame("/sensors"), "40/sensors,");
        assert_eq!(connect_frame("/"), "40");
        assert_eq!(backlog_request_frame("/sensors"), r#"42/sensors,["requestSensorData"]"#);
        assert_eq!(disconnect_frame("/sensors"), "41/sensors,");
    }

    #[test]
    fn test_decode_namespaced_connect_ack() {
        let packet = SocketPacket::decode(r#"0/sensors,{"sid":"xyz"}"#).unwrap();
        assert_eq!(packet, SocketPacket::Connect { nsp: "/sensors".into(), data: Some(json!({"sid": "xyz"})) });
    }

    #[test]
    fn test_decode_event_with_ack_id() {
        let packet = SocketPacket::decode(r#"2/sensors,12["newSensorData",{"id":4}]"#).unwrap();
        let SocketPacket::Event { nsp, id, .. } = &packet else {
            panic!("expected event");
        };
        assert_eq!(nsp, "/sensors");
        assert_eq!(*id, Some(12));
        let (name, args) = packet.event_parts().unwrap();
        assert_eq!(name, "newSensorData");
        assert_eq!(args, &[json!({"id": 4})]);
    }

    #[test]
    fn test_decode_root_namespace_event() {
        let packet = SocketPacket::decode(r#"2["ping-ish"]"#).unwrap();
        assert_eq!(packet.nsp(), "/");
        assert_eq!(packet.event_parts().unwrap().0, "ping-ish");
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(EnginePacket::decode("").is_err());
        assert!(EnginePacket::decode("9oops").is_err());
        assert!(SocketPacket::decode("2/sensors,").is_err());
        assert!(SocketPacket::decode("2/sensors,[\"x\"").is_err());
        assert!(SocketPacket::decode("5/sensors,").is_err());
    }

    #[test]
    fn test_backlog_is_reversed_to_chronological() {
        let args = [json!([reading_json(3), reading_json(2), reading_json(1)])];
        let event = TelemetryEvent::from_event(BACKLOG_EVENT, &args).unwrap().unwrap();
        let ids: Vec<u64> = event.into_batch().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_update_is_wrapped() {
        let event = TelemetryEvent::from_event(UPDATE_EVENT, &[reading_json(4)]).unwrap().unwrap();
        let batch = event.into_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, 4);
    }

    #[test]
    fn test_wrong_shapes_are_rejected() {
        assert!(TelemetryEvent::from_event(UPDATE_EVENT, &[]).is_err());
        assert!(TelemetryEvent::from_event(UPDATE_EVENT, &[json!({"id": 1})]).is_err());
        assert!(TelemetryEvent::from_event(BACKLOG_EVENT, &[reading_json(1)]).is_err());
        assert_eq!(TelemetryEvent::from_event("somethingElse", &[]).unwrap(), None);
    }
}
