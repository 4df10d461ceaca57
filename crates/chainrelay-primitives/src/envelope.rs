use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::RequestId;

/// Fixed per-envelope framing overhead accounted for in size caps (spec.md
/// §3 "Envelope", §6 "Wire overhead"): callers add this constant to the
/// serialized JSON length before comparing against `maxMessageBytes`.
pub const ENVELOPE_OVERHEAD_BYTES: usize = 256;

/// Action tag. Closed set plus an opaque business-tag escape hatch, per
/// spec.md §3: "action (string tag from a closed set ... plus opaque
/// business tags)".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Ping,
    Pong,
    QueryRequest,
    QueryResponse,
    OutboxStreamBatch,
    OutboxStreamAck,
    Business(String),
}

impl Action {
    fn as_str(&self) -> &str {
        match self {
            Action::Ping => "Ping",
            Action::Pong => "Pong",
            Action::QueryRequest => "QueryRequest",
            Action::QueryResponse => "QueryResponse",
            Action::OutboxStreamBatch => "OutboxStreamBatch",
            Action::OutboxStreamAck => "OutboxStreamAck",
            Action::Business(tag) => tag,
        }
    }
}

impl Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "Ping" => Action::Ping,
            "Pong" => Action::Pong,
            "QueryRequest" => Action::QueryRequest,
            "QueryResponse" => Action::QueryResponse,
            "OutboxStreamBatch" => Action::OutboxStreamBatch,
            "OutboxStreamAck" => Action::OutboxStreamAck,
            _ => Action::Business(s),
        })
    }
}

/// The wire-level JSON envelope framing every message, per spec.md §3/§6.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub action: Action,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<RequestId>,
    pub timestamp: u64,
}

impl Envelope {
    pub fn new(action: Action, payload: Value, timestamp: u64) -> Self {
        Self {
            action,
            payload,
            request_id: None,
            correlation_id: None,
            timestamp,
        }
    }

    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn with_correlation_id(mut self, id: RequestId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Serialized length (JSON bytes) plus [`ENVELOPE_OVERHEAD_BYTES`], the
    /// quantity compared against `maxMessageBytes` in spec.md §4.7.
    pub fn framed_size(&self) -> Result<usize, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(json.len() + ENVELOPE_OVERHEAD_BYTES)
    }
}

/// One event as it appears on the wire inside an `OutboxStreamBatch`
/// payload (spec.md §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireEvent {
    pub model_name: String,
    pub event_type: String,
    pub event_version: u64,
    pub request_id: RequestId,
    pub block_height: i64,
    /// Decompressed JSON payload, carried as a string (spec.md §6:
    /// "payload (JSON string)").
    pub payload: String,
    pub timestamp: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxStreamBatchPayload {
    pub events: Vec<WireEvent>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxStreamAckPayload {
    pub all_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok_indices: Option<Vec<usize>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryRequestPayload {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dto: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryResponsePayload {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framed_size_includes_overhead() {
        let env = Envelope::new(Action::Ping, serde_json::json!({}), 0);
        let raw = serde_json::to_vec(&env).unwrap().len();
        assert_eq!(env.framed_size().unwrap(), raw + ENVELOPE_OVERHEAD_BYTES);
    }

    #[test]
    fn ack_payload_without_ok_indices_round_trips() {
        let ack = OutboxStreamAckPayload {
            all_ok: true,
            ok_indices: None,
        };
        let json = serde_json::to_string(&ack).unwrap();
        assert!(!json.contains("ok_indices"));
        let back: OutboxStreamAckPayload = serde_json::from_str(&json).unwrap();
        assert!(back.all_ok);
        assert!(back.ok_indices.is_none());
    }
}
