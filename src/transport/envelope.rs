//! Wire envelope types (§6).
//!
//! Request envelope CBOR integer keys: 1 = message-ID, 2 = operation,
//! 3 = endpoint-ID, 4 = feature-ID, 5 = payload. Response envelope:
//! 1 = message-ID, 2 = status, 3 = payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four operations a request envelope can carry. Serialized through a
/// `u8` surrogate (`into`/`try_from`) rather than serde's default
/// unit-variant-as-name encoding, so the wire representation is the plain
/// integer code §6 specifies and `peek_operation_field` can read it back
/// without a full typed decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Operation {
    Read = 0,
    Write = 1,
    Invoke = 2,
    Subscribe = 3,
    Notify = 4,
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> u8 {
        op as u8
    }
}

#[derive(Debug, Error)]
#[error("invalid operation code: {0}")]
pub struct InvalidOperationCode(u8);

impl TryFrom<u8> for Operation {
    type Error = InvalidOperationCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Operation::Read),
            1 => Ok(Operation::Write),
            2 => Ok(Operation::Invoke),
            3 => Ok(Operation::Subscribe),
            4 => Ok(Operation::Notify),
            other => Err(InvalidOperationCode(other)),
        }
    }
}

/// Response status codes. `Success` is the dedicated success value; every
/// other variant is a device- or protocol-level rejection. Serialized
/// through a `u16` surrogate for the same reason as [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Status {
    Success = 0,
    Failure = 1,
    Unsupported = 2,
    Busy = 3,
    InvalidState = 4,
    Unauthorized = 5,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }
}

impl From<Status> for u16 {
    fn from(status: Status) -> u16 {
        status as u16
    }
}

#[derive(Debug, Error)]
#[error("invalid status code: {0}")]
pub struct InvalidStatusCode(u16);

impl TryFrom<u16> for Status {
    type Error = InvalidStatusCode;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Status::Success),
            1 => Ok(Status::Failure),
            2 => Ok(Status::Unsupported),
            3 => Ok(Status::Busy),
            4 => Ok(Status::InvalidState),
            5 => Ok(Status::Unauthorized),
            other => Err(InvalidStatusCode(other)),
        }
    }
}

/// A CBOR payload, kept opaque at this layer: handlers decode it into
/// whatever shape a given command expects.
pub type Payload = ciborium::value::Value;

#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub message_id: u32,
    pub operation: Operation,
    pub endpoint_id: u8,
    pub feature_id: u8,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub message_id: u32,
    pub status: Status,
    pub payload: Payload,
}

// `#[derive(Serialize, Deserialize)]` plus `#[serde(rename = "1")]` etc.
// would map each field to a CBOR *text* key ("1", "2", ...), because serde
// derive always encodes struct fields by name in a self-describing format
// — there is no built-in way to ask for a numeric map key. §6 specifies
// the wire envelope by CBOR *integer* key, so both envelopes get a manual
// impl that serializes/deserializes as a map keyed by small integers.
impl Serialize for RequestEnvelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(5))?;
        map.serialize_entry(&1u8, &self.message_id)?;
        map.serialize_entry(&2u8, &self.operation)?;
        map.serialize_entry(&3u8, &self.endpoint_id)?;
        map.serialize_entry(&4u8, &self.feature_id)?;
        map.serialize_entry(&5u8, &self.payload)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for RequestEnvelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EnvelopeVisitor;

        impl<'de> serde::de::Visitor<'de> for EnvelopeVisitor {
            type Value = RequestEnvelope;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a request envelope map with integer keys 1..5")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut message_id = None;
                let mut operation = None;
                let mut endpoint_id = None;
                let mut feature_id = None;
                let mut payload = None;
                while let Some(key) = map.next_key::<u8>()? {
                    match key {
                        1 => message_id = Some(map.next_value()?),
                        2 => operation = Some(map.next_value()?),
                        3 => endpoint_id = Some(map.next_value()?),
                        4 => feature_id = Some(map.next_value()?),
                        5 => payload = Some(map.next_value()?),
                        _ => {
                            let _: serde::de::IgnoredAny = map.next_value()?;
                        }
                    }
                }
                Ok(RequestEnvelope {
                    message_id: message_id
                        .ok_or_else(|| serde::de::Error::missing_field("1"))?,
                    operation: operation.ok_or_else(|| serde::de::Error::missing_field("2"))?,
                    endpoint_id: endpoint_id
                        .ok_or_else(|| serde::de::Error::missing_field("3"))?,
                    feature_id: feature_id
                        .ok_or_else(|| serde::de::Error::missing_field("4"))?,
                    payload: payload.unwrap_or(Payload::Null),
                })
            }
        }

        deserializer.deserialize_map(EnvelopeVisitor)
    }
}

impl Serialize for ResponseEnvelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry(&1u8, &self.message_id)?;
        map.serialize_entry(&2u8, &self.status)?;
        map.serialize_entry(&3u8, &self.payload)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResponseEnvelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EnvelopeVisitor;

        impl<'de> serde::de::Visitor<'de> for EnvelopeVisitor {
            type Value = ResponseEnvelope;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a response envelope map with integer keys 1..3")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut message_id = None;
                let mut status = None;
                let mut payload = None;
                while let Some(key) = map.next_key::<u8>()? {
                    match key {
                        1 => message_id = Some(map.next_value()?),
                        2 => status = Some(map.next_value()?),
                        3 => payload = Some(map.next_value()?),
                        _ => {
                            let _: serde::de::IgnoredAny = map.next_value()?;
                        }
                    }
                }
                Ok(ResponseEnvelope {
                    message_id: message_id
                        .ok_or_else(|| serde::de::Error::missing_field("1"))?,
                    status: status.ok_or_else(|| serde::de::Error::missing_field("2"))?,
                    payload: payload.unwrap_or(Payload::Null),
                })
            }
        }

        deserializer.deserialize_map(EnvelopeVisitor)
    }
}

/// A frame, either a correlated response or an asynchronous notification
/// (which arrives shaped like a request with `operation = Notify`).
#[derive(Debug, Clone)]
pub enum IncomingFrame {
    Response(ResponseEnvelope),
    Notification(RequestEnvelope),
}

/// The well-known TestControl feature used by `trigger_test_event` (§4.G).
pub const TEST_CONTROL_FEATURE_ID: u8 = 0xFE;

/// TestControl command IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TestControlCommand {
    Reset = 0,
    EnterCommissioningMode = 1,
    ExitCommissioningMode = 2,
    SetControlState = 3,
    SetProcessState = 4,
    ClearLimit = 5,
    GetTestState = 6,
    RemoveZone = 7,
}

/// The zone-administration feature used by the `create_zone` action
/// handler (§4.J). Distinct from `TestControl`: zone creation is a normal
/// (non-privileged) operational-mode invoke, not a test-control trigger.
pub const ZONE_ADMIN_FEATURE_ID: u8 = 0xFD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ZoneAdminCommand {
    Create = 0,
    Delete = 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_cbor() {
        let req = RequestEnvelope {
            message_id: 7,
            operation: Operation::Invoke,
            endpoint_id: 1,
            feature_id: TEST_CONTROL_FEATURE_ID,
            payload: Payload::Map(vec![(
                Payload::Text("enable_key".into()),
                Payload::Text("abc".into()),
            )]),
        };
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&req, &mut buf).unwrap();
        let decoded: RequestEnvelope = ciborium::de::from_reader(buf.as_slice()).unwrap();
        assert_eq!(decoded.message_id, 7);
        assert_eq!(decoded.feature_id, TEST_CONTROL_FEATURE_ID);
    }

    #[test]
    fn operation_round_trips_through_its_u8_surrogate() {
        for op in [
            Operation::Read,
            Operation::Write,
            Operation::Invoke,
            Operation::Subscribe,
            Operation::Notify,
        ] {
            let code: u8 = op.into();
            assert_eq!(Operation::try_from(code).unwrap(), op);
        }
        assert!(Operation::try_from(255).is_err());
    }

    #[test]
    fn status_round_trips_through_its_u16_surrogate() {
        for status in [
            Status::Success,
            Status::Failure,
            Status::Unsupported,
            Status::Busy,
            Status::InvalidState,
            Status::Unauthorized,
        ] {
            let code: u16 = status.into();
            assert_eq!(Status::try_from(code).unwrap(), status);
        }
        assert!(Status::try_from(9999).is_err());
    }

    #[test]
    fn operation_serializes_as_a_plain_cbor_integer() {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&Operation::Invoke, &mut buf).unwrap();
        let value: ciborium::value::Value = ciborium::de::from_reader(buf.as_slice()).unwrap();
        assert_eq!(value, ciborium::value::Value::Integer(2.into()));
    }

    #[test]
    fn envelope_map_keys_are_cbor_integers_not_strings() {
        let req = RequestEnvelope {
            message_id: 7,
            operation: Operation::Invoke,
            endpoint_id: 1,
            feature_id: TEST_CONTROL_FEATURE_ID,
            payload: Payload::Null,
        };
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&req, &mut buf).unwrap();
        let value: ciborium::value::Value = ciborium::de::from_reader(buf.as_slice()).unwrap();
        let ciborium::value::Value::Map(entries) = value else {
            panic!("expected envelope to serialize as a CBOR map");
        };
        for (key, _) in entries {
            assert!(
                matches!(key, ciborium::value::Value::Integer(_)),
                "expected an integer map key, got {key:?}"
            );
        }
    }
}
