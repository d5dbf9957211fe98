//! Zone-scoped I/O transport (§4.C, §6).

pub mod connection;
pub mod envelope;
pub mod framer;

pub use connection::{ConnState, Connection, IoHandle};
pub use envelope::{
    IncomingFrame, Operation, Payload, RequestEnvelope, ResponseEnvelope, Status,
    TestControlCommand, ZoneAdminCommand, TEST_CONTROL_FEATURE_ID, ZONE_ADMIN_FEATURE_ID,
};
pub use framer::{FrameError, Framer};
