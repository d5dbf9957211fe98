//! PASE handshake orchestration and commissioning (§4.F).

pub mod pase;
pub mod setup_code;

pub use pase::{ensure_commissioned, CommissionOutcome, PaseState};
