//! Precondition-level and connection-tier computation (§4.I).

use crate::commission::PaseState;
use crate::model::{ConnectionTier, PreconditionLevel, TestCase};
use crate::pool::ConnectionPool;

/// Preconditions that demand multi-zone connections, used in several of
/// `SetupPreconditions`'s step checks (§4.I steps 4, 6, 10).
const MULTI_ZONE_PRECONDITIONS: &[&str] = &[
    "two_zones_connected",
    "zone_count_at_least",
    "second_zone_connected",
    "two_zones_with_limits",
];

/// Preconditions that forbid session reuse even when the tier and levels
/// otherwise allow it (§4.I step 6).
const REUSE_BLOCKING_PRECONDITIONS: &[&str] = &[
    "device_zones_full",
    "device_has_grid_zone",
    "device_has_local_zone",
    "session_previously_connected",
    "multi_zone_needed",
];

/// `preconditionLevelFor` (§4.I): the highest level implied by the test
/// case's declared preconditions.
pub fn precondition_level_for(tc: &TestCase) -> PreconditionLevel {
    if tc.has_precondition("device_commissioned") || tc.has_precondition("fresh_commission") {
        return PreconditionLevel::Commissioned;
    }
    if tc.has_precondition("device_connected") {
        return PreconditionLevel::Connected;
    }
    if tc.has_precondition("device_in_commissioning_mode") {
        return PreconditionLevel::Commissioning;
    }
    PreconditionLevel::None
}

/// `CurrentLevel()` (§4.I): derived from observed PASE state and the main
/// connection's state, not from any test-case declaration.
pub fn current_level(pase: &PaseState, pool: &ConnectionPool) -> PreconditionLevel {
    if pase.is_commissioned() {
        return PreconditionLevel::Commissioned;
    }
    if pool.main().is_operational() {
        return PreconditionLevel::Connected;
    }
    if pool.main().is_connected() {
        return PreconditionLevel::Commissioning;
    }
    PreconditionLevel::None
}

/// Determine the connection tier for a test case (§4.I step 5): an
/// explicit tier wins; otherwise infer from `needed` and preconditions.
pub fn connection_tier_for(tc: &TestCase, needed: PreconditionLevel) -> ConnectionTier {
    if let Some(explicit) = tc.connection_tier {
        return explicit;
    }
    if needed <= PreconditionLevel::Commissioning {
        ConnectionTier::Infrastructure
    } else if tc.has_precondition("fresh_commission") {
        ConnectionTier::Protocol
    } else {
        ConnectionTier::Application
    }
}

/// Whether `SetupPreconditions` is allowed to reuse the existing session
/// rather than perform a fresh commission (§4.I step 6).
pub fn session_reuse_allowed(
    tier: ConnectionTier,
    current: PreconditionLevel,
    needed: PreconditionLevel,
    tc: &TestCase,
) -> bool {
    tier == ConnectionTier::Application
        && current >= PreconditionLevel::Commissioned
        && needed >= PreconditionLevel::Commissioned
        && !REUSE_BLOCKING_PRECONDITIONS
            .iter()
            .any(|key| tc.has_precondition(key))
}

/// Detect a multi-zone need from the test case's preconditions (§4.I step
/// 10), so the precondition-handler delegate always sees a canonical
/// `two_zones_connected` entry.
pub fn needs_multi_zone(tc: &TestCase) -> bool {
    MULTI_ZONE_PRECONDITIONS.iter().any(|key| tc.has_precondition(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Precondition, Step};

    fn tc_with(keys: &[&str]) -> TestCase {
        TestCase {
            id: "t".into(),
            preconditions: keys
                .iter()
                .map(|k| Precondition {
                    key: k.to_string(),
                    value: serde_json::Value::Bool(true),
                })
                .collect(),
            steps: Vec::<Step>::new(),
            expectations: vec![],
            connection_tier: None,
        }
    }

    #[test]
    fn precondition_level_picks_highest_implied_level() {
        assert_eq!(precondition_level_for(&tc_with(&[])), PreconditionLevel::None);
        assert_eq!(
            precondition_level_for(&tc_with(&["device_in_commissioning_mode"])),
            PreconditionLevel::Commissioning
        );
        assert_eq!(
            precondition_level_for(&tc_with(&["device_connected"])),
            PreconditionLevel::Connected
        );
        assert_eq!(
            precondition_level_for(&tc_with(&["device_commissioned"])),
            PreconditionLevel::Commissioned
        );
    }

    #[test]
    fn connection_tier_infers_infrastructure_for_low_levels() {
        let tc = tc_with(&[]);
        assert_eq!(
            connection_tier_for(&tc, PreconditionLevel::Commissioning),
            ConnectionTier::Infrastructure
        );
    }

    #[test]
    fn connection_tier_infers_protocol_for_fresh_commission() {
        let tc = tc_with(&["fresh_commission"]);
        assert_eq!(
            connection_tier_for(&tc, PreconditionLevel::Commissioned),
            ConnectionTier::Protocol
        );
    }

    #[test]
    fn connection_tier_explicit_always_wins() {
        let mut tc = tc_with(&["fresh_commission"]);
        tc.connection_tier = Some(ConnectionTier::Infrastructure);
        assert_eq!(
            connection_tier_for(&tc, PreconditionLevel::Commissioned),
            ConnectionTier::Infrastructure
        );
    }

    #[test]
    fn session_reuse_blocked_by_zones_full() {
        let tc = tc_with(&["device_zones_full"]);
        assert!(!session_reuse_allowed(
            ConnectionTier::Application,
            PreconditionLevel::Commissioned,
            PreconditionLevel::Commissioned,
            &tc
        ));
    }

    #[test]
    fn session_reuse_allowed_happy_path() {
        let tc = tc_with(&[]);
        assert!(session_reuse_allowed(
            ConnectionTier::Application,
            PreconditionLevel::Commissioned,
            PreconditionLevel::Commissioned,
            &tc
        ));
    }

    #[test]
    fn needs_multi_zone_detects_any_matching_precondition() {
        assert!(needs_multi_zone(&tc_with(&["zone_count_at_least"])));
        assert!(!needs_multi_zone(&tc_with(&["device_connected"])));
    }
}
