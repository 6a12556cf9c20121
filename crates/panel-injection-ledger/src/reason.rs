//! Machine-readable reason codes surfaced through `transition.invalid`
//! notifications and terminal outcomes.

pub const PHASE_ORDER_VIOLATION: &str = "phase_order_violation";
pub const OWNERSHIP_CONFLICT: &str = "ownership_conflict";
pub const OWNER_LEASE_EXPIRED: &str = "owner_lease_expired";
pub const PRECONDITION_FAILED_BEFORE_APPLY: &str = "precondition_failed_before_apply";
pub const MISSING_REQUIRED_FIELDS: &str = "missing_required_fields";
pub const TRANSITION_CLOSED: &str = "transition_closed";
pub const UNKNOWN_TRANSITION: &str = "unknown_transition";

pub const DISALLOWED_EVIDENCE: &str = "disallowed_evidence";
pub const MANUAL_VERIFICATION_REQUIRED: &str = "manual_verification_required";
pub const STRONG_EVIDENCE: &str = "strong_evidence";
pub const LATE_STRONG_EVIDENCE: &str = "late_strong_evidence";
pub const FAILED_SIGNAL: &str = "failed_signal";
pub const DROPPED_SIGNAL: &str = "dropped_signal";
pub const CANCELLED_BY_CALLER: &str = "cancelled_by_caller";

pub const TIMEOUT_DROP_FALLBACK: &str = "timeout_drop_fallback";
pub const TIMEOUT_WITH_WEAK_EVIDENCE: &str = "timeout_with_weak_evidence";
pub const TIMEOUT_WITHOUT_EVIDENCE: &str = "timeout_without_evidence";

/// Reason for an immediate failure on a rejected daemon write ack, e.g.
/// `daemon_write_rejected`.
pub fn daemon_write_failure(status: &str) -> String {
    format!("daemon_write_{status}")
}
