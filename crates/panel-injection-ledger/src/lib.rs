//! Event-sourced ledger of message-delivery transitions for agent panes.
//!
//! The ledger subscribes to the injection event bus and folds lifecycle and
//! evidence events into per-submission [`Transition`] records: a phase graph
//! with single-writer ownership, precondition gating before apply, evidence
//! classification, and a deterministic timeout settlement ladder. Read APIs
//! serve the control panel's inspector; the ledger itself publishes
//! `transition.*` notifications back onto the bus.

mod evidence;
mod ledger;
mod query;
mod reason;
mod store;
mod timer;
mod transition;

pub use ledger::{
    LedgerConfig, TransitionLedger, DEFAULT_LEASE_TTL_MS, DEFAULT_LEDGER_SOURCE,
    DEFAULT_RETENTION_CAP,
};
pub use query::{LedgerStatsSnapshot, TransitionFilter};
pub use reason::{
    CANCELLED_BY_CALLER, DISALLOWED_EVIDENCE, DROPPED_SIGNAL, FAILED_SIGNAL, LATE_STRONG_EVIDENCE,
    MANUAL_VERIFICATION_REQUIRED, MISSING_REQUIRED_FIELDS, OWNERSHIP_CONFLICT, OWNER_LEASE_EXPIRED,
    PHASE_ORDER_VIOLATION, PRECONDITION_FAILED_BEFORE_APPLY, STRONG_EVIDENCE, TIMEOUT_DROP_FALLBACK,
    TIMEOUT_WITHOUT_EVIDENCE, TIMEOUT_WITH_WEAK_EVIDENCE, TRANSITION_CLOSED, UNKNOWN_TRANSITION,
};
pub use transition::{
    ActorType, EvidenceRecord, EvidenceSummary, OutcomeStatus, OwnerLease, PhaseRecord,
    PreconditionCheck, PreconditionResult, ResolvedBy, Transition, TransitionOrigin,
    TransitionOutcome, Verification, VerificationOutcome,
};
