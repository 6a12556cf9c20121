use serde::{Deserialize, Serialize};

use crate::ids::TransitionId;
use crate::phase::TransitionPhase;
use crate::policy::{EvidenceClass, EvidenceSpec, FallbackPolicy, TimeoutBudget};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InjectRequestedPayload {
    /// Priority injections are user-initiated by convention.
    #[serde(default)]
    pub priority: bool,
    #[serde(default)]
    pub actor_role: Option<String>,
    /// Per-transition overrides; absent fields fall back to ledger defaults.
    #[serde(default)]
    pub evidence_spec: Option<EvidenceSpec>,
    #[serde(default)]
    pub timeout_budget: Option<TimeoutBudget>,
    #[serde(default)]
    pub fallback_policy: Option<FallbackPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InjectFailedPayload {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InjectDroppedPayload {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonWriteAckPayload {
    pub status: String,
    pub bytes_accepted: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PtyDataPayload {
    pub bytes: Vec<u8>,
    pub chunk_type: Option<String>,
    #[serde(default)]
    pub meaningful: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerifyPassPayload {
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionInvalidPayload {
    pub reason_code: String,
    pub transition_id: Option<TransitionId>,
    pub attempted_phase: Option<TransitionPhase>,
    pub current_phase: Option<TransitionPhase>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPhasePayload {
    pub transition_id: TransitionId,
    pub phase: TransitionPhase,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvidencePayload {
    pub transition_id: TransitionId,
    pub evidence_type: String,
    pub evidence_class_observed: EvidenceClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionTimeoutArmedPayload {
    pub transition_id: TransitionId,
    pub timeout_budget_ms: u64,
}

/// Everything the bus carries, keyed by event type. The ledger consumes the
/// `Inject*`/`DaemonWriteAck`/`PtyDataReceived`/`VerifyPass` variants and
/// produces the `Transition*` variants; anything a given subscriber does not
/// handle is filtered at its subscription boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    InjectRequested(InjectRequestedPayload),
    InjectQueued,
    InjectApplied,
    InjectSubmitRequested,
    InjectSubmitSent,
    InjectFailed(InjectFailedPayload),
    InjectDropped(InjectDroppedPayload),
    InjectTimeout,
    DaemonWriteAck(DaemonWriteAckPayload),
    PtyDataReceived(PtyDataPayload),
    VerifyPass(VerifyPassPayload),
    InjectVerified,
    TransitionInvalid(TransitionInvalidPayload),
    TransitionPhaseReached(TransitionPhasePayload),
    TransitionEvidenceRecorded(TransitionEvidencePayload),
    TransitionTimeoutArmed(TransitionTimeoutArmedPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::InjectRequested(_) => "inject.requested",
            Self::InjectQueued => "inject.queued",
            Self::InjectApplied => "inject.applied",
            Self::InjectSubmitRequested => "inject.submit.requested",
            Self::InjectSubmitSent => "inject.submit.sent",
            Self::InjectFailed(_) => "inject.failed",
            Self::InjectDropped(_) => "inject.dropped",
            Self::InjectTimeout => "inject.timeout",
            Self::DaemonWriteAck(_) => "daemon.write.ack",
            Self::PtyDataReceived(_) => "pty.data.received",
            Self::VerifyPass(_) => "verify.pass",
            Self::InjectVerified => "inject.verified",
            Self::TransitionInvalid(_) => "transition.invalid",
            // The verifying phase is reported as verification having started;
            // every other phase is reported under its own name.
            Self::TransitionPhaseReached(payload) => match payload.phase {
                TransitionPhase::Requested => "transition.requested",
                TransitionPhase::Accepted => "transition.accepted",
                TransitionPhase::Deferred => "transition.deferred",
                TransitionPhase::Applied => "transition.applied",
                TransitionPhase::Verifying => "transition.verification.started",
                TransitionPhase::Verified => "transition.verified",
                TransitionPhase::Failed => "transition.failed",
                TransitionPhase::TimedOut => "transition.timed_out",
                TransitionPhase::Dropped => "transition.dropped",
                TransitionPhase::Cancelled => "transition.cancelled",
            },
            Self::TransitionEvidenceRecorded(_) => "transition.evidence.recorded",
            Self::TransitionTimeoutArmed(_) => "transition.timeout.armed",
        }
    }
}
