use panel_injection_protocol::{
    CorrelationId, DeliveryLifecycle, EvidenceClass, EvidenceSpec, EventId, FallbackPolicy,
    PaneId, SignalKind, SourceId, TimeoutBudget, TransitionId, TransitionPhase,
};
use serde::{Deserialize, Serialize};

pub const CATEGORY: &str = "delivery";
pub const INTENT_TYPE: &str = "message_submission";
pub const TRANSITION_TYPE: &str = "submission";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOrigin {
    pub actor_type: ActorType,
    pub actor_role: Option<String>,
    pub source: SourceId,
}

/// Time-bounded exclusive right for one source module to drive the
/// transition's phase forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerLease {
    pub module: SourceId,
    pub lease_id: String,
    pub acquired_at_ms: u64,
    pub lease_ttl_ms: u64,
}

impl OwnerLease {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.acquired_at_ms) > self.lease_ttl_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionResult {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreconditionCheck {
    pub id: String,
    pub result: PreconditionResult,
    pub checked_at_ms: u64,
    pub failure_action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: TransitionPhase,
    pub ts_ms: u64,
    pub event_id: Option<EventId>,
    pub note: Option<String>,
}

/// Compact payload summary kept in the evidence log. Raw bulk payload (pty
/// bytes, message text) is never retained here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvidenceSummary {
    pub status: Option<String>,
    pub reason: Option<String>,
    pub meaningful: Option<bool>,
    pub chunk_type: Option<String>,
    pub bytes_accepted: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub event_id: EventId,
    pub signal: SignalKind,
    pub ts_ms: u64,
    pub class: EvidenceClass,
    pub summary: EvidenceSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Pass,
    RiskedPass,
    Fail,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub outcome: VerificationOutcome,
    pub evidence_class_observed: EvidenceClass,
    pub confidence: f64,
    pub verified_at_ms: Option<u64>,
}

impl Default for Verification {
    fn default() -> Self {
        Self {
            outcome: VerificationOutcome::Unknown,
            evidence_class_observed: EvidenceClass::None,
            confidence: 0.0,
            verified_at_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Partial,
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    Normal,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub status: OutcomeStatus,
    pub reason_code: String,
    pub resolved_by: ResolvedBy,
}

/// One tracked attempt to deliver a message to a pane, identified by
/// `(pane_id, correlation_id)`. Identity fields are immutable after
/// creation; everything else mutates only through the ledger's handlers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub transition_id: TransitionId,
    pub seq: u64,
    pub pane_id: PaneId,
    pub correlation_id: CorrelationId,
    pub causation_id: Option<EventId>,
    pub category: &'static str,
    pub intent_type: &'static str,
    pub transition_type: &'static str,
    pub origin: TransitionOrigin,
    pub owner: OwnerLease,
    pub preconditions: Vec<PreconditionCheck>,
    pub evidence_spec: EvidenceSpec,
    pub timeout_budget: TimeoutBudget,
    pub fallback_policy: FallbackPolicy,
    pub phase: TransitionPhase,
    pub phase_history: Vec<PhaseRecord>,
    pub verification: Verification,
    pub outcome: Option<TransitionOutcome>,
    pub evidence: Vec<EvidenceRecord>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub closed: bool,
    pub closed_at_ms: Option<u64>,
    pub lifecycle: DeliveryLifecycle,
}

impl Transition {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn open(
        transition_id: TransitionId,
        seq: u64,
        pane_id: PaneId,
        correlation_id: CorrelationId,
        origin: TransitionOrigin,
        owner: OwnerLease,
        evidence_spec: EvidenceSpec,
        timeout_budget: TimeoutBudget,
        fallback_policy: FallbackPolicy,
        event_id: EventId,
        now_ms: u64,
    ) -> Self {
        Self {
            transition_id,
            seq,
            pane_id,
            correlation_id,
            causation_id: Some(event_id),
            category: CATEGORY,
            intent_type: INTENT_TYPE,
            transition_type: TRANSITION_TYPE,
            origin,
            owner,
            preconditions: Vec::new(),
            evidence_spec,
            timeout_budget,
            fallback_policy,
            phase: TransitionPhase::Requested,
            phase_history: vec![PhaseRecord {
                phase: TransitionPhase::Requested,
                ts_ms: now_ms,
                event_id: Some(event_id),
                note: None,
            }],
            verification: Verification::default(),
            outcome: None,
            evidence: Vec::new(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            closed: false,
            closed_at_ms: None,
            lifecycle: DeliveryLifecycle::Pending,
        }
    }

    /// Appends a phase hop without legality checks; callers validate edges
    /// first (or are the settlement funnel, which may jump to a terminal
    /// phase directly).
    pub(crate) fn record_phase(
        &mut self,
        phase: TransitionPhase,
        event_id: Option<EventId>,
        now_ms: u64,
        note: Option<String>,
    ) {
        self.phase = phase;
        self.lifecycle = phase.into();
        if event_id.is_some() {
            self.causation_id = event_id;
        }
        self.updated_at_ms = now_ms;
        self.phase_history.push(PhaseRecord {
            phase,
            ts_ms: now_ms,
            event_id,
            note,
        });
    }

    pub(crate) fn record_evidence(&mut self, record: EvidenceRecord, now_ms: u64) {
        self.updated_at_ms = now_ms;
        self.evidence.push(record);
    }

    pub fn strongest_evidence_class(&self) -> EvidenceClass {
        let mut strongest = EvidenceClass::None;
        for record in &self.evidence {
            strongest = match (strongest, record.class) {
                (_, EvidenceClass::Disallowed) | (EvidenceClass::Disallowed, _) => {
                    EvidenceClass::Disallowed
                }
                (EvidenceClass::Strong, _) | (_, EvidenceClass::Strong) => EvidenceClass::Strong,
                (EvidenceClass::Weak, _) | (_, EvidenceClass::Weak) => EvidenceClass::Weak,
                (EvidenceClass::None, class) => class,
            };
        }
        strongest
    }

    pub fn has_evidence_class(&self, class: EvidenceClass) -> bool {
        self.evidence.iter().any(|record| record.class == class)
    }

    /// Detached diagnostic view for the control panel's inspector.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use panel_injection_protocol::EvidenceClass;

    use super::*;

    fn sample_transition() -> Transition {
        Transition::open(
            TransitionId::new("txn-1"),
            1,
            PaneId::new("pane-a"),
            CorrelationId::new("corr-1"),
            TransitionOrigin {
                actor_type: ActorType::Agent,
                actor_role: None,
                source: SourceId::new("injection-module"),
            },
            OwnerLease {
                module: SourceId::new("injection-module"),
                lease_id: "lease-1".to_owned(),
                acquired_at_ms: 0,
                lease_ttl_ms: 15_000,
            },
            EvidenceSpec::default(),
            TimeoutBudget::default(),
            FallbackPolicy::default(),
            1,
            0,
        )
    }

    #[test]
    fn open_transition_starts_with_non_empty_phase_history() {
        let transition = sample_transition();
        assert_eq!(transition.phase, TransitionPhase::Requested);
        assert_eq!(transition.phase_history.len(), 1);
        assert!(!transition.closed);
        assert_eq!(transition.lifecycle, DeliveryLifecycle::Pending);
    }

    #[test]
    fn lease_expiry_is_measured_from_acquisition() {
        let transition = sample_transition();
        assert!(!transition.owner.is_expired(15_000));
        assert!(transition.owner.is_expired(15_001));
    }

    #[test]
    fn strongest_evidence_class_prefers_disallowed_then_strong() {
        let mut transition = sample_transition();
        assert_eq!(transition.strongest_evidence_class(), EvidenceClass::None);

        transition.record_evidence(
            EvidenceRecord {
                event_id: 2,
                signal: SignalKind::PtyData,
                ts_ms: 10,
                class: EvidenceClass::Weak,
                summary: EvidenceSummary::default(),
            },
            10,
        );
        assert_eq!(transition.strongest_evidence_class(), EvidenceClass::Weak);

        transition.record_evidence(
            EvidenceRecord {
                event_id: 3,
                signal: SignalKind::VerifyPass,
                ts_ms: 11,
                class: EvidenceClass::Strong,
                summary: EvidenceSummary::default(),
            },
            11,
        );
        assert_eq!(transition.strongest_evidence_class(), EvidenceClass::Strong);

        transition.record_evidence(
            EvidenceRecord {
                event_id: 4,
                signal: SignalKind::PtyData,
                ts_ms: 12,
                class: EvidenceClass::Disallowed,
                summary: EvidenceSummary::default(),
            },
            12,
        );
        assert_eq!(
            transition.strongest_evidence_class(),
            EvidenceClass::Disallowed
        );
    }

    #[test]
    fn to_json_exposes_the_inspector_fields() {
        let mut transition = sample_transition();
        transition.record_evidence(
            EvidenceRecord {
                event_id: 2,
                signal: SignalKind::DaemonWriteAck,
                ts_ms: 10,
                class: EvidenceClass::Weak,
                summary: EvidenceSummary {
                    status: Some("accepted".to_owned()),
                    bytes_accepted: Some(42),
                    ..EvidenceSummary::default()
                },
            },
            10,
        );

        let json = transition.to_json();
        assert_eq!(json["transition_id"], "txn-1");
        assert_eq!(json["pane_id"], "pane-a");
        assert_eq!(json["correlation_id"], "corr-1");
        assert_eq!(json["category"], "delivery");
        assert_eq!(json["phase"], "requested");
        assert_eq!(json["lifecycle"], "pending");
        assert_eq!(json["closed"], false);
        assert_eq!(json["owner"]["module"], "injection-module");
        assert_eq!(json["verification"]["outcome"], "unknown");
        assert_eq!(json["evidence"][0]["class"], "weak");
        assert_eq!(json["evidence"][0]["summary"]["status"], "accepted");
    }

    #[test]
    fn record_phase_updates_causation_only_for_evidenced_hops() {
        let mut transition = sample_transition();
        transition.record_phase(TransitionPhase::Accepted, Some(7), 5, None);
        assert_eq!(transition.causation_id, Some(7));

        // A timer-driven hop carries no event id and leaves causation alone.
        transition.record_phase(TransitionPhase::Deferred, None, 6, None);
        assert_eq!(transition.causation_id, Some(7));
        assert_eq!(transition.phase_history.len(), 3);
    }
}
