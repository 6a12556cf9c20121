use std::sync::{Arc, Mutex};
use std::time::Duration;

use panel_injection_bus::{EventDraft, EventEnvelope, InjectionEventBus};
use panel_injection_protocol::{
    CompactionStatus, CorrelationId, EventId, EventPayload, EvidenceClass, EvidenceRequirement,
    InjectRequestedPayload, LedgerError, LedgerResult, PaneId, SourceId, TimeoutAction,
    TransitionEvidencePayload, TransitionId, TransitionInvalidPayload, TransitionPhase,
    TransitionPhasePayload, TransitionTimeoutArmedPayload,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::evidence::assess;
use crate::query::{LedgerStatsSnapshot, TransitionFilter};
use crate::reason;
use crate::store::LedgerState;
use crate::timer::SettlementTimer;
use crate::transition::{
    ActorType, EvidenceRecord, OutcomeStatus, OwnerLease, PreconditionCheck, PreconditionResult,
    ResolvedBy, Transition, TransitionOrigin, TransitionOutcome, Verification,
    VerificationOutcome,
};

pub const DEFAULT_LEASE_TTL_MS: u64 = 15_000;
pub const DEFAULT_RETENTION_CAP: usize = 500;
pub const DEFAULT_LEDGER_SOURCE: &str = "transition-ledger";

const CONFIDENCE_STRONG: f64 = 0.95;
const CONFIDENCE_WEAK: f64 = 0.6;

const PRECONDITION_FOCUS_LOCK_GUARD: &str = "focus-lock-guard";
const PRECONDITION_COMPACTION_GATE: &str = "compaction-gate";
const PRECONDITION_FAILURE_ACTION: &str = "defer";

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Source name the ledger publishes its own notifications under.
    pub source: SourceId,
    pub lease_ttl_ms: u64,
    pub retention_cap: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            source: SourceId::new(DEFAULT_LEDGER_SOURCE),
            lease_ttl_ms: DEFAULT_LEASE_TTL_MS,
            retention_cap: DEFAULT_RETENTION_CAP,
        }
    }
}

enum AdvanceOutcome {
    Advanced,
    NoOp,
    Rejected,
}

/// Event-sourced delivery-transition ledger. One instance owns its maps, its
/// bus subscription, and its timer handles; instances never share state.
#[derive(Clone)]
pub struct TransitionLedger {
    bus: Arc<InjectionEventBus>,
    config: LedgerConfig,
    inner: Arc<Mutex<LedgerState>>,
    ingest_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TransitionLedger {
    pub fn new(bus: Arc<InjectionEventBus>) -> Self {
        Self::with_config(bus, LedgerConfig::default())
    }

    pub fn with_config(bus: Arc<InjectionEventBus>, config: LedgerConfig) -> Self {
        Self {
            bus,
            config,
            inner: Arc::new(Mutex::new(LedgerState::default())),
            ingest_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribes to the bus and begins consuming lifecycle and evidence
    /// events. Events for the same correlation key are processed strictly in
    /// arrival order by the single ingestion task.
    pub fn start(&self) -> LedgerResult<()> {
        let mut slot = self
            .ingest_task
            .lock()
            .expect("transition ledger ingest slot lock poisoned");
        if slot.is_some() {
            return Err(LedgerError::AlreadyStarted);
        }

        let mut receiver = self.bus.subscribe_all();
        let ledger = self.clone();
        *slot = Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => ledger.handle_envelope(&envelope),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "transition ledger lagged behind the event bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        Ok(())
    }

    /// Stops consuming bus events. Pending timers keep running; use `reset`
    /// to discard state entirely.
    pub fn stop(&self) -> LedgerResult<()> {
        let mut slot = self
            .ingest_task
            .lock()
            .expect("transition ledger ingest slot lock poisoned");
        match slot.take() {
            Some(task) => {
                task.abort();
                Ok(())
            }
            None => Err(LedgerError::NotStarted),
        }
    }

    /// Cancels every pending timer and discards all transitions, indexes and
    /// counters. The bus subscription (if started) stays live.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.reset();
    }

    /// Caller-initiated settlement to the cancelled terminal phase.
    pub fn cancel(
        &self,
        pane_id: &PaneId,
        correlation_id: &CorrelationId,
        cancel_reason: Option<String>,
    ) -> LedgerResult<Transition> {
        let mut state = self.lock_state();
        let Some(transition_id) = state.active_id(pane_id, correlation_id).cloned() else {
            return Err(LedgerError::TransitionNotFound {
                pane: pane_id.to_string(),
                correlation: correlation_id.to_string(),
            });
        };
        let now_ms = self.bus.now_ms();
        let observed = state
            .get(&transition_id)
            .map(Transition::strongest_evidence_class)
            .unwrap_or(EvidenceClass::None);
        self.finalize(
            &mut state,
            &transition_id,
            TransitionPhase::Cancelled,
            Verification {
                outcome: VerificationOutcome::Unknown,
                evidence_class_observed: observed,
                confidence: 0.0,
                verified_at_ms: None,
            },
            TransitionOutcome {
                status: OutcomeStatus::Failure,
                reason_code: cancel_reason.unwrap_or_else(|| reason::CANCELLED_BY_CALLER.to_owned()),
                resolved_by: ResolvedBy::Normal,
            },
            None,
            None,
            now_ms,
        );
        state
            .get(&transition_id)
            .cloned()
            .ok_or(LedgerError::TransitionNotFound {
                pane: pane_id.to_string(),
                correlation: correlation_id.to_string(),
            })
    }

    pub fn get(&self, transition_id: &TransitionId) -> Option<Transition> {
        self.lock_state().get(transition_id).cloned()
    }

    /// Correlation lookup; open transitions win, otherwise the most recently
    /// closed match unless `active_only` is set.
    pub fn get_by_correlation(
        &self,
        correlation_id: &CorrelationId,
        pane_id: Option<&PaneId>,
        active_only: bool,
    ) -> Option<Transition> {
        self.lock_state()
            .find_by_correlation(correlation_id, pane_id, active_only)
            .cloned()
    }

    pub fn list_transitions(&self, filter: &TransitionFilter) -> Vec<Transition> {
        self.lock_state().list(filter)
    }

    /// Alias of `list_transitions` kept for the diagnostics surface.
    pub fn query(&self, filter: &TransitionFilter) -> Vec<Transition> {
        self.list_transitions(filter)
    }

    pub fn stats(&self) -> LedgerStatsSnapshot {
        self.lock_state().stats_snapshot()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.inner
            .lock()
            .expect("transition ledger state lock poisoned")
    }

    pub(crate) fn handle_envelope(&self, envelope: &EventEnvelope) {
        let now_ms = self.bus.now_ms();
        let mut state = self.lock_state();
        match &envelope.payload {
            EventPayload::InjectRequested(payload) => {
                self.on_requested(&mut state, envelope, payload, now_ms);
            }
            EventPayload::InjectQueued => self.on_queued(&mut state, envelope, now_ms),
            EventPayload::InjectApplied => self.on_applied(&mut state, envelope, now_ms),
            EventPayload::InjectSubmitRequested => {
                self.on_submit_requested(&mut state, envelope, now_ms);
            }
            EventPayload::InjectSubmitSent => self.on_submit_sent(&mut state, envelope, now_ms),
            EventPayload::InjectFailed(payload) => self.on_terminal_signal(
                &mut state,
                envelope,
                TransitionPhase::Failed,
                payload
                    .reason
                    .clone()
                    .unwrap_or_else(|| reason::FAILED_SIGNAL.to_owned()),
                now_ms,
            ),
            EventPayload::InjectDropped(payload) => self.on_terminal_signal(
                &mut state,
                envelope,
                TransitionPhase::Dropped,
                payload
                    .reason
                    .clone()
                    .unwrap_or_else(|| reason::DROPPED_SIGNAL.to_owned()),
                now_ms,
            ),
            EventPayload::InjectTimeout => self.on_external_timeout(&mut state, envelope, now_ms),
            EventPayload::DaemonWriteAck(_)
            | EventPayload::PtyDataReceived(_)
            | EventPayload::VerifyPass(_)
            | EventPayload::InjectVerified => self.on_evidence(&mut state, envelope, now_ms),
            // The ledger's own notifications come back around on the global
            // feed; they are not consumed.
            EventPayload::TransitionInvalid(_)
            | EventPayload::TransitionPhaseReached(_)
            | EventPayload::TransitionEvidenceRecorded(_)
            | EventPayload::TransitionTimeoutArmed(_) => {}
        }
    }

    fn on_requested(
        &self,
        state: &mut LedgerState,
        envelope: &EventEnvelope,
        payload: &InjectRequestedPayload,
        now_ms: u64,
    ) {
        let Some(correlation_id) = envelope.correlation_id.clone() else {
            self.report_invalid(
                state,
                &envelope.pane_id,
                None,
                Some(envelope.event_id),
                None,
                None,
                None,
                reason::MISSING_REQUIRED_FIELDS,
                Some("inject.requested requires a correlation_id".to_owned()),
            );
            return;
        };

        // Idempotent creation: a second request for an already-active key
        // resolves to the existing transition.
        if let Some(existing) = state.active_id(&envelope.pane_id, &correlation_id) {
            debug!(
                pane = %envelope.pane_id,
                correlation = %correlation_id,
                transition = %existing,
                "duplicate inject.requested resolved to existing transition"
            );
            return;
        }

        let actor_type = if payload.priority {
            ActorType::User
        } else if envelope.source == self.config.source {
            ActorType::System
        } else {
            ActorType::Agent
        };

        let (transition_id, seq) = state.allocate_identity();
        let transition = Transition::open(
            transition_id.clone(),
            seq,
            envelope.pane_id.clone(),
            correlation_id.clone(),
            TransitionOrigin {
                actor_type,
                actor_role: payload.actor_role.clone(),
                source: envelope.source.clone(),
            },
            OwnerLease {
                module: envelope.source.clone(),
                lease_id: format!("lease-{seq:06}"),
                acquired_at_ms: now_ms,
                lease_ttl_ms: self.config.lease_ttl_ms,
            },
            payload.evidence_spec.clone().unwrap_or_default(),
            payload.timeout_budget.unwrap_or_default(),
            payload.fallback_policy.clone().unwrap_or_default(),
            envelope.event_id,
            now_ms,
        );
        state.insert_open(transition);
        state.stats.created += 1;
        debug!(
            pane = %envelope.pane_id,
            correlation = %correlation_id,
            transition = %transition_id,
            "transition opened"
        );
        self.publish_notification(
            &envelope.pane_id,
            Some(&correlation_id),
            Some(envelope.event_id),
            EventPayload::TransitionPhaseReached(TransitionPhasePayload {
                transition_id,
                phase: TransitionPhase::Requested,
                note: None,
            }),
        );
    }

    fn on_queued(&self, state: &mut LedgerState, envelope: &EventEnvelope, now_ms: u64) {
        let Some(transition_id) = self.resolve_open(state, envelope) else {
            return;
        };
        if !self.owner_allows(state, &transition_id, envelope, now_ms) {
            return;
        }
        let _ = self.advance(
            state,
            &transition_id,
            envelope.event_id,
            TransitionPhase::Accepted,
            None,
            now_ms,
        );
    }

    fn on_applied(&self, state: &mut LedgerState, envelope: &EventEnvelope, now_ms: u64) {
        let Some(transition_id) = self.resolve_open(state, envelope) else {
            return;
        };
        if !self.owner_allows(state, &transition_id, envelope, now_ms) {
            return;
        }
        let _ = self.try_apply(
            state,
            &transition_id,
            envelope.event_id,
            Some("applied_without_accept"),
            None,
            now_ms,
        );
    }

    fn on_submit_requested(&self, state: &mut LedgerState, envelope: &EventEnvelope, now_ms: u64) {
        let Some(transition_id) = self.resolve_open(state, envelope) else {
            return;
        };
        if !self.owner_allows(state, &transition_id, envelope, now_ms) {
            return;
        }
        // A stalled submit is itself a failure mode worth catching, so the
        // timeout is armed here without waiting for submit.sent. Re-arming
        // replaces the prior timer, last writer wins.
        self.arm_timeout(state, &transition_id, envelope.event_id);
    }

    fn on_submit_sent(&self, state: &mut LedgerState, envelope: &EventEnvelope, now_ms: u64) {
        let Some(transition_id) = self.resolve_open(state, envelope) else {
            return;
        };
        if !self.owner_allows(state, &transition_id, envelope, now_ms) {
            return;
        }

        let current = match state.get(&transition_id) {
            Some(transition) => transition.phase,
            None => return,
        };
        if current != TransitionPhase::Verifying {
            if !self.try_apply(
                state,
                &transition_id,
                envelope.event_id,
                Some("submit_sent_without_accept"),
                Some("submit_sent_without_apply"),
                now_ms,
            ) {
                return;
            }
            match self.advance(
                state,
                &transition_id,
                envelope.event_id,
                TransitionPhase::Verifying,
                None,
                now_ms,
            ) {
                AdvanceOutcome::Rejected => return,
                AdvanceOutcome::Advanced | AdvanceOutcome::NoOp => {}
            }
        }

        // The local submit acknowledgement drives the phase graph but is not
        // delivery evidence; only downstream observers settle the transition.
        if !state.has_timer(&transition_id) {
            self.arm_timeout(state, &transition_id, envelope.event_id);
        }
    }

    fn on_terminal_signal(
        &self,
        state: &mut LedgerState,
        envelope: &EventEnvelope,
        target: TransitionPhase,
        reason_code: String,
        now_ms: u64,
    ) {
        let Some(transition_id) = self.resolve_open(state, envelope) else {
            return;
        };
        if !self.owner_allows(state, &transition_id, envelope, now_ms) {
            return;
        }
        let observed = state
            .get(&transition_id)
            .map(Transition::strongest_evidence_class)
            .unwrap_or(EvidenceClass::None);
        let verification = if target == TransitionPhase::Failed {
            Verification {
                outcome: VerificationOutcome::Fail,
                evidence_class_observed: observed,
                confidence: 0.0,
                verified_at_ms: Some(now_ms),
            }
        } else {
            Verification {
                outcome: VerificationOutcome::Unknown,
                evidence_class_observed: observed,
                confidence: 0.0,
                verified_at_ms: None,
            }
        };
        self.finalize(
            state,
            &transition_id,
            target,
            verification,
            TransitionOutcome {
                status: OutcomeStatus::Failure,
                reason_code,
                resolved_by: ResolvedBy::Normal,
            },
            Some(envelope.event_id),
            None,
            now_ms,
        );
    }

    fn on_external_timeout(&self, state: &mut LedgerState, envelope: &EventEnvelope, now_ms: u64) {
        let Some(transition_id) = self.resolve_open(state, envelope) else {
            return;
        };
        self.settle_on_timeout(state, &transition_id, Some(envelope.event_id), now_ms);
    }

    fn on_evidence(&self, state: &mut LedgerState, envelope: &EventEnvelope, now_ms: u64) {
        let transition_id = match &envelope.correlation_id {
            Some(correlation_id) => {
                match state.active_id(&envelope.pane_id, correlation_id).cloned() {
                    Some(id) => id,
                    None => {
                        let closed_exists = state
                            .find_by_correlation(correlation_id, Some(&envelope.pane_id), false)
                            .is_some();
                        if closed_exists {
                            self.report_invalid(
                                state,
                                &envelope.pane_id,
                                Some(correlation_id),
                                Some(envelope.event_id),
                                None,
                                None,
                                None,
                                reason::TRANSITION_CLOSED,
                                None,
                            );
                        } else if !matches!(envelope.payload, EventPayload::PtyDataReceived(_)) {
                            self.report_invalid(
                                state,
                                &envelope.pane_id,
                                Some(correlation_id),
                                Some(envelope.event_id),
                                None,
                                None,
                                None,
                                reason::UNKNOWN_TRANSITION,
                                None,
                            );
                        }
                        return;
                    }
                }
            }
            // Raw pane output and similar observer signals carry no
            // correlation; they apply to the in-flight submission on the
            // pane, if any, and are otherwise background noise.
            None => match state.evidence_target_for_pane(&envelope.pane_id) {
                Some(id) => id,
                None => {
                    debug!(
                        pane = %envelope.pane_id,
                        event_type = envelope.event_type(),
                        "evidence signal without an in-flight transition ignored"
                    );
                    return;
                }
            },
        };

        // Evidence observers are exempt from the owner lease: settling a
        // transition is observing it, not driving it.
        self.record_assessment(state, &transition_id, envelope, now_ms);
    }

    fn record_assessment(
        &self,
        state: &mut LedgerState,
        transition_id: &TransitionId,
        envelope: &EventEnvelope,
        now_ms: u64,
    ) {
        let (spec, pane_id, correlation_id, required_manual) = match state.get(transition_id) {
            Some(transition) if !transition.closed => (
                transition.evidence_spec.clone(),
                transition.pane_id.clone(),
                transition.correlation_id.clone(),
                transition.evidence_spec.required_class == EvidenceRequirement::ManualOnly,
            ),
            _ => return,
        };

        let gates = self.bus.pane_state(&pane_id).map(|pane_state| pane_state.gates);
        let Some(assessment) = assess(&envelope.payload, gates.as_ref(), &spec) else {
            return;
        };

        if assessment.class != EvidenceClass::None {
            if let Some(transition) = state.get_mut(transition_id) {
                transition.record_evidence(
                    EvidenceRecord {
                        event_id: envelope.event_id,
                        signal: assessment.signal,
                        ts_ms: now_ms,
                        class: assessment.class,
                        summary: assessment.summary.clone(),
                    },
                    now_ms,
                );
            }
            debug!(
                pane = %pane_id,
                correlation = %correlation_id,
                signal = assessment.signal.as_str(),
                class = ?assessment.class,
                "evidence recorded"
            );
            self.publish_notification(
                &pane_id,
                Some(&correlation_id),
                Some(envelope.event_id),
                EventPayload::TransitionEvidenceRecorded(TransitionEvidencePayload {
                    transition_id: transition_id.clone(),
                    evidence_type: assessment.signal.as_str().to_owned(),
                    evidence_class_observed: assessment.class,
                }),
            );
        }

        if let Some(fail_reason) = assessment.fail_reason {
            let observed = if assessment.class == EvidenceClass::Disallowed {
                EvidenceClass::Disallowed
            } else {
                state
                    .get(transition_id)
                    .map(Transition::strongest_evidence_class)
                    .unwrap_or(EvidenceClass::None)
            };
            self.finalize(
                state,
                transition_id,
                TransitionPhase::Failed,
                Verification {
                    outcome: VerificationOutcome::Fail,
                    evidence_class_observed: observed,
                    confidence: 0.0,
                    verified_at_ms: Some(now_ms),
                },
                TransitionOutcome {
                    status: OutcomeStatus::Failure,
                    reason_code: fail_reason,
                    resolved_by: ResolvedBy::Normal,
                },
                Some(envelope.event_id),
                None,
                now_ms,
            );
            return;
        }

        if assessment.class == EvidenceClass::Strong {
            if required_manual {
                // Strong automatic evidence is on record, but this
                // transition settles only through manual confirmation.
                self.finalize(
                    state,
                    transition_id,
                    TransitionPhase::Failed,
                    Verification {
                        outcome: VerificationOutcome::Fail,
                        evidence_class_observed: EvidenceClass::Strong,
                        confidence: CONFIDENCE_STRONG,
                        verified_at_ms: Some(now_ms),
                    },
                    TransitionOutcome {
                        status: OutcomeStatus::Failure,
                        reason_code: reason::MANUAL_VERIFICATION_REQUIRED.to_owned(),
                        resolved_by: ResolvedBy::Normal,
                    },
                    Some(envelope.event_id),
                    None,
                    now_ms,
                );
            } else {
                self.finalize(
                    state,
                    transition_id,
                    TransitionPhase::Verified,
                    Verification {
                        outcome: VerificationOutcome::Pass,
                        evidence_class_observed: EvidenceClass::Strong,
                        confidence: CONFIDENCE_STRONG,
                        verified_at_ms: Some(now_ms),
                    },
                    TransitionOutcome {
                        status: OutcomeStatus::Success,
                        reason_code: reason::STRONG_EVIDENCE.to_owned(),
                        resolved_by: ResolvedBy::Normal,
                    },
                    Some(envelope.event_id),
                    None,
                    now_ms,
                );
            }
        }
    }

    /// Deterministic settlement once the overall budget has elapsed, driven
    /// by the internal timer or an external `inject.timeout` signal.
    fn settle_on_timeout(
        &self,
        state: &mut LedgerState,
        transition_id: &TransitionId,
        event_id: Option<EventId>,
        now_ms: u64,
    ) {
        let (strongest, on_timeout) = match state.get(transition_id) {
            Some(transition) if !transition.closed => (
                transition.strongest_evidence_class(),
                transition.fallback_policy.on_timeout,
            ),
            _ => return,
        };

        match strongest {
            EvidenceClass::Strong => self.finalize(
                state,
                transition_id,
                TransitionPhase::Verified,
                Verification {
                    outcome: VerificationOutcome::Pass,
                    evidence_class_observed: EvidenceClass::Strong,
                    confidence: CONFIDENCE_STRONG,
                    verified_at_ms: Some(now_ms),
                },
                TransitionOutcome {
                    status: OutcomeStatus::Success,
                    reason_code: reason::LATE_STRONG_EVIDENCE.to_owned(),
                    resolved_by: ResolvedBy::Normal,
                },
                event_id,
                None,
                now_ms,
            ),
            EvidenceClass::Disallowed => self.finalize(
                state,
                transition_id,
                TransitionPhase::Failed,
                Verification {
                    outcome: VerificationOutcome::Fail,
                    evidence_class_observed: EvidenceClass::Disallowed,
                    confidence: 0.0,
                    verified_at_ms: Some(now_ms),
                },
                TransitionOutcome {
                    status: OutcomeStatus::Failure,
                    reason_code: reason::DISALLOWED_EVIDENCE.to_owned(),
                    resolved_by: ResolvedBy::Normal,
                },
                event_id,
                None,
                now_ms,
            ),
            EvidenceClass::Weak | EvidenceClass::None => {
                if on_timeout == TimeoutAction::Drop {
                    self.finalize(
                        state,
                        transition_id,
                        TransitionPhase::Dropped,
                        Verification {
                            outcome: VerificationOutcome::Unknown,
                            evidence_class_observed: strongest,
                            confidence: 0.0,
                            verified_at_ms: None,
                        },
                        TransitionOutcome {
                            status: OutcomeStatus::Failure,
                            reason_code: reason::TIMEOUT_DROP_FALLBACK.to_owned(),
                            resolved_by: ResolvedBy::Fallback,
                        },
                        event_id,
                        None,
                        now_ms,
                    );
                } else if strongest == EvidenceClass::Weak {
                    // Weak evidence plus a deadline means "probably
                    // delivered, unconfirmed": a partial success.
                    self.finalize(
                        state,
                        transition_id,
                        TransitionPhase::TimedOut,
                        Verification {
                            outcome: VerificationOutcome::RiskedPass,
                            evidence_class_observed: EvidenceClass::Weak,
                            confidence: CONFIDENCE_WEAK,
                            verified_at_ms: Some(now_ms),
                        },
                        TransitionOutcome {
                            status: OutcomeStatus::Partial,
                            reason_code: reason::TIMEOUT_WITH_WEAK_EVIDENCE.to_owned(),
                            resolved_by: ResolvedBy::Fallback,
                        },
                        event_id,
                        None,
                        now_ms,
                    );
                } else {
                    self.finalize(
                        state,
                        transition_id,
                        TransitionPhase::TimedOut,
                        Verification {
                            outcome: VerificationOutcome::Unknown,
                            evidence_class_observed: EvidenceClass::None,
                            confidence: 0.0,
                            verified_at_ms: None,
                        },
                        TransitionOutcome {
                            status: OutcomeStatus::Failure,
                            reason_code: reason::TIMEOUT_WITHOUT_EVIDENCE.to_owned(),
                            resolved_by: ResolvedBy::Fallback,
                        },
                        event_id,
                        None,
                        now_ms,
                    );
                }
            }
        }
    }

    /// Every settlement path funnels through here so outcome, lifecycle and
    /// stat bookkeeping cannot diverge. The target phase is applied directly;
    /// the audit trail records the jump.
    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        state: &mut LedgerState,
        transition_id: &TransitionId,
        target: TransitionPhase,
        verification: Verification,
        outcome: TransitionOutcome,
        event_id: Option<EventId>,
        note: Option<String>,
        now_ms: u64,
    ) {
        state.cancel_timer(transition_id);

        let reason_code = outcome.reason_code.clone();
        let (pane_id, correlation_id) = {
            let Some(transition) = state.get_mut(transition_id) else {
                return;
            };
            if transition.closed {
                return;
            }
            let note = note.or_else(|| Some(reason_code.clone()));
            transition.record_phase(target, event_id, now_ms, note);
            transition.verification = verification.clone();
            transition.outcome = Some(outcome);
            transition.closed = true;
            transition.closed_at_ms = Some(now_ms);
            (
                transition.pane_id.clone(),
                transition.correlation_id.clone(),
            )
        };

        state.mark_closed(transition_id, self.config.retention_cap);
        match target {
            TransitionPhase::Verified => state.stats.settled_verified += 1,
            TransitionPhase::Failed | TransitionPhase::Cancelled => state.stats.failed += 1,
            TransitionPhase::Dropped => state.stats.dropped += 1,
            TransitionPhase::TimedOut => {
                state.stats.timed_out += 1;
                if verification.outcome == VerificationOutcome::RiskedPass {
                    state.stats.settled_unverified += 1;
                }
            }
            _ => {}
        }

        debug!(
            pane = %pane_id,
            correlation = %correlation_id,
            transition = %transition_id,
            phase = target.as_str(),
            reason = %reason_code,
            "transition settled"
        );
        self.publish_notification(
            &pane_id,
            Some(&correlation_id),
            event_id,
            EventPayload::TransitionPhaseReached(TransitionPhasePayload {
                transition_id: transition_id.clone(),
                phase: target,
                note: Some(reason_code),
            }),
        );
    }

    /// Arms (or replaces) the settlement timer for a transition. The fired
    /// task re-validates its generation under the state lock, so a cancelled
    /// or superseded timer can never settle anything.
    fn arm_timeout(&self, state: &mut LedgerState, transition_id: &TransitionId, event_id: EventId) {
        let (budget_ms, pane_id, correlation_id) = match state.get(transition_id) {
            Some(transition) if !transition.closed => (
                transition.timeout_budget.overall_ms,
                transition.pane_id.clone(),
                transition.correlation_id.clone(),
            ),
            _ => return,
        };

        let generation = state.next_timer_generation();
        let ledger = self.clone();
        let timer_transition_id = transition_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(budget_ms)).await;
            ledger.on_timer_fired(&timer_transition_id, generation);
        });
        state.install_timer(transition_id.clone(), SettlementTimer::new(generation, handle));

        debug!(
            pane = %pane_id,
            correlation = %correlation_id,
            transition = %transition_id,
            budget_ms,
            "settlement timeout armed"
        );
        self.publish_notification(
            &pane_id,
            Some(&correlation_id),
            Some(event_id),
            EventPayload::TransitionTimeoutArmed(TransitionTimeoutArmedPayload {
                transition_id: transition_id.clone(),
                timeout_budget_ms: budget_ms,
            }),
        );
    }

    fn on_timer_fired(&self, transition_id: &TransitionId, generation: u64) {
        let now_ms = self.bus.now_ms();
        let mut state = self.lock_state();
        if !state.timer_generation_is_current(transition_id, generation) {
            return;
        }
        state.clear_fired_timer(transition_id);
        self.settle_on_timeout(&mut state, transition_id, None, now_ms);
    }

    /// Moves a transition to `applied`, synthesizing the accepted hop when
    /// the upstream accept signal never arrived and gating on the pane's
    /// current preconditions. Runs identically for an explicit
    /// `inject.applied` and for an apply synthesized from a submit signal.
    fn try_apply(
        &self,
        state: &mut LedgerState,
        transition_id: &TransitionId,
        event_id: EventId,
        accept_note: Option<&str>,
        apply_note: Option<&str>,
        now_ms: u64,
    ) -> bool {
        let (current, pane_id, correlation_id) = match state.get(transition_id) {
            Some(transition) => (
                transition.phase,
                transition.pane_id.clone(),
                transition.correlation_id.clone(),
            ),
            None => return false,
        };

        match current {
            TransitionPhase::Applied => return true,
            TransitionPhase::Requested | TransitionPhase::Accepted | TransitionPhase::Deferred => {}
            other => {
                self.report_invalid(
                    state,
                    &pane_id,
                    Some(&correlation_id),
                    Some(event_id),
                    Some(transition_id),
                    Some(TransitionPhase::Applied),
                    Some(other),
                    reason::PHASE_ORDER_VIOLATION,
                    None,
                );
                return false;
            }
        }

        let checks = self.evaluate_preconditions(&pane_id, now_ms);
        let failing: Vec<String> = checks
            .iter()
            .filter(|check| check.result == PreconditionResult::Fail)
            .map(|check| check.id.clone())
            .collect();

        // The evaluated set is appended for audit whether or not it passed.
        if let Some(transition) = state.get_mut(transition_id) {
            transition.preconditions.extend(checks);
            transition.updated_at_ms = now_ms;
        }

        if !failing.is_empty() {
            if current == TransitionPhase::Requested {
                if let Some(transition) = state.get_mut(transition_id) {
                    transition.record_phase(
                        TransitionPhase::Deferred,
                        Some(event_id),
                        now_ms,
                        Some("precondition_failed".to_owned()),
                    );
                }
                self.publish_notification(
                    &pane_id,
                    Some(&correlation_id),
                    Some(event_id),
                    EventPayload::TransitionPhaseReached(TransitionPhasePayload {
                        transition_id: transition_id.clone(),
                        phase: TransitionPhase::Deferred,
                        note: Some("precondition_failed".to_owned()),
                    }),
                );
            }
            self.report_invalid(
                state,
                &pane_id,
                Some(&correlation_id),
                Some(event_id),
                Some(transition_id),
                Some(TransitionPhase::Applied),
                Some(current),
                reason::PRECONDITION_FAILED_BEFORE_APPLY,
                Some(failing.join(",")),
            );
            return false;
        }

        if current != TransitionPhase::Accepted {
            let note = match current {
                TransitionPhase::Deferred => Some("reaccepted_after_deferral".to_owned()),
                _ => accept_note.map(str::to_owned),
            };
            match self.advance(
                state,
                transition_id,
                event_id,
                TransitionPhase::Accepted,
                note,
                now_ms,
            ) {
                AdvanceOutcome::Rejected => return false,
                AdvanceOutcome::Advanced | AdvanceOutcome::NoOp => {}
            }
        }
        matches!(
            self.advance(
                state,
                transition_id,
                event_id,
                TransitionPhase::Applied,
                apply_note.map(str::to_owned),
                now_ms,
            ),
            AdvanceOutcome::Advanced | AdvanceOutcome::NoOp
        )
    }

    fn evaluate_preconditions(&self, pane_id: &PaneId, now_ms: u64) -> Vec<PreconditionCheck> {
        let gates = self
            .bus
            .pane_state(pane_id)
            .map(|pane_state| pane_state.gates)
            .unwrap_or_default();
        let result_of = |failed: bool| {
            if failed {
                PreconditionResult::Fail
            } else {
                PreconditionResult::Pass
            }
        };
        vec![
            PreconditionCheck {
                id: PRECONDITION_FOCUS_LOCK_GUARD.to_owned(),
                result: result_of(gates.focus_locked),
                checked_at_ms: now_ms,
                failure_action: PRECONDITION_FAILURE_ACTION.to_owned(),
            },
            PreconditionCheck {
                id: PRECONDITION_COMPACTION_GATE.to_owned(),
                result: result_of(gates.compacting == CompactionStatus::Confirmed),
                checked_at_ms: now_ms,
                failure_action: PRECONDITION_FAILURE_ACTION.to_owned(),
            },
        ]
    }

    fn advance(
        &self,
        state: &mut LedgerState,
        transition_id: &TransitionId,
        event_id: EventId,
        next: TransitionPhase,
        note: Option<String>,
        now_ms: u64,
    ) -> AdvanceOutcome {
        let (current, pane_id, correlation_id) = match state.get(transition_id) {
            Some(transition) => (
                transition.phase,
                transition.pane_id.clone(),
                transition.correlation_id.clone(),
            ),
            None => return AdvanceOutcome::Rejected,
        };

        if current == next {
            return AdvanceOutcome::NoOp;
        }
        if !current.can_advance_to(next) {
            self.report_invalid(
                state,
                &pane_id,
                Some(&correlation_id),
                Some(event_id),
                Some(transition_id),
                Some(next),
                Some(current),
                reason::PHASE_ORDER_VIOLATION,
                None,
            );
            return AdvanceOutcome::Rejected;
        }

        if let Some(transition) = state.get_mut(transition_id) {
            transition.record_phase(next, Some(event_id), now_ms, note.clone());
        }
        debug!(
            pane = %pane_id,
            correlation = %correlation_id,
            transition = %transition_id,
            phase = next.as_str(),
            "transition advanced"
        );
        self.publish_notification(
            &pane_id,
            Some(&correlation_id),
            Some(event_id),
            EventPayload::TransitionPhaseReached(TransitionPhasePayload {
                transition_id: transition_id.clone(),
                phase: next,
                note,
            }),
        );
        AdvanceOutcome::Advanced
    }

    /// Resolves the open transition an owner-driving event addresses, or
    /// reports why it cannot.
    fn resolve_open(
        &self,
        state: &mut LedgerState,
        envelope: &EventEnvelope,
    ) -> Option<TransitionId> {
        let Some(correlation_id) = &envelope.correlation_id else {
            self.report_invalid(
                state,
                &envelope.pane_id,
                None,
                Some(envelope.event_id),
                None,
                None,
                None,
                reason::MISSING_REQUIRED_FIELDS,
                Some(format!(
                    "{} requires a correlation_id",
                    envelope.event_type()
                )),
            );
            return None;
        };

        if let Some(transition_id) = state.active_id(&envelope.pane_id, correlation_id) {
            return Some(transition_id.clone());
        }

        let closed_exists = state
            .find_by_correlation(correlation_id, Some(&envelope.pane_id), false)
            .is_some();
        let reason_code = if closed_exists {
            reason::TRANSITION_CLOSED
        } else {
            reason::UNKNOWN_TRANSITION
        };
        self.report_invalid(
            state,
            &envelope.pane_id,
            Some(correlation_id),
            Some(envelope.event_id),
            None,
            None,
            None,
            reason_code,
            None,
        );
        None
    }

    /// Owner lease gate for the event types that drive the phase forward.
    fn owner_allows(
        &self,
        state: &mut LedgerState,
        transition_id: &TransitionId,
        envelope: &EventEnvelope,
        now_ms: u64,
    ) -> bool {
        let (owner, expired, current, pane_id, correlation_id) = match state.get(transition_id) {
            Some(transition) => (
                transition.owner.module.clone(),
                transition.owner.is_expired(now_ms),
                transition.phase,
                transition.pane_id.clone(),
                transition.correlation_id.clone(),
            ),
            None => return false,
        };

        if owner != envelope.source {
            self.report_invalid(
                state,
                &pane_id,
                Some(&correlation_id),
                Some(envelope.event_id),
                Some(transition_id),
                None,
                Some(current),
                reason::OWNERSHIP_CONFLICT,
                Some(format!(
                    "owned by {owner}, event from {}",
                    envelope.source
                )),
            );
            return false;
        }
        if expired {
            self.report_invalid(
                state,
                &pane_id,
                Some(&correlation_id),
                Some(envelope.event_id),
                Some(transition_id),
                None,
                Some(current),
                reason::OWNER_LEASE_EXPIRED,
                None,
            );
            return false;
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn report_invalid(
        &self,
        state: &mut LedgerState,
        pane_id: &PaneId,
        correlation_id: Option<&CorrelationId>,
        causation_id: Option<EventId>,
        transition_id: Option<&TransitionId>,
        attempted_phase: Option<TransitionPhase>,
        current_phase: Option<TransitionPhase>,
        reason_code: &str,
        detail: Option<String>,
    ) {
        state.stats.invalid += 1;
        warn!(
            pane = %pane_id,
            correlation = correlation_id.map(CorrelationId::as_str).unwrap_or("-"),
            reason = reason_code,
            detail = detail.as_deref().unwrap_or(""),
            "transition invariant violation"
        );
        self.publish_notification(
            pane_id,
            correlation_id,
            causation_id,
            EventPayload::TransitionInvalid(TransitionInvalidPayload {
                reason_code: reason_code.to_owned(),
                transition_id: transition_id.cloned(),
                attempted_phase,
                current_phase,
                detail,
            }),
        );
    }

    fn publish_notification(
        &self,
        pane_id: &PaneId,
        correlation_id: Option<&CorrelationId>,
        causation_id: Option<EventId>,
        payload: EventPayload,
    ) {
        let mut draft = EventDraft::new(pane_id.clone(), self.config.source.clone(), payload);
        if let Some(correlation_id) = correlation_id {
            draft = draft.with_correlation(correlation_id.clone());
        }
        if let Some(causation_id) = causation_id {
            draft = draft.caused_by(causation_id);
        }
        let _ = self.bus.publish(draft);
    }
}
