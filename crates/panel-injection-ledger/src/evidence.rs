use panel_injection_protocol::{
    EventPayload, EvidenceClass, EvidenceSpec, PaneGates, SignalKind, CompactionStatus,
};

use crate::reason;
use crate::transition::EvidenceSummary;

/// Outcome of classifying one observed signal against the static table and
/// the owning transition's evidence spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignalAssessment {
    pub signal: SignalKind,
    pub class: EvidenceClass,
    pub summary: EvidenceSummary,
    /// When set, the signal does not merely accumulate: it fails the
    /// transition immediately with this reason.
    pub fail_reason: Option<String>,
}

/// Classifies an evidence-bearing event. Returns `None` for payloads that
/// carry no delivery evidence at all. Pane gates are sampled at processing
/// time, not event-timestamp time.
pub(crate) fn assess(
    payload: &EventPayload,
    gates: Option<&PaneGates>,
    spec: &EvidenceSpec,
) -> Option<SignalAssessment> {
    let (signal, summary) = match payload {
        EventPayload::VerifyPass(payload) => (
            SignalKind::VerifyPass,
            EvidenceSummary {
                reason: payload.method.clone(),
                ..EvidenceSummary::default()
            },
        ),
        EventPayload::InjectVerified => (SignalKind::InjectVerified, EvidenceSummary::default()),
        EventPayload::DaemonWriteAck(payload) => (
            SignalKind::DaemonWriteAck,
            EvidenceSummary {
                status: Some(payload.status.clone()),
                bytes_accepted: payload.bytes_accepted,
                ..EvidenceSummary::default()
            },
        ),
        EventPayload::PtyDataReceived(payload) => (
            SignalKind::PtyData,
            EvidenceSummary {
                meaningful: Some(payload.meaningful),
                chunk_type: payload.chunk_type.clone(),
                bytes_accepted: Some(payload.bytes.len() as u64),
                ..EvidenceSummary::default()
            },
        ),
        _ => return None,
    };

    // A signal the spec does not consider never influences the transition,
    // not even through the daemon-ack fast-fail path.
    if !spec.considers(signal) {
        return Some(SignalAssessment {
            signal,
            class: EvidenceClass::None,
            summary,
            fail_reason: None,
        });
    }

    if spec.forbids(signal) {
        return Some(SignalAssessment {
            signal,
            class: EvidenceClass::Disallowed,
            summary,
            fail_reason: Some(reason::DISALLOWED_EVIDENCE.to_owned()),
        });
    }

    let (class, fail_reason) = match payload {
        EventPayload::VerifyPass(_) | EventPayload::InjectVerified => (EvidenceClass::Strong, None),
        EventPayload::DaemonWriteAck(payload) => {
            if payload.status == "accepted" {
                (EvidenceClass::Weak, None)
            } else {
                (
                    EvidenceClass::None,
                    Some(reason::daemon_write_failure(&payload.status)),
                )
            }
        }
        EventPayload::PtyDataReceived(_) => {
            let compacting = gates
                .map(|gates| gates.compacting == CompactionStatus::Confirmed)
                .unwrap_or(false);
            if compacting {
                (
                    EvidenceClass::Disallowed,
                    Some(reason::DISALLOWED_EVIDENCE.to_owned()),
                )
            } else {
                (EvidenceClass::Weak, None)
            }
        }
        _ => unreachable!("non-evidence payloads returned above"),
    };

    Some(SignalAssessment {
        signal,
        class,
        summary,
        fail_reason,
    })
}

#[cfg(test)]
mod tests {
    use panel_injection_protocol::{
        DaemonWriteAckPayload, EventPayload, EvidenceClass, EvidenceSpec, PaneGates,
        PtyDataPayload, SignalKind, VerifyPassPayload, CompactionStatus,
    };

    use super::assess;
    use crate::reason;

    fn verify_pass() -> EventPayload {
        EventPayload::VerifyPass(VerifyPassPayload { method: None })
    }

    fn pty_chunk() -> EventPayload {
        EventPayload::PtyDataReceived(PtyDataPayload {
            bytes: b"output".to_vec(),
            chunk_type: Some("frame".to_owned()),
            meaningful: true,
        })
    }

    #[test]
    fn verify_pass_is_strong_by_default() {
        let assessment = assess(&verify_pass(), None, &EvidenceSpec::default())
            .expect("verify.pass is evidence");
        assert_eq!(assessment.class, EvidenceClass::Strong);
        assert!(assessment.fail_reason.is_none());
    }

    #[test]
    fn accepted_daemon_ack_is_weak_and_other_statuses_fail_fast() {
        let accepted = EventPayload::DaemonWriteAck(DaemonWriteAckPayload {
            status: "accepted".to_owned(),
            bytes_accepted: Some(42),
        });
        let assessment =
            assess(&accepted, None, &EvidenceSpec::default()).expect("ack is evidence");
        assert_eq!(assessment.class, EvidenceClass::Weak);
        assert_eq!(assessment.summary.bytes_accepted, Some(42));

        let rejected = EventPayload::DaemonWriteAck(DaemonWriteAckPayload {
            status: "rejected".to_owned(),
            bytes_accepted: None,
        });
        let assessment =
            assess(&rejected, None, &EvidenceSpec::default()).expect("ack is evidence");
        assert_eq!(assessment.class, EvidenceClass::None);
        assert_eq!(
            assessment.fail_reason.as_deref(),
            Some("daemon_write_rejected")
        );
    }

    #[test]
    fn pty_data_reclassifies_to_disallowed_while_compacting() {
        let calm = PaneGates::default();
        let assessment =
            assess(&pty_chunk(), Some(&calm), &EvidenceSpec::default()).expect("pty is evidence");
        assert_eq!(assessment.class, EvidenceClass::Weak);

        let compacting = PaneGates {
            focus_locked: false,
            compacting: CompactionStatus::Confirmed,
        };
        let assessment = assess(&pty_chunk(), Some(&compacting), &EvidenceSpec::default())
            .expect("pty is evidence");
        assert_eq!(assessment.class, EvidenceClass::Disallowed);
        assert_eq!(
            assessment.fail_reason.as_deref(),
            Some(reason::DISALLOWED_EVIDENCE)
        );
    }

    #[test]
    fn suspected_compaction_does_not_reclassify() {
        let suspected = PaneGates {
            focus_locked: false,
            compacting: CompactionStatus::Suspected,
        };
        let assessment = assess(&pty_chunk(), Some(&suspected), &EvidenceSpec::default())
            .expect("pty is evidence");
        assert_eq!(assessment.class, EvidenceClass::Weak);
    }

    #[test]
    fn disallowed_signals_override_the_static_strong_mapping() {
        let spec = EvidenceSpec {
            disallowed_signals: vec![SignalKind::VerifyPass],
            ..EvidenceSpec::default()
        };
        let assessment = assess(&verify_pass(), None, &spec).expect("verify.pass is evidence");
        assert_eq!(assessment.class, EvidenceClass::Disallowed);
        assert_eq!(
            assessment.fail_reason.as_deref(),
            Some(reason::DISALLOWED_EVIDENCE)
        );
    }

    #[test]
    fn unlisted_signals_classify_as_none_when_accepted_signals_is_set() {
        let spec = EvidenceSpec {
            accepted_signals: Some(vec![SignalKind::VerifyPass]),
            ..EvidenceSpec::default()
        };
        let assessment = assess(&pty_chunk(), None, &spec).expect("pty is evidence");
        assert_eq!(assessment.class, EvidenceClass::None);
        assert!(assessment.fail_reason.is_none());

        // Even a rejected daemon ack is inert when the spec never considers
        // the signal kind.
        let rejected = EventPayload::DaemonWriteAck(DaemonWriteAckPayload {
            status: "rejected".to_owned(),
            bytes_accepted: None,
        });
        let assessment = assess(&rejected, None, &spec).expect("ack is evidence");
        assert_eq!(assessment.class, EvidenceClass::None);
        assert!(assessment.fail_reason.is_none());
    }

    #[test]
    fn lifecycle_events_carry_no_evidence() {
        assert!(assess(&EventPayload::InjectQueued, None, &EvidenceSpec::default()).is_none());
        assert!(assess(&EventPayload::InjectApplied, None, &EvidenceSpec::default()).is_none());
        // The local submit acknowledgement drives the phase graph; it says
        // nothing about whether the pane actually received the text.
        assert!(assess(&EventPayload::InjectSubmitSent, None, &EvidenceSpec::default()).is_none());
        assert!(assess(&EventPayload::InjectTimeout, None, &EvidenceSpec::default()).is_none());
    }
}
