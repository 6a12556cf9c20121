use serde::{Deserialize, Serialize};

/// Trust level assigned to an observed delivery signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceClass {
    Strong,
    Weak,
    Disallowed,
    None,
}

/// Signal families the evidence policy can accept or forbid per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    VerifyPass,
    InjectVerified,
    DaemonWriteAck,
    PtyData,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VerifyPass => "verify.pass",
            Self::InjectVerified => "inject.verified",
            Self::DaemonWriteAck => "daemon.write.ack",
            Self::PtyData => "pty.data.received",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceRequirement {
    /// Any strong automatic signal settles the transition.
    #[default]
    Standard,
    /// Automatic evidence never settles; an operator must confirm out of band.
    ManualOnly,
}

/// Per-transition evidence policy. The default spec accepts the static
/// classification table unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvidenceSpec {
    pub required_class: EvidenceRequirement,
    /// When present, only the listed signal kinds are considered at all.
    pub accepted_signals: Option<Vec<SignalKind>>,
    /// Listed signal kinds classify as disallowed even if normally strong.
    pub disallowed_signals: Vec<SignalKind>,
}

impl EvidenceSpec {
    pub fn considers(&self, signal: SignalKind) -> bool {
        match &self.accepted_signals {
            Some(accepted) => accepted.contains(&signal),
            None => true,
        }
    }

    pub fn forbids(&self, signal: SignalKind) -> bool {
        self.disallowed_signals.contains(&signal)
    }
}

pub const DEFAULT_OVERALL_TIMEOUT_MS: u64 = 5_000;

/// Phase budget hints. Only `overall_ms` is enforced by a live timer; the
/// per-phase budgets are informational for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutBudget {
    pub accept_ms: u64,
    pub apply_ms: u64,
    pub verify_ms: u64,
    pub overall_ms: u64,
}

impl Default for TimeoutBudget {
    fn default() -> Self {
        Self {
            accept_ms: 1_000,
            apply_ms: 2_000,
            verify_ms: 3_000,
            overall_ms: DEFAULT_OVERALL_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    #[default]
    Defer,
    Drop,
    SafeMode,
    Retry,
}

/// What the ledger does when the overall timeout elapses without strong
/// evidence. Retry bookkeeping is carried for the queueing module; the
/// ledger itself never re-drives delivery.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FallbackPolicy {
    pub on_timeout: TimeoutAction,
    pub max_retries: u32,
    pub retry_backoff_ms: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::{EvidenceSpec, SignalKind};

    #[test]
    fn default_spec_considers_everything_and_forbids_nothing() {
        let spec = EvidenceSpec::default();
        assert!(spec.considers(SignalKind::VerifyPass));
        assert!(spec.considers(SignalKind::PtyData));
        assert!(!spec.forbids(SignalKind::VerifyPass));
    }

    #[test]
    fn accepted_signals_restricts_consideration() {
        let spec = EvidenceSpec {
            accepted_signals: Some(vec![SignalKind::VerifyPass]),
            ..EvidenceSpec::default()
        };
        assert!(spec.considers(SignalKind::VerifyPass));
        assert!(!spec.considers(SignalKind::DaemonWriteAck));
        assert!(!spec.considers(SignalKind::PtyData));
    }
}
