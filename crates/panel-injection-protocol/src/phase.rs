use serde::{Deserialize, Serialize};

/// Phase of a delivery transition. Terminal phases never advance again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    Requested,
    Accepted,
    Deferred,
    Applied,
    Verifying,
    Verified,
    Failed,
    TimedOut,
    Dropped,
    Cancelled,
}

impl TransitionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Verified | Self::Failed | Self::TimedOut | Self::Dropped | Self::Cancelled
        )
    }

    /// Legal forward edges of the phase graph. Self-transitions are handled
    /// by callers as no-ops and are not listed here.
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::Accepted)
                | (Self::Requested, Self::Deferred)
                | (Self::Requested, Self::Dropped)
                | (Self::Accepted, Self::Applied)
                | (Self::Accepted, Self::Failed)
                | (Self::Accepted, Self::TimedOut)
                | (Self::Deferred, Self::Accepted)
                | (Self::Deferred, Self::Dropped)
                | (Self::Deferred, Self::TimedOut)
                | (Self::Applied, Self::Verifying)
                | (Self::Applied, Self::Failed)
                | (Self::Verifying, Self::Verified)
                | (Self::Verifying, Self::Failed)
                | (Self::Verifying, Self::TimedOut)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::Deferred => "deferred",
            Self::Applied => "applied",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Dropped => "dropped",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Coarse lifecycle mirror kept for consumers that predate the phase graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryLifecycle {
    Pending,
    InFlight,
    Delivered,
    Unconfirmed,
    Undelivered,
}

impl From<TransitionPhase> for DeliveryLifecycle {
    fn from(phase: TransitionPhase) -> Self {
        match phase {
            TransitionPhase::Requested
            | TransitionPhase::Accepted
            | TransitionPhase::Deferred => Self::Pending,
            TransitionPhase::Applied | TransitionPhase::Verifying => Self::InFlight,
            TransitionPhase::Verified => Self::Delivered,
            TransitionPhase::TimedOut => Self::Unconfirmed,
            TransitionPhase::Failed | TransitionPhase::Dropped | TransitionPhase::Cancelled => {
                Self::Undelivered
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TransitionPhase;

    #[test]
    fn terminal_phases_have_no_outgoing_edges() {
        let all = [
            TransitionPhase::Requested,
            TransitionPhase::Accepted,
            TransitionPhase::Deferred,
            TransitionPhase::Applied,
            TransitionPhase::Verifying,
            TransitionPhase::Verified,
            TransitionPhase::Failed,
            TransitionPhase::TimedOut,
            TransitionPhase::Dropped,
            TransitionPhase::Cancelled,
        ];
        for from in all {
            if !from.is_terminal() {
                continue;
            }
            for to in all {
                assert!(
                    !from.can_advance_to(to),
                    "terminal phase {from:?} must not advance to {to:?}"
                );
            }
        }
    }

    #[test]
    fn submit_path_edges_are_legal() {
        assert!(TransitionPhase::Requested.can_advance_to(TransitionPhase::Accepted));
        assert!(TransitionPhase::Accepted.can_advance_to(TransitionPhase::Applied));
        assert!(TransitionPhase::Applied.can_advance_to(TransitionPhase::Verifying));
        assert!(TransitionPhase::Verifying.can_advance_to(TransitionPhase::Verified));
    }

    #[test]
    fn skipping_phases_is_not_a_legal_direct_edge() {
        assert!(!TransitionPhase::Requested.can_advance_to(TransitionPhase::Verifying));
        assert!(!TransitionPhase::Requested.can_advance_to(TransitionPhase::Verified));
        assert!(!TransitionPhase::Accepted.can_advance_to(TransitionPhase::Verifying));
        assert!(!TransitionPhase::Deferred.can_advance_to(TransitionPhase::Applied));
    }
}
