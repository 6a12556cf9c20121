use panel_injection_protocol::{PaneId, TransitionPhase};
use serde::{Deserialize, Serialize};

/// Filters for `list_transitions`/`query`. The default filter lists open
/// transitions only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionFilter {
    pub include_closed: bool,
    pub pane_id: Option<PaneId>,
    pub phase: Option<TransitionPhase>,
    pub intent_type: Option<String>,
    pub reason_code: Option<String>,
    pub since_ms: Option<u64>,
    pub until_ms: Option<u64>,
    pub limit: Option<usize>,
}

/// Running counters since construction (or the last `reset`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatsSnapshot {
    pub created: u64,
    pub settled_verified: u64,
    pub settled_unverified: u64,
    pub failed: u64,
    pub dropped: u64,
    pub timed_out: u64,
    pub invalid: u64,
    pub active: usize,
    pub total_stored: usize,
}
