use std::collections::{HashMap, VecDeque};

use panel_injection_protocol::{CorrelationId, PaneId, TransitionId, TransitionPhase};

use crate::query::{LedgerStatsSnapshot, TransitionFilter};
use crate::timer::SettlementTimer;
use crate::transition::Transition;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StatsCounters {
    pub created: u64,
    pub settled_verified: u64,
    pub settled_unverified: u64,
    pub failed: u64,
    pub dropped: u64,
    pub timed_out: u64,
    pub invalid: u64,
}

/// In-memory transition store: identity maps, the active index, the closed
/// retention queue, and the pending-timer side index. All mutation happens
/// under the ledger's single lock.
#[derive(Debug, Default)]
pub(crate) struct LedgerState {
    transitions: HashMap<TransitionId, Transition>,
    active: HashMap<(PaneId, CorrelationId), TransitionId>,
    closed_order: VecDeque<TransitionId>,
    timers: HashMap<TransitionId, SettlementTimer>,
    next_seq: u64,
    next_timer_generation: u64,
    pub stats: StatsCounters,
}

impl LedgerState {
    pub fn allocate_identity(&mut self) -> (TransitionId, u64) {
        self.next_seq = self
            .next_seq
            .checked_add(1)
            .expect("transition sequence space exhausted");
        (
            TransitionId::new(format!("txn-{:06}", self.next_seq)),
            self.next_seq,
        )
    }

    pub fn insert_open(&mut self, transition: Transition) {
        let key = (
            transition.pane_id.clone(),
            transition.correlation_id.clone(),
        );
        self.active.insert(key, transition.transition_id.clone());
        self.transitions
            .insert(transition.transition_id.clone(), transition);
    }

    pub fn active_id(&self, pane_id: &PaneId, correlation_id: &CorrelationId) -> Option<&TransitionId> {
        self.active
            .get(&(pane_id.clone(), correlation_id.clone()))
    }

    pub fn get(&self, transition_id: &TransitionId) -> Option<&Transition> {
        self.transitions.get(transition_id)
    }

    pub fn get_mut(&mut self, transition_id: &TransitionId) -> Option<&mut Transition> {
        self.transitions.get_mut(transition_id)
    }

    /// Correlation lookup. An open match always wins; otherwise the most
    /// recently closed match is returned unless the caller asked for
    /// active-only semantics.
    pub fn find_by_correlation(
        &self,
        correlation_id: &CorrelationId,
        pane_id: Option<&PaneId>,
        active_only: bool,
    ) -> Option<&Transition> {
        if let Some(pane_id) = pane_id {
            if let Some(id) = self.active_id(pane_id, correlation_id) {
                return self.transitions.get(id);
            }
        } else if let Some(open) = self
            .active
            .iter()
            .filter(|((_, corr), _)| corr == correlation_id)
            .filter_map(|(_, id)| self.transitions.get(id))
            .max_by_key(|transition| transition.seq)
        {
            return Some(open);
        }

        if active_only {
            return None;
        }

        self.transitions
            .values()
            .filter(|transition| transition.closed)
            .filter(|transition| &transition.correlation_id == correlation_id)
            .filter(|transition| pane_id.is_none_or(|pane| &transition.pane_id == pane))
            .max_by_key(|transition| (transition.closed_at_ms, transition.seq))
    }

    /// Resolves the transition a pane-scoped evidence signal (no correlation
    /// id) applies to: the most recent open transition on the pane that has
    /// begun submission.
    pub fn evidence_target_for_pane(&self, pane_id: &PaneId) -> Option<TransitionId> {
        self.active
            .iter()
            .filter(|((pane, _), _)| pane == pane_id)
            .filter_map(|(_, id)| self.transitions.get(id))
            .filter(|transition| {
                matches!(
                    transition.phase,
                    TransitionPhase::Applied | TransitionPhase::Verifying
                ) || self.timers.contains_key(&transition.transition_id)
            })
            .max_by_key(|transition| transition.seq)
            .map(|transition| transition.transition_id.clone())
    }

    /// Moves a transition into the closed retention queue and evicts the
    /// oldest closed entries beyond the cap. Open transitions are never in
    /// the queue, so a long-lived open transition never blocks eviction.
    pub fn mark_closed(&mut self, transition_id: &TransitionId, retention_cap: usize) {
        if let Some(transition) = self.transitions.get(transition_id) {
            let key = (
                transition.pane_id.clone(),
                transition.correlation_id.clone(),
            );
            self.active.remove(&key);
        }
        self.closed_order.push_back(transition_id.clone());
        while self.closed_order.len() > retention_cap {
            if let Some(evicted) = self.closed_order.pop_front() {
                self.transitions.remove(&evicted);
            }
        }
    }

    pub fn list(&self, filter: &TransitionFilter) -> Vec<Transition> {
        let mut matches: Vec<&Transition> = self
            .transitions
            .values()
            .filter(|transition| filter.include_closed || !transition.closed)
            .filter(|transition| {
                filter
                    .pane_id
                    .as_ref()
                    .is_none_or(|pane| &transition.pane_id == pane)
            })
            .filter(|transition| filter.phase.is_none_or(|phase| transition.phase == phase))
            .filter(|transition| {
                filter
                    .intent_type
                    .as_deref()
                    .is_none_or(|intent| transition.intent_type == intent)
            })
            .filter(|transition| {
                filter.reason_code.as_deref().is_none_or(|reason| {
                    transition
                        .outcome
                        .as_ref()
                        .is_some_and(|outcome| outcome.reason_code == reason)
                })
            })
            .filter(|transition| {
                filter
                    .since_ms
                    .is_none_or(|since| transition.created_at_ms >= since)
            })
            .filter(|transition| {
                filter
                    .until_ms
                    .is_none_or(|until| transition.created_at_ms <= until)
            })
            .collect();
        matches.sort_by_key(|transition| std::cmp::Reverse(transition.seq));
        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }
        matches.into_iter().cloned().collect()
    }

    pub fn stats_snapshot(&self) -> LedgerStatsSnapshot {
        LedgerStatsSnapshot {
            created: self.stats.created,
            settled_verified: self.stats.settled_verified,
            settled_unverified: self.stats.settled_unverified,
            failed: self.stats.failed,
            dropped: self.stats.dropped,
            timed_out: self.stats.timed_out,
            invalid: self.stats.invalid,
            active: self.active.len(),
            total_stored: self.transitions.len(),
        }
    }

    pub fn next_timer_generation(&mut self) -> u64 {
        self.next_timer_generation = self
            .next_timer_generation
            .checked_add(1)
            .expect("settlement timer generation space exhausted");
        self.next_timer_generation
    }

    /// Installs a timer, cancelling any prior one (last writer wins).
    pub fn install_timer(&mut self, transition_id: TransitionId, timer: SettlementTimer) {
        if let Some(previous) = self.timers.insert(transition_id, timer) {
            previous.cancel();
        }
    }

    pub fn cancel_timer(&mut self, transition_id: &TransitionId) {
        if let Some(timer) = self.timers.remove(transition_id) {
            timer.cancel();
        }
    }

    pub fn timer_generation_is_current(
        &self,
        transition_id: &TransitionId,
        generation: u64,
    ) -> bool {
        self.timers
            .get(transition_id)
            .is_some_and(|timer| timer.generation == generation)
    }

    pub fn clear_fired_timer(&mut self, transition_id: &TransitionId) {
        self.timers.remove(transition_id);
    }

    pub fn has_timer(&self, transition_id: &TransitionId) -> bool {
        self.timers.contains_key(transition_id)
    }

    /// Discards everything: transitions, indexes, counters, pending timers.
    pub fn reset(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.cancel();
        }
        self.transitions.clear();
        self.active.clear();
        self.closed_order.clear();
        self.next_seq = 0;
        self.stats = StatsCounters::default();
    }
}

#[cfg(test)]
mod tests {
    use panel_injection_protocol::{
        CorrelationId, EvidenceSpec, FallbackPolicy, PaneId, SourceId, TimeoutBudget,
    };

    use crate::transition::{ActorType, OwnerLease, Transition, TransitionOrigin};

    use super::LedgerState;

    fn open_transition(state: &mut LedgerState, pane: &str, corr: &str) -> Transition {
        let (transition_id, seq) = state.allocate_identity();
        Transition::open(
            transition_id,
            seq,
            PaneId::new(pane),
            CorrelationId::new(corr),
            TransitionOrigin {
                actor_type: ActorType::Agent,
                actor_role: None,
                source: SourceId::new("injection-module"),
            },
            OwnerLease {
                module: SourceId::new("injection-module"),
                lease_id: format!("lease-{seq}"),
                acquired_at_ms: 0,
                lease_ttl_ms: 15_000,
            },
            EvidenceSpec::default(),
            TimeoutBudget::default(),
            FallbackPolicy::default(),
            seq,
            0,
        )
    }

    fn insert_closed(state: &mut LedgerState, pane: &str, corr: &str, cap: usize) {
        let mut transition = open_transition(state, pane, corr);
        transition.closed = true;
        transition.closed_at_ms = Some(transition.seq);
        let id = transition.transition_id.clone();
        state.insert_open(transition);
        state.mark_closed(&id, cap);
    }

    #[test]
    fn retention_evicts_oldest_closed_beyond_cap() {
        let mut state = LedgerState::default();
        for index in 0..505 {
            insert_closed(&mut state, "pane-a", &format!("corr-{index}"), 500);
        }

        let snapshot = state.stats_snapshot();
        assert_eq!(snapshot.total_stored, 500);
        assert_eq!(snapshot.active, 0);
        // The five oldest are gone; the most recent survive.
        assert!(state
            .find_by_correlation(&CorrelationId::new("corr-0"), None, false)
            .is_none());
        assert!(state
            .find_by_correlation(&CorrelationId::new("corr-4"), None, false)
            .is_none());
        assert!(state
            .find_by_correlation(&CorrelationId::new("corr-5"), None, false)
            .is_some());
        assert!(state
            .find_by_correlation(&CorrelationId::new("corr-504"), None, false)
            .is_some());
    }

    #[test]
    fn retention_never_evicts_an_open_transition() {
        let mut state = LedgerState::default();
        let open = open_transition(&mut state, "pane-a", "corr-open");
        state.insert_open(open);
        for index in 0..505 {
            insert_closed(&mut state, "pane-a", &format!("corr-{index}"), 500);
        }

        let snapshot = state.stats_snapshot();
        assert_eq!(snapshot.total_stored, 501);
        assert_eq!(snapshot.active, 1);
        assert!(state
            .find_by_correlation(&CorrelationId::new("corr-open"), None, true)
            .is_some());
    }

    #[test]
    fn correlation_lookup_prefers_open_over_closed() {
        let mut state = LedgerState::default();
        insert_closed(&mut state, "pane-a", "corr-1", 500);
        let open = open_transition(&mut state, "pane-b", "corr-1");
        let open_id = open.transition_id.clone();
        state.insert_open(open);

        let found = state
            .find_by_correlation(&CorrelationId::new("corr-1"), None, false)
            .expect("lookup should hit");
        assert_eq!(found.transition_id, open_id);
        assert!(!found.closed);
    }

    #[test]
    fn correlation_lookup_falls_back_to_most_recently_closed() {
        let mut state = LedgerState::default();
        insert_closed(&mut state, "pane-a", "corr-1", 500);
        insert_closed(&mut state, "pane-b", "corr-1", 500);

        let found = state
            .find_by_correlation(&CorrelationId::new("corr-1"), None, false)
            .expect("closed fallback should hit");
        assert_eq!(found.pane_id, PaneId::new("pane-b"));

        assert!(state
            .find_by_correlation(&CorrelationId::new("corr-1"), None, true)
            .is_none());
    }

    #[test]
    fn list_orders_most_recent_first_and_honors_limit() {
        let mut state = LedgerState::default();
        for index in 0..4 {
            let transition = open_transition(&mut state, "pane-a", &format!("corr-{index}"));
            state.insert_open(transition);
        }

        let listed = state.list(&crate::query::TransitionFilter {
            limit: Some(2),
            ..crate::query::TransitionFilter::default()
        });
        assert_eq!(listed.len(), 2);
        assert!(listed[0].seq > listed[1].seq);
    }
}
