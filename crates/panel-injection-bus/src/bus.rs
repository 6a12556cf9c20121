use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use panel_injection_protocol::{PaneId, PaneState, PaneStatePatch};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::envelope::{EventDraft, EventEnvelope};

pub const DEFAULT_PANE_BUFFER_CAPACITY: usize = 64;
pub const DEFAULT_GLOBAL_BUFFER_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionEventBusConfig {
    pub pane_buffer_capacity: usize,
    pub global_buffer_capacity: usize,
}

impl Default for InjectionEventBusConfig {
    fn default() -> Self {
        Self {
            pane_buffer_capacity: DEFAULT_PANE_BUFFER_CAPACITY,
            global_buffer_capacity: DEFAULT_GLOBAL_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InjectionEventBusPerfSnapshot {
    pub events_published_total: u64,
    /// Sends into a full ring buffer, where the oldest undelivered envelope
    /// is evicted and the slowest subscriber will observe lag.
    pub events_dropped_total: u64,
    pub panes_tracked: usize,
}

#[derive(Debug)]
pub struct InjectionEventBus {
    next_event_id: AtomicU64,
    events_published_total: AtomicU64,
    events_dropped_total: AtomicU64,
    boot_instant: Instant,
    config: InjectionEventBusConfig,
    pane_senders: RwLock<HashMap<PaneId, broadcast::Sender<EventEnvelope>>>,
    pane_states: RwLock<HashMap<PaneId, PaneState>>,
    global_sender: broadcast::Sender<EventEnvelope>,
}

impl Default for InjectionEventBus {
    fn default() -> Self {
        Self::new(InjectionEventBusConfig::default())
    }
}

impl InjectionEventBus {
    pub fn new(config: InjectionEventBusConfig) -> Self {
        assert!(
            config.pane_buffer_capacity > 0,
            "pane_buffer_capacity must be greater than 0"
        );
        assert!(
            config.global_buffer_capacity > 0,
            "global_buffer_capacity must be greater than 0"
        );

        let (global_sender, _global_receiver) = broadcast::channel(config.global_buffer_capacity);
        Self {
            next_event_id: AtomicU64::new(0),
            events_published_total: AtomicU64::new(0),
            events_dropped_total: AtomicU64::new(0),
            boot_instant: Instant::now(),
            config,
            pane_senders: RwLock::new(HashMap::new()),
            pane_states: RwLock::new(HashMap::new()),
            global_sender,
        }
    }

    /// Milliseconds elapsed since bus bootstrap on the tokio clock.
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.boot_instant.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn subscribe_pane(&self, pane_id: PaneId) -> broadcast::Receiver<EventEnvelope> {
        if let Some(sender) = self.pane_sender(&pane_id) {
            return sender.subscribe();
        }

        let mut pane_senders = self
            .pane_senders
            .write()
            .expect("injection eventbus pane sender lock poisoned");
        let sender = pane_senders.entry(pane_id).or_insert_with(|| {
            let (sender, _receiver) = broadcast::channel(self.config.pane_buffer_capacity);
            sender
        });
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<EventEnvelope> {
        self.global_sender.subscribe()
    }

    /// Drops the pane's fanout channel and its gate state.
    pub fn remove_pane(&self, pane_id: &PaneId) -> bool {
        let removed_sender = {
            let mut pane_senders = self
                .pane_senders
                .write()
                .expect("injection eventbus pane sender lock poisoned");
            pane_senders.remove(pane_id).is_some()
        };
        let removed_state = {
            let mut pane_states = self
                .pane_states
                .write()
                .expect("injection eventbus pane state lock poisoned");
            pane_states.remove(pane_id).is_some()
        };
        removed_sender || removed_state
    }

    pub fn pane_state(&self, pane_id: &PaneId) -> Option<PaneState> {
        let pane_states = self
            .pane_states
            .read()
            .expect("injection eventbus pane state lock poisoned");
        pane_states.get(pane_id).cloned()
    }

    pub fn update_pane_state(&self, pane_id: &PaneId, patch: PaneStatePatch) -> PaneState {
        let mut pane_states = self
            .pane_states
            .write()
            .expect("injection eventbus pane state lock poisoned");
        let state = pane_states.entry(pane_id.clone()).or_default();
        state.apply(patch);
        state.clone()
    }

    pub fn publish(&self, draft: EventDraft) -> EventEnvelope {
        let envelope = EventEnvelope {
            event_id: self.next_event_id(),
            pane_id: draft.pane_id,
            correlation_id: draft.correlation_id,
            causation_id: draft.causation_id,
            source: draft.source,
            occurred_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            recorded_at_ms: self.now_ms(),
            payload: draft.payload,
        };
        self.events_published_total.fetch_add(1, Ordering::Relaxed);

        let pane_sender = self.pane_sender(&envelope.pane_id);
        let has_pane_receivers = pane_sender
            .as_ref()
            .is_some_and(|sender| sender.receiver_count() > 0);
        let has_global_receivers = self.global_sender.receiver_count() > 0;

        if has_pane_receivers {
            let sender = pane_sender
                .as_ref()
                .expect("pane sender should exist when receiver count is non-zero");
            if sender.len() >= self.config.pane_buffer_capacity {
                self.events_dropped_total.fetch_add(1, Ordering::Relaxed);
            }
            let _ = sender.send(envelope.clone());
        }
        if has_global_receivers {
            if self.global_sender.len() >= self.config.global_buffer_capacity {
                self.events_dropped_total.fetch_add(1, Ordering::Relaxed);
            }
            let _ = self.global_sender.send(envelope.clone());
        }

        envelope
    }

    pub fn perf_snapshot(&self) -> InjectionEventBusPerfSnapshot {
        let panes_tracked = self
            .pane_states
            .read()
            .expect("injection eventbus pane state lock poisoned")
            .len();
        InjectionEventBusPerfSnapshot {
            events_published_total: self.events_published_total.load(Ordering::Relaxed),
            events_dropped_total: self.events_dropped_total.load(Ordering::Relaxed),
            panes_tracked,
        }
    }

    fn pane_sender(&self, pane_id: &PaneId) -> Option<broadcast::Sender<EventEnvelope>> {
        let pane_senders = self
            .pane_senders
            .read()
            .expect("injection eventbus pane sender lock poisoned");
        pane_senders.get(pane_id).cloned()
    }

    fn next_event_id(&self) -> u64 {
        let mut current = self.next_event_id.load(Ordering::Relaxed);
        loop {
            let next = current
                .checked_add(1)
                .expect("injection event id space exhausted");
            match self.next_event_id.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use panel_injection_protocol::{
        CompactionStatus, EventPayload, PaneId, PaneStatePatch,
    };
    use tokio::sync::broadcast::error::RecvError;
    use tokio::time::timeout;

    use crate::envelope::EventDraft;

    use super::InjectionEventBus;

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    fn queued_draft(pane: &str) -> EventDraft {
        EventDraft::new(pane, "injection-module", EventPayload::InjectQueued)
            .with_correlation("corr-1")
    }

    #[test]
    fn publish_allocates_monotonic_event_ids() {
        let bus = InjectionEventBus::default();

        let first = bus.publish(queued_draft("pane-a"));
        let second = bus.publish(queued_draft("pane-a"));

        assert_eq!(first.event_id, 1);
        assert_eq!(second.event_id, 2);
        assert!(second.recorded_at_ms >= first.recorded_at_ms);
    }

    #[test]
    #[should_panic(expected = "injection event id space exhausted")]
    fn publish_panics_when_event_id_space_is_exhausted() {
        let bus = InjectionEventBus::default();
        bus.next_event_id
            .store(u64::MAX, std::sync::atomic::Ordering::Relaxed);

        let _ = bus.publish(queued_draft("pane-overflow"));
    }

    #[tokio::test]
    async fn publish_fans_out_to_pane_and_global_subscribers() {
        let bus = InjectionEventBus::default();
        let pane = PaneId::new("pane-a");
        let mut pane_subscriber = bus.subscribe_pane(pane.clone());
        let mut global_subscriber = bus.subscribe_all();

        let published = bus.publish(queued_draft("pane-a"));

        let pane_envelope = timeout(TEST_TIMEOUT, pane_subscriber.recv())
            .await
            .expect("pane recv timed out")
            .expect("pane recv should succeed");
        let global_envelope = timeout(TEST_TIMEOUT, global_subscriber.recv())
            .await
            .expect("global recv timed out")
            .expect("global recv should succeed");

        assert_eq!(pane_envelope, published);
        assert_eq!(global_envelope, published);
    }

    #[tokio::test]
    async fn pane_subscriptions_only_receive_matching_pane_events() {
        let bus = InjectionEventBus::default();
        let mut subscriber_a = bus.subscribe_pane(PaneId::new("pane-a"));
        let mut subscriber_b = bus.subscribe_pane(PaneId::new("pane-b"));

        let event_a = bus.publish(queued_draft("pane-a"));
        let event_b = bus.publish(queued_draft("pane-b"));

        let received_a = timeout(TEST_TIMEOUT, subscriber_a.recv())
            .await
            .expect("pane a recv timed out")
            .expect("pane a recv should succeed");
        let received_b = timeout(TEST_TIMEOUT, subscriber_b.recv())
            .await
            .expect("pane b recv timed out")
            .expect("pane b recv should succeed");

        assert_eq!(received_a, event_a);
        assert_eq!(received_b, event_b);
    }

    #[tokio::test]
    async fn bounded_queue_reports_lag_for_slow_global_subscriber() {
        let bus = InjectionEventBus::new(super::InjectionEventBusConfig {
            pane_buffer_capacity: 1,
            global_buffer_capacity: 1,
        });
        let mut global_subscriber = bus.subscribe_all();

        for _ in 0..8 {
            let _ = bus.publish(queued_draft("pane-a"));
        }

        let lagged = timeout(TEST_TIMEOUT, global_subscriber.recv())
            .await
            .expect("global recv timed out")
            .expect_err("expected lagged receiver due bounded buffer");

        match lagged {
            RecvError::Lagged(skipped) => assert!(skipped >= 1),
            RecvError::Closed => panic!("global channel unexpectedly closed"),
        }
    }

    #[tokio::test]
    async fn perf_snapshot_counts_dropped_sends_for_lagged_subscribers() {
        let bus = InjectionEventBus::new(super::InjectionEventBusConfig {
            pane_buffer_capacity: 1,
            global_buffer_capacity: 1,
        });
        let _global_subscriber = bus.subscribe_all();

        // The first send fills the one-slot buffer; each later send evicts
        // the previous envelope before the idle subscriber reads it.
        for _ in 0..8 {
            let _ = bus.publish(queued_draft("pane-a"));
        }

        let snapshot = bus.perf_snapshot();
        assert_eq!(snapshot.events_published_total, 8);
        assert_eq!(snapshot.events_dropped_total, 7);
    }

    #[tokio::test]
    async fn keeping_up_subscribers_record_no_dropped_sends() {
        let bus = InjectionEventBus::default();
        let mut global_subscriber = bus.subscribe_all();

        for _ in 0..4 {
            let published = bus.publish(queued_draft("pane-a"));
            let received = timeout(TEST_TIMEOUT, global_subscriber.recv())
                .await
                .expect("global recv timed out")
                .expect("global recv should succeed");
            assert_eq!(received, published);
        }

        assert_eq!(bus.perf_snapshot().events_dropped_total, 0);
    }

    #[tokio::test]
    async fn remove_pane_closes_existing_pane_subscribers_and_drops_state() {
        let bus = InjectionEventBus::default();
        let pane = PaneId::new("pane-a");
        let mut pane_subscriber = bus.subscribe_pane(pane.clone());
        bus.update_pane_state(
            &pane,
            PaneStatePatch {
                focus_locked: Some(true),
                compacting: None,
            },
        );

        assert!(bus.remove_pane(&pane));
        assert!(!bus.remove_pane(&pane));
        assert!(bus.pane_state(&pane).is_none());

        let closed = timeout(TEST_TIMEOUT, pane_subscriber.recv())
            .await
            .expect("pane recv timed out")
            .expect_err("pane subscription should close after remove_pane");
        assert!(matches!(closed, RecvError::Closed));
    }

    #[test]
    fn pane_state_round_trips_through_patches() {
        let bus = InjectionEventBus::default();
        let pane = PaneId::new("pane-a");
        assert!(bus.pane_state(&pane).is_none());

        let updated = bus.update_pane_state(
            &pane,
            PaneStatePatch {
                focus_locked: None,
                compacting: Some(CompactionStatus::Confirmed),
            },
        );
        assert_eq!(updated.gates.compacting, CompactionStatus::Confirmed);
        assert!(!updated.gates.focus_locked);

        let read_back = bus.pane_state(&pane).expect("pane state exists");
        assert_eq!(read_back, updated);
        assert_eq!(bus.perf_snapshot().panes_tracked, 1);
    }
}
