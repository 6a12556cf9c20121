use panel_injection_protocol::{CorrelationId, EventId, EventPayload, PaneId, SourceId};
use serde::{Deserialize, Serialize};

/// An event as handed to the bus for publication. The bus assigns identity
/// and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub pane_id: PaneId,
    pub correlation_id: Option<CorrelationId>,
    pub causation_id: Option<EventId>,
    pub source: SourceId,
    pub payload: EventPayload,
}

impl EventDraft {
    pub fn new(pane_id: impl Into<PaneId>, source: impl Into<SourceId>, payload: EventPayload) -> Self {
        Self {
            pane_id: pane_id.into(),
            correlation_id: None,
            causation_id: None,
            source: source.into(),
            payload,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn caused_by(mut self, event_id: EventId) -> Self {
        self.causation_id = Some(event_id);
        self
    }
}

/// A published event. `event_id` is monotonic per bus instance and
/// `recorded_at_ms` is measured from bus bootstrap on the tokio clock, so
/// paused-clock tests observe deterministic timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub pane_id: PaneId,
    pub correlation_id: Option<CorrelationId>,
    pub causation_id: Option<EventId>,
    pub source: SourceId,
    pub occurred_at: String,
    pub recorded_at_ms: u64,
    pub payload: EventPayload,
}

impl EventEnvelope {
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}
