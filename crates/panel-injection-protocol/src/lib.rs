//! Shared vocabulary for the pane-injection delivery stack.

pub mod error;
pub mod event;
pub mod gates;
pub mod ids;
pub mod phase;
pub mod policy;

pub use error::{LedgerError, LedgerResult};
pub use event::{
    DaemonWriteAckPayload, EventPayload, InjectDroppedPayload, InjectFailedPayload,
    InjectRequestedPayload, PtyDataPayload, TransitionEvidencePayload, TransitionInvalidPayload,
    TransitionPhasePayload, TransitionTimeoutArmedPayload, VerifyPassPayload,
};
pub use gates::{CompactionStatus, PaneGates, PaneState, PaneStatePatch};
pub use ids::{CorrelationId, EventId, PaneId, SourceId, TransitionId};
pub use phase::{DeliveryLifecycle, TransitionPhase};
pub use policy::{
    EvidenceClass, EvidenceRequirement, EvidenceSpec, FallbackPolicy, SignalKind, TimeoutAction,
    TimeoutBudget,
};
