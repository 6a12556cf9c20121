//! Typed publish/subscribe bus for pane-injection events, plus per-pane gate
//! state used by precondition checks.

pub mod bus;
pub mod envelope;

pub use bus::{
    InjectionEventBus, InjectionEventBusConfig, InjectionEventBusPerfSnapshot,
    DEFAULT_GLOBAL_BUFFER_CAPACITY, DEFAULT_PANE_BUFFER_CAPACITY,
};
pub use envelope::{EventDraft, EventEnvelope};
