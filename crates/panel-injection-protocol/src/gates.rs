use serde::{Deserialize, Serialize};

/// Whether a pane is believed to be mid-compaction. Output received while
/// compaction is confirmed is not trustworthy evidence of delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStatus {
    #[default]
    Idle,
    Suspected,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaneGates {
    pub focus_locked: bool,
    pub compacting: CompactionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaneState {
    pub gates: PaneGates,
}

/// Sparse update applied over the pane's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaneStatePatch {
    pub focus_locked: Option<bool>,
    pub compacting: Option<CompactionStatus>,
}

impl PaneState {
    pub fn apply(&mut self, patch: PaneStatePatch) {
        if let Some(focus_locked) = patch.focus_locked {
            self.gates.focus_locked = focus_locked;
        }
        if let Some(compacting) = patch.compacting {
            self.gates.compacting = compacting;
        }
    }
}
