use tokio::task::JoinHandle;

/// Cancellable single-fire settlement timer. The spawned task re-checks its
/// generation under the ledger lock before settling, so an aborted or
/// superseded timer can never mutate state late.
#[derive(Debug)]
pub(crate) struct SettlementTimer {
    pub generation: u64,
    handle: JoinHandle<()>,
}

impl SettlementTimer {
    pub fn new(generation: u64, handle: JoinHandle<()>) -> Self {
        Self { generation, handle }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}
