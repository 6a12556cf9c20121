use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("transition ledger is already started")]
    AlreadyStarted,
    #[error("transition ledger is not started")]
    NotStarted,
    #[error("no open transition for pane {pane} correlation {correlation}")]
    TransitionNotFound { pane: String, correlation: String },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
