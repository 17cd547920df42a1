use thiserror::Error;

use crate::engine::EngineError;
use crate::scheduler::SchedulerState;
use crate::settings::SettingsError;

/// Errors raised by the shell coordinator and its state store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShellError {
    #[error("engine loading was already started")]
    EngineAlreadyLoading,
    #[error("engine resolved without a pending load")]
    EngineNotLoading,
    #[error(transparent)]
    EngineLoad(#[from] EngineError),
    #[error("scheduler cannot {event} while {from:?}")]
    InvalidTransition {
        from: SchedulerState,
        event: &'static str,
    },
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("domain module `{0}` is declared twice")]
    DuplicateModule(String),
    #[error("no state subtree `{0}` of the requested type")]
    MissingModule(String),
    #[error("state update rejected: {0}")]
    UpdateRejected(String),
}
