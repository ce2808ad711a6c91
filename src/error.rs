use thiserror::Error;

use crate::errors::domain::DomainError;
use crate::errors::store::StoreError;
use crate::protocol::session::EndReason;

/// Top-level engine error. Domain rejections are never fatal; store failures
/// are recoverable; a terminated session is final.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session terminated ({reason:?})")]
    Terminated { reason: Option<EndReason> },
}

impl EngineError {
    /// True when the caller should keep local state playable and simply
    /// surface a non-blocking message.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Store(_) | EngineError::Domain(_))
    }
}
