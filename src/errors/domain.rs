//! Domain-level error type used across the engine and services.
//!
//! This error type is store- and transport-agnostic. Callers should return
//! `Result<T, crate::error::EngineError>` and convert from `DomainError`
//! using the provided `From` implementation.

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Validation kinds for rejected moves and malformed requests.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationKind {
    SlotAlreadyMatched,
    SlotAlreadySelected,
    SelectionFull,
    UnknownTile,
    IndexOutOfRange,
    NotAdjacent,
    InvalidPosition,
    OutOfTurn,
    PhaseMismatch,
    InvalidJoinCode,
    Other(String),
}

/// Semantic conflict kinds (extend as needed).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConflictKind {
    SeatTaken,
    SelfJoin,
    AlreadyStarted,
    Superseded,
    Other(String),
}

/// Central domain error type.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Input/user validation or game rule violation.
    Validation(ValidationKind, String),
    /// Semantic conflict with the current authoritative state.
    Conflict(ConflictKind, String),
    /// Action attempted without a usable identity.
    Unauthorized(String),
}

impl Display for DomainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DomainError::Validation(kind, d) => write!(f, "validation {kind:?}: {d}"),
            DomainError::Conflict(kind, d) => write!(f, "conflict {kind:?}: {d}"),
            DomainError::Unauthorized(d) => write!(f, "unauthorized: {d}"),
        }
    }
}

impl Error for DomainError {}

impl DomainError {
    pub fn validation(kind: ValidationKind, detail: impl Into<String>) -> Self {
        Self::Validation(kind, detail.into())
    }
    pub fn conflict(kind: ConflictKind, detail: impl Into<String>) -> Self {
        Self::Conflict(kind, detail.into())
    }
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::Unauthorized(detail.into())
    }

    /// True for conflicts that mean "someone else already did this";
    /// callers treat these as benign skips rather than failures.
    pub fn is_superseded(&self) -> bool {
        matches!(
            self,
            DomainError::Conflict(ConflictKind::AlreadyStarted | ConflictKind::Superseded, _)
        )
    }
}
