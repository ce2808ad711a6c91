//! Operational failures of the shared document store.

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Store failure kinds, kept separate from game-rule errors so callers can
/// fall back to optimistic local state on any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// Document does not exist (wrong code, or already torn down).
    NotFound(String),
    /// The store could not be reached or the operation timed out.
    Unavailable(String),
    /// The subscription channel is gone; the session is over for us.
    SubscriptionClosed,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StoreError::NotFound(d) => write!(f, "document not found: {d}"),
            StoreError::Unavailable(d) => write!(f, "store unavailable: {d}"),
            StoreError::SubscriptionClosed => write!(f, "subscription closed"),
        }
    }
}

impl Error for StoreError {}
