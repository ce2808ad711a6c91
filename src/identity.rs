//! Caller identity contract. Credential issuance lives outside the engine;
//! we only consume an opaque token to tag turn ownership.

use parking_lot::Mutex;

pub type PlayerId = String;

pub trait IdentityProvider: Send + Sync {
    /// The identity to act as, or None when signed out.
    fn current_identity(&self) -> Option<PlayerId>;
}

/// Holds a fixed identity, swappable at runtime. Doubles as the test
/// provider.
pub struct StaticIdentity {
    current: Mutex<Option<PlayerId>>,
}

impl StaticIdentity {
    pub fn new(id: impl Into<PlayerId>) -> Self {
        Self {
            current: Mutex::new(Some(id.into())),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    pub fn set(&self, id: Option<PlayerId>) {
        *self.current.lock() = id;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_identity(&self) -> Option<PlayerId> {
        self.current.lock().clone()
    }
}
