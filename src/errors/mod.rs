pub mod domain;
pub mod store;

pub use domain::{ConflictKind, DomainError, ValidationKind};
pub use store::StoreError;
