//! Building blocks shared by every ledger crate.
//!
//! Pure domain primitives only: identifiers, the aggregate contract and the
//! domain error type. Nothing here performs IO.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::DomainError;
pub use id::{AggregateId, TenantId, UserId};
