//! Domain entities and business rules
//!
//! Pure domain logic: aggregate rows and their compound keys, sharing
//! profiles and the policy table, identity resolution, and validated
//! identifier newtypes. Nothing in this module performs I/O.

pub mod aggregate;
pub mod errors;
pub mod identity;
pub mod newtypes;
pub mod sharing;

pub use aggregate::{UsageAggregateRow, UserKeyType};
pub use errors::DomainError;
pub use identity::{IdentityContext, IdentityKey, IdentityMode};
pub use newtypes::{DatasetId, MachineId, WorkspaceId};
pub use sharing::{SharingPolicy, SharingProfile};
