//! Core domain types.
//!
//! Type-safe wrappers for ids, money, statuses and the acting user.

pub mod actor;
pub mod id;
pub mod money;
pub mod reason;
pub mod status;

pub use actor::{Actor, Role};
pub use id::*;
pub use money::Money;
pub use reason::{CancelReason, ReasonError};
pub use status::*;
