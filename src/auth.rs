//! Tenant identifiers, scope sets, and credential models.

pub mod id;
pub mod scope;
pub mod token;

pub use id::*;
pub use scope::*;
pub use token::{entry::*, secret::*};
