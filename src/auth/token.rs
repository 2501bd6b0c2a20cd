//! Redacted token secrets and the per-tenant credential entry.

pub mod entry;
pub mod secret;
