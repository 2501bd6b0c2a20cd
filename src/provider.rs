//! Provider-facing descriptors (data) and strategies (behavior).
//!
//! `descriptor` exposes validated metadata (`ProviderDescriptor`) covering the HTTPS-only
//! token endpoint and the client authentication preference used for refresh grants.
//! `strategy` defines [`ProviderStrategy`], an HTTP-client-agnostic hook that classifies
//! token endpoint failures into the gateway's refresh taxonomy.

pub mod descriptor;
pub mod strategy;

pub use descriptor::*;
pub use strategy::*;
