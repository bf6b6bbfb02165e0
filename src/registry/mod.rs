//! Tenant Registry
//!
//! The persisted catalog of tenant schemas backing creation, activation,
//! soft deletion and broadcast enumeration.

pub mod tenant;

pub use tenant::{TenantRegistry, TenantSchema};
