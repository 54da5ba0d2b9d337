//! Shared plumbing for the hybrid test bench services.

#[cfg(feature = "config-storage")]
pub mod config_storage;
#[cfg(feature = "messaging")]
pub mod messaging;
