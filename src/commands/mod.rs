//! Command implementations

mod support;

pub use support::run_create_bundle;
