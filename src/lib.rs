//! iotops - operator CLI for the IoT Operations edge platform

pub mod accessor;
pub mod apis;
pub mod bundle;
pub mod cache;
pub mod cli;
pub mod client;
pub mod collect;
pub mod commands;
pub mod diagnostics;
pub mod error;
pub mod forward;
pub mod traces;
