//! Core domain + application logic for the message sync bridge.
//!
//! This crate is intentionally framework-agnostic. The source site and the
//! notification channel live behind ports (traits) implemented in adapter
//! crates.

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod fingerprint;
pub mod ingest;
pub mod logging;
pub mod ports;
pub mod reconcile;
pub mod settings;
pub mod store;
pub mod supervisor;
pub mod token;

#[cfg(test)]
pub(crate) mod testutil;

pub use errors::{Error, Result};
