//! Core of the account relay: event model, message classification, selective
//! forwarding and automatic connection admission.
//!
//! The account itself lives behind the [`session::AccountSession`] port,
//! implemented by the bridge adapter crate.

pub mod admission;
pub mod classifier;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod events;
pub mod forwarding;
pub mod logging;
pub mod media;
pub mod messaging;
pub mod scheduler;
pub mod session;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
