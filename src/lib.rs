//! fstrack
//!
//! Authoritative, queryable metadata index of a filesystem subtree, kept in
//! sync with live filesystem activity.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod gateway;
pub mod server;
pub mod storage;
pub mod watcher;

pub use config::Config;
pub use error::{Error, Result};
