//! # segstore Configuration Module
//!
//! All tunables, directory names and on-disk format constants live here so the
//! storage engine, the adapter and the filesystem helpers agree on them.
//!
//! ## Module Organization
//!
//! - [`constants`]: Numeric and naming constants with dependency documentation

pub mod constants;
pub use constants::*;
