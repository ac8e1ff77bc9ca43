#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for npmsync.
//!
//! Pure helpers with no logging/tracing dependencies: artifact digests and
//! crash-safe file writes. Logging belongs to the callers.

pub mod fs;
pub mod hash;

pub use hash::{digest_bytes, integrity_matches, Digests, TarballDigest};
