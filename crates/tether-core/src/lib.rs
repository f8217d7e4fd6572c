//! Foundational low-level utilities shared across Tether crates.
//!
//! Provides the atomic file-write helper behind QR image output and the
//! unix-time helpers used by the attempt journal, settings persistence, and
//! token derivation.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_bytes_atomic;
pub use time_utils::{
    current_unix_timestamp, current_unix_timestamp_ms, current_unix_timestamp_nanos,
};
