//! Low-level primitives the storage segments are built on.
//!
//! Includes byte codecs, positioned file I/O, and the latch-based buffer
//! manager that caches partition pages.

/// Byte-level utilities and encoding/decoding.
pub mod bytes;

/// Page cache with latches, dirty tracking and a background flusher.
pub mod buffer;

/// I/O abstractions over positioned file access.
pub mod io;
