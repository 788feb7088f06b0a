//! Error types.
//!
//! Validation predicates never fail with an error: they answer `false`.
//! The types here cover operations that produce a value (a sender, a
//! patched frame, a configuration) and cannot.

use thiserror::Error;

/// Failure to compute or update a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// A required stack word lies outside the thread's stack.
    #[error("stack word at {addr:#x} is not readable")]
    Unreadable { addr: usize },

    /// The frame is the oldest managed frame on the thread.
    #[error("entry frame has no managed caller")]
    FirstFrame,

    /// The operation needs a code region but none contains the pc.
    #[error("no code region contains pc {pc:#x}")]
    MissingRegion { pc: usize },

    /// An optimized entry region did not declare where its anchor lives.
    #[error("optimized entry region `{name}` has no frame data offset")]
    MissingAnchorData { name: String },
}

/// Malformed configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {var}: expected {expected}")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}
