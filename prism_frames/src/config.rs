//! Frame walker configuration.
//!
//! Resolved once and then shared read-only by every walk.

use crate::error::ConfigError;
use crate::layout::FrameLayout;

/// Enables `trace!` output for every return-address patch.
pub const ENV_TRACE_PC_PATCHING: &str = "PRISM_TRACE_PC_PATCHING";
/// Overrides [`WalkerConfig::interpreter_frame_slack_words`].
pub const ENV_FRAME_SLACK_WORDS: &str = "PRISM_FRAME_SLACK_WORDS";
/// Overrides [`WalkerConfig::max_walk_depth`].
pub const ENV_MAX_WALK_DEPTH: &str = "PRISM_MAX_WALK_DEPTH";

/// Configuration for frame validation and walking.
///
/// # Example
///
/// ```ignore
/// use prism_frames::WalkerConfig;
///
/// let config = WalkerConfig {
///     trace_pc_patching: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkerConfig {
    // =========================================================================
    // Layout
    // =========================================================================
    /// ABI-dependent frame layout.
    ///
    /// Default: the host platform's layout.
    pub layout: FrameLayout,

    // =========================================================================
    // Validation
    // =========================================================================
    /// Words an interpreted frame may exceed its method's declared max stack
    /// by before it is considered corrupt.
    ///
    /// Covers the fixed interpreter slots, monitors and locals pushed above
    /// the operand stack.
    ///
    /// Default: 1024
    pub interpreter_frame_slack_words: usize,

    // =========================================================================
    // Walking
    // =========================================================================
    /// Maximum number of frames a [`StackWalker`](crate::StackWalker) yields.
    ///
    /// Default: 4096
    pub max_walk_depth: usize,

    // =========================================================================
    // Debugging
    // =========================================================================
    /// Log every return-address patch at trace level.
    ///
    /// Default: false
    pub trace_pc_patching: bool,

    /// Re-derive a frame after patching its pc and check that it matches.
    /// Only honoured in debug builds.
    ///
    /// Default: true
    pub verify_patched_frames: bool,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            layout: FrameLayout::host(),
            interpreter_frame_slack_words: 1024,
            max_walk_depth: 4096,
            trace_pc_patching: false,
            verify_patched_frames: true,
        }
    }
}

impl WalkerConfig {
    /// Set the frame layout.
    pub fn with_layout(mut self, layout: FrameLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the interpreter frame slack.
    pub fn with_interpreter_frame_slack_words(mut self, words: usize) -> Self {
        self.interpreter_frame_slack_words = words;
        self
    }

    /// Set the walk depth limit.
    pub fn with_max_walk_depth(mut self, depth: usize) -> Self {
        self.max_walk_depth = depth;
        self
    }

    /// Enable or disable pc-patch tracing.
    pub fn with_trace_pc_patching(mut self, enabled: bool) -> Self {
        self.trace_pc_patching = enabled;
        self
    }

    pub fn with_verify_patched_frames(mut self, enabled: bool) -> Self {
        self.verify_patched_frames = enabled;
        self
    }

    /// Check invariants between fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_walk_depth == 0 {
            return Err(ConfigError::Zero {
                field: "max_walk_depth",
            });
        }
        Ok(())
    }

    /// Defaults overridden by `PRISM_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by values from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_TRACE_PC_PATCHING) {
            config.trace_pc_patching = parse_flag(ENV_TRACE_PC_PATCHING, &value)?;
        }
        if let Some(value) = lookup(ENV_FRAME_SLACK_WORDS) {
            config.interpreter_frame_slack_words = parse_usize(ENV_FRAME_SLACK_WORDS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_WALK_DEPTH) {
            config.max_walk_depth = parse_usize(ENV_MAX_WALK_DEPTH, &value)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            var,
            value: other.to_string(),
            expected: "a boolean flag",
        }),
    }
}

fn parse_usize(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            expected: "an unsigned integer",
        })
}
