//! Physical frame layout for x86-64 frames.
//!
//! Every frame the walker understands keeps the caller's frame pointer at
//! `[fp]` and the return address at `[fp + 8]`. Interpreted frames extend
//! this with a fixed block of slots below `fp`:
//!
//! ```text
//! ┌────────────────────────┐  High addresses
//! │   Caller's sp (+2)     │  ← sender sp for interpreted/native frames
//! ├────────────────────────┤
//! │   Return Address (+1)  │
//! ├────────────────────────┤
//! │   Saved fp (0)         │  ← fp points here
//! ├────────────────────────┤
//! │   sender sp     (-1)   │
//! │   last sp       (-2)   │
//! │   method        (-3)   │
//! │   mirror        (-4)   │
//! │   mdp           (-5)   │
//! │   cp cache      (-6)   │
//! │   locals        (-7)   │
//! │   bcp           (-8)   │
//! │   initial sp    (-9)   │  ← monitor block top/bottom
//! ├────────────────────────┤
//! │   monitors / operands  │
//! └────────────────────────┘  ← sp, low addresses
//! ```
//!
//! All offsets are in words relative to `fp` unless stated otherwise.

/// Size of a machine word in bytes.
pub const WORD_SIZE: usize = 8;

/// Size of one interpreter expression-stack element in bytes.
pub const STACK_ELEMENT_SIZE: usize = WORD_SIZE;

// =============================================================================
// Common Slots
// =============================================================================

/// Where a frame's own pc is dumped; coincides with the saved fp on x86.
pub const PC_RETURN_OFFSET: isize = 0;
/// Saved caller frame pointer.
pub const LINK_OFFSET: isize = 0;
/// Return address into the caller.
pub const RETURN_ADDR_OFFSET: isize = 1;
/// Caller's stack pointer for frames that push a frame pointer.
pub const SENDER_SP_OFFSET: isize = 2;

// =============================================================================
// Interpreter Slots
// =============================================================================

/// Result handler (native calls only).
pub const INTERPRETER_FRAME_RESULT_HANDLER_OFFSET: isize = 3;
/// Oop temp holding an object result (native calls only).
pub const INTERPRETER_FRAME_OOP_TEMP_OFFSET: isize = 2;
pub const INTERPRETER_FRAME_SENDER_SP_OFFSET: isize = -1;
/// Outgoing sp before a call to an invoked method.
pub const INTERPRETER_FRAME_LAST_SP_OFFSET: isize = INTERPRETER_FRAME_SENDER_SP_OFFSET - 1;
pub const INTERPRETER_FRAME_METHOD_OFFSET: isize = INTERPRETER_FRAME_LAST_SP_OFFSET - 1;
pub const INTERPRETER_FRAME_MIRROR_OFFSET: isize = INTERPRETER_FRAME_METHOD_OFFSET - 1;
pub const INTERPRETER_FRAME_MDP_OFFSET: isize = INTERPRETER_FRAME_MIRROR_OFFSET - 1;
pub const INTERPRETER_FRAME_CACHE_OFFSET: isize = INTERPRETER_FRAME_MDP_OFFSET - 1;
pub const INTERPRETER_FRAME_LOCALS_OFFSET: isize = INTERPRETER_FRAME_CACHE_OFFSET - 1;
pub const INTERPRETER_FRAME_BCP_OFFSET: isize = INTERPRETER_FRAME_LOCALS_OFFSET - 1;
pub const INTERPRETER_FRAME_INITIAL_SP_OFFSET: isize = INTERPRETER_FRAME_BCP_OFFSET - 1;
pub const INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET: isize = INTERPRETER_FRAME_INITIAL_SP_OFFSET;
pub const INTERPRETER_FRAME_MONITOR_BLOCK_BOTTOM_OFFSET: isize =
    INTERPRETER_FRAME_INITIAL_SP_OFFSET;

// =============================================================================
// Anchor Layout
// =============================================================================

/// Word index of `last_sp` inside an in-memory frame anchor.
pub const ANCHOR_LAST_SP_WORD: usize = 0;
/// Word index of `last_pc` inside an in-memory frame anchor.
pub const ANCHOR_LAST_PC_WORD: usize = 1;
/// Word index of `last_fp` inside an in-memory frame anchor.
pub const ANCHOR_LAST_FP_WORD: usize = 2;
/// Number of words occupied by a frame anchor.
pub const ANCHOR_WORDS: usize = 3;

// =============================================================================
// FrameLayout
// =============================================================================

/// ABI-dependent parts of the layout.
///
/// Only the entry (call stub) frame differs between platforms: the call
/// stub spills a different number of registers, so the call wrapper lands
/// at a different fp-relative slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// fp-relative word offset of the call wrapper pointer in an entry frame.
    pub entry_frame_call_wrapper_offset: isize,
    /// Words pushed by the call stub after the call.
    pub entry_frame_after_call_words: usize,
    /// Register argument home area in bytes.
    pub arg_reg_save_area_bytes: usize,
    /// Byte offset of the frame anchor inside a call wrapper.
    pub call_wrapper_anchor_offset: usize,
}

impl FrameLayout {
    /// System V AMD64.
    pub const SYSV: FrameLayout = FrameLayout {
        entry_frame_call_wrapper_offset: -6,
        entry_frame_after_call_words: 13,
        arg_reg_save_area_bytes: 0,
        call_wrapper_anchor_offset: 4 * WORD_SIZE,
    };

    /// Windows x64.
    pub const WIN64: FrameLayout = FrameLayout {
        entry_frame_call_wrapper_offset: 2,
        entry_frame_after_call_words: 60,
        arg_reg_save_area_bytes: 32,
        call_wrapper_anchor_offset: 4 * WORD_SIZE,
    };

    /// Layout of the host platform.
    #[inline]
    pub const fn host() -> FrameLayout {
        #[cfg(target_os = "windows")]
        {
            Self::WIN64
        }
        #[cfg(not(target_os = "windows"))]
        {
            Self::SYSV
        }
    }
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self::host()
    }
}

/// Offset an address by a signed number of words.
///
/// Returns `None` on overflow; corrupt frame pointers routinely sit at the
/// edges of the address space.
#[inline]
pub fn word_offset(addr: usize, words: isize) -> Option<usize> {
    let bytes = words.checked_mul(WORD_SIZE as isize)?;
    addr.checked_add_signed(bytes)
}
