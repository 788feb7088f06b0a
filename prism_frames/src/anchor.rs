//! Frame anchors at the managed → native boundary.
//!
//! When managed code calls into native code it records where the last
//! managed frame is. For speed only `sp` (and `fp`) are stored at the call;
//! the return pc is left unset. Until someone captures it the anchor is
//! *unwalkable*.
//!
//! # Protocol
//!
//! ```text
//!   set_last_frame(sp, fp)          capture_last_pc()         clear()
//!  ───────────────────────► unwalkable ───────────────► walkable ──────► (no frame)
//!        Release on sp                  Release on pc
//! ```
//!
//! * The owning thread hides the old frame (`sp = 0`), then stores `pc`
//!   with Release and publishes `sp` last, with Release.
//! * The pc is captured at most once per episode: it is the return address
//!   one word below the saved `sp`, which the calling convention guarantees
//!   is present and which cannot change while the thread is in native code.
//! * Walkers load `pc` with Acquire. Once they see it non-zero, the value is
//!   frozen until the owner clears the anchor, and `last_sp` reads as 0 or
//!   as the sp of the same episode.
//! * Walkers read `last_sp` before trusting `last_fp`.
//! * Walkers racing to capture the same pc use
//!   [`ensure_walkable`](FrameAnchor::ensure_walkable); only one store wins
//!   and they all store the same word.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;

use log::trace;

use crate::error::FrameError;
use crate::layout::{
    ANCHOR_LAST_FP_WORD, ANCHOR_LAST_PC_WORD, ANCHOR_LAST_SP_WORD, ANCHOR_WORDS, WORD_SIZE,
    word_offset,
};
use crate::memory::StackCursor;

// =============================================================================
// FrameAnchor
// =============================================================================

/// View of an anchor's three words, wherever they live.
#[derive(Clone, Copy)]
pub struct FrameAnchor<'a> {
    last_sp: &'a AtomicUsize,
    last_pc: &'a AtomicUsize,
    last_fp: &'a AtomicUsize,
}

impl<'a> FrameAnchor<'a> {
    /// The anchor stored in stack memory at `addr` (inside a call wrapper
    /// or an upcall stub's frame data).
    pub fn in_stack(stack: &StackCursor<'a>, addr: usize) -> Option<Self> {
        let slot = |word: usize| stack.slot(word_offset(addr, word as isize)?);
        Some(Self {
            last_sp: slot(ANCHOR_LAST_SP_WORD)?,
            last_pc: slot(ANCHOR_LAST_PC_WORD)?,
            last_fp: slot(ANCHOR_LAST_FP_WORD)?,
        })
    }

    #[inline]
    pub fn last_sp(&self) -> usize {
        self.last_sp.load(Ordering::Acquire)
    }

    #[inline]
    pub fn last_fp(&self) -> usize {
        self.last_fp.load(Ordering::Acquire)
    }

    #[inline]
    pub fn last_pc(&self) -> usize {
        self.last_pc.load(Ordering::Acquire)
    }

    /// A last managed frame is recorded.
    #[inline]
    pub fn has_last_frame(&self) -> bool {
        self.last_sp() != 0
    }

    /// The pc has been captured.
    #[inline]
    pub fn walkable(&self) -> bool {
        self.last_pc() != 0
    }

    /// Start a call episode without a pc.
    pub fn set_last_frame(&self, sp: usize, fp: usize) {
        self.set_last_frame_with_pc(sp, fp, 0);
    }

    /// Start a call episode with a known pc (already walkable).
    pub fn set_last_frame_with_pc(&self, sp: usize, fp: usize, pc: usize) {
        // Hide the old frame before rewriting the rest.
        self.last_sp.store(0, Ordering::Release);
        self.last_fp.store(fp, Ordering::Relaxed);
        self.last_pc.store(pc, Ordering::Release);
        self.last_sp.store(sp, Ordering::Release);
    }

    /// End the call episode.
    pub fn clear(&self) {
        self.last_sp.store(0, Ordering::Release);
        self.last_fp.store(0, Ordering::Relaxed);
        self.last_pc.store(0, Ordering::Release);
    }

    /// Record the return pc one word below the saved sp.
    ///
    /// The anchor must have a last frame and must not be walkable yet.
    pub fn capture_last_pc(&self, stack: &StackCursor<'_>) -> Result<(), FrameError> {
        let sp = self.last_sp.load(Ordering::Acquire);
        debug_assert!(sp != 0, "no last frame set");
        debug_assert!(
            self.last_pc.load(Ordering::Acquire) == 0,
            "anchor already walkable"
        );

        let pc = return_pc_below(stack, sp)?;
        trace!("anchor capture: last_sp={sp:#x} last_pc={pc:#x}");
        self.last_pc.store(pc, Ordering::Release);
        Ok(())
    }

    /// Capture the pc from a walker that reached this anchor through a
    /// validated entry frame. Other walkers may be capturing concurrently.
    pub fn ensure_walkable(&self, stack: &StackCursor<'_>) -> Result<(), FrameError> {
        if self.walkable() {
            return Ok(());
        }
        let sp = self.last_sp.load(Ordering::Acquire);
        if sp == 0 {
            return Err(FrameError::FirstFrame);
        }

        let pc = return_pc_below(stack, sp)?;
        if self
            .last_pc
            .compare_exchange(0, pc, Ordering::Release, Ordering::Acquire)
            .is_ok()
        {
            trace!("anchor capture by walker: last_sp={sp:#x} last_pc={pc:#x}");
        }
        Ok(())
    }

    /// Make the anchor walkable if it has a frame and is not yet walkable.
    ///
    /// Only the owning thread may call this.
    pub fn make_walkable(&self, stack: &StackCursor<'_>, owner: ThreadId) -> Result<(), FrameError> {
        if !self.has_last_frame() || self.walkable() {
            return Ok(());
        }
        debug_assert_eq!(std::thread::current().id(), owner, "not current thread");
        self.capture_last_pc(stack)?;
        debug_assert!(self.walkable(), "anchor capture produced a null pc");
        Ok(())
    }
}

fn return_pc_below(stack: &StackCursor<'_>, sp: usize) -> Result<usize, FrameError> {
    let pc_addr = sp.checked_sub(WORD_SIZE).ok_or(FrameError::Unreadable { addr: sp })?;
    stack
        .read(pc_addr)
        .ok_or(FrameError::Unreadable { addr: pc_addr })
}

impl std::fmt::Debug for FrameAnchor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAnchor")
            .field("last_sp", &format_args!("{:#x}", self.last_sp()))
            .field("last_fp", &format_args!("{:#x}", self.last_fp()))
            .field("last_pc", &format_args!("{:#x}", self.last_pc()))
            .finish()
    }
}

// =============================================================================
// ThreadAnchor
// =============================================================================

/// Anchor storage owned by a thread rather than living on its stack.
#[derive(Debug, Default)]
pub struct ThreadAnchor {
    words: [AtomicUsize; ANCHOR_WORDS],
}

impl ThreadAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    /// View the anchor.
    #[inline]
    pub fn anchor(&self) -> FrameAnchor<'_> {
        FrameAnchor {
            last_sp: &self.words[ANCHOR_LAST_SP_WORD],
            last_pc: &self.words[ANCHOR_LAST_PC_WORD],
            last_fp: &self.words[ANCHOR_LAST_FP_WORD],
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
