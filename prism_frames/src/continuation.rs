//! Continuation return barriers.
//!
//! The bottom frame of a mounted continuation returns into a barrier
//! trampoline rather than into its real caller. A walker that meets the
//! barrier pc asks the continuation runtime for the true caller (the
//! continuation's entry frame) or, when walking into the continuation,
//! for the continuation's top frame.

use parking_lot::RwLock;

use crate::context::WalkContext;
use crate::frame::Frame;

// =============================================================================
// ContinuationHooks
// =============================================================================

/// Hooks exposed by the continuation runtime.
pub trait ContinuationHooks: Send + Sync {
    /// `pc` is the return-barrier trampoline.
    fn is_return_barrier(&self, pc: usize) -> bool;

    /// Rewrite a barrier sender of `callee` to the continuation's real
    /// caller. Leaves the values alone if no continuation matches.
    fn fix_bottom_sender(
        &self,
        callee: &Frame,
        ctx: &WalkContext<'_>,
        sender_pc: &mut usize,
        sender_sp: &mut usize,
    );

    /// Top frame of the continuation whose bottom frame is `callee`.
    fn top_frame(&self, callee: &Frame, ctx: &WalkContext<'_>) -> Option<Frame>;
}

/// Hooks for a runtime without continuations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContinuations;

impl ContinuationHooks for NoContinuations {
    #[inline]
    fn is_return_barrier(&self, _pc: usize) -> bool {
        false
    }

    #[inline]
    fn fix_bottom_sender(
        &self,
        _callee: &Frame,
        _ctx: &WalkContext<'_>,
        _sender_pc: &mut usize,
        _sender_sp: &mut usize,
    ) {
    }

    #[inline]
    fn top_frame(&self, _callee: &Frame, _ctx: &WalkContext<'_>) -> Option<Frame> {
        None
    }
}

// =============================================================================
// ContinuationEntries
// =============================================================================

/// A mounted continuation as recorded by its entry frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationEntry {
    /// sp of the entry frame; continuation frames live below it.
    pub entry_sp: usize,
    /// pc the bottom frame really returns to.
    pub entry_pc: usize,
    /// Frozen top frame `(sp, fp, pc)`, when the continuation is parked.
    pub top: Option<(usize, usize, usize)>,
}

/// Mounted continuations of one thread.
#[derive(Debug)]
pub struct ContinuationEntries {
    barrier_pc: usize,
    /// Sorted by `entry_sp`, innermost first.
    entries: RwLock<Vec<ContinuationEntry>>,
}

impl ContinuationEntries {
    /// Create an empty set using `barrier_pc` as the trampoline address.
    pub fn new(barrier_pc: usize) -> Self {
        Self {
            barrier_pc,
            entries: RwLock::new(Vec::new()),
        }
    }

    #[inline]
    pub fn barrier_pc(&self) -> usize {
        self.barrier_pc
    }

    /// Record a mounted continuation.
    pub fn push(&self, entry: ContinuationEntry) {
        let mut entries = self.entries.write();
        let idx = entries.partition_point(|e| e.entry_sp < entry.entry_sp);
        entries.insert(idx, entry);
    }

    /// Forget the continuation entered at `entry_sp`.
    pub fn pop(&self, entry_sp: usize) -> Option<ContinuationEntry> {
        let mut entries = self.entries.write();
        let idx = entries.iter().position(|e| e.entry_sp == entry_sp)?;
        Some(entries.remove(idx))
    }

    /// Innermost continuation containing `sp`.
    pub fn entry_for_sp(&self, sp: usize) -> Option<ContinuationEntry> {
        self.entries
            .read()
            .iter()
            .find(|entry| sp < entry.entry_sp)
            .copied()
    }

    fn callee_sp(callee: &Frame, ctx: &WalkContext<'_>) -> usize {
        if callee.is_interpreted_frame() {
            callee
                .interpreter_frame_last_sp(ctx)
                .filter(|&sp| sp != 0)
                .unwrap_or(callee.unextended_sp())
        } else {
            callee.unextended_sp()
        }
    }
}

impl ContinuationHooks for ContinuationEntries {
    #[inline]
    fn is_return_barrier(&self, pc: usize) -> bool {
        pc != 0 && pc == self.barrier_pc
    }

    fn fix_bottom_sender(
        &self,
        callee: &Frame,
        ctx: &WalkContext<'_>,
        sender_pc: &mut usize,
        sender_sp: &mut usize,
    ) {
        if !self.is_return_barrier(*sender_pc) {
            return;
        }
        if let Some(entry) = self.entry_for_sp(Self::callee_sp(callee, ctx)) {
            *sender_pc = entry.entry_pc;
            *sender_sp = entry.entry_sp;
        }
    }

    fn top_frame(&self, callee: &Frame, ctx: &WalkContext<'_>) -> Option<Frame> {
        let (sp, fp, pc) = self.entry_for_sp(Self::callee_sp(callee, ctx))?.top?;
        Some(Frame::new(ctx, sp, fp, pc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_sorted_innermost_first() {
        let entries = ContinuationEntries::new(0x7700);
        entries.push(ContinuationEntry {
            entry_sp: 0x9000,
            entry_pc: 0x1111,
            top: None,
        });
        entries.push(ContinuationEntry {
            entry_sp: 0x8800,
            entry_pc: 0x2222,
            top: None,
        });

        assert_eq!(entries.entry_for_sp(0x8700).map(|e| e.entry_pc), Some(0x2222));
        assert_eq!(entries.entry_for_sp(0x8900).map(|e| e.entry_pc), Some(0x1111));
        assert!(entries.entry_for_sp(0x9000).is_none());

        assert!(entries.pop(0x8800).is_some());
        assert_eq!(entries.entry_for_sp(0x8700).map(|e| e.entry_pc), Some(0x1111));
    }

    #[test]
    fn test_barrier_predicate() {
        let entries = ContinuationEntries::new(0x7700);
        assert!(entries.is_return_barrier(0x7700));
        assert!(!entries.is_return_barrier(0x7708));
        assert!(!NoContinuations.is_return_barrier(0x7700));
    }
}
