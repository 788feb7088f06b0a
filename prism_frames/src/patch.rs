//! Return-address patching.
//!
//! Deoptimization redirects a compiled frame by overwriting the return
//! address its callee will use, the word just below the frame's sp. After
//! the write the frame has two pcs: the raw pc now in the slot and the
//! logical pc the frame was at, recovered from the slot the compiled code
//! reserves for it.

use std::sync::atomic::Ordering;

use log::trace;

use crate::context::WalkContext;
use crate::error::FrameError;
use crate::frame::{DeoptState, Frame};
use crate::layout::WORD_SIZE;

impl Frame {
    /// Overwrite this frame's return slot with `pc` and re-derive its
    /// deoptimization state.
    ///
    /// The slot must currently hold this frame's pc, `pc` itself, or zero.
    /// Only the thread that owns the stack may patch it.
    pub fn patch_pc(&mut self, ctx: &WalkContext<'_>, pc: usize) -> Result<(), FrameError> {
        debug_assert!(
            ctx.code().find_region(pc).map(|r| r.id) == self.region.as_ref().map(|r| r.id),
            "unexpected pc {pc:#x}"
        );

        let slot_addr = self
            .sp
            .checked_sub(WORD_SIZE)
            .ok_or(FrameError::Unreadable { addr: self.sp })?;
        let slot = ctx
            .stack()
            .slot(slot_addr)
            .ok_or(FrameError::Unreadable { addr: slot_addr })?;
        let old = slot.load(Ordering::Relaxed);

        if ctx.config().trace_pc_patching {
            trace!("patch_pc at address {slot_addr:#x} [{old:#x} -> {pc:#x}]");
        }

        debug_assert!(
            !ctx.continuations().is_return_barrier(old),
            "return barrier"
        );
        // Either the slot holds the original return address or the same pc
        // is being patched in again.
        debug_assert!(
            old == self.pc() || old == self.raw_pc || old == pc || old == 0,
            "return slot {old:#x} holds neither {:#x} nor {pc:#x}",
            self.pc()
        );

        let old_pc = self.pc();
        slot.store(pc, Ordering::Relaxed);
        self.raw_pc = pc;
        // Only a saved original pc marks the frame deoptimized here; a pc in
        // the deoptimization stub itself is taken at face value.
        let original = self
            .region
            .as_deref()
            .and_then(|region| region.deopt_original_pc(pc, self.unextended_sp, ctx.stack()));
        self.deopt = match original {
            Some(original_pc) => {
                debug_assert!(
                    original_pc == old_pc,
                    "expected original pc to be stored before patching"
                );
                DeoptState::Deoptimized { original_pc }
            }
            None => DeoptState::NotDeoptimized,
        };

        #[cfg(debug_assertions)]
        if ctx.config().verify_patched_frames
            && !self.region.as_ref().is_some_and(|r| r.is_deoptimization_stub())
        {
            let rebuilt = Frame::with_unextended_sp(ctx, self.sp, self.unextended_sp, self.fp, pc);
            debug_assert!(
                rebuilt.deopt == self.deopt
                    && rebuilt.pc() == self.pc()
                    && rebuilt.raw_pc == self.raw_pc,
                "patched frame disagrees with a fresh one: {rebuilt} vs {self}"
            );
        }

        Ok(())
    }
}
