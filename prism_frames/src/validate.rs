//! `safe_for_sender`: is it safe to compute this frame's sender?
//!
//! Called from signal handlers, profilers and stop-the-world scans against
//! a stack the caller does not own and may be catching mid-update. The
//! check is conservative: it may reject a good frame, it must never accept
//! a frame whose sender computation would read outside the stack or
//! produce a pc that resolves to nothing sensible.
//!
//! ```text
//!  sp usable? ──► usp in [sp, base]? ──► fp_safe (recorded, not fatal)
//!                                             │
//!                  ┌──────────────────────────┴────────────┐
//!             region found                             no region
//!                  │                                       │
//!   complete? in bounds? kind gates                 fp_safe && [fp+1] != 0
//!                  │
//!    candidate sender (sp, usp, pc, saved fp)
//!                  │
//!      interpreter? ── yes ──► is_interpreted_frame_valid (one level)
//!                  │
//!                  no ──► live, not adapter, call stub / compiled checks
//! ```

use crate::context::WalkContext;
use crate::frame::{Frame, FrameKind};
use crate::layout::{
    INTERPRETER_FRAME_SENDER_SP_OFFSET, LINK_OFFSET, RETURN_ADDR_OFFSET, SENDER_SP_OFFSET,
    word_offset,
};

/// Sender candidate computed from an unvalidated frame.
struct Candidate {
    sp: usize,
    unextended_sp: usize,
    pc: usize,
    saved_fp: usize,
}

impl Frame {
    /// Whether the sender of this frame can be computed safely.
    ///
    /// Total: never panics and never reads outside `ctx`'s stack.
    pub fn safe_for_sender(&self, ctx: &WalkContext<'_>) -> bool {
        let bounds = ctx.bounds();
        let (sp, fp) = (self.sp, self.fp);

        // sp must be clear of the guard zone.
        if !bounds.is_in_usable_stack(sp) {
            return false;
        }

        // The unextended sp is in the stack at or above sp.
        if !bounds.is_in_stack_range_incl(self.unextended_sp, sp) {
            return false;
        }

        // fp above (not equal to) sp, and its return slot in the stack. The
        // second test also catches an fp of -1.
        let fp_safe = bounds.is_in_stack_range_excl(fp, sp)
            && word_offset(fp, RETURN_ADDR_OFFSET)
                .is_some_and(|addr| bounds.is_in_full_stack_checked(addr));

        let Some(region) = self.region.as_deref() else {
            // Native code. The sender will be found through fp, so fp has to
            // hold up; past that only a null return address (the oldest
            // frame) can be ruled out.
            return fp_safe && ctx.stack().at(fp, RETURN_ADDR_OFFSET).is_some_and(|pc| pc != 0);
        };

        // Mid prologue or epilogue. Only compiled code, runtime stubs and
        // adapters track completion; adapters are never complete.
        if !region.frame_complete_at(self.raw_pc) && region.kind().tracks_frame_completion() {
            return false;
        }

        // Could be a random pointer into the region's neighbourhood.
        if !region.code_contains(self.raw_pc) {
            return false;
        }

        let candidate = match self.kind {
            FrameKind::Entry => return fp_safe && self.is_entry_frame_valid(ctx),
            FrameKind::OptimizedEntry => return fp_safe,
            FrameKind::Interpreted => {
                if !fp_safe {
                    return false;
                }
                match self.interpreted_candidate(ctx) {
                    Some(candidate) => candidate,
                    None => return false,
                }
            }
            // fp need not be safe for compiled frames.
            FrameKind::Compiled => match self.compiled_candidate(ctx, region.frame_size()) {
                Some(candidate) => candidate,
                None => return false,
            },
            FrameKind::Native => return false,
        };

        self.sender_candidate_is_safe(ctx, candidate)
    }

    fn interpreted_candidate(&self, ctx: &WalkContext<'_>) -> Option<Candidate> {
        let stack = ctx.stack();
        Some(Candidate {
            pc: stack.at(self.fp, RETURN_ADDR_OFFSET)?,
            // Raw sp of the sender; may differ from the unextended sp the
            // sender sees because of this frame's locals.
            sp: word_offset(self.fp, SENDER_SP_OFFSET)?,
            unextended_sp: stack.at(self.fp, INTERPRETER_FRAME_SENDER_SP_OFFSET)?,
            saved_fp: stack.at(self.fp, LINK_OFFSET)?,
        })
    }

    fn compiled_candidate(&self, ctx: &WalkContext<'_>, frame_size: i32) -> Option<Candidate> {
        // Without a frame size there is no telling where the return
        // address is.
        if frame_size <= 0 {
            return None;
        }
        let sender_sp = word_offset(self.unextended_sp, frame_size as isize)?;
        if !ctx.bounds().is_in_full_stack_checked(sender_sp) {
            return None;
        }
        let stack = ctx.stack();
        Some(Candidate {
            sp: sender_sp,
            unextended_sp: sender_sp,
            // The return address is always the word below the sender's sp.
            pc: stack.at(sender_sp, -1)?,
            saved_fp: stack.at(sender_sp, -SENDER_SP_OFFSET)?,
        })
    }

    fn sender_candidate_is_safe(&self, ctx: &WalkContext<'_>, mut candidate: Candidate) -> bool {
        let hooks = ctx.continuations();
        if hooks.is_return_barrier(candidate.pc) {
            hooks.fix_bottom_sender(self, ctx, &mut candidate.pc, &mut candidate.sp);
        }

        let bounds = ctx.bounds();
        let code = ctx.code();

        if code.interpreter_contains(candidate.pc) {
            // fp is saved in a recognizable place by all generated code, but
            // only interpreted and call-stub senders use it as a frame
            // pointer.
            if !bounds.is_in_stack_range_excl(candidate.saved_fp, candidate.sp) {
                return false;
            }
            let sender = Frame::with_unextended_sp(
                ctx,
                candidate.sp,
                candidate.unextended_sp,
                candidate.saved_fp,
                candidate.pc,
            );
            // One level only: the sender's own sender is not examined.
            return sender.is_interpreted_frame_valid(ctx);
        }

        // Every sender pc must be recognizable.
        if candidate.pc == 0 {
            return false;
        }
        let Some(sender_region) = code.find_region(candidate.pc) else {
            return false;
        };
        if !sender_region.is_alive() {
            return false;
        }
        if !sender_region.code_contains(candidate.pc) {
            return false;
        }
        // Code from the code cache is never called by an adapter.
        if sender_region.is_adapter_blob() {
            return false;
        }

        if code.returns_to_call_stub(candidate.pc) {
            if !bounds.is_in_stack_range_excl(candidate.saved_fp, candidate.sp) {
                return false;
            }
            let sender = Frame::with_unextended_sp(
                ctx,
                candidate.sp,
                candidate.unextended_sp,
                candidate.saved_fp,
                candidate.pc,
            );
            return sender
                .entry_frame_call_wrapper(ctx)
                .is_some_and(|wrapper| bounds.is_in_stack_range_excl(wrapper, sender.fp));
        }
        if sender_region.is_optimized_entry_stub() {
            return false;
        }

        if sender_region.is_deopt_pc(candidate.pc) || sender_region.is_method_handle_intrinsic() {
            return false;
        }

        // Every compiled frame counts at least its return address.
        if sender_region.frame_size() <= 0 {
            return false;
        }

        // Only the call stub, the interpreter or compiled code call into the
        // code cache.
        sender_region.is_compiled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::StackBounds;
    use crate::config::WalkerConfig;
    use crate::layout::FrameLayout;
    use crate::memory::StackSnapshot;
    use crate::metadata::MetadataTable;
    use crate::region::{CodeKind, CodeRegion, CodeRegionTable, CompiledInfo};

    const LOW: usize = 0x40_0000;
    const WORDS: usize = 128;
    const HIGH: usize = LOW + WORDS * 8;
    const GUARD: usize = 0x40;

    struct Fixture {
        snap: StackSnapshot,
        code: CodeRegionTable,
        meta: MetadataTable,
        config: WalkerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let code = CodeRegionTable::new();
            code.insert(CodeRegion::new(1, CodeKind::Interpreter, 0x1000, 0x1000));
            code.insert(
                CodeRegion::new(2, CodeKind::Compiled, 0x4000, 0x400)
                    .with_frame_size(4)
                    .with_frame_complete_offset(Some(0x10))
                    .with_compiled_info(CompiledInfo {
                        deopt_handler_offset: Some(0x300),
                        ..Default::default()
                    }),
            );
            code.insert(CodeRegion::new(3, CodeKind::EntryStub, 0x5000, 0x100));
            code.insert(CodeRegion::new(5, CodeKind::AdapterBlob, 0x7000, 0x100));
            Self {
                snap: StackSnapshot::new(LOW, WORDS),
                code,
                meta: MetadataTable::new(),
                config: WalkerConfig::default().with_layout(FrameLayout::SYSV),
            }
        }

        fn ctx(&self) -> WalkContext<'_> {
            WalkContext::new(
                &self.snap,
                StackBounds::new(HIGH, LOW, GUARD),
                std::thread::current().id(),
                &self.code,
                &self.config,
            )
            .with_metadata(&self.meta)
        }

        /// Compiled frame at `usp` whose sender returns to `pc`.
        fn compiled(&self, usp: usize, sender_pc: usize) -> Frame {
            self.snap.set(usp + 3 * 8, sender_pc);
            self.snap.set(usp + 2 * 8, usp + 0x100);
            Frame::new(&self.ctx(), usp, 0, 0x4020)
        }
    }

    #[test]
    fn test_sp_in_guard_zone_is_unsafe() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let frame = Frame::new(&ctx, LOW + 8, LOW + 0x100, 0x9000);
        assert!(!frame.safe_for_sender(&ctx));
    }

    #[test]
    fn test_unextended_sp_below_sp_is_unsafe() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let frame = Frame::with_unextended_sp(&ctx, LOW + 0x80, LOW + 0x78, LOW + 0x100, 0x9000);
        assert!(!frame.safe_for_sender(&ctx));
    }

    #[test]
    fn test_native_frame_needs_return_address() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let fp = LOW + 0x100;
        let frame = Frame::new(&ctx, LOW + 0x80, fp, 0x9000);
        assert!(!frame.safe_for_sender(&ctx));

        fx.snap.set(fp + 8, 0x1234);
        assert!(frame.safe_for_sender(&ctx));

        // fp equal to sp is never safe.
        let frame = Frame::new(&ctx, fp, fp, 0x9000);
        assert!(!frame.safe_for_sender(&ctx));

        // fp of -1 wraps.
        let frame = Frame::new(&ctx, LOW + 0x80, usize::MAX, 0x9000);
        assert!(!frame.safe_for_sender(&ctx));
    }

    #[test]
    fn test_compiled_sender_must_be_compiled() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let usp = LOW + 0x80;

        let frame = fx.compiled(usp, 0x4100);
        assert!(frame.safe_for_sender(&ctx));

        let frame = fx.compiled(usp, 0x7010);
        assert!(!frame.safe_for_sender(&ctx), "adapter sender");

        let frame = fx.compiled(usp, 0x4300);
        assert!(!frame.safe_for_sender(&ctx), "deopt entry sender");

        let frame = fx.compiled(usp, 0x8000);
        assert!(!frame.safe_for_sender(&ctx), "unknown sender");

        let frame = fx.compiled(usp, 0);
        assert!(!frame.safe_for_sender(&ctx), "null sender");
    }

    #[test]
    fn test_incomplete_frame_is_unsafe() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let usp = LOW + 0x80;
        fx.compiled(usp, 0x4100);
        let frame = Frame::new(&ctx, usp, 0, 0x4008);
        assert!(!frame.safe_for_sender(&ctx));
    }

    #[test]
    fn test_dead_sender_region_is_unsafe() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let frame = fx.compiled(LOW + 0x80, 0x4100);
        assert!(frame.safe_for_sender(&ctx));

        fx.code.find(0x4100).unwrap().make_zombie();
        assert!(!frame.safe_for_sender(&ctx));
    }

    #[test]
    fn test_sender_sp_off_stack_is_unsafe() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        // Four words above the top word lands past the base.
        let frame = Frame::new(&ctx, HIGH - 16, 0, 0x4020);
        assert!(!frame.safe_for_sender(&ctx));
    }

    #[test]
    fn test_call_stub_sender_checks_wrapper() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let usp = LOW + 0x80;
        let sender_sp = usp + 32;
        let saved_fp = LOW + 0x180;
        fx.snap.set(sender_sp - 8, 0x5010);
        fx.snap.set(sender_sp - 16, saved_fp);
        let frame = Frame::new(&ctx, usp, 0, 0x4020);

        // Wrapper word still null.
        assert!(!frame.safe_for_sender(&ctx));

        fx.snap.set(saved_fp - 48, saved_fp + 0x40);
        assert!(frame.safe_for_sender(&ctx));

        fx.snap.set(saved_fp - 48, saved_fp - 0x10);
        assert!(!frame.safe_for_sender(&ctx));
    }
}
