//! Sender (caller) reconstruction.
//!
//! Every kind finds its caller differently:
//!
//! ```text
//!   Entry            anchor in the call wrapper  → (last_sp, last_fp, last_pc)
//!   OptimizedEntry   anchor in the frame data    → (last_sp, last_fp, last_pc)
//!   Interpreted      own activation record       → (fp+2, [fp-1], [fp], [fp+1])
//!   Compiled         usp + frame_size = ssp      → (ssp, [ssp-2], [ssp-1])
//!   Native           fp chain                    → (fp+2, [fp], [fp+1])
//! ```
//!
//! These functions trust the frame. Run
//! [`safe_for_sender`](Frame::safe_for_sender) first when walking a stack
//! the caller does not own.

use crate::anchor::FrameAnchor;
use crate::context::WalkContext;
use crate::error::FrameError;
use crate::frame::{Frame, FrameKind};
use crate::layout::{
    INTERPRETER_FRAME_SENDER_SP_OFFSET, LINK_OFFSET, RETURN_ADDR_OFFSET, SENDER_SP_OFFSET,
    word_offset,
};

/// Options for a single sender step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkOptions {
    /// Step into a mounted continuation at its return barrier instead of
    /// skipping over it.
    pub walk_continuations: bool,
}

impl WalkOptions {
    pub fn walk_continuations(mut self, enabled: bool) -> Self {
        self.walk_continuations = enabled;
        self
    }
}

#[inline]
fn read(ctx: &WalkContext<'_>, base: usize, words: isize) -> Result<usize, FrameError> {
    ctx.stack().at(base, words).ok_or(FrameError::Unreadable {
        addr: word_offset(base, words).unwrap_or(base),
    })
}

#[inline]
fn offset(base: usize, words: isize) -> Result<usize, FrameError> {
    word_offset(base, words).ok_or(FrameError::Unreadable { addr: base })
}

impl Frame {
    /// The caller of this frame.
    pub fn sender(&self, ctx: &WalkContext<'_>, options: WalkOptions) -> Result<Frame, FrameError> {
        match self.kind {
            FrameKind::Entry => self.sender_for_entry_frame(ctx),
            FrameKind::OptimizedEntry => self.sender_for_optimized_entry_frame(ctx),
            FrameKind::Interpreted => self.sender_for_interpreter_frame(ctx, options),
            FrameKind::Compiled => self.sender_for_compiled_frame(ctx, options),
            FrameKind::Native => self.sender_for_native_frame(ctx),
        }
    }

    fn sender_for_entry_frame(&self, ctx: &WalkContext<'_>) -> Result<Frame, FrameError> {
        let anchor = self.entry_frame_anchor(ctx)?;
        self.sender_from_anchor(ctx, anchor)
    }

    fn sender_for_optimized_entry_frame(&self, ctx: &WalkContext<'_>) -> Result<Frame, FrameError> {
        let anchor = self.optimized_entry_anchor(ctx)?;
        self.sender_from_anchor(ctx, anchor)
    }

    /// Skip the native frames between an entry stub and the managed frame
    /// that called out.
    fn sender_from_anchor(
        &self,
        ctx: &WalkContext<'_>,
        anchor: FrameAnchor<'_>,
    ) -> Result<Frame, FrameError> {
        if !anchor.has_last_frame() {
            return Err(FrameError::FirstFrame);
        }
        debug_assert!(anchor.last_sp() > self.sp, "must be above this frame on stack");

        // The walk reached this entry frame, so its anchor is stacked below
        // a managed frame and can be made walkable now.
        anchor.ensure_walkable(ctx.stack())?;
        debug_assert!(anchor.walkable(), "not walkable");

        Ok(Frame::new(
            ctx,
            anchor.last_sp(),
            anchor.last_fp(),
            anchor.last_pc(),
        ))
    }

    fn sender_for_interpreter_frame(
        &self,
        ctx: &WalkContext<'_>,
        options: WalkOptions,
    ) -> Result<Frame, FrameError> {
        // Raw sp of the sender after any interpreter or adapter extension.
        let sender_sp = offset(self.fp, SENDER_SP_OFFSET)?;
        // sp before the extension.
        let mut unextended_sp = read(ctx, self.fp, INTERPRETER_FRAME_SENDER_SP_OFFSET)?;
        let sender_fp = read(ctx, self.fp, LINK_OFFSET)?;
        let mut sender_pc = read(ctx, self.fp, RETURN_ADDR_OFFSET)?;

        let hooks = ctx.continuations();
        if hooks.is_return_barrier(sender_pc) {
            if options.walk_continuations {
                if let Some(top) = hooks.top_frame(self, ctx) {
                    return Ok(top);
                }
            } else {
                hooks.fix_bottom_sender(self, ctx, &mut sender_pc, &mut unextended_sp);
            }
        }

        Ok(Frame::with_unextended_sp(
            ctx,
            sender_sp,
            unextended_sp,
            sender_fp,
            sender_pc,
        ))
    }

    fn sender_for_compiled_frame(
        &self,
        ctx: &WalkContext<'_>,
        options: WalkOptions,
    ) -> Result<Frame, FrameError> {
        let region = self
            .region
            .as_deref()
            .ok_or(FrameError::MissingRegion { pc: self.raw_pc })?;
        debug_assert!(region.frame_size() > 0, "compiled frame must have a frame");

        let mut sender_sp = offset(self.unextended_sp, region.frame_size() as isize)?;
        // The return address is the topmost word the callee reserves.
        let mut sender_pc = read(ctx, sender_sp, -1)?;
        let saved_fp = read(ctx, sender_sp, -SENDER_SP_OFFSET)?;

        let hooks = ctx.continuations();
        if hooks.is_return_barrier(sender_pc) {
            if options.walk_continuations {
                if let Some(top) = hooks.top_frame(self, ctx) {
                    return Ok(top);
                }
            } else {
                hooks.fix_bottom_sender(self, ctx, &mut sender_pc, &mut sender_sp);
            }
        }

        Ok(Frame::with_unextended_sp(
            ctx, sender_sp, sender_sp, saved_fp, sender_pc,
        ))
    }

    fn sender_for_native_frame(&self, ctx: &WalkContext<'_>) -> Result<Frame, FrameError> {
        let sender_sp = offset(self.fp, SENDER_SP_OFFSET)?;
        let sender_fp = read(ctx, self.fp, LINK_OFFSET)?;
        let sender_pc = read(ctx, self.fp, RETURN_ADDR_OFFSET)?;
        Ok(Frame::new(ctx, sender_sp, sender_fp, sender_pc))
    }
}
