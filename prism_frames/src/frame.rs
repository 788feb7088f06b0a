//! Frame values and kind classification.
//!
//! A [`Frame`] is the `(sp, fp, pc)` triple of one activation plus what the
//! pc resolved to. It is built fresh at every walk step and holds no
//! reference to the stack it describes; reads go through a [`WalkContext`].
//!
//! ```text
//!      region of pc           kind
//!   ─────────────────────   ────────────────
//!   EntryStub               Entry
//!   OptimizedEntryStub      OptimizedEntry
//!   Interpreter             Interpreted
//!   Compiled / RuntimeStub  Compiled
//!   AdapterBlob             Compiled
//!   (none)                  Native
//! ```

use std::fmt;
use std::sync::Arc;

use crate::anchor::FrameAnchor;
use crate::context::{TrapContext, WalkContext};
use crate::error::FrameError;
use crate::layout::{LINK_OFFSET, RETURN_ADDR_OFFSET, SENDER_SP_OFFSET, word_offset};
use crate::region::{CodeKind, CodeRegion};

// =============================================================================
// FrameKind
// =============================================================================

/// Physical encoding of a frame. Fixed when the frame is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Call stub entering managed code from native code.
    Entry,
    /// Upcall stub entering managed code from a foreign call.
    OptimizedEntry,
    /// Template-interpreter frame.
    Interpreted,
    /// JIT-compiled method, runtime stub or adapter.
    Compiled,
    /// Code unknown to the code cache.
    Native,
}

impl FrameKind {
    /// Kind of a frame whose pc resolved to `region`.
    #[inline]
    pub fn classify(region: Option<&CodeRegion>) -> Self {
        match region.map(CodeRegion::kind) {
            None => FrameKind::Native,
            Some(CodeKind::EntryStub) => FrameKind::Entry,
            Some(CodeKind::OptimizedEntryStub) => FrameKind::OptimizedEntry,
            Some(CodeKind::Interpreter) => FrameKind::Interpreted,
            Some(CodeKind::Compiled | CodeKind::RuntimeStub | CodeKind::AdapterBlob) => {
                FrameKind::Compiled
            }
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            FrameKind::Entry => "entry",
            FrameKind::OptimizedEntry => "optimized entry",
            FrameKind::Interpreted => "interpreted",
            FrameKind::Compiled => "compiled",
            FrameKind::Native => "native",
        }
    }
}

// =============================================================================
// DeoptState
// =============================================================================

/// Whether the frame's return slot was redirected to a deoptimization
/// handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptState {
    NotDeoptimized,
    /// The raw pc is a deoptimization entry; the frame logically still
    /// executes at `original_pc`.
    Deoptimized { original_pc: usize },
}

// =============================================================================
// Frame
// =============================================================================

/// One stack activation.
#[derive(Debug, Clone)]
pub struct Frame {
    pub(crate) sp: usize,
    pub(crate) unextended_sp: usize,
    pub(crate) fp: usize,
    pub(crate) raw_pc: usize,
    pub(crate) region: Option<Arc<CodeRegion>>,
    pub(crate) kind: FrameKind,
    pub(crate) deopt: DeoptState,
}

impl Frame {
    /// Frame at `(sp, fp, pc)` whose unextended sp equals its sp.
    pub fn new(ctx: &WalkContext<'_>, sp: usize, fp: usize, pc: usize) -> Self {
        Self::with_unextended_sp(ctx, sp, sp, fp, pc)
    }

    /// Frame whose unextended sp is already known (interpreter callees and
    /// adapters may extend the caller's sp).
    pub fn with_unextended_sp(
        ctx: &WalkContext<'_>,
        sp: usize,
        unextended_sp: usize,
        fp: usize,
        pc: usize,
    ) -> Self {
        let region = ctx.code().find_region(pc);
        let kind = FrameKind::classify(region.as_deref());
        let mut frame = Self {
            sp,
            unextended_sp,
            fp,
            raw_pc: pc,
            region,
            kind,
            deopt: DeoptState::NotDeoptimized,
        };
        frame.deopt = frame.resolve_deopt_state(ctx);
        frame
    }

    /// Frame of a thread stopped at a trap.
    pub fn from_trap_context(ctx: &WalkContext<'_>, trap: &TrapContext) -> Self {
        Self::new(ctx, trap.rsp, trap.rbp, trap.pc)
    }

    /// Deoptimization state implied by the current raw pc.
    pub(crate) fn resolve_deopt_state(&self, ctx: &WalkContext<'_>) -> DeoptState {
        let Some(region) = self.region.as_deref() else {
            return DeoptState::NotDeoptimized;
        };
        if let Some(original_pc) =
            region.deopt_original_pc(self.raw_pc, self.unextended_sp, ctx.stack())
        {
            DeoptState::Deoptimized { original_pc }
        } else if region.is_deoptimization_stub() {
            DeoptState::Deoptimized {
                original_pc: self.raw_pc,
            }
        } else {
            DeoptState::NotDeoptimized
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn sp(&self) -> usize {
        self.sp
    }

    /// sp as seen by this frame's code, before callee extension.
    #[inline]
    pub fn unextended_sp(&self) -> usize {
        self.unextended_sp
    }

    #[inline]
    pub fn fp(&self) -> usize {
        self.fp
    }

    /// Logical pc: the pre-deoptimization pc for deoptimized frames.
    #[inline]
    pub fn pc(&self) -> usize {
        match self.deopt {
            DeoptState::Deoptimized { original_pc } => original_pc,
            DeoptState::NotDeoptimized => self.raw_pc,
        }
    }

    /// The pc actually stored in the return slot.
    #[inline]
    pub fn raw_pc(&self) -> usize {
        self.raw_pc
    }

    #[inline]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    #[inline]
    pub fn region(&self) -> Option<&Arc<CodeRegion>> {
        self.region.as_ref()
    }

    #[inline]
    pub fn deopt_state(&self) -> DeoptState {
        self.deopt
    }

    #[inline]
    pub fn is_deoptimized(&self) -> bool {
        matches!(self.deopt, DeoptState::Deoptimized { .. })
    }

    #[inline]
    pub fn is_entry_frame(&self) -> bool {
        self.kind == FrameKind::Entry
    }

    #[inline]
    pub fn is_optimized_entry_frame(&self) -> bool {
        self.kind == FrameKind::OptimizedEntry
    }

    #[inline]
    pub fn is_interpreted_frame(&self) -> bool {
        self.kind == FrameKind::Interpreted
    }

    #[inline]
    pub fn is_compiled_frame(&self) -> bool {
        self.kind == FrameKind::Compiled
    }

    #[inline]
    pub fn is_native_frame(&self) -> bool {
        self.kind == FrameKind::Native
    }

    /// Saved caller fp.
    #[inline]
    pub fn link(&self, ctx: &WalkContext<'_>) -> Option<usize> {
        ctx.stack().at(self.fp, LINK_OFFSET)
    }

    /// Return address stored above the saved fp.
    #[inline]
    pub fn sender_pc(&self, ctx: &WalkContext<'_>) -> Option<usize> {
        ctx.stack().at(self.fp, RETURN_ADDR_OFFSET)
    }

    /// Caller's sp for frames that push a frame pointer.
    #[inline]
    pub fn sender_sp(&self) -> Option<usize> {
        word_offset(self.fp, SENDER_SP_OFFSET)
    }

    /// Value used to reset the saved fp during deoptimization.
    #[inline]
    pub fn initial_deoptimization_info(&self) -> usize {
        self.fp
    }

    /// Same position on the stack with the same interpretation.
    pub fn same_as(&self, other: &Frame) -> bool {
        self.sp == other.sp
            && self.unextended_sp == other.unextended_sp
            && self.fp == other.fp
            && self.raw_pc == other.raw_pc
            && self.kind == other.kind
            && self.deopt == other.deopt
    }

    // =========================================================================
    // Entry Frames
    // =========================================================================

    /// Address of the call wrapper recorded by the call stub.
    pub fn entry_frame_call_wrapper(&self, ctx: &WalkContext<'_>) -> Option<usize> {
        ctx.stack()
            .at(self.fp, ctx.layout().entry_frame_call_wrapper_offset)
    }

    /// The anchor inside this entry frame's call wrapper.
    pub fn entry_frame_anchor<'a>(&self, ctx: &WalkContext<'a>) -> Result<FrameAnchor<'a>, FrameError> {
        let wrapper = self.entry_frame_call_wrapper(ctx).ok_or(FrameError::Unreadable {
            addr: word_offset(self.fp, ctx.layout().entry_frame_call_wrapper_offset).unwrap_or(self.fp),
        })?;
        let addr = wrapper
            .checked_add(ctx.layout().call_wrapper_anchor_offset)
            .ok_or(FrameError::Unreadable { addr: wrapper })?;
        FrameAnchor::in_stack(ctx.stack(), addr).ok_or(FrameError::Unreadable { addr })
    }

    /// The anchor in this optimized entry frame's data block.
    pub fn optimized_entry_anchor<'a>(
        &self,
        ctx: &WalkContext<'a>,
    ) -> Result<FrameAnchor<'a>, FrameError> {
        let region = self
            .region
            .as_deref()
            .ok_or(FrameError::MissingRegion { pc: self.raw_pc })?;
        let offset = region
            .frame_data_offset()
            .ok_or_else(|| FrameError::MissingAnchorData {
                name: region.name().to_string(),
            })?;
        let addr = self
            .unextended_sp
            .checked_add(offset)
            .ok_or(FrameError::Unreadable {
                addr: self.unextended_sp,
            })?;
        FrameAnchor::in_stack(ctx.stack(), addr).ok_or(FrameError::Unreadable { addr })
    }

    /// Structural check of an entry frame: the call wrapper lies between fp
    /// and the stack base and its anchor points above this frame.
    pub fn is_entry_frame_valid(&self, ctx: &WalkContext<'_>) -> bool {
        let Some(wrapper) = self.entry_frame_call_wrapper(ctx) else {
            return false;
        };
        if !ctx.bounds().is_in_stack_range_excl(wrapper, self.fp) {
            return false;
        }
        self.entry_frame_anchor(ctx)
            .is_ok_and(|anchor| anchor.last_sp() > self.sp)
    }

    /// No managed frame precedes this entry frame.
    pub fn entry_frame_is_first(&self, ctx: &WalkContext<'_>) -> bool {
        self.entry_frame_anchor(ctx)
            .is_ok_and(|anchor| !anchor.has_last_frame())
    }

    /// No managed frame precedes this optimized entry frame.
    pub fn optimized_entry_frame_is_first(&self, ctx: &WalkContext<'_>) -> bool {
        self.optimized_entry_anchor(ctx)
            .is_ok_and(|anchor| !anchor.has_last_frame())
    }

    /// The oldest managed frame on the thread.
    pub fn is_first_frame(&self, ctx: &WalkContext<'_>) -> bool {
        match self.kind {
            FrameKind::Entry => self.entry_frame_is_first(ctx),
            FrameKind::OptimizedEntry => self.optimized_entry_frame_is_first(ctx),
            _ => false,
        }
    }

    /// Address of argument `offset` of the call made by this entry frame.
    pub fn entry_frame_argument_at(&self, offset: isize) -> Option<usize> {
        word_offset(self.unextended_sp, offset)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frame sp={:#x} usp={:#x} fp={:#x} pc={:#x}",
            self.kind.name(),
            self.sp,
            self.unextended_sp,
            self.fp,
            self.pc()
        )?;
        if let DeoptState::Deoptimized { .. } = self.deopt {
            write!(f, " (deoptimized, raw pc={:#x})", self.raw_pc)?;
        }
        if let Some(region) = &self.region {
            if !region.name().is_empty() {
                write!(f, " in {}", region.name())?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
