//! Interpreted frames: validity check and field accessors.
//!
//! The interpreter frame is self-describing. Everything the checker needs
//! sits at a fixed offset below `fp` (see [`crate::layout`]), but each word
//! may be garbage when the frame was built from an unvalidated triple, so
//! every pointer is tested before anything derived from it is used.

use crate::context::WalkContext;
use crate::error::FrameError;
use crate::frame::Frame;
use crate::layout::{
    INTERPRETER_FRAME_BCP_OFFSET, INTERPRETER_FRAME_CACHE_OFFSET,
    INTERPRETER_FRAME_INITIAL_SP_OFFSET, INTERPRETER_FRAME_LAST_SP_OFFSET,
    INTERPRETER_FRAME_LOCALS_OFFSET, INTERPRETER_FRAME_METHOD_OFFSET,
    INTERPRETER_FRAME_MONITOR_BLOCK_BOTTOM_OFFSET, INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET,
    INTERPRETER_FRAME_OOP_TEMP_OFFSET, INTERPRETER_FRAME_SENDER_SP_OFFSET, STACK_ELEMENT_SIZE,
    WORD_SIZE, word_offset,
};
use crate::metadata::BasicType;

// =============================================================================
// ResultValue
// =============================================================================

/// A method result cached in an interpreted frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultValue {
    /// Object or array reference (0 = null).
    Object(usize),
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Void,
}

impl ResultValue {
    /// Decode a stack word as a value of type `ty`.
    fn decode(ty: BasicType, word: usize) -> Self {
        match ty {
            BasicType::Object | BasicType::Array => ResultValue::Object(word),
            BasicType::Boolean => ResultValue::Boolean(word as u8 != 0),
            BasicType::Byte => ResultValue::Byte(word as u8 as i8),
            BasicType::Char => ResultValue::Char(word as u16),
            BasicType::Short => ResultValue::Short(word as u16 as i16),
            BasicType::Int => ResultValue::Int(word as u32 as i32),
            BasicType::Long => ResultValue::Long(word as i64),
            BasicType::Float => ResultValue::Float(f32::from_bits(word as u32)),
            BasicType::Double => ResultValue::Double(f64::from_bits(word as u64)),
            BasicType::Void => ResultValue::Void,
        }
    }
}

#[inline]
fn is_word_aligned(addr: usize) -> bool {
    addr % WORD_SIZE == 0
}

impl Frame {
    // =========================================================================
    // Validity
    // =========================================================================

    /// Sanity check of an interpreted frame built from untrusted values.
    ///
    /// Reads only words inside the stack and never follows a method or
    /// cache pointer the metadata oracle has not vouched for.
    pub fn is_interpreted_frame_valid(&self, ctx: &WalkContext<'_>) -> bool {
        if !self.is_interpreted_frame() {
            return false;
        }
        let (sp, fp) = (self.sp, self.fp);
        if fp == 0 || !is_word_aligned(fp) {
            return false;
        }
        if sp == 0 || !is_word_aligned(sp) {
            return false;
        }
        // Room for the fixed interpreter slots between sp and fp.
        match word_offset(fp, INTERPRETER_FRAME_INITIAL_SP_OFFSET) {
            Some(initial_sp) if initial_sp >= sp => {}
            _ => return false,
        }
        if fp <= sp {
            return false;
        }

        let stack = ctx.stack();
        let Some(method) = stack.at(fp, INTERPRETER_FRAME_METHOD_OFFSET) else {
            return false;
        };
        let Some(info) = ctx.metadata().method(method) else {
            return false;
        };

        // A frame shouldn't be much larger than its operand stack. Measured
        // from the unextended sp: callee locals may extend the raw sp.
        let frame_words = fp.saturating_sub(self.unextended_sp) / WORD_SIZE;
        let limit = info
            .max_stack
            .saturating_mul(STACK_ELEMENT_SIZE)
            .saturating_add(ctx.config().interpreter_frame_slack_words);
        if frame_words > limit {
            return false;
        }

        let Some(bcp) = stack.at(fp, INTERPRETER_FRAME_BCP_OFFSET) else {
            return false;
        };
        if info.bci_from_bcp(bcp).is_none() {
            return false;
        }

        let Some(cache) = stack.at(fp, INTERPRETER_FRAME_CACHE_OFFSET) else {
            return false;
        };
        if !ctx.metadata().is_valid_metadata(cache) {
            return false;
        }

        let Some(locals) = stack.at(fp, INTERPRETER_FRAME_LOCALS_OFFSET) else {
            return false;
        };
        ctx.bounds().is_in_stack_range_incl(locals, fp)
    }

    // =========================================================================
    // Fixed Slots
    // =========================================================================

    #[inline]
    fn interpreter_slot(&self, ctx: &WalkContext<'_>, offset: isize) -> Option<usize> {
        debug_assert!(self.is_interpreted_frame(), "interpreted frame expected");
        ctx.stack().at(self.fp, offset)
    }

    #[inline]
    fn set_interpreter_slot(
        &self,
        ctx: &WalkContext<'_>,
        offset: isize,
        value: usize,
    ) -> Result<(), FrameError> {
        debug_assert!(self.is_interpreted_frame(), "interpreted frame expected");
        if ctx.stack().put_at(self.fp, offset, value) {
            Ok(())
        } else {
            Err(FrameError::Unreadable {
                addr: word_offset(self.fp, offset).unwrap_or(self.fp),
            })
        }
    }

    /// The sender's unextended sp.
    pub fn interpreter_frame_sender_sp(&self, ctx: &WalkContext<'_>) -> Option<usize> {
        self.interpreter_slot(ctx, INTERPRETER_FRAME_SENDER_SP_OFFSET)
    }

    pub fn set_interpreter_frame_sender_sp(
        &self,
        ctx: &WalkContext<'_>,
        sender_sp: usize,
    ) -> Result<(), FrameError> {
        self.set_interpreter_slot(ctx, INTERPRETER_FRAME_SENDER_SP_OFFSET, sender_sp)
    }

    /// Outgoing sp at the last call, 0 while not calling.
    pub fn interpreter_frame_last_sp(&self, ctx: &WalkContext<'_>) -> Option<usize> {
        self.interpreter_slot(ctx, INTERPRETER_FRAME_LAST_SP_OFFSET)
    }

    pub fn set_interpreter_frame_last_sp(
        &self,
        ctx: &WalkContext<'_>,
        last_sp: usize,
    ) -> Result<(), FrameError> {
        self.set_interpreter_slot(ctx, INTERPRETER_FRAME_LAST_SP_OFFSET, last_sp)
    }

    /// Method pointer.
    pub fn interpreter_frame_method(&self, ctx: &WalkContext<'_>) -> Option<usize> {
        self.interpreter_slot(ctx, INTERPRETER_FRAME_METHOD_OFFSET)
    }

    /// Bytecode pointer.
    pub fn interpreter_frame_bcp(&self, ctx: &WalkContext<'_>) -> Option<usize> {
        self.interpreter_slot(ctx, INTERPRETER_FRAME_BCP_OFFSET)
    }

    /// Constant-pool cache pointer.
    pub fn interpreter_frame_cache(&self, ctx: &WalkContext<'_>) -> Option<usize> {
        self.interpreter_slot(ctx, INTERPRETER_FRAME_CACHE_OFFSET)
    }

    /// Address of local 0.
    pub fn interpreter_frame_locals(&self, ctx: &WalkContext<'_>) -> Option<usize> {
        self.interpreter_slot(ctx, INTERPRETER_FRAME_LOCALS_OFFSET)
    }

    // =========================================================================
    // Monitors
    // =========================================================================

    /// Address of the monitor block's bottom (first monitor ends here).
    pub fn interpreter_frame_monitor_begin(&self) -> Option<usize> {
        word_offset(self.fp, INTERPRETER_FRAME_MONITOR_BLOCK_BOTTOM_OFFSET)
    }

    /// Current top of the monitor block.
    pub fn interpreter_frame_monitor_end(&self, ctx: &WalkContext<'_>) -> Option<usize> {
        let end = self.interpreter_slot(ctx, INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET)?;
        debug_assert!(self.sp <= end, "monitor end should be above the stack pointer");
        debug_assert!(
            end < self.fp,
            "monitor end should be strictly below the frame pointer: end {end:#x} fp {:#x}",
            self.fp
        );
        Some(end)
    }

    pub fn set_interpreter_frame_monitor_end(
        &self,
        ctx: &WalkContext<'_>,
        end: usize,
    ) -> Result<(), FrameError> {
        self.set_interpreter_slot(ctx, INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET, end)
    }

    // =========================================================================
    // Expression Stack
    // =========================================================================

    /// Address of the top of the expression stack.
    pub fn interpreter_frame_tos_address(&self, ctx: &WalkContext<'_>) -> Option<usize> {
        let last_sp = self.interpreter_frame_last_sp(ctx)?;
        if last_sp == 0 {
            Some(self.sp)
        } else {
            // sp may be extended by a call.
            debug_assert!(
                self.interpreter_frame_monitor_end(ctx)
                    .is_none_or(|end| last_sp <= end),
                "bad tos"
            );
            Some(last_sp)
        }
    }

    /// Address of expression-stack element `offset` counted from the top.
    pub fn interpreter_frame_tos_at(&self, ctx: &WalkContext<'_>, offset: isize) -> Option<usize> {
        let tos = self.interpreter_frame_tos_address(ctx)?;
        let bytes = offset.checked_mul(STACK_ELEMENT_SIZE as isize)?;
        tos.checked_add_signed(bytes)
    }

    /// The result the method left for its caller, decoded by its declared
    /// type.
    ///
    /// Native methods push their result onto the native stack before
    /// reporting the exit: floating results sit two elements above sp
    /// (the register save pushes a long first) and objects go to the oop
    /// temp slot.
    pub fn interpreter_frame_result(&self, ctx: &WalkContext<'_>) -> Option<ResultValue> {
        let method = self.interpreter_frame_method(ctx)?;
        let info = ctx.metadata().method(method)?;
        let ty = info.result_type;

        let tos = if info.is_native {
            if ty.is_floating() {
                self.sp.checked_add(2 * STACK_ELEMENT_SIZE)?
            } else {
                self.sp
            }
        } else {
            self.interpreter_frame_tos_address(ctx)?
        };

        let word = match ty {
            BasicType::Void => return Some(ResultValue::Void),
            BasicType::Object | BasicType::Array if info.is_native => {
                ctx.stack().at(self.fp, INTERPRETER_FRAME_OOP_TEMP_OFFSET)?
            }
            _ => ctx.stack().read(tos)?,
        };
        Some(ResultValue::decode(ty, word))
    }
}
