//! Debug descriptions of frame slots.

use std::borrow::Cow;
use std::fmt;

use log::debug;
use smallvec::SmallVec;

use crate::context::WalkContext;
use crate::frame::Frame;
use crate::layout::{
    INTERPRETER_FRAME_BCP_OFFSET, INTERPRETER_FRAME_CACHE_OFFSET,
    INTERPRETER_FRAME_INITIAL_SP_OFFSET, INTERPRETER_FRAME_LAST_SP_OFFSET,
    INTERPRETER_FRAME_LOCALS_OFFSET, INTERPRETER_FRAME_MDP_OFFSET,
    INTERPRETER_FRAME_METHOD_OFFSET, INTERPRETER_FRAME_MIRROR_OFFSET,
    INTERPRETER_FRAME_MONITOR_BLOCK_BOTTOM_OFFSET, INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET,
    INTERPRETER_FRAME_OOP_TEMP_OFFSET, INTERPRETER_FRAME_RESULT_HANDLER_OFFSET,
    INTERPRETER_FRAME_SENDER_SP_OFFSET, LINK_OFFSET, PC_RETURN_OFFSET, RETURN_ADDR_OFFSET,
    SENDER_SP_OFFSET, word_offset,
};

/// fp-relative interpreter slots, youngest last.
const INTERPRETER_SLOTS: [(&str, isize); 9] = [
    ("interpreter_frame_sender_sp", INTERPRETER_FRAME_SENDER_SP_OFFSET),
    ("interpreter_frame_last_sp", INTERPRETER_FRAME_LAST_SP_OFFSET),
    ("interpreter_frame_method", INTERPRETER_FRAME_METHOD_OFFSET),
    ("interpreter_frame_mirror", INTERPRETER_FRAME_MIRROR_OFFSET),
    ("interpreter_frame_mdp", INTERPRETER_FRAME_MDP_OFFSET),
    ("interpreter_frame_cache", INTERPRETER_FRAME_CACHE_OFFSET),
    ("interpreter_frame_locals", INTERPRETER_FRAME_LOCALS_OFFSET),
    ("interpreter_frame_bcp", INTERPRETER_FRAME_BCP_OFFSET),
    ("interpreter_frame_initial_sp", INTERPRETER_FRAME_INITIAL_SP_OFFSET),
];

/// One labelled stack word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDescription {
    pub addr: usize,
    pub label: Cow<'static, str>,
    /// `None` if the word is outside the stack.
    pub value: Option<usize>,
}

impl fmt::Display for SlotDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) => write!(f, "{:#018x}: {:#018x} {}", self.addr, value, self.label),
            None => write!(f, "{:#018x}: <unreadable> {}", self.addr, self.label),
        }
    }
}

pub type SlotDescriptions = SmallVec<[SlotDescription; 16]>;

fn push_slot(
    out: &mut SlotDescriptions,
    ctx: &WalkContext<'_>,
    base: usize,
    words: isize,
    label: impl Into<Cow<'static, str>>,
) {
    if let Some(addr) = word_offset(base, words) {
        out.push(SlotDescription {
            addr,
            label: label.into(),
            value: ctx.stack().read(addr),
        });
    }
}

impl Frame {
    /// Label the platform-specific slots of this frame.
    ///
    /// `frame_no` numbers the frame in the labels.
    pub fn describe(&self, ctx: &WalkContext<'_>, frame_no: usize) -> SlotDescriptions {
        let mut out = SlotDescriptions::new();

        if self.is_interpreted_frame() {
            for (name, offset) in INTERPRETER_SLOTS {
                push_slot(&mut out, ctx, self.fp, offset, name);
            }
        } else if self.is_entry_frame() {
            // Claim the words the call stub saved.
            for i in 0..ctx.layout().entry_frame_after_call_words {
                push_slot(
                    &mut out,
                    ctx,
                    self.fp,
                    -(i as isize),
                    format!("call_stub word fp - {i}"),
                );
            }
        }

        let ret_pc = ctx.stack().at(self.sp, -RETURN_ADDR_OFFSET);
        let label: Cow<'static, str> =
            if ret_pc.is_some_and(|pc| ctx.continuations().is_return_barrier(pc)) {
                Cow::Borrowed("return address (return barrier)")
            } else {
                Cow::Owned(format!("return address for #{frame_no}"))
            };
        push_slot(&mut out, ctx, self.sp, -RETURN_ADDR_OFFSET, label);
        push_slot(
            &mut out,
            ctx,
            self.sp,
            -SENDER_SP_OFFSET,
            format!("saved fp for #{frame_no}"),
        );
        out
    }

    /// Every fixed fp-relative slot, whatever the frame's kind.
    pub fn raw_slots(&self, ctx: &WalkContext<'_>) -> SlotDescriptions {
        let mut out = SlotDescriptions::new();
        push_slot(&mut out, ctx, self.fp, PC_RETURN_OFFSET, "pc_return");
        push_slot(&mut out, ctx, self.fp, LINK_OFFSET, "link");
        push_slot(&mut out, ctx, self.fp, RETURN_ADDR_OFFSET, "return_addr");
        push_slot(&mut out, ctx, self.fp, SENDER_SP_OFFSET, "sender_sp");
        push_slot(
            &mut out,
            ctx,
            self.fp,
            INTERPRETER_FRAME_RESULT_HANDLER_OFFSET,
            "interpreter_frame_result_handler",
        );
        push_slot(
            &mut out,
            ctx,
            self.fp,
            INTERPRETER_FRAME_OOP_TEMP_OFFSET,
            "interpreter_frame_oop_temp",
        );
        for (name, offset) in INTERPRETER_SLOTS {
            push_slot(&mut out, ctx, self.fp, offset, name);
        }
        push_slot(
            &mut out,
            ctx,
            self.fp,
            INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET,
            "interpreter_frame_monitor_block_top",
        );
        push_slot(
            &mut out,
            ctx,
            self.fp,
            INTERPRETER_FRAME_MONITOR_BLOCK_BOTTOM_OFFSET,
            "interpreter_frame_monitor_block_bottom",
        );
        out
    }

    /// Log [`raw_slots`](Self::raw_slots) at debug level.
    pub fn log_raw(&self, ctx: &WalkContext<'_>) {
        debug!("{self}");
        for slot in self.raw_slots(ctx) {
            debug!("  {slot}");
        }
    }
}
