//! Synthetic stacks for integration tests.
//!
//! The harness owns a zeroed stack snapshot, a code-region table with one
//! region of every kind and a metadata table with one method. Builders lay
//! out well-formed frames in the snapshot the way the interpreter, compiled
//! code and the call stub would.

#![allow(dead_code)]

use prism_frames::layout::{
    INTERPRETER_FRAME_BCP_OFFSET, INTERPRETER_FRAME_CACHE_OFFSET, INTERPRETER_FRAME_LAST_SP_OFFSET,
    INTERPRETER_FRAME_LOCALS_OFFSET, INTERPRETER_FRAME_METHOD_OFFSET,
    INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET, INTERPRETER_FRAME_SENDER_SP_OFFSET, WORD_SIZE,
    word_offset,
};
use prism_frames::{
    CodeKind, CodeRegion, CodeRegionTable, CompiledInfo, ContinuationEntries, Frame, FrameLayout,
    MetadataTable, MethodInfo, StackBounds, StackSnapshot, WalkContext, WalkerConfig,
};

pub const W: usize = WORD_SIZE;

pub const LOW: usize = 0x7000_0000;
pub const WORDS: usize = 4096;
pub const HIGH: usize = LOW + WORDS * W;
pub const GUARD: usize = 0x200;

pub const INTERPRETER: usize = 0x10_0000;
pub const INTERPRETER_PC: usize = INTERPRETER + 0x400;

pub const COMPILED: usize = 0x20_0000;
pub const COMPILED_FRAME_WORDS: i32 = 6;
pub const COMPILED_COMPLETE: u32 = 0x20;
pub const COMPILED_PC: usize = COMPILED + 0x100;
pub const DEOPT_HANDLER: usize = COMPILED + 0xf00;
pub const DEOPT_MH_HANDLER: usize = COMPILED + 0xf80;
/// Bytes from the unextended sp to the saved original pc.
pub const ORIG_PC_OFFSET: usize = 2 * W;

pub const ENTRY_STUB: usize = 0x30_0000;
pub const ENTRY_PC: usize = ENTRY_STUB + 0x40;
pub const ADAPTER: usize = 0x40_0000;
pub const RUNTIME_STUB: usize = 0x50_0000;
pub const OPTIMIZED_ENTRY: usize = 0x60_0000;
pub const MH_INTRINSIC: usize = 0x70_0000;
pub const BARRIER_PC: usize = 0x80_0000;

pub const METHOD: usize = 0x90_0000;
pub const CACHE: usize = 0x91_0000;
pub const BYTECODE: usize = 0x92_0000;
pub const MAX_STACK: usize = 8;

/// Words from sp to fp in a synthetic interpreted frame.
pub const INTERPRETED_FRAME_WORDS: usize = 12;
/// Words from sp to fp in the sentinel entry frame.
pub const ENTRY_FRAME_WORDS: usize = 16;

pub struct Harness {
    pub snap: StackSnapshot,
    pub code: CodeRegionTable,
    pub meta: MetadataTable,
    pub config: WalkerConfig,
    pub conts: ContinuationEntries,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(WalkerConfig::default())
    }

    pub fn with_config(config: WalkerConfig) -> Self {
        let code = CodeRegionTable::new();
        code.insert(
            CodeRegion::new(1, CodeKind::Interpreter, INTERPRETER, 0x1_0000).with_name("interpreter"),
        );
        code.insert(
            CodeRegion::new(2, CodeKind::Compiled, COMPILED, 0x1000)
                .with_name("Compiled.method")
                .with_frame_size(COMPILED_FRAME_WORDS)
                .with_frame_complete_offset(Some(COMPILED_COMPLETE))
                .with_compiled_info(CompiledInfo {
                    deopt_handler_offset: Some((DEOPT_HANDLER - COMPILED) as u32),
                    deopt_mh_handler_offset: Some((DEOPT_MH_HANDLER - COMPILED) as u32),
                    orig_pc_offset: Some(ORIG_PC_OFFSET),
                    method_handle_intrinsic: false,
                }),
        );
        code.insert(CodeRegion::new(3, CodeKind::EntryStub, ENTRY_STUB, 0x100).with_name("call_stub"));
        code.insert(CodeRegion::new(4, CodeKind::AdapterBlob, ADAPTER, 0x100).with_name("i2c"));
        code.insert(
            CodeRegion::new(5, CodeKind::RuntimeStub, RUNTIME_STUB, 0x100)
                .with_name("runtime_stub")
                .with_frame_size(2),
        );
        code.insert(
            CodeRegion::new(6, CodeKind::OptimizedEntryStub, OPTIMIZED_ENTRY, 0x100)
                .with_name("upcall")
                .with_frame_data_offset(2 * W),
        );
        code.insert(
            CodeRegion::new(7, CodeKind::Compiled, MH_INTRINSIC, 0x100)
                .with_name("invokeBasic")
                .with_frame_size(4)
                .with_compiled_info(CompiledInfo {
                    method_handle_intrinsic: true,
                    ..Default::default()
                }),
        );

        let meta = MetadataTable::new();
        meta.register_method(METHOD, MethodInfo::new(BYTECODE, 0x100, MAX_STACK));
        meta.register_metadata(CACHE);

        Self {
            snap: StackSnapshot::new(LOW, WORDS),
            code,
            meta,
            config: config.with_layout(FrameLayout::SYSV),
            conts: ContinuationEntries::new(BARRIER_PC),
        }
    }

    pub fn bounds(&self) -> StackBounds {
        StackBounds::new(HIGH, LOW, GUARD)
    }

    pub fn ctx(&self) -> WalkContext<'_> {
        WalkContext::new(
            &self.snap,
            self.bounds(),
            std::thread::current().id(),
            &self.code,
            &self.config,
        )
        .with_metadata(&self.meta)
        .with_continuations(&self.conts)
    }

    pub fn set(&self, addr: usize, value: usize) {
        assert!(self.snap.set(addr, value), "synthetic write outside stack: {addr:#x}");
    }

    pub fn get(&self, addr: usize) -> usize {
        self.snap.get(addr).unwrap_or_default()
    }

    fn set_fp_slot(&self, fp: usize, words: isize, value: usize) {
        self.set(word_offset(fp, words).unwrap(), value);
    }

    /// Fill the fixed slots of an interpreted frame at `fp` whose caller is
    /// `(sender_fp, sender_pc)` with unextended sp `sender_usp`.
    pub fn interpreted_frame(&self, fp: usize, sender_fp: usize, sender_pc: usize, sender_usp: usize) {
        self.set_fp_slot(fp, 0, sender_fp);
        self.set_fp_slot(fp, 1, sender_pc);
        self.set_fp_slot(fp, INTERPRETER_FRAME_SENDER_SP_OFFSET, sender_usp);
        self.set_fp_slot(fp, INTERPRETER_FRAME_LAST_SP_OFFSET, 0);
        self.set_fp_slot(fp, INTERPRETER_FRAME_METHOD_OFFSET, METHOD);
        self.set_fp_slot(fp, INTERPRETER_FRAME_CACHE_OFFSET, CACHE);
        self.set_fp_slot(fp, INTERPRETER_FRAME_LOCALS_OFFSET, fp + 2 * W);
        self.set_fp_slot(fp, INTERPRETER_FRAME_BCP_OFFSET, BYTECODE + 0x10);
        self.set_fp_slot(
            fp,
            INTERPRETER_FRAME_MONITOR_BLOCK_TOP_OFFSET,
            fp - (INTERPRETED_FRAME_WORDS - 1) * W,
        );
    }

    /// Lay out a call-stub frame at `fp` whose anchor records `last`
    /// (`None` for the thread's first entry frame). Returns the wrapper
    /// address.
    pub fn entry_frame(&self, fp: usize, last: Option<(usize, usize, usize)>) -> usize {
        let layout = FrameLayout::SYSV;
        let wrapper = fp + 4 * W;
        self.set_fp_slot(fp, layout.entry_frame_call_wrapper_offset, wrapper);
        let anchor = wrapper + layout.call_wrapper_anchor_offset;
        let (last_sp, last_fp, last_pc) = last.unwrap_or((0, 0, 0));
        self.set(anchor, last_sp);
        self.set(anchor + W, last_pc);
        self.set(anchor + 2 * W, last_fp);
        wrapper
    }

    /// Compiled frame at `usp` returning to `sender_pc` with saved fp
    /// `saved_fp`, using `frame_words` as its frame size.
    pub fn compiled_frame(&self, usp: usize, frame_words: usize, sender_pc: usize, saved_fp: usize) {
        let sender_sp = usp + frame_words * W;
        self.set(sender_sp - W, sender_pc);
        self.set(sender_sp - 2 * W, saved_fp);
    }
}

/// An interpreted chain on a synthetic stack.
pub struct InterpretedChain {
    /// `(sp, fp)` of every interpreted frame, youngest first.
    pub frames: Vec<(usize, usize)>,
    /// `(sp, fp)` of the sentinel entry frame.
    pub entry: (usize, usize),
}

impl InterpretedChain {
    /// The youngest frame.
    pub fn top(&self, ctx: &WalkContext<'_>) -> Frame {
        let (sp, fp) = self.frames[0];
        Frame::new(ctx, sp, fp, INTERPRETER_PC)
    }
}

/// `depth` interpreted frames called from the thread's first entry frame.
pub fn interpreted_chain(h: &Harness, depth: usize) -> InterpretedChain {
    assert!(depth > 0);
    let stride = (INTERPRETED_FRAME_WORDS + 2) * W;
    let mut frames = Vec::with_capacity(depth);
    let mut sp = LOW + GUARD + 0x100;
    for _ in 0..depth {
        let fp = sp + INTERPRETED_FRAME_WORDS * W;
        frames.push((sp, fp));
        sp += stride;
    }

    let entry_sp = sp;
    let entry_fp = entry_sp + ENTRY_FRAME_WORDS * W;
    assert!(entry_fp + 16 * W < HIGH, "chain too deep for the synthetic stack");

    for (i, &(_, fp)) in frames.iter().enumerate() {
        let sender_usp = fp + 2 * W;
        match frames.get(i + 1) {
            Some(&(_, sender_fp)) => h.interpreted_frame(fp, sender_fp, INTERPRETER_PC, sender_usp),
            None => h.interpreted_frame(fp, entry_fp, ENTRY_PC, sender_usp),
        }
    }
    h.entry_frame(entry_fp, None);

    InterpretedChain {
        frames,
        entry: (entry_sp, entry_fp),
    }
}
