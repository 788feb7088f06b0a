//! Code regions and the registry that resolves a pc to one.
//!
//! A code region is a span of executable memory with the metadata a
//! stack walker needs: what kind of code lives there, how large its frames
//! are, from which offset the frame is fully set up, and whether the code
//! is still alive.
//!
//! # Lifecycle
//!
//! ```text
//!   install ──► Alive ──► Zombie ──► Unloaded ──► remove
//! ```
//!
//! Everything but liveness is immutable once a region is installed, and
//! liveness only moves right. Walkers on other threads may therefore read
//! a region without synchronizing with the thread that retires it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::memory::StackCursor;

// =============================================================================
// CodeKind
// =============================================================================

/// Kind of code stored in a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CodeKind {
    /// JIT-compiled method.
    Compiled = 0,
    /// Runtime helper stub with its own frame.
    RuntimeStub = 1,
    /// Calling-convention adapter between interpreter and compiled code.
    AdapterBlob = 2,
    /// Call stub entering managed code from native code.
    EntryStub = 3,
    /// Upcall stub entering managed code from a foreign-function call.
    OptimizedEntryStub = 4,
    /// The template interpreter.
    Interpreter = 5,
}

impl CodeKind {
    /// Kinds whose frame-complete offset is trustworthy.
    #[inline]
    pub const fn tracks_frame_completion(&self) -> bool {
        matches!(
            self,
            CodeKind::Compiled | CodeKind::AdapterBlob | CodeKind::RuntimeStub
        )
    }
}

// =============================================================================
// Liveness
// =============================================================================

/// Liveness of a region. Ordered: transitions only increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Liveness {
    /// Code may be executing and may be entered.
    Alive = 0,
    /// Code is no longer entered but may still have activations.
    Zombie = 1,
    /// Code has been unloaded.
    Unloaded = 2,
}

impl Liveness {
    #[inline]
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Liveness::Alive,
            1 => Liveness::Zombie,
            _ => Liveness::Unloaded,
        }
    }
}

// =============================================================================
// CompiledInfo
// =============================================================================

/// Extra metadata carried by compiled-method regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompiledInfo {
    /// Offset of the deoptimization handler entry.
    pub deopt_handler_offset: Option<u32>,
    /// Offset of the method-handle deoptimization handler entry.
    pub deopt_mh_handler_offset: Option<u32>,
    /// Byte offset from the frame's unextended sp of the slot that holds the
    /// original pc of a deoptimized frame.
    pub orig_pc_offset: Option<usize>,
    /// The method is a method-handle intrinsic.
    pub method_handle_intrinsic: bool,
}

// =============================================================================
// CodeRegion
// =============================================================================

/// Descriptor for one installed code region.
#[derive(Debug)]
pub struct CodeRegion {
    /// Unique identifier.
    pub id: u64,
    /// Human-readable name for diagnostics.
    name: Box<str>,
    /// Kind of code.
    kind: CodeKind,
    /// Start address of the code.
    code_start: usize,
    /// Size of the code in bytes.
    code_size: usize,
    /// Frame size in words, return address included.
    frame_size: i32,
    /// Offset from which the frame is complete. `None` means never.
    frame_complete_offset: Option<u32>,
    /// Current liveness.
    liveness: AtomicU8,
    /// Compiled-method metadata.
    compiled: Option<CompiledInfo>,
    /// Byte offset from unextended sp of an optimized entry frame's data
    /// block (which starts with the frame anchor).
    frame_data_offset: Option<usize>,
    /// This region is the deoptimization blob.
    deoptimization_stub: bool,
}

impl CodeRegion {
    /// Create a region of `kind` covering `[code_start, code_start + code_size)`.
    ///
    /// Adapter blobs never have a complete frame; every other kind starts
    /// out complete from offset 0.
    pub fn new(id: u64, kind: CodeKind, code_start: usize, code_size: usize) -> Self {
        Self {
            id,
            name: Box::from(""),
            kind,
            code_start,
            code_size,
            frame_size: 0,
            frame_complete_offset: match kind {
                CodeKind::AdapterBlob => None,
                _ => Some(0),
            },
            liveness: AtomicU8::new(Liveness::Alive as u8),
            compiled: None,
            frame_data_offset: None,
            deoptimization_stub: false,
        }
    }

    /// Set the diagnostic name.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Box::from(name);
        self
    }

    /// Set the frame size in words.
    pub fn with_frame_size(mut self, words: i32) -> Self {
        self.frame_size = words;
        self
    }

    /// Set the frame-complete offset (`None` = never complete).
    pub fn with_frame_complete_offset(mut self, offset: Option<u32>) -> Self {
        self.frame_complete_offset = offset;
        self
    }

    /// Attach compiled-method metadata.
    pub fn with_compiled_info(mut self, info: CompiledInfo) -> Self {
        debug_assert_eq!(self.kind, CodeKind::Compiled);
        self.compiled = Some(info);
        self
    }

    /// Set the optimized-entry frame data offset.
    pub fn with_frame_data_offset(mut self, offset: usize) -> Self {
        debug_assert_eq!(self.kind, CodeKind::OptimizedEntryStub);
        self.frame_data_offset = Some(offset);
        self
    }

    /// Mark this region as the deoptimization blob.
    pub fn as_deoptimization_stub(mut self) -> Self {
        self.deoptimization_stub = true;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> CodeKind {
        self.kind
    }

    #[inline]
    pub fn code_start(&self) -> usize {
        self.code_start
    }

    #[inline]
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    #[inline]
    pub fn code_end(&self) -> usize {
        self.code_start.saturating_add(self.code_size)
    }

    /// Frame size in words.
    #[inline]
    pub fn frame_size(&self) -> i32 {
        self.frame_size
    }

    #[inline]
    pub fn compiled_info(&self) -> Option<&CompiledInfo> {
        self.compiled.as_ref()
    }

    #[inline]
    pub fn frame_data_offset(&self) -> Option<usize> {
        self.frame_data_offset
    }

    #[inline]
    pub fn is_deoptimization_stub(&self) -> bool {
        self.deoptimization_stub
    }

    /// Check if the code contains the given address.
    #[inline]
    pub fn code_contains(&self, addr: usize) -> bool {
        addr >= self.code_start && addr < self.code_end()
    }

    /// Whether the frame is fully set up at `pc`.
    #[inline]
    pub fn frame_complete_at(&self, pc: usize) -> bool {
        match self.frame_complete_offset {
            Some(offset) => {
                self.code_contains(pc) && pc >= self.code_start.saturating_add(offset as usize)
            }
            None => false,
        }
    }

    // =========================================================================
    // Kind Predicates
    // =========================================================================

    #[inline]
    pub fn is_compiled(&self) -> bool {
        self.kind == CodeKind::Compiled
    }

    #[inline]
    pub fn is_runtime_stub(&self) -> bool {
        self.kind == CodeKind::RuntimeStub
    }

    #[inline]
    pub fn is_adapter_blob(&self) -> bool {
        self.kind == CodeKind::AdapterBlob
    }

    #[inline]
    pub fn is_entry_stub(&self) -> bool {
        self.kind == CodeKind::EntryStub
    }

    #[inline]
    pub fn is_optimized_entry_stub(&self) -> bool {
        self.kind == CodeKind::OptimizedEntryStub
    }

    #[inline]
    pub fn is_interpreter(&self) -> bool {
        self.kind == CodeKind::Interpreter
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    #[inline]
    pub fn liveness(&self) -> Liveness {
        Liveness::from_u8(self.liveness.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.liveness() == Liveness::Alive
    }

    /// Move liveness forward to `target`.
    ///
    /// Returns `true` if the state changed. Requests to move backwards are
    /// ignored.
    pub fn advance_liveness(&self, target: Liveness) -> bool {
        let previous = self.liveness.fetch_max(target as u8, Ordering::AcqRel);
        previous < target as u8
    }

    /// Retire the region: no new activations.
    #[inline]
    pub fn make_zombie(&self) -> bool {
        self.advance_liveness(Liveness::Zombie)
    }

    #[inline]
    pub fn make_unloaded(&self) -> bool {
        self.advance_liveness(Liveness::Unloaded)
    }

    // =========================================================================
    // Deoptimization
    // =========================================================================

    /// `pc` is the deoptimization handler entry.
    #[inline]
    pub fn is_deopt_entry(&self, pc: usize) -> bool {
        self.handler_pc(|info| info.deopt_handler_offset) == Some(pc)
    }

    /// `pc` is the method-handle deoptimization handler entry.
    #[inline]
    pub fn is_deopt_mh_entry(&self, pc: usize) -> bool {
        self.handler_pc(|info| info.deopt_mh_handler_offset) == Some(pc)
    }

    #[inline]
    pub fn is_deopt_pc(&self, pc: usize) -> bool {
        self.is_deopt_entry(pc) || self.is_deopt_mh_entry(pc)
    }

    #[inline]
    pub fn is_method_handle_intrinsic(&self) -> bool {
        self.compiled.is_some_and(|info| info.method_handle_intrinsic)
    }

    #[inline]
    fn handler_pc(&self, offset: impl FnOnce(&CompiledInfo) -> Option<u32>) -> Option<usize> {
        let offset = offset(self.compiled.as_ref()?)?;
        self.code_start.checked_add(offset as usize)
    }

    /// The pre-deoptimization pc of a frame whose raw pc is `raw_pc`.
    ///
    /// Only frames that were redirected to a deoptimization handler carry
    /// an original pc; it was stored into the frame before the redirect.
    pub fn deopt_original_pc(
        &self,
        raw_pc: usize,
        unextended_sp: usize,
        stack: &StackCursor<'_>,
    ) -> Option<usize> {
        if !self.is_deopt_pc(raw_pc) {
            return None;
        }
        let offset = self.compiled.as_ref()?.orig_pc_offset?;
        let slot = unextended_sp.checked_add(offset)?;
        stack.read(slot).filter(|&pc| pc != 0)
    }
}

// =============================================================================
// CodeClassifier
// =============================================================================

/// Resolves a program counter to the code region containing it.
pub trait CodeClassifier: Send + Sync {
    /// Region containing `pc`, if any.
    fn find_region(&self, pc: usize) -> Option<Arc<CodeRegion>>;

    /// `pc` is inside the interpreter.
    fn interpreter_contains(&self, pc: usize) -> bool {
        self.find_region(pc).is_some_and(|region| region.is_interpreter())
    }

    /// `pc` is a return address into the call stub.
    fn returns_to_call_stub(&self, pc: usize) -> bool {
        self.find_region(pc).is_some_and(|region| region.is_entry_stub())
    }
}

// =============================================================================
// CodeRegionTable
// =============================================================================

/// Registry of installed code regions, ordered by start address.
///
/// Lookups take the read lock only and are O(log n).
#[derive(Debug, Default)]
pub struct CodeRegionTable {
    /// Maps code start address → region.
    regions: RwLock<BTreeMap<usize, Arc<CodeRegion>>>,
    /// Lookup hit counter.
    hits: AtomicU64,
    /// Lookup miss counter.
    misses: AtomicU64,
    /// Insert counter.
    insertions: AtomicU64,
    /// Removal counter.
    removals: AtomicU64,
}

impl CodeRegionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a region.
    ///
    /// Returns the region previously installed at the same start address.
    pub fn insert(&self, region: CodeRegion) -> Option<Arc<CodeRegion>> {
        let region = Arc::new(region);
        let mut regions = self.regions.write();

        debug_assert!(
            regions
                .range(..region.code_end())
                .next_back()
                .is_none_or(|(&start, prev)| start == region.code_start()
                    || prev.code_end() <= region.code_start()),
            "overlapping code region {:#x}",
            region.code_start()
        );

        let old = regions.insert(region.code_start(), region);
        self.insertions.fetch_add(1, Ordering::Relaxed);
        old
    }

    /// Remove the region starting at `code_start`.
    pub fn remove(&self, code_start: usize) -> Option<Arc<CodeRegion>> {
        let removed = self.regions.write().remove(&code_start);
        if removed.is_some() {
            self.removals.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Find the region containing `pc`.
    pub fn find(&self, pc: usize) -> Option<Arc<CodeRegion>> {
        let regions = self.regions.read();
        let result = regions
            .range(..=pc)
            .next_back()
            .filter(|(_, region)| region.code_contains(pc))
            .map(|(_, region)| Arc::clone(region));
        drop(regions);

        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Number of installed regions.
    #[inline]
    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.read().is_empty()
    }

    /// Remove every region.
    pub fn clear(&self) {
        self.regions.write().clear();
    }

    /// Snapshot of all installed regions (for debugging/profiling).
    pub fn regions(&self) -> Vec<Arc<CodeRegion>> {
        self.regions.read().values().cloned().collect()
    }

    /// Lookup statistics.
    #[inline]
    pub fn stats(&self) -> CodeRegionStats {
        CodeRegionStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
        }
    }
}

impl CodeClassifier for CodeRegionTable {
    #[inline]
    fn find_region(&self, pc: usize) -> Option<Arc<CodeRegion>> {
        self.find(pc)
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for the region table.
#[derive(Debug, Default, Clone)]
pub struct CodeRegionStats {
    /// Lookups that found a region.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Number of insertions.
    pub insertions: u64,
    /// Number of removals.
    pub removals: u64,
}

impl CodeRegionStats {
    /// Fraction of lookups that resolved.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
