//! Everything a frame operation needs to know about the thread it walks.

use std::thread::ThreadId;

use crate::bounds::StackBounds;
use crate::config::WalkerConfig;
use crate::continuation::{ContinuationHooks, NoContinuations};
use crate::layout::FrameLayout;
use crate::memory::{StackCursor, StackMemory};
use crate::metadata::{MetadataOracle, MethodInfo};
use crate::region::CodeClassifier;

// =============================================================================
// TrapContext
// =============================================================================

/// Register state of a thread interrupted by a trap or a sampling signal.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapContext {
    /// Interrupted instruction address.
    pub pc: usize,
    /// Stack pointer.
    pub rsp: usize,
    /// Base pointer.
    pub rbp: usize,
}

impl TrapContext {
    pub fn new(pc: usize, rsp: usize, rbp: usize) -> Self {
        Self { pc, rsp, rbp }
    }
}

// =============================================================================
// WalkContext
// =============================================================================

struct NoMetadata;

impl MetadataOracle for NoMetadata {
    fn method(&self, _addr: usize) -> Option<MethodInfo> {
        None
    }

    fn is_valid_metadata(&self, _addr: usize) -> bool {
        false
    }
}

static NO_METADATA: NoMetadata = NoMetadata;
static NO_CONTINUATIONS: NoContinuations = NoContinuations;

/// One thread's stack plus the collaborators used to interpret it.
///
/// Cheap to build; create one per walk.
#[derive(Clone, Copy)]
pub struct WalkContext<'a> {
    stack: StackCursor<'a>,
    bounds: StackBounds,
    owner: ThreadId,
    code: &'a dyn CodeClassifier,
    metadata: &'a dyn MetadataOracle,
    continuations: &'a dyn ContinuationHooks,
    config: &'a WalkerConfig,
}

impl<'a> WalkContext<'a> {
    /// Context for the thread `owner` whose stack is `memory`.
    ///
    /// Without [`with_metadata`](Self::with_metadata) no interpreted frame
    /// validates; without [`with_continuations`](Self::with_continuations)
    /// no pc is a return barrier.
    pub fn new(
        memory: &'a dyn StackMemory,
        bounds: StackBounds,
        owner: ThreadId,
        code: &'a dyn CodeClassifier,
        config: &'a WalkerConfig,
    ) -> Self {
        Self {
            stack: StackCursor::new(memory, &bounds),
            bounds,
            owner,
            code,
            metadata: &NO_METADATA,
            continuations: &NO_CONTINUATIONS,
            config,
        }
    }

    /// Use `metadata` to validate method and cache pointers.
    pub fn with_metadata(mut self, metadata: &'a dyn MetadataOracle) -> Self {
        self.metadata = metadata;
        self
    }

    /// Use `continuations` for return-barrier handling.
    pub fn with_continuations(mut self, continuations: &'a dyn ContinuationHooks) -> Self {
        self.continuations = continuations;
        self
    }

    #[inline]
    pub fn stack(&self) -> &StackCursor<'a> {
        &self.stack
    }

    #[inline]
    pub fn bounds(&self) -> &StackBounds {
        &self.bounds
    }

    /// Thread that owns the stack.
    #[inline]
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// The calling thread owns the stack.
    #[inline]
    pub fn is_owner(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    #[inline]
    pub fn code(&self) -> &'a dyn CodeClassifier {
        self.code
    }

    #[inline]
    pub fn metadata(&self) -> &'a dyn MetadataOracle {
        self.metadata
    }

    #[inline]
    pub fn continuations(&self) -> &'a dyn ContinuationHooks {
        self.continuations
    }

    #[inline]
    pub fn config(&self) -> &'a WalkerConfig {
        self.config
    }

    #[inline]
    pub fn layout(&self) -> &'a FrameLayout {
        &self.config.layout
    }
}

impl std::fmt::Debug for WalkContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalkContext")
            .field("stack", &self.stack)
            .field("bounds", &self.bounds)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
