//! Prism Frames
//!
//! Stack-frame introspection for the Prism runtime: given a raw
//! `(sp, fp, pc)` triple, decide whether the frame is well formed and
//! compute its caller. Used by the garbage collector, the deoptimizer and
//! asynchronous samplers, often against a thread that is running or that
//! was stopped at an arbitrary instruction.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────┐   ┌────────────────┐   ┌────────────────┐
//!   │ StackBounds  │   │ CodeClassifier │   │ MetadataOracle │
//!   └──────┬───────┘   └───────┬────────┘   └───────┬────────┘
//!          │ StackCursor       │ CodeRegion         │ MethodInfo
//!          └─────────────┬─────┴────────────────────┘
//!                        ▼
//!                   WalkContext ──── ContinuationHooks
//!                        │
//!        ┌───────────────┼──────────────────┬─────────────┐
//!        ▼               ▼                  ▼             ▼
//!   Frame (kind)   safe_for_sender ──► sender()      patch_pc
//!                        │
//!                        └── is_interpreted_frame_valid (one level)
//!                        │
//!                   StackWalker
//! ```
//!
//! # Frame Kinds
//!
//! - **Entry**: the call stub entering managed code from native code. Its
//!   sender is found through the frame anchor in the call wrapper.
//! - **OptimizedEntry**: an upcall stub. Its anchor lives in the stub's
//!   frame data.
//! - **Interpreted**: self-describing template-interpreter frames.
//! - **Compiled**: JIT code, runtime stubs and adapters with a fixed frame
//!   size.
//! - **Native**: anything the code cache does not know; followed through
//!   the fp chain on a best-effort basis.
//!
//! # Safety
//!
//! Stack memory is only touched through a [`StackCursor`], which refuses
//! any word outside the thread's stack. [`Frame::safe_for_sender`] and
//! [`Frame::is_interpreted_frame_valid`] are total: on garbage input they
//! answer `false`.
//!
//! # Usage
//!
//! ```ignore
//! use prism_frames::{CodeRegionTable, Frame, StackWalker, WalkContext, WalkerConfig};
//!
//! let config = WalkerConfig::from_env()?;
//! let ctx = WalkContext::new(&stack, bounds, owner, &code_regions, &config)
//!     .with_metadata(&metadata);
//!
//! let top = Frame::from_trap_context(&ctx, &trap);
//! for frame in StackWalker::new(&ctx, top) {
//!     println!("{frame}");
//! }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod anchor;
pub mod bounds;
pub mod config;
pub mod context;
pub mod continuation;
pub mod error;
pub mod frame;
pub mod layout;
pub mod memory;
pub mod metadata;
pub mod region;
pub mod sender;
pub mod walk;

mod describe;
mod interpreted;
mod patch;
mod validate;

// Re-exports for convenient access
pub use anchor::{FrameAnchor, ThreadAnchor};
pub use bounds::StackBounds;
pub use config::WalkerConfig;
pub use context::{TrapContext, WalkContext};
pub use continuation::{ContinuationEntries, ContinuationEntry, ContinuationHooks, NoContinuations};
pub use describe::{SlotDescription, SlotDescriptions};
pub use error::{ConfigError, FrameError};
pub use frame::{DeoptState, Frame, FrameKind};
pub use interpreted::ResultValue;
pub use layout::FrameLayout;
pub use memory::{RawStack, StackCursor, StackMemory, StackSnapshot};
pub use metadata::{BasicType, MetadataOracle, MetadataTable, MethodInfo};
pub use region::{
    CodeClassifier, CodeKind, CodeRegion, CodeRegionStats, CodeRegionTable, CompiledInfo,
    Liveness,
};
pub use sender::WalkOptions;
pub use walk::{StackWalker, collect_frames};
