//! Stack walking.
//!
//! A walk alternates validation and sender computation:
//!
//! ```text
//!   frame ──safe_for_sender──► ok ──sender()──► frame ──► ...
//!                   │
//!                 false ──► truncate (frame is still yielded)
//! ```
//!
//! The walk ends at the thread's first entry frame, when a frame cannot be
//! validated, when a sender cannot be read, or at the configured depth
//! limit.

use log::debug;
use smallvec::SmallVec;

use crate::context::WalkContext;
use crate::frame::Frame;
use crate::sender::WalkOptions;

/// Inline capacity of [`collect_frames`] results.
pub const INLINE_FRAMES: usize = 16;

/// Iterator over a thread's frames, youngest first.
pub struct StackWalker<'c, 'a> {
    ctx: &'c WalkContext<'a>,
    next: Option<Frame>,
    options: WalkOptions,
    depth: usize,
    /// Skip validation of the starting frame.
    trust_first: bool,
}

impl<'c, 'a> StackWalker<'c, 'a> {
    /// Walk from `start`, validating every frame.
    pub fn new(ctx: &'c WalkContext<'a>, start: Frame) -> Self {
        Self {
            ctx,
            next: Some(start),
            options: WalkOptions::default(),
            depth: 0,
            trust_first: false,
        }
    }

    /// Walk from a frame the caller knows to be well formed, such as the
    /// current thread's own last frame.
    pub fn trusted(ctx: &'c WalkContext<'a>, start: Frame) -> Self {
        Self {
            trust_first: true,
            ..Self::new(ctx, start)
        }
    }

    pub fn with_options(mut self, options: WalkOptions) -> Self {
        self.options = options;
        self
    }

    /// Number of frames yielded so far.
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    fn advance(&self, frame: &Frame) -> Option<Frame> {
        if frame.is_first_frame(self.ctx) {
            return None;
        }
        let trusted = self.trust_first && self.depth == 1;
        if !trusted && !frame.safe_for_sender(self.ctx) {
            debug!("stack walk truncated at depth {}: unsafe sender of {frame}", self.depth);
            return None;
        }
        match frame.sender(self.ctx, self.options) {
            Ok(sender) => Some(sender),
            Err(err) => {
                debug!("stack walk truncated at depth {}: {err}", self.depth);
                None
            }
        }
    }
}

impl Iterator for StackWalker<'_, '_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let frame = self.next.take()?;
        if self.depth >= self.ctx.config().max_walk_depth {
            debug!("stack walk truncated at depth limit {}", self.depth);
            return None;
        }
        self.depth += 1;
        self.next = self.advance(&frame);
        Some(frame)
    }
}

/// All frames reachable from `start`.
pub fn collect_frames(
    ctx: &WalkContext<'_>,
    start: Frame,
    options: WalkOptions,
) -> SmallVec<[Frame; INLINE_FRAMES]> {
    StackWalker::new(ctx, start).with_options(options).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::StackBounds;
    use crate::config::WalkerConfig;
    use crate::memory::StackSnapshot;
    use crate::region::{CodeKind, CodeRegion, CodeRegionTable};

    const LOW: usize = 0x60_0000;
    const WORDS: usize = 128;
    const HIGH: usize = LOW + WORDS * 8;

    /// Chain of native frames linked through fp, ending in a null return
    /// address.
    fn native_chain(snap: &StackSnapshot, fps: &[usize]) {
        for pair in fps.windows(2) {
            snap.set(pair[0], pair[1]);
            snap.set(pair[0] + 8, 0x9_0000);
        }
    }

    #[test]
    fn test_walk_stops_at_unsafe_frame() {
        let snap = StackSnapshot::new(LOW, WORDS);
        let code = CodeRegionTable::new();
        let config = WalkerConfig::default();
        let ctx = WalkContext::new(
            &snap,
            StackBounds::new(HIGH, LOW, 0),
            std::thread::current().id(),
            &code,
            &config,
        );
        let fps = [LOW + 0x40, LOW + 0x80, LOW + 0xc0];
        native_chain(&snap, &fps);

        let start = Frame::new(&ctx, LOW + 0x20, fps[0], 0x9_0000);
        let frames = collect_frames(&ctx, start, WalkOptions::default());
        // The last frame's return slot is null, so its sender is not
        // computed.
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].fp(), fps[2]);
    }

    #[test]
    fn test_walk_depth_limit() {
        let snap = StackSnapshot::new(LOW, WORDS);
        let code = CodeRegionTable::new();
        let config = WalkerConfig::default().with_max_walk_depth(2);
        let ctx = WalkContext::new(
            &snap,
            StackBounds::new(HIGH, LOW, 0),
            std::thread::current().id(),
            &code,
            &config,
        );
        let fps = [LOW + 0x40, LOW + 0x80, LOW + 0xc0, LOW + 0x100];
        native_chain(&snap, &fps);

        let start = Frame::new(&ctx, LOW + 0x20, fps[0], 0x9_0000);
        let mut walker = StackWalker::new(&ctx, start);
        assert_eq!(walker.by_ref().count(), 2);
        assert_eq!(walker.depth(), 2);
    }

    #[test]
    fn test_trusted_start_skips_first_check() {
        let snap = StackSnapshot::new(LOW, WORDS);
        let code = CodeRegionTable::new();
        code.insert(CodeRegion::new(1, CodeKind::RuntimeStub, 0x3000, 0x100).with_frame_size(2));
        let config = WalkerConfig::default();
        let ctx = WalkContext::new(
            &snap,
            StackBounds::new(HIGH, LOW, 0x40),
            std::thread::current().id(),
            &code,
            &config,
        );
        // sp sits in the guard zone, which only validation rejects.
        let sp = LOW + 0x10;
        snap.set(sp + 8, 0x9_0000);
        snap.set(sp, LOW + 0x80);

        let start = Frame::new(&ctx, sp, 0, 0x3010);
        assert_eq!(StackWalker::new(&ctx, start.clone()).count(), 1);
        assert_eq!(StackWalker::trusted(&ctx, start).count(), 2);
    }
}
