//! Word-addressed access to a thread's stack.
//!
//! Frames are validated against memory that the owning thread may be
//! writing at the same time, so every word is accessed as an `AtomicUsize`
//! and every address is checked against the bounds the cursor was created
//! with before it is touched. A read that falls outside those bounds is
//! refused (`None`) rather than performed.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::bounds::StackBounds;
use crate::layout::{WORD_SIZE, word_offset};

// =============================================================================
// StackMemory
// =============================================================================

/// Backing storage for a stack region.
pub trait StackMemory: Send + Sync {
    /// Lowest address covered by this memory.
    fn low(&self) -> usize;

    /// One past the highest address covered by this memory.
    fn high(&self) -> usize;

    /// The word stored at `addr`.
    ///
    /// Returns `None` if `addr` is unaligned or outside `[low, high)`.
    fn slot(&self, addr: usize) -> Option<&AtomicUsize>;
}

#[inline]
fn in_word_range(addr: usize, low: usize, high: usize) -> bool {
    addr % WORD_SIZE == 0 && addr >= low && addr.checked_add(WORD_SIZE).is_some_and(|end| end <= high)
}

// =============================================================================
// StackSnapshot
// =============================================================================

/// Owned copy of a stack region.
///
/// Used for walking a stack captured from a suspended thread and for
/// building synthetic stacks.
#[derive(Debug)]
pub struct StackSnapshot {
    low: usize,
    words: Box<[AtomicUsize]>,
}

impl StackSnapshot {
    /// Create a zero-filled snapshot covering `word_count` words from `low`.
    pub fn new(low: usize, word_count: usize) -> Self {
        debug_assert!(low % WORD_SIZE == 0, "stack base must be word aligned");
        let words = (0..word_count).map(|_| AtomicUsize::new(0)).collect();
        Self { low, words }
    }

    /// Create a snapshot from existing word contents.
    pub fn from_words(low: usize, contents: &[usize]) -> Self {
        debug_assert!(low % WORD_SIZE == 0, "stack base must be word aligned");
        let words = contents.iter().map(|&w| AtomicUsize::new(w)).collect();
        Self { low, words }
    }

    /// Number of words in the snapshot.
    #[inline]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Read a word, `None` if out of range.
    #[inline]
    pub fn get(&self, addr: usize) -> Option<usize> {
        self.slot(addr).map(|s| s.load(Ordering::Relaxed))
    }

    /// Store a word. Returns `false` if `addr` is out of range.
    #[inline]
    pub fn set(&self, addr: usize, value: usize) -> bool {
        match self.slot(addr) {
            Some(slot) => {
                slot.store(value, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

impl StackMemory for StackSnapshot {
    #[inline]
    fn low(&self) -> usize {
        self.low
    }

    #[inline]
    fn high(&self) -> usize {
        self.low + self.words.len() * WORD_SIZE
    }

    #[inline]
    fn slot(&self, addr: usize) -> Option<&AtomicUsize> {
        if !in_word_range(addr, self.low, self.high()) {
            return None;
        }
        self.words.get((addr - self.low) / WORD_SIZE)
    }
}

// =============================================================================
// RawStack
// =============================================================================

/// A live stack region in this process's address space.
#[derive(Debug, Clone, Copy)]
pub struct RawStack {
    low: usize,
    high: usize,
}

impl RawStack {
    /// Wrap the live memory `[low, high)`.
    ///
    /// # Safety
    ///
    /// The whole range must be mapped, readable and writable for as long as
    /// this value is used, and must only be mutated through word-sized
    /// accesses (as a thread stack is).
    pub unsafe fn new(low: usize, high: usize) -> Self {
        debug_assert!(low <= high);
        Self { low, high }
    }
}

impl StackMemory for RawStack {
    #[inline]
    fn low(&self) -> usize {
        self.low
    }

    #[inline]
    fn high(&self) -> usize {
        self.high
    }

    #[inline]
    fn slot(&self, addr: usize) -> Option<&AtomicUsize> {
        if !in_word_range(addr, self.low, self.high) {
            return None;
        }
        // SAFETY: `addr` is aligned and inside the mapped range the caller
        // vouched for in `RawStack::new`.
        Some(unsafe { &*(addr as *const AtomicUsize) })
    }
}

// SAFETY: RawStack only hands out atomic views of the region.
unsafe impl Send for RawStack {}
unsafe impl Sync for RawStack {}

// =============================================================================
// StackCursor
// =============================================================================

/// Bounded view of one thread's stack memory.
///
/// The cursor's range is the intersection of the memory's extent and the
/// thread's full stack. Address arithmetic that leaves the range yields
/// `None`.
#[derive(Clone, Copy)]
pub struct StackCursor<'a> {
    memory: &'a dyn StackMemory,
    low: usize,
    high: usize,
}

impl<'a> StackCursor<'a> {
    /// Bind a cursor to `memory`, clamped to the full stack of `bounds`.
    pub fn new(memory: &'a dyn StackMemory, bounds: &StackBounds) -> Self {
        Self {
            memory,
            low: memory.low().max(bounds.end()),
            high: memory.high().min(bounds.base()),
        }
    }

    /// Lowest readable address.
    #[inline]
    pub fn low(&self) -> usize {
        self.low
    }

    /// One past the highest readable address.
    #[inline]
    pub fn high(&self) -> usize {
        self.high
    }

    /// Whether a full word at `addr` can be accessed.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        in_word_range(addr, self.low, self.high)
    }

    /// The atomic slot for `addr`.
    #[inline]
    pub fn slot(&self, addr: usize) -> Option<&'a AtomicUsize> {
        if !self.contains(addr) {
            return None;
        }
        self.memory.slot(addr)
    }

    /// Relaxed read.
    #[inline]
    pub fn read(&self, addr: usize) -> Option<usize> {
        self.slot(addr).map(|s| s.load(Ordering::Relaxed))
    }

    /// Relaxed write. Returns `false` if refused.
    #[inline]
    pub fn write(&self, addr: usize, value: usize) -> bool {
        match self.slot(addr) {
            Some(slot) => {
                slot.store(value, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Address `words` words away from `base`, if that word is in range.
    #[inline]
    pub fn addr_at(&self, base: usize, words: isize) -> Option<usize> {
        word_offset(base, words).filter(|&addr| self.contains(addr))
    }

    /// Read the word `words` words away from `base`.
    #[inline]
    pub fn at(&self, base: usize, words: isize) -> Option<usize> {
        self.read(word_offset(base, words)?)
    }

    /// Write the word `words` words away from `base`.
    #[inline]
    pub fn put_at(&self, base: usize, words: isize, value: usize) -> bool {
        match word_offset(base, words) {
            Some(addr) => self.write(addr, value),
            None => false,
        }
    }
}

impl std::fmt::Debug for StackCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackCursor")
            .field("low", &format_args!("{:#x}", self.low))
            .field("high", &format_args!("{:#x}", self.high))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
