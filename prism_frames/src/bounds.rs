//! Stack bounds of a thread.
//!
//! Stacks grow down: `base` is the highest address (exclusive) and `end`
//! the lowest. The lowest `guard_size` bytes are reserved guard pages that
//! a valid frame never lives in.

/// Address-range membership tests for one thread's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBounds {
    base: usize,
    end: usize,
    guard_size: usize,
}

impl StackBounds {
    /// Create bounds for a stack spanning `[end, base)` with `guard_size`
    /// bytes of guard zone above `end`.
    pub const fn new(base: usize, end: usize, guard_size: usize) -> Self {
        Self {
            base,
            end,
            guard_size,
        }
    }

    /// Highest stack address (exclusive).
    #[inline]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Lowest stack address.
    #[inline]
    pub const fn end(&self) -> usize {
        self.end
    }

    /// Stack size in bytes.
    #[inline]
    pub const fn size(&self) -> usize {
        self.base.saturating_sub(self.end)
    }

    /// Lowest address outside the guard zone.
    #[inline]
    pub const fn usable_end(&self) -> usize {
        self.end.saturating_add(self.guard_size)
    }

    /// Whether the bounds themselves are sane.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.end < self.base && self.usable_end() <= self.base
    }

    /// `addr` is in the stack and not in the guard zone.
    #[inline]
    pub fn is_in_usable_stack(&self, addr: usize) -> bool {
        self.is_valid() && addr < self.base && addr >= self.usable_end()
    }

    /// `addr` is anywhere in the stack, guard zone included.
    #[inline]
    pub fn is_in_full_stack(&self, addr: usize) -> bool {
        addr < self.base && addr >= self.end
    }

    /// Like [`is_in_full_stack`](Self::is_in_full_stack) but false when the
    /// bounds are not initialized.
    #[inline]
    pub fn is_in_full_stack_checked(&self, addr: usize) -> bool {
        self.is_valid() && self.is_in_full_stack(addr)
    }

    /// `limit <= addr <= base`.
    ///
    /// `limit` is normally a previously validated stack address; a limit
    /// outside the stack simply narrows or empties the range.
    #[inline]
    pub fn is_in_stack_range_incl(&self, addr: usize, limit: usize) -> bool {
        self.base >= addr && addr >= limit
    }

    /// `limit < addr < base`.
    #[inline]
    pub fn is_in_stack_range_excl(&self, addr: usize, limit: usize) -> bool {
        self.base > addr && addr > limit
    }
}
