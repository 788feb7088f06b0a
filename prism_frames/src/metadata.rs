//! Method metadata as seen by the frame walker.
//!
//! Interpreted frames hold raw pointers to their method and constant-pool
//! cache. A walker on another thread cannot trust those words, so it asks
//! a [`MetadataOracle`] whether an address really is a live metadata object
//! before using anything derived from it.

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

// =============================================================================
// BasicType
// =============================================================================

/// Result type of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BasicType {
    Boolean = 4,
    Char = 5,
    Float = 6,
    Double = 7,
    Byte = 8,
    Short = 9,
    Int = 10,
    Long = 11,
    Object = 12,
    Array = 13,
    Void = 14,
}

impl BasicType {
    /// Object or array reference.
    #[inline]
    pub const fn is_reference(&self) -> bool {
        matches!(self, BasicType::Object | BasicType::Array)
    }

    /// Returned in a floating-point register.
    #[inline]
    pub const fn is_floating(&self) -> bool {
        matches!(self, BasicType::Float | BasicType::Double)
    }
}

// =============================================================================
// MethodInfo
// =============================================================================

/// The parts of a method the walker needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodInfo {
    /// Declared maximum operand-stack depth in elements.
    pub max_stack: usize,
    /// Address of the first bytecode.
    pub code_base: usize,
    /// Bytecode length in bytes (0 for native methods).
    pub code_size: usize,
    /// Declared result type.
    pub result_type: BasicType,
    /// Native method.
    pub is_native: bool,
}

impl MethodInfo {
    /// Create info for a bytecode method.
    pub fn new(code_base: usize, code_size: usize, max_stack: usize) -> Self {
        Self {
            max_stack,
            code_base,
            code_size,
            result_type: BasicType::Void,
            is_native: false,
        }
    }

    /// Set the result type.
    pub fn with_result_type(mut self, result_type: BasicType) -> Self {
        self.result_type = result_type;
        self
    }

    /// Mark as native.
    pub fn native(mut self) -> Self {
        self.is_native = true;
        self
    }

    /// Whether `bcp` points into the bytecode.
    #[inline]
    pub fn contains(&self, bcp: usize) -> bool {
        bcp >= self.code_base && bcp < self.code_base.saturating_add(self.code_size)
    }

    /// Bytecode index for a bytecode pointer.
    ///
    /// A null bcp and the code base both map to index 0, which also covers
    /// native methods with empty bytecode. Anything else outside the code
    /// is invalid.
    #[inline]
    pub fn bci_from_bcp(&self, bcp: usize) -> Option<u32> {
        if bcp == 0 || bcp == self.code_base {
            Some(0)
        } else if self.contains(bcp) {
            u32::try_from(bcp - self.code_base).ok()
        } else {
            None
        }
    }
}

// =============================================================================
// MetadataOracle
// =============================================================================

/// Validity checks for metadata pointers found in frames.
pub trait MetadataOracle: Send + Sync {
    /// The method at `addr`, if `addr` is a valid method.
    fn method(&self, addr: usize) -> Option<MethodInfo>;

    /// `addr` is a valid metadata object of any kind.
    fn is_valid_metadata(&self, addr: usize) -> bool;
}

// =============================================================================
// MetadataTable
// =============================================================================

/// Registry of known metadata objects.
#[derive(Debug, Default)]
pub struct MetadataTable {
    methods: RwLock<FxHashMap<usize, MethodInfo>>,
    others: RwLock<FxHashSet<usize>>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method at `addr`.
    pub fn register_method(&self, addr: usize, info: MethodInfo) {
        self.methods.write().insert(addr, info);
    }

    /// Register a non-method metadata object (constant-pool cache, ...).
    pub fn register_metadata(&self, addr: usize) {
        self.others.write().insert(addr);
    }

    /// Forget the object at `addr`.
    pub fn unregister(&self, addr: usize) -> bool {
        let method = self.methods.write().remove(&addr).is_some();
        let other = self.others.write().remove(&addr);
        method || other
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        self.methods.read().len() + self.others.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataOracle for MetadataTable {
    #[inline]
    fn method(&self, addr: usize) -> Option<MethodInfo> {
        if addr == 0 {
            return None;
        }
        self.methods.read().get(&addr).copied()
    }

    #[inline]
    fn is_valid_metadata(&self, addr: usize) -> bool {
        addr != 0
            && (self.others.read().contains(&addr) || self.methods.read().contains_key(&addr))
    }
}
