//! Interned Buzz strings
//!
//! Strings are immutable and interned for deduplication: there is at most
//! one String object per byte sequence, so equality is pointer identity.
//! The intern table is a GC root; interned strings live for the whole
//! process (removal is an explicit non-goal of the collector).

use std::cell::RefCell;
use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};

use crate::object::ObjRef;

/// An interned string's payload.
#[derive(Debug)]
pub struct ObjString {
    chars: String,
    hash: u64,
}

impl ObjString {
    /// Build the payload for a string about to be interned.
    pub fn new(s: impl Into<String>) -> Self {
        let chars = s.into();
        let hash = compute_hash(&chars);
        Self { chars, hash }
    }

    /// Get the string contents.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.chars
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// Whether the string is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Precomputed hash of the contents.
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }
}

impl std::fmt::Display for ObjString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.chars)
    }
}

fn compute_hash(s: &str) -> u64 {
    let mut hasher = FxHasher::default();
    s.hash(&mut hasher);
    hasher.finish()
}

/// The process-wide string intern table.
///
/// Buckets by content hash; each bucket is scanned linearly with a byte
/// comparison. Lookup never allocates.
pub struct StringTable {
    buckets: RefCell<FxHashMap<u64, Vec<ObjRef>>>,
}

impl StringTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            buckets: RefCell::new(FxHashMap::default()),
        }
    }

    /// Find an already-interned string.
    pub fn find(&self, s: &str) -> Option<ObjRef> {
        let hash = compute_hash(s);
        let buckets = self.buckets.borrow();
        let bucket = buckets.get(&hash)?;
        bucket
            .iter()
            .find(|obj| {
                obj.as_string()
                    .map(|string| string.as_str() == s)
                    .unwrap_or(false)
            })
            .copied()
    }

    /// Record a freshly allocated string object. The caller (the heap's
    /// intern path) guarantees no equal string is already present.
    pub fn insert(&self, obj: ObjRef) {
        let hash = obj
            .as_string()
            .expect("interned a non-string object")
            .hash_value();
        self.buckets.borrow_mut().entry(hash).or_default().push(obj);
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.buckets.borrow().values().map(Vec::len).sum()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.borrow().is_empty()
    }

    /// Collect every interned string's header as a GC root.
    pub fn gather_roots(&self, roots: &mut Vec<*const buzz_vm_gc::GcHeader>) {
        for bucket in self.buckets.borrow().values() {
            for obj in bucket {
                roots.push(obj.header_ptr());
            }
        }
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}
