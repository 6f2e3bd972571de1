//! Typed handles to GC-managed allocations

use std::fmt;
use std::ptr::NonNull;

use crate::object::GcHeader;

/// A GC allocation: header followed by the value.
///
/// `repr(C)` so the header is always at offset 0: the registry works with
/// `*const GcHeader` and recovers the value pointer by offsetting past the
/// header.
#[repr(C)]
pub struct GcCell<T> {
    /// The GC header (kind, mark, dirty, generation)
    pub header: GcHeader,
    /// The stored value
    pub value: T,
}

/// A copyable pointer to a GC-managed value.
///
/// `Gc<T>` does not keep its target alive: reachability is decided by the
/// registry's mark phase from the roots the embedder supplies. Holding a
/// `Gc` across a collection without rooting it is a use-after-free.
pub struct Gc<T> {
    ptr: NonNull<GcCell<T>>,
}

impl<T> Gc<T> {
    /// Wrap a raw cell pointer.
    ///
    /// # Safety
    /// `ptr` must point to a live `GcCell<T>` produced by the registry.
    pub unsafe fn from_cell_ptr(ptr: *mut GcCell<T>) -> Self {
        Self {
            // SAFETY: caller guarantees non-null
            ptr: unsafe { NonNull::new_unchecked(ptr) },
        }
    }

    /// Get the GC header of this allocation.
    #[inline]
    pub fn header(&self) -> &GcHeader {
        // SAFETY: the cell is live as long as the object is reachable
        unsafe { &self.ptr.as_ref().header }
    }

    /// Header pointer, for rooting and tracing.
    #[inline]
    pub fn header_ptr(&self) -> *const GcHeader {
        self.header() as *const GcHeader
    }

    /// Raw pointer to the value, the identity of the object.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        // SAFETY: same lifetime argument as `header`
        unsafe { &self.ptr.as_ref().value as *const T }
    }

    /// Pointer identity comparison.
    #[inline]
    pub fn ptr_eq(&self, other: &Gc<T>) -> bool {
        self.ptr == other.ptr
    }

    /// Recover a `Gc<T>` from a header pointer.
    ///
    /// # Safety
    /// `header` must be the header of a live `GcCell<T>`.
    pub unsafe fn from_header_ptr(header: *const GcHeader) -> Self {
        Self {
            // SAFETY: header is at offset 0 of the repr(C) cell
            ptr: unsafe { NonNull::new_unchecked(header as *mut GcCell<T>) },
        }
    }
}

impl<T> Copy for Gc<T> {}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> std::ops::Deref for Gc<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the cell is live as long as the object is reachable
        unsafe { &self.ptr.as_ref().value }
    }
}

impl<T> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for Gc<T> {}

impl<T> std::hash::Hash for Gc<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gc({:?})", &**self)
    }
}
