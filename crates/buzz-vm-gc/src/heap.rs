//! Generational allocation registry: allocation, marking, sweeping

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::cell::{Gc, GcCell};
use crate::object::{GcHeader, GcTraceable, Generation};

/// Function that drops a swept allocation in place and frees its memory.
/// Receives the pointer to the start of the allocation (the header).
pub type DropFn = unsafe fn(*mut u8);

/// Function that enumerates an allocation's outgoing GC references.
/// Receives the pointer to the start of the allocation (the header); the
/// typed implementation recovers the value through the cell layout.
pub type TraceFn = unsafe fn(*const u8, &mut dyn FnMut(*const GcHeader));

/// GC configuration
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Young-generation byte threshold that triggers a collection
    /// (default: 1 MiB)
    pub young_threshold: usize,
    /// Every `full_every`-th triggered collection is a full one (default: 8)
    pub full_every: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            young_threshold: 1024 * 1024,
            full_every: 8,
        }
    }
}

/// Which kind of collection the registry wants to run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Sweep the young generation only, using the dirty set as extra roots
    Young,
    /// Sweep both generations and promote young survivors
    Full,
}

/// One tracked allocation. Membership in the registry's `young`/`old` list
/// is what threads an object onto its generation.
struct Allocation {
    header: *mut GcHeader,
    size: usize,
    drop_fn: DropFn,
    trace_fn: Option<TraceFn>,
}

/// Collection statistics
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Total collections performed (young + full)
    pub collections: u64,
    /// Young collections performed
    pub young_collections: u64,
    /// Full collections performed
    pub full_collections: u64,
    /// Bytes reclaimed by the last collection
    pub last_reclaimed: usize,
    /// Total pause time across all collections
    pub total_pause_time: Duration,
    /// Pause time of the last collection
    pub last_pause_time: Duration,
}

/// Registry tracking every GC-managed allocation, split across the two
/// generations.
///
/// The registry is pure mechanism: it does not know what the roots are.
/// The embedder gathers root header pointers and calls [`collect`] /
/// [`collect_young`] with them, typically after [`should_collect`] says a
/// threshold was crossed.
///
/// [`collect`]: AllocationRegistry::collect
/// [`collect_young`]: AllocationRegistry::collect_young
/// [`should_collect`]: AllocationRegistry::should_collect
pub struct AllocationRegistry {
    config: GcConfig,
    young: RefCell<Vec<Allocation>>,
    old: RefCell<Vec<Allocation>>,
    /// Old objects with mutated fields since the last full collection.
    /// The `dirty` header flag keeps insertion idempotent.
    dirty: RefCell<Vec<*const GcHeader>>,
    /// Bytes allocated into `young` since the last collection
    young_bytes: Cell<usize>,
    /// Young collections since the last full collection
    young_since_full: Cell<u32>,
    total_bytes: Cell<usize>,
    stats: RefCell<GcStats>,
}

impl AllocationRegistry {
    /// Create a registry with the default configuration.
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    /// Create a registry with a custom configuration.
    pub fn with_config(config: GcConfig) -> Self {
        Self {
            config,
            young: RefCell::new(Vec::new()),
            old: RefCell::new(Vec::new()),
            dirty: RefCell::new(Vec::new()),
            young_bytes: Cell::new(0),
            young_since_full: Cell::new(0),
            total_bytes: Cell::new(0),
            stats: RefCell::new(GcStats::default()),
        }
    }

    /// Total live bytes across both generations.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes.get()
    }

    /// Number of live allocations across both generations.
    pub fn allocation_count(&self) -> usize {
        self.young.borrow().len() + self.old.borrow().len()
    }

    /// Number of entries currently on the dirty set.
    pub fn dirty_count(&self) -> usize {
        self.dirty.borrow().len()
    }

    /// Snapshot of collection statistics.
    pub fn stats(&self) -> GcStats {
        self.stats.borrow().clone()
    }

    /// Get the configuration.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Whether the young-bytes threshold was crossed, and which collection
    /// should run. Embedders call this before allocating.
    pub fn should_collect(&self) -> Option<CollectionKind> {
        if self.young_bytes.get() < self.config.young_threshold {
            return None;
        }
        if self.young_since_full.get() >= self.config.full_every {
            Some(CollectionKind::Full)
        } else {
            Some(CollectionKind::Young)
        }
    }

    /// Allocate `value` on the GC heap, linked into the young generation.
    ///
    /// The returned handle is NOT a root; the embedder must make the object
    /// reachable before the next collection.
    pub fn alloc<T: GcTraceable>(&self, value: T) -> Gc<T> {
        let layout = std::alloc::Layout::new::<GcCell<T>>();
        let size = layout.size();

        let trace_fn: Option<TraceFn> = if T::NEEDS_TRACE {
            Some(trace_cell::<T>)
        } else {
            None
        };

        // SAFETY: layout is non-zero sized (GcHeader alone is non-zero)
        let raw = unsafe { std::alloc::alloc(layout) as *mut GcCell<T> };
        if raw.is_null() {
            std::alloc::handle_alloc_error(layout);
        }

        let kind = value.kind();
        // SAFETY: raw is non-null and properly aligned for GcCell<T>
        unsafe {
            std::ptr::write(&mut (*raw).header, GcHeader::new(kind));
            std::ptr::write(&mut (*raw).value, value);
        }

        self.young.borrow_mut().push(Allocation {
            header: raw as *mut GcHeader,
            size,
            drop_fn: drop_cell::<T>,
            trace_fn,
        });
        self.young_bytes.set(self.young_bytes.get() + size);
        self.total_bytes.set(self.total_bytes.get() + size);

        // SAFETY: raw points to the initialized cell
        unsafe { Gc::from_cell_ptr(raw) }
    }

    /// Write barrier: record that `header`'s object gained or changed an
    /// outgoing reference. Only old objects are tracked; the young
    /// generation is traced in full on every collection.
    pub fn mark_dirty(&self, header: *const GcHeader) {
        if header.is_null() {
            return;
        }
        // SAFETY: barrier callers hold a live reference to the object
        let h = unsafe { &*header };
        if h.generation() == Generation::Old && !h.is_dirty() {
            h.set_dirty(true);
            self.dirty.borrow_mut().push(header);
        }
    }

    /// Run a young collection: mark from `roots` plus the dirty set, sweep
    /// the young generation only. Returns bytes reclaimed.
    ///
    /// The dirty set persists: an old object holding a young reference must
    /// be re-traced by every young collection until a full collection
    /// promotes its referents.
    pub fn collect_young(&self, roots: &[*const GcHeader]) -> usize {
        let start = Instant::now();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "buzz::gc",
            roots = roots.len(),
            dirty = self.dirty.borrow().len(),
            young = self.young.borrow().len(),
            "young collection starting"
        );

        let mut all_roots: Vec<*const GcHeader> = roots.to_vec();
        all_roots.extend(self.dirty.borrow().iter().copied());

        self.mark(&all_roots);
        let reclaimed = self.sweep(CollectionKind::Young);

        self.young_bytes.set(0);
        self.young_since_full
            .set(self.young_since_full.get() + 1);
        self.finish_cycle(CollectionKind::Young, reclaimed, start.elapsed());
        reclaimed
    }

    /// Run a full collection: mark from `roots`, sweep both generations,
    /// promote young survivors to old, clear the dirty set. Returns bytes
    /// reclaimed.
    pub fn collect(&self, roots: &[*const GcHeader]) -> usize {
        let start = Instant::now();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "buzz::gc",
            roots = roots.len(),
            young = self.young.borrow().len(),
            old = self.old.borrow().len(),
            "full collection starting"
        );

        self.mark(roots);
        let reclaimed = self.sweep(CollectionKind::Full);

        // Everything that survived is old now; old→young edges are gone.
        // Dirty flags are cleared through the surviving list: entries on
        // the dirty set may have been freed by the sweep.
        for alloc in self.old.borrow().iter() {
            // SAFETY: entries in `old` are live allocations
            unsafe { (*alloc.header).set_dirty(false) };
        }
        self.dirty.borrow_mut().clear();

        self.young_bytes.set(0);
        self.young_since_full.set(0);
        self.finish_cycle(CollectionKind::Full, reclaimed, start.elapsed());
        reclaimed
    }

    /// Drop every tracked allocation without marking. Used on teardown.
    pub fn dealloc_all(&self) -> usize {
        let total = self.total_bytes.get();
        for alloc in self
            .young
            .borrow_mut()
            .drain(..)
            .chain(self.old.borrow_mut().drain(..))
        {
            // SAFETY: every tracked allocation is live until dropped here
            unsafe { (alloc.drop_fn)(alloc.header as *mut u8) };
        }
        self.dirty.borrow_mut().clear();
        self.young_bytes.set(0);
        self.total_bytes.set(0);
        total
    }

    /// Mark phase: breadth-first trace from `roots`. An object's `marked`
    /// flag doubles as the visited set, so cycles terminate.
    fn mark(&self, roots: &[*const GcHeader]) {
        let trace_lookup = self.build_trace_lookup();
        let mut worklist: VecDeque<*const GcHeader> = VecDeque::new();

        for &root in roots {
            if root.is_null() {
                continue;
            }
            // SAFETY: roots are live header pointers supplied by the embedder
            let header = unsafe { &*root };
            if !header.is_marked() {
                header.set_marked(true);
                worklist.push_back(root);
            }
        }

        while let Some(ptr) = worklist.pop_front() {
            if let Some(Some(trace_fn)) = trace_lookup.get(&(ptr as usize)) {
                // SAFETY: ptr is a live allocation; the header sits at
                // offset 0 of its cell, so the cell pointer is the header
                // pointer
                unsafe {
                    trace_fn(ptr as *const u8, &mut |child| {
                        if !child.is_null() {
                            let child_header = &*child;
                            if !child_header.is_marked() {
                                child_header.set_marked(true);
                                worklist.push_back(child);
                            }
                        }
                    });
                }
            }
        }
    }

    /// Sweep phase. Young sweep frees unmarked young objects and clears the
    /// marks of everything else (old objects marked through dirty-set
    /// tracing included). Full sweep walks both lists, frees unmarked
    /// objects, and migrates young survivors into `old`.
    fn sweep(&self, kind: CollectionKind) -> usize {
        let mut reclaimed = 0usize;
        let mut dead: Vec<Allocation> = Vec::new();

        {
            let mut young = self.young.borrow_mut();
            let mut survivors = Vec::with_capacity(young.len());
            for alloc in young.drain(..) {
                // SAFETY: entries in the generation lists are live
                let header = unsafe { &*alloc.header };
                if header.is_marked() {
                    header.set_marked(false);
                    if kind == CollectionKind::Full {
                        header.set_generation(Generation::Old);
                        self.old.borrow_mut().push(alloc);
                    } else {
                        survivors.push(alloc);
                    }
                } else {
                    reclaimed += alloc.size;
                    dead.push(alloc);
                }
            }
            *young = survivors;
        }

        match kind {
            CollectionKind::Young => {
                // Clear marks picked up by old objects during this cycle.
                for alloc in self.old.borrow().iter() {
                    // SAFETY: entries in the generation lists are live
                    unsafe { (*alloc.header).set_marked(false) };
                }
            }
            CollectionKind::Full => {
                let mut old = self.old.borrow_mut();
                let mut survivors = Vec::with_capacity(old.len());
                for alloc in old.drain(..) {
                    // SAFETY: entries in the generation lists are live
                    let header = unsafe { &*alloc.header };
                    if header.is_marked() {
                        header.set_marked(false);
                        survivors.push(alloc);
                    } else {
                        reclaimed += alloc.size;
                        dead.push(alloc);
                    }
                }
                *old = survivors;
            }
        }

        // Run finalizers after the lists are consistent: a Drop impl must
        // not observe half-swept registry state.
        for alloc in dead {
            // SAFETY: dead allocations were removed from the lists above
            // and are dropped exactly once here
            unsafe { (alloc.drop_fn)(alloc.header as *mut u8) };
        }

        self.total_bytes.set(self.total_bytes.get() - reclaimed);
        reclaimed
    }

    /// Map header address → trace fn for O(1) lookup during marking.
    fn build_trace_lookup(&self) -> FxHashMap<usize, Option<TraceFn>> {
        let mut map = FxHashMap::default();
        for alloc in self.young.borrow().iter() {
            map.insert(alloc.header as usize, alloc.trace_fn);
        }
        for alloc in self.old.borrow().iter() {
            map.insert(alloc.header as usize, alloc.trace_fn);
        }
        map
    }

    fn finish_cycle(&self, kind: CollectionKind, reclaimed: usize, elapsed: Duration) {
        let mut stats = self.stats.borrow_mut();
        stats.collections += 1;
        match kind {
            CollectionKind::Young => stats.young_collections += 1,
            CollectionKind::Full => stats.full_collections += 1,
        }
        stats.last_reclaimed = reclaimed;
        stats.total_pause_time += elapsed;
        stats.last_pause_time = elapsed;

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            target: "buzz::gc",
            kind = ?kind,
            reclaimed_bytes = reclaimed,
            pause_us = elapsed.as_micros() as u64,
            live_bytes = self.total_bytes.get(),
            live_objects = self.allocation_count(),
            "collection complete"
        );
    }
}

impl Default for AllocationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AllocationRegistry {
    fn drop(&mut self) {
        self.dealloc_all();
    }
}

/// Drop function for a `GcCell<T>` allocation.
unsafe fn drop_cell<T>(ptr: *mut u8) {
    let cell = ptr as *mut GcCell<T>;
    let layout = std::alloc::Layout::new::<GcCell<T>>();
    // SAFETY: ptr points to an initialized GcCell<T> allocated with `layout`
    unsafe {
        std::ptr::drop_in_place(&mut (*cell).value);
        std::alloc::dealloc(ptr, layout);
    }
}

/// Trace function for a `GcCell<T>` allocation. Receives the cell pointer;
/// the value's offset comes from the cell layout, not a hand-computed one.
unsafe fn trace_cell<T: GcTraceable>(ptr: *const u8, tracer: &mut dyn FnMut(*const GcHeader)) {
    let cell = ptr as *const GcCell<T>;
    // SAFETY: ptr points to an initialized GcCell<T>
    unsafe { (*cell).value.trace(tracer) };
}
