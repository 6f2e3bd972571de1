//! GC correctness tests
//!
//! These tests verify generational behavior of the mark/sweep collector:
//! promotion, the dirty-set write barrier, and finalizer invocation.

use std::cell::Cell;
use std::rc::Rc;

use buzz_vm_gc::{AllocationRegistry, CollectionKind, GcConfig, GcHeader, GcTraceable, Generation};

/// Test object holding an optional edge to another object.
struct TestObject {
    #[allow(dead_code)]
    value: i32,
    reference: Cell<Option<*const GcHeader>>,
}

impl TestObject {
    fn new(value: i32) -> Self {
        Self {
            value,
            reference: Cell::new(None),
        }
    }
}

impl GcTraceable for TestObject {
    const NEEDS_TRACE: bool = true;

    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        if let Some(ptr) = self.reference.get() {
            tracer(ptr);
        }
    }
}

/// Object whose Drop increments a shared counter, to observe finalization.
struct Finalizable {
    drops: Rc<Cell<u32>>,
}

impl Drop for Finalizable {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

impl GcTraceable for Finalizable {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}

#[test]
fn collect_simple_garbage() {
    let registry = AllocationRegistry::new();

    let _ = registry.alloc(TestObject::new(42));
    assert_eq!(registry.allocation_count(), 1);
    assert!(registry.total_bytes() > 0);

    let reclaimed = registry.collect(&[]);
    assert!(reclaimed > 0);
    assert_eq!(registry.allocation_count(), 0);
    assert_eq!(registry.total_bytes(), 0);
}

#[test]
fn circular_references_collected() {
    let registry = AllocationRegistry::new();

    let a = registry.alloc(TestObject::new(1));
    let b = registry.alloc(TestObject::new(2));
    a.reference.set(Some(b.header_ptr()));
    b.reference.set(Some(a.header_ptr()));

    assert_eq!(registry.allocation_count(), 2);

    let reclaimed = registry.collect(&[]);
    assert!(reclaimed > 0);
    assert_eq!(registry.allocation_count(), 0);
}

#[test]
fn finalizers_run_exactly_once_on_sweep() {
    let registry = AllocationRegistry::new();
    let drops = Rc::new(Cell::new(0));

    let kept = registry.alloc(Finalizable {
        drops: drops.clone(),
    });
    let _ = registry.alloc(Finalizable {
        drops: drops.clone(),
    });

    registry.collect(&[kept.header_ptr()]);
    assert_eq!(drops.get(), 1);

    // Second cycle with no roots frees the survivor too.
    registry.collect(&[]);
    assert_eq!(drops.get(), 2);
}

#[test]
fn promotion_and_write_barrier_across_generations() {
    let registry = AllocationRegistry::new();

    // Survive a full collection: promoted to old.
    let parent = registry.alloc(TestObject::new(1));
    registry.collect(&[parent.header_ptr()]);
    assert_eq!(parent.header().generation(), Generation::Old);

    // A freshly allocated young child stored into the old parent survives
    // the next young collection through the dirty set alone.
    let child = registry.alloc(TestObject::new(2));
    parent.reference.set(Some(child.header_ptr()));
    registry.mark_dirty(parent.header_ptr());

    registry.collect_young(&[]);
    assert_eq!(registry.allocation_count(), 2);
    assert_eq!(child.header().generation(), Generation::Young);

    // Without the barrier, an unreferenced young sibling is collected.
    let _orphan = registry.alloc(TestObject::new(3));
    let reclaimed = registry.collect_young(&[]);
    assert!(reclaimed > 0);
    assert_eq!(registry.allocation_count(), 2);
}

#[test]
fn heap_growth_stays_bounded_under_churn() {
    let registry = AllocationRegistry::with_config(GcConfig {
        young_threshold: 1024,
        full_every: 4,
    });

    let root = registry.alloc(TestObject::new(0));
    let mut root_headers = vec![root.header_ptr()];

    for i in 0..1000 {
        let _ = registry.alloc(TestObject::new(i));
        match registry.should_collect() {
            Some(CollectionKind::Young) => {
                registry.collect_young(&root_headers);
            }
            Some(CollectionKind::Full) => {
                registry.collect(&root_headers);
            }
            None => {}
        }
        root_headers.truncate(1);
    }

    registry.collect(&root_headers);
    assert_eq!(registry.allocation_count(), 1);
    assert!(registry.stats().full_collections >= 1);
    assert!(registry.stats().young_collections > registry.stats().full_collections);
}
