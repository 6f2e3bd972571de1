//! Static type descriptors
//!
//! A TypeDef describes a static type. Structural types are canonicalized by
//! the [`TypeRegistry`] (hash-consing: two lookups of the same structure
//! return the same object); Object and Enum definitions are nominal and
//! never collapsed. Placeholder TypeDefs stand in for names the parser has
//! not resolved yet; resolution substitutes the real definition in place,
//! so every holder of the placeholder sees the resolved type.

use std::cell::{Ref, RefCell};
use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};

use crate::object::{Obj, ObjRef};
use crate::placeholder::PlaceholderDef;

/// The kind of a static type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// bool
    Bool,
    /// Integers and floats
    Number,
    /// str
    String,
    /// pat
    Pattern,
    /// A type used as a value
    Type,
    /// void; also the inferred type of `null` (as `void?`)
    Void,
    /// Opaque host data
    UserData,
    /// fib<R, Y>
    Fiber,
    /// An instance of a nominal object definition
    ObjectInstance,
    /// An instance of a nominal enum definition
    EnumInstance,
    /// A nominal object definition
    Object,
    /// A nominal enum definition
    Enum,
    /// [T]
    List,
    /// {K: V}
    Map,
    /// Function
    Function,
    /// Unresolved forward reference
    Placeholder,
}

/// A named function parameter with its declared type.
#[derive(Debug, Clone)]
pub struct ParameterDef {
    /// Parameter name (ignored by type equality)
    pub name: String,
    /// Declared type
    pub type_def: ObjRef,
    /// Whether a default value was declared
    pub has_default: bool,
}

/// Kind-specific payload of a TypeDef.
#[derive(Debug)]
pub enum TypeUnion {
    /// Function signature; parameters keep insertion order
    Function {
        /// Parameters in declaration order
        parameters: Vec<ParameterDef>,
        /// Declared return type
        return_type: ObjRef,
        /// Declared yield type (`void` when the function cannot yield)
        yield_type: ObjRef,
    },
    /// List item type
    List {
        /// Element type
        item: ObjRef,
    },
    /// Map key/value types
    Map {
        /// Key type
        key: ObjRef,
        /// Value type
        value: ObjRef,
    },
    /// Fiber return/yield types
    Fiber {
        /// Type of the fiber's final return
        return_type: ObjRef,
        /// Type of each yielded value
        yield_type: ObjRef,
    },
    /// Nominal payload: the Object or Enum definition object this type
    /// denotes (or is an instance of)
    Nominal {
        /// The `Obj::Object` or `Obj::Enum` definition
        definition: ObjRef,
    },
    /// Unresolved forward reference
    Placeholder(PlaceholderDef),
}

/// The mutable interior of a TypeDef. Resolution overwrites a placeholder's
/// data in place.
#[derive(Debug)]
pub struct TypeDefData {
    /// Whether the type admits null
    pub optional: bool,
    /// The type's kind
    pub kind: TypeKind,
    /// Kind-specific payload
    pub payload: Option<TypeUnion>,
}

impl TypeDefData {
    /// A payload-free type.
    pub fn basic(kind: TypeKind, optional: bool) -> Self {
        Self {
            optional,
            kind,
            payload: None,
        }
    }
}

/// A heap-allocated type descriptor.
#[derive(Debug)]
pub struct ObjTypeDef {
    data: RefCell<TypeDefData>,
}

impl ObjTypeDef {
    /// Wrap type data for allocation.
    pub fn new(data: TypeDefData) -> Self {
        Self {
            data: RefCell::new(data),
        }
    }

    /// Borrow the type data.
    pub fn data(&self) -> Ref<'_, TypeDefData> {
        self.data.borrow()
    }

    /// The type's kind.
    pub fn kind(&self) -> TypeKind {
        self.data.borrow().kind
    }

    /// Whether the type admits null.
    pub fn optional(&self) -> bool {
        self.data.borrow().optional
    }

    /// Whether this is an unresolved placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.kind() == TypeKind::Placeholder
    }

    /// Replace the type data in place. Used by placeholder resolution so
    /// every holder of this TypeDef sees the substitution.
    pub fn replace(&self, data: TypeDefData) {
        *self.data.borrow_mut() = data;
    }

    /// Run `f` on the placeholder payload, if this is a placeholder.
    pub fn with_placeholder<R>(&self, f: impl FnOnce(&PlaceholderDef) -> R) -> Option<R> {
        let data = self.data.borrow();
        match &data.payload {
            Some(TypeUnion::Placeholder(def)) => Some(f(def)),
            _ => None,
        }
    }
}

/// Deref a `Value`-level TypeDef object.
fn type_def(obj: &ObjRef) -> &ObjTypeDef {
    match &**obj {
        Obj::Type(def) => def,
        _ => panic!("expected a type object"),
    }
}

/// Loose type equality, used by runtime checks and signature comparison.
///
/// A placeholder is loosely equal to anything (concession to deferred
/// resolution). For resolved types this relation is exact and transitive.
pub fn eql(a: &ObjRef, b: &ObjRef) -> bool {
    if a.ptr_eq(b) {
        return true;
    }
    let a = type_def(a);
    let b = type_def(b);
    if a.kind() == TypeKind::Placeholder || b.kind() == TypeKind::Placeholder {
        return true;
    }
    a.optional() == b.optional() && structural_eql(a, b)
}

/// Whether a value of type `from` may be assigned where `to` is expected.
///
/// This is `eql` plus the one permissive direction: `Void` is assignable to
/// any optional type (optional return normalization). Kept out of `eql`
/// itself so equality stays reflexive and transitive.
pub fn assignable_to(from: &ObjRef, to: &ObjRef) -> bool {
    if type_def(from).kind() == TypeKind::Void && type_def(to).optional() {
        return true;
    }
    eql(from, to)
}

/// Kind and payload equality, ignoring `optional`.
fn structural_eql(a: &ObjTypeDef, b: &ObjTypeDef) -> bool {
    if a.kind() != b.kind() {
        return false;
    }
    let a = a.data();
    let b = b.data();
    match (&a.payload, &b.payload) {
        (None, None) => true,
        (Some(pa), Some(pb)) => union_eql(pa, pb),
        _ => false,
    }
}

fn union_eql(a: &TypeUnion, b: &TypeUnion) -> bool {
    match (a, b) {
        (
            TypeUnion::Function {
                parameters: pa,
                return_type: ra,
                yield_type: ya,
            },
            TypeUnion::Function {
                parameters: pb,
                return_type: rb,
                yield_type: yb,
            },
        ) => {
            // Return, yield, arity, and positional parameter types; names
            // are ignored.
            eql(ra, rb)
                && eql(ya, yb)
                && pa.len() == pb.len()
                && pa
                    .iter()
                    .zip(pb.iter())
                    .all(|(x, y)| eql(&x.type_def, &y.type_def))
        }
        (TypeUnion::List { item: ia }, TypeUnion::List { item: ib }) => eql(ia, ib),
        (
            TypeUnion::Map {
                key: ka,
                value: va,
            },
            TypeUnion::Map {
                key: kb,
                value: vb,
            },
        ) => eql(ka, kb) && eql(va, vb),
        (
            TypeUnion::Fiber {
                return_type: ra,
                yield_type: ya,
            },
            TypeUnion::Fiber {
                return_type: rb,
                yield_type: yb,
            },
        ) => eql(ra, rb) && eql(ya, yb),
        // Object and Enum definitions are nominal: same definition object
        // or nothing.
        (
            TypeUnion::Nominal { definition: da },
            TypeUnion::Nominal { definition: db },
        ) => da.ptr_eq(db),
        _ => false,
    }
}

/// Exact equality used for canonicalization: like `eql` but placeholders
/// only match themselves. Interning with the loose relation would collapse
/// every type into the first placeholder seen.
fn canonical_eql(a: &ObjRef, b: &ObjRef) -> bool {
    if a.ptr_eq(b) {
        return true;
    }
    let da = type_def(a);
    let db = type_def(b);
    if da.kind() == TypeKind::Placeholder || db.kind() == TypeKind::Placeholder {
        return false;
    }
    da.optional() == db.optional() && structural_eql(da, db)
}

/// Structural hash for hash-consing. Nominal payloads hash the definition
/// pointer; recursion mirrors `structural_eql`.
pub fn structural_hash(data: &TypeDefData) -> u64 {
    let mut hasher = FxHasher::default();
    hash_data(data, &mut hasher);
    hasher.finish()
}

fn hash_data(data: &TypeDefData, hasher: &mut FxHasher) {
    data.optional.hash(hasher);
    data.kind.hash(hasher);
    match &data.payload {
        None => 0u8.hash(hasher),
        Some(TypeUnion::Function {
            parameters,
            return_type,
            yield_type,
        }) => {
            1u8.hash(hasher);
            parameters.len().hash(hasher);
            for param in parameters {
                hash_ref(&param.type_def, hasher);
            }
            hash_ref(return_type, hasher);
            hash_ref(yield_type, hasher);
        }
        Some(TypeUnion::List { item }) => {
            2u8.hash(hasher);
            hash_ref(item, hasher);
        }
        Some(TypeUnion::Map { key, value }) => {
            3u8.hash(hasher);
            hash_ref(key, hasher);
            hash_ref(value, hasher);
        }
        Some(TypeUnion::Fiber {
            return_type,
            yield_type,
        }) => {
            4u8.hash(hasher);
            hash_ref(return_type, hasher);
            hash_ref(yield_type, hasher);
        }
        Some(TypeUnion::Nominal { definition }) => {
            5u8.hash(hasher);
            definition.as_ptr().hash(hasher);
        }
        Some(TypeUnion::Placeholder(_)) => {
            6u8.hash(hasher);
        }
    }
}

fn hash_ref(obj: &ObjRef, hasher: &mut FxHasher) {
    // Canonicalization makes structurally equal children pointer-equal, so
    // hashing the pointer is hashing the structure. Placeholders are never
    // canonical; hash them by identity.
    obj.as_ptr().hash(hasher);
}

/// Canonicalization table for structural TypeDefs plus the roster of every
/// placeholder ever created (checked at end of compilation).
///
/// Buckets by structural hash, scanned with exact equality: the same
/// scheme the string intern table uses. Append-only during compilation,
/// read-only afterwards. The whole table is a GC root.
pub struct TypeRegistry {
    buckets: RefCell<FxHashMap<u64, Vec<ObjRef>>>,
    placeholders: RefCell<Vec<ObjRef>>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            buckets: RefCell::new(FxHashMap::default()),
            placeholders: RefCell::new(Vec::new()),
        }
    }

    /// Whether `data` should bypass canonicalization. Nominal definitions
    /// are identity types; placeholders are each unique.
    pub fn is_nominal(data: &TypeDefData) -> bool {
        matches!(
            data.kind,
            TypeKind::Object | TypeKind::Enum | TypeKind::Placeholder
        )
    }

    /// Find the canonical TypeDef for `data`, if one exists.
    pub fn find(&self, data: &TypeDefData) -> Option<ObjRef> {
        let hash = structural_hash(data);
        let buckets = self.buckets.borrow();
        let bucket = buckets.get(&hash)?;
        // Compare against a probe by building the candidate's view lazily:
        // equality is structural on (optional, kind, payload).
        bucket
            .iter()
            .find(|candidate| {
                let def = type_def(*candidate);
                def.optional() == data.optional
                    && def.kind() == data.kind
                    && match (&def.data().payload, &data.payload) {
                        (None, None) => true,
                        (Some(a), Some(b)) => union_eql(a, b),
                        _ => false,
                    }
            })
            .copied()
    }

    /// Record a freshly allocated canonical TypeDef.
    pub fn insert(&self, obj: ObjRef) {
        let hash = structural_hash(&type_def(&obj).data());
        self.buckets.borrow_mut().entry(hash).or_default().push(obj);
    }

    /// Record a placeholder for the end-of-compilation check.
    pub fn track_placeholder(&self, obj: ObjRef) {
        self.placeholders.borrow_mut().push(obj);
    }

    /// Every placeholder still unresolved.
    pub fn unresolved(&self) -> Vec<ObjRef> {
        self.placeholders
            .borrow()
            .iter()
            .filter(|p| type_def(p).is_placeholder())
            .copied()
            .collect()
    }

    /// Collect the registry's objects as GC roots.
    pub fn gather_roots(&self, roots: &mut Vec<*const buzz_vm_gc::GcHeader>) {
        for bucket in self.buckets.borrow().values() {
            for obj in bucket {
                roots.push(obj.header_ptr());
            }
        }
        for obj in self.placeholders.borrow().iter() {
            roots.push(obj.header_ptr());
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check two TypeDefs for canonical identity. Exposed for tests.
pub fn canonically_equal(a: &ObjRef, b: &ObjRef) -> bool {
    canonical_eql(a, b)
}
