//! The runtime heap
//!
//! [`Heap`] owns the allocation registry, the string intern table, the type
//! registry, the global table, and the fiber chain: the process-wide
//! runtime context. It is passed explicitly; there are no ambient globals.
//!
//! ## Collection discipline
//!
//! The interpreter calls [`Heap::safepoint`] once per instruction, while
//! every live value is reachable from a root (fiber stacks, globals,
//! intern table, type registry, member caches, temp roots). Allocation
//! itself never collects, so multi-step constructions cannot lose
//! half-built values.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use buzz_vm_gc::{AllocationRegistry, CollectionKind, GcConfig, GcHeader, GcStats};
use rustc_hash::FxHashMap;

use buzz_vm_bytecode::FunctionProto;

use crate::containers::{ObjList, ObjMap};
use crate::error::{SourceLocation, VmError, VmResult};
use crate::fiber::ObjFiber;
use crate::object::{
    NativeFn, Obj, ObjBound, ObjClosure, ObjEnum, ObjEnumInstance, ObjFunction, ObjKind,
    ObjNative, ObjObject, ObjObjectInstance, ObjRef, ObjUpValue, ObjUserData,
};
use crate::pattern::ObjPattern;
use crate::placeholder::{PlaceholderDef, PlaceholderRelation};
use crate::string::{ObjString, StringTable};
use crate::typedef::{
    ObjTypeDef, ParameterDef, TypeDefData, TypeKind, TypeRegistry, TypeUnion,
};
use crate::value::{HashableValue, Value};

/// The runtime heap and its long-lived tables.
pub struct Heap {
    registry: AllocationRegistry,
    strings: StringTable,
    types: TypeRegistry,
    globals: RefCell<Vec<Value>>,
    global_names: RefCell<FxHashMap<String, u16>>,
    current_fiber: Cell<Option<ObjRef>>,
    /// Runtime native-member wrappers, keyed by (receiver kind, interned name)
    member_cache: RefCell<FxHashMap<(ObjKind, ObjRef), ObjRef>>,
    /// Compile-time member signatures, keyed by (receiver type, interned name)
    member_def_cache: RefCell<FxHashMap<(ObjRef, ObjRef), ObjRef>>,
    /// Values kept alive across multi-step host constructions
    temp_roots: RefCell<Vec<Value>>,
}

impl Heap {
    /// Create a heap with the default GC configuration.
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    /// Create a heap with a custom GC configuration.
    pub fn with_config(config: GcConfig) -> Self {
        Self {
            registry: AllocationRegistry::with_config(config),
            strings: StringTable::new(),
            types: TypeRegistry::new(),
            globals: RefCell::new(Vec::new()),
            global_names: RefCell::new(FxHashMap::default()),
            current_fiber: Cell::new(None),
            member_cache: RefCell::new(FxHashMap::default()),
            member_def_cache: RefCell::new(FxHashMap::default()),
            temp_roots: RefCell::new(Vec::new()),
        }
    }

    /// GC statistics snapshot.
    pub fn gc_stats(&self) -> GcStats {
        self.registry.stats()
    }

    /// Number of live heap objects.
    pub fn object_count(&self) -> usize {
        self.registry.allocation_count()
    }

    /// The string intern table.
    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    // ---- Collection -------------------------------------------------------

    /// Run a collection if a threshold was crossed. Called by the
    /// interpreter between instructions, when all values are rooted.
    pub fn safepoint(&self) {
        match self.registry.should_collect() {
            Some(CollectionKind::Young) => {
                self.registry.collect_young(&self.gather_roots());
            }
            Some(CollectionKind::Full) => {
                self.registry.collect(&self.gather_roots());
            }
            None => {}
        }
    }

    /// Force a full collection.
    pub fn collect_now(&self) -> usize {
        self.registry.collect(&self.gather_roots())
    }

    /// Force a young collection.
    pub fn collect_young_now(&self) -> usize {
        self.registry.collect_young(&self.gather_roots())
    }

    fn gather_roots(&self) -> Vec<*const GcHeader> {
        let mut roots = Vec::new();

        // The active fiber chain: tracing a fiber reaches its parent, so
        // rooting the current fiber covers the whole chain.
        if let Some(fiber) = self.current_fiber.get() {
            roots.push(fiber.header_ptr());
        }

        for value in self.globals.borrow().iter() {
            if let Value::Obj(obj) = value {
                roots.push(obj.header_ptr());
            }
        }

        self.strings.gather_roots(&mut roots);
        self.types.gather_roots(&mut roots);

        for ((_, name), native) in self.member_cache.borrow().iter() {
            roots.push(name.header_ptr());
            roots.push(native.header_ptr());
        }
        for ((receiver, name), def) in self.member_def_cache.borrow().iter() {
            roots.push(receiver.header_ptr());
            roots.push(name.header_ptr());
            roots.push(def.header_ptr());
        }

        for value in self.temp_roots.borrow().iter() {
            if let Value::Obj(obj) = value {
                roots.push(obj.header_ptr());
            }
        }

        roots
    }

    /// Keep a value alive across host-side construction steps.
    pub fn push_temp_root(&self, value: Value) {
        self.temp_roots.borrow_mut().push(value);
    }

    /// Release the most recent temp root.
    pub fn pop_temp_root(&self) {
        self.temp_roots.borrow_mut().pop();
    }

    /// Write barrier: `parent` gained or changed an outgoing reference.
    pub fn barrier(&self, parent: ObjRef) {
        self.registry.mark_dirty(parent.header_ptr());
    }

    fn alloc(&self, obj: Obj) -> ObjRef {
        self.registry.alloc(obj)
    }

    // ---- Strings ----------------------------------------------------------

    /// Intern a string: at most one String object exists per byte sequence.
    pub fn intern(&self, s: &str) -> ObjRef {
        if let Some(existing) = self.strings.find(s) {
            return existing;
        }
        let obj = self.alloc(Obj::String(ObjString::new(s)));
        self.strings.insert(obj);
        obj
    }

    /// Intern and wrap as a value.
    pub fn string_value(&self, s: &str) -> Value {
        Value::Obj(self.intern(s))
    }

    // ---- Globals ----------------------------------------------------------

    /// Define (or find) the global slot for `name`.
    pub fn define_global(&self, name: &str) -> u16 {
        if let Some(&slot) = self.global_names.borrow().get(name) {
            return slot;
        }
        let mut globals = self.globals.borrow_mut();
        let slot = globals.len() as u16;
        globals.push(Value::Null);
        self.global_names
            .borrow_mut()
            .insert(name.to_string(), slot);
        slot
    }

    /// Slot of an already-defined global.
    pub fn global_slot(&self, name: &str) -> Option<u16> {
        self.global_names.borrow().get(name).copied()
    }

    /// Read a global slot.
    pub fn get_global(&self, slot: u16) -> Option<Value> {
        self.globals.borrow().get(slot as usize).copied()
    }

    /// Write a global slot.
    pub fn set_global(&self, slot: u16, value: Value) {
        let mut globals = self.globals.borrow_mut();
        if (slot as usize) < globals.len() {
            globals[slot as usize] = value;
        }
    }

    // ---- Fiber chain ------------------------------------------------------

    /// The fiber currently on the execution path.
    pub fn current_fiber(&self) -> Option<ObjRef> {
        self.current_fiber.get()
    }

    /// Switch the active fiber.
    pub fn set_current_fiber(&self, fiber: Option<ObjRef>) {
        self.current_fiber.set(fiber);
    }

    // ---- Object constructors ----------------------------------------------

    /// Allocate a list.
    pub fn alloc_list(&self, items: Vec<Value>, item_type: ObjRef) -> ObjRef {
        self.alloc(Obj::List(ObjList::new(items, item_type)))
    }

    /// Allocate an empty map.
    pub fn alloc_map(&self, key_type: ObjRef, value_type: ObjRef) -> ObjRef {
        self.alloc(Obj::Map(ObjMap::new(key_type, value_type)))
    }

    /// Allocate a pattern, compiling its source.
    pub fn alloc_pattern(
        &self,
        source: &str,
        location: SourceLocation,
    ) -> VmResult<ObjRef> {
        let pattern = ObjPattern::new(source, location)?;
        Ok(self.alloc(Obj::Pattern(pattern)))
    }

    /// Allocate a function object for a compiled prototype.
    pub fn alloc_function(
        &self,
        proto: Rc<FunctionProto>,
        type_def: Option<ObjRef>,
    ) -> ObjRef {
        self.alloc(Obj::Function(ObjFunction { proto, type_def }))
    }

    /// Allocate a closure.
    pub fn alloc_closure(&self, function: ObjRef, upvalues: Vec<ObjRef>) -> ObjRef {
        self.alloc(Obj::Closure(ObjClosure { function, upvalues }))
    }

    /// Allocate an open upvalue into `fiber`'s stack.
    pub fn alloc_upvalue(&self, fiber: ObjRef, slot: usize) -> ObjRef {
        self.alloc(Obj::UpValue(ObjUpValue::open(fiber, slot)))
    }

    /// Allocate an object (class) definition.
    pub fn alloc_object(&self, name: ObjRef, super_class: Option<ObjRef>) -> ObjRef {
        let object = self.alloc(Obj::Object(ObjObject::new(name, super_class)));
        let type_def = self.intern_type(TypeDefData {
            optional: false,
            kind: TypeKind::Object,
            payload: Some(TypeUnion::Nominal { definition: object }),
        });
        object
            .as_object()
            .expect("object definition")
            .type_def
            .set(Some(type_def));
        object
    }

    /// Allocate an instance of an object definition.
    ///
    /// Every instance keeps a live reference to its class; that link is
    /// what keeps a class from being swept while instances remain.
    pub fn alloc_instance(&self, class: ObjRef) -> ObjRef {
        debug_assert!(class.as_object().is_some(), "instanciating a non-class");
        let instance = self.alloc(Obj::ObjectInstance(ObjObjectInstance::new(class)));
        debug_assert!(instance
            .as_instance()
            .map(|i| i.class.ptr_eq(&class))
            .unwrap_or(false));
        instance
    }

    /// Allocate an enum definition.
    pub fn alloc_enum(
        &self,
        name: ObjRef,
        case_names: Vec<ObjRef>,
        case_values: Vec<Value>,
    ) -> ObjRef {
        let enum_def = self.alloc(Obj::Enum(ObjEnum {
            name,
            case_names,
            case_values,
            type_def: Cell::new(None),
        }));
        let type_def = self.intern_type(TypeDefData {
            optional: false,
            kind: TypeKind::Enum,
            payload: Some(TypeUnion::Nominal {
                definition: enum_def,
            }),
        });
        enum_def
            .as_enum()
            .expect("enum definition")
            .type_def
            .set(Some(type_def));
        enum_def
    }

    /// Allocate an enum case instance.
    pub fn alloc_enum_instance(&self, enum_ref: ObjRef, case: u8) -> ObjRef {
        self.alloc(Obj::EnumInstance(ObjEnumInstance { enum_ref, case }))
    }

    /// Allocate a bound method.
    pub fn alloc_bound(&self, receiver: Value, callable: Value) -> ObjRef {
        self.alloc(Obj::Bound(ObjBound { receiver, callable }))
    }

    /// Allocate a native function wrapper.
    pub fn alloc_native(&self, name: &str, function: NativeFn) -> ObjRef {
        self.alloc(Obj::Native(ObjNative {
            name: name.to_string(),
            function,
        }))
    }

    /// Allocate host data.
    pub fn alloc_user_data(&self, data: Rc<dyn std::any::Any>) -> ObjRef {
        self.alloc(Obj::UserData(ObjUserData { data }))
    }

    /// Allocate a fiber around an entry closure and its arguments.
    pub fn alloc_fiber(&self, entry: Value, args: Vec<Value>) -> ObjRef {
        self.alloc(Obj::Fiber(ObjFiber::new(entry, args)))
    }

    // ---- Tracked mutations (write barriers) -------------------------------

    /// Set an instance field, firing the dirty barrier.
    pub fn instance_set_field(&self, instance: ObjRef, name: ObjRef, value: Value) {
        if let Some(inner) = instance.as_instance() {
            inner.fields.borrow_mut().insert(name, value);
            self.barrier(instance);
        }
    }

    /// Add a method to a class, firing the dirty barrier.
    pub fn object_set_method(&self, class: ObjRef, name: ObjRef, method: Value) {
        if let Some(object) = class.as_object() {
            object.methods.borrow_mut().insert(name, method);
            self.barrier(class);
        }
    }

    /// Set a class static field, firing the dirty barrier.
    pub fn object_set_static(&self, class: ObjRef, name: ObjRef, value: Value) {
        if let Some(object) = class.as_object() {
            object.static_fields.borrow_mut().insert(name, value);
            self.barrier(class);
        }
    }

    /// Declare an instance field default, firing the dirty barrier.
    pub fn object_set_field_default(&self, class: ObjRef, name: ObjRef, value: Value) {
        if let Some(object) = class.as_object() {
            object.field_defaults.borrow_mut().insert(name, value);
            self.barrier(class);
        }
    }

    /// Declare a member's static type, firing the dirty barrier.
    pub fn object_set_member_type(&self, class: ObjRef, name: ObjRef, ty: ObjRef) {
        if let Some(object) = class.as_object() {
            object.member_types.borrow_mut().insert(name, ty);
            self.barrier(class);
        }
    }

    /// Append to a list, firing the dirty barrier.
    pub fn list_append(&self, list: ObjRef, value: Value) {
        if let Some(inner) = list.as_list() {
            inner.append(value);
            self.barrier(list);
        }
    }

    /// Set a list element, firing the dirty barrier.
    pub fn list_set(&self, list: ObjRef, index: usize, value: Value) -> bool {
        match list.as_list() {
            Some(inner) if inner.set(index, value) => {
                self.barrier(list);
                true
            }
            _ => false,
        }
    }

    /// Remove a list element, firing the dirty barrier.
    pub fn list_remove(&self, list: ObjRef, index: usize) -> Option<Value> {
        let removed = list.as_list()?.remove(index);
        if removed.is_some() {
            self.barrier(list);
        }
        removed
    }

    /// Set a map entry, firing the dirty barrier.
    pub fn map_set(&self, map: ObjRef, key: HashableValue, value: Value) {
        if let Some(inner) = map.as_map() {
            inner.data.borrow_mut().set(key, value);
            self.barrier(map);
        }
    }

    /// Remove a map entry, firing the dirty barrier.
    pub fn map_remove(&self, map: ObjRef, key: &HashableValue) -> Option<Value> {
        let removed = map.as_map()?.data.borrow_mut().remove(key);
        if removed.is_some() {
            self.barrier(map);
        }
        removed
    }

    /// Close an upvalue, firing the dirty barrier (the capture moves into
    /// the upvalue object itself).
    pub fn close_upvalue(&self, upvalue: ObjRef) {
        if let Some(inner) = upvalue.as_upvalue() {
            inner.close();
            self.barrier(upvalue);
        }
    }

    // ---- Types ------------------------------------------------------------

    /// Canonicalize a structural type, or allocate a nominal/placeholder
    /// one. Two lookups of equal structure return the same object.
    pub fn intern_type(&self, data: TypeDefData) -> ObjRef {
        if TypeRegistry::is_nominal(&data) {
            let is_placeholder = data.kind == TypeKind::Placeholder;
            let obj = self.alloc(Obj::Type(ObjTypeDef::new(data)));
            if is_placeholder {
                self.types.track_placeholder(obj);
            }
            return obj;
        }
        if let Some(existing) = self.types.find(&data) {
            return existing;
        }
        let obj = self.alloc(Obj::Type(ObjTypeDef::new(data)));
        self.types.insert(obj);
        obj
    }

    /// A payload-free type.
    pub fn type_basic(&self, kind: TypeKind, optional: bool) -> ObjRef {
        self.intern_type(TypeDefData::basic(kind, optional))
    }

    /// `[item]`
    pub fn type_list(&self, item: ObjRef, optional: bool) -> ObjRef {
        self.intern_type(TypeDefData {
            optional,
            kind: TypeKind::List,
            payload: Some(TypeUnion::List { item }),
        })
    }

    /// `{key: value}`
    pub fn type_map(&self, key: ObjRef, value: ObjRef, optional: bool) -> ObjRef {
        self.intern_type(TypeDefData {
            optional,
            kind: TypeKind::Map,
            payload: Some(TypeUnion::Map { key, value }),
        })
    }

    /// `fib<return, yield>`
    pub fn type_fiber(&self, return_type: ObjRef, yield_type: ObjRef) -> ObjRef {
        self.intern_type(TypeDefData {
            optional: false,
            kind: TypeKind::Fiber,
            payload: Some(TypeUnion::Fiber {
                return_type,
                yield_type,
            }),
        })
    }

    /// A function signature.
    pub fn type_function(
        &self,
        parameters: Vec<ParameterDef>,
        return_type: ObjRef,
        yield_type: ObjRef,
    ) -> ObjRef {
        self.intern_type(TypeDefData {
            optional: false,
            kind: TypeKind::Function,
            payload: Some(TypeUnion::Function {
                parameters,
                return_type,
                yield_type,
            }),
        })
    }

    /// The instance type of a nominal definition.
    pub fn type_instance_of(&self, definition: ObjRef, optional: bool) -> ObjRef {
        let kind = match &*definition {
            Obj::Enum(_) => TypeKind::EnumInstance,
            _ => TypeKind::ObjectInstance,
        };
        self.intern_type(TypeDefData {
            optional,
            kind,
            payload: Some(TypeUnion::Nominal { definition }),
        })
    }

    /// The static type of a runtime value.
    pub fn type_of_value(&self, value: &Value) -> ObjRef {
        match value {
            Value::Null => self.type_basic(TypeKind::Void, true),
            Value::Boolean(_) => self.type_basic(TypeKind::Bool, false),
            Value::Integer(_) | Value::Float(_) => self.type_basic(TypeKind::Number, false),
            Value::Obj(obj) => match &**obj {
                Obj::String(_) => self.type_basic(TypeKind::String, false),
                Obj::Pattern(_) => self.type_basic(TypeKind::Pattern, false),
                Obj::Type(_) | Obj::Object(_) | Obj::Enum(_) => {
                    self.type_basic(TypeKind::Type, false)
                }
                Obj::UserData(_) => self.type_basic(TypeKind::UserData, false),
                Obj::List(list) => self.type_list(list.item_type, false),
                Obj::Map(map) => self.type_map(map.key_type, map.value_type, false),
                Obj::ObjectInstance(instance) => self.type_instance_of(instance.class, false),
                Obj::EnumInstance(instance) => {
                    self.type_instance_of(instance.enum_ref, false)
                }
                Obj::Function(function) => function
                    .type_def
                    .unwrap_or_else(|| self.type_basic(TypeKind::Function, false)),
                Obj::Closure(closure) => closure
                    .function
                    .as_function()
                    .and_then(|f| f.type_def)
                    .unwrap_or_else(|| self.type_basic(TypeKind::Function, false)),
                Obj::Bound(bound) => self.type_of_value(&bound.callable),
                Obj::Native(_) => self.type_basic(TypeKind::Function, false),
                Obj::Fiber(_) => self.type_basic(TypeKind::Fiber, false),
                Obj::UpValue(upvalue) => self.type_of_value(&upvalue.read()),
            },
        }
    }

    // ---- Placeholders -----------------------------------------------------

    /// Create a placeholder TypeDef for an unresolved name.
    pub fn placeholder_type(
        &self,
        name: Option<String>,
        location: SourceLocation,
    ) -> ObjRef {
        self.intern_type(TypeDefData {
            optional: false,
            kind: TypeKind::Placeholder,
            payload: Some(TypeUnion::Placeholder(PlaceholderDef::new(name, location))),
        })
    }

    /// Record a derivation edge between two placeholders.
    ///
    /// Both must be placeholders; the first edge wins (a child's parent is
    /// never rewritten) and self-links are ignored, which keeps the
    /// parent chain acyclic.
    pub fn link_placeholders(
        &self,
        parent: ObjRef,
        child: ObjRef,
        relation: PlaceholderRelation,
    ) {
        if parent.ptr_eq(&child) {
            return;
        }
        let (Some(parent_ty), Some(child_ty)) = (parent.as_type(), child.as_type()) else {
            return;
        };
        if !parent_ty.is_placeholder() || !child_ty.is_placeholder() {
            return;
        }
        let already_linked = child_ty
            .with_placeholder(|p| p.parent.get().is_some())
            .unwrap_or(true);
        if already_linked {
            return;
        }
        child_ty.with_placeholder(|p| {
            p.parent.set(Some(parent));
            p.parent_relation.set(Some(relation));
        });
        parent_ty.with_placeholder(|p| p.children.borrow_mut().push(child));
        self.barrier(parent);
        self.barrier(child);
    }

    /// Substitute the real definition for a placeholder and re-evaluate its
    /// children transitively.
    pub fn resolve_placeholder(&self, placeholder: ObjRef, resolved: ObjRef) -> VmResult<()> {
        let Some(ty) = placeholder.as_type() else {
            return Err(VmError::internal("resolving a non-type object"));
        };
        if !ty.is_placeholder() {
            return Ok(());
        }
        let children = ty
            .with_placeholder(|p| p.children.borrow().clone())
            .unwrap_or_default();

        ty.replace(self.clone_type_data(&resolved));
        self.barrier(placeholder);

        for child in children {
            let target = self.derive_relation(&child, &resolved)?;
            self.resolve_placeholder(child, target)?;
        }
        Ok(())
    }

    /// Fail compilation if any placeholder never resolved, naming the
    /// original source location.
    pub fn ensure_resolved(&self) -> VmResult<()> {
        if let Some(unresolved) = self.types.unresolved().into_iter().next() {
            let ty = unresolved.as_type().expect("placeholder type");
            let (name, location) = ty
                .with_placeholder(|p| (p.display_name().to_string(), p.location.clone()))
                .expect("placeholder payload");
            return Err(VmError::compile(
                format!("unresolved reference to '{name}'"),
                location,
            ));
        }
        Ok(())
    }

    /// Compute the type a child placeholder resolves to, given its relation
    /// to a freshly resolved parent.
    fn derive_relation(&self, child: &ObjRef, resolved: &ObjRef) -> VmResult<ObjRef> {
        let child_ty = child.as_type().expect("placeholder child");
        let (relation, child_name, location) = child_ty
            .with_placeholder(|p| {
                (
                    p.parent_relation.get(),
                    p.name.clone(),
                    p.location.clone(),
                )
            })
            .ok_or_else(|| VmError::internal("child is not a placeholder"))?;
        let relation = relation.unwrap_or(PlaceholderRelation::Assignment);
        let resolved_ty = resolved.as_type().expect("resolved type");
        let data = resolved_ty.data();

        let err = |what: &str| {
            VmError::compile(
                format!("type {:?} {what}", data.kind),
                location.clone(),
            )
        };

        match relation {
            PlaceholderRelation::Assignment => Ok(*resolved),
            PlaceholderRelation::Call => match &data.payload {
                Some(TypeUnion::Function { return_type, .. }) => Ok(*return_type),
                Some(TypeUnion::Fiber { return_type, .. }) => Ok(*return_type),
                _ => Err(err("cannot be called")),
            },
            PlaceholderRelation::Yield => match &data.payload {
                Some(TypeUnion::Function { yield_type, .. })
                | Some(TypeUnion::Fiber { yield_type, .. }) => Ok(*yield_type),
                _ => Err(err("cannot yield")),
            },
            PlaceholderRelation::Subscript => match &data.payload {
                Some(TypeUnion::List { item }) => Ok(*item),
                Some(TypeUnion::Map { value, .. }) => Ok(*value),
                _ if data.kind == TypeKind::String => {
                    Ok(self.type_basic(TypeKind::String, false))
                }
                _ => Err(err("cannot be subscripted")),
            },
            PlaceholderRelation::Key => match &data.payload {
                Some(TypeUnion::Map { key, .. }) => Ok(*key),
                _ => Err(err("has no keys")),
            },
            PlaceholderRelation::FieldAccess | PlaceholderRelation::SuperFieldAccess => {
                let Some(TypeUnion::Nominal { definition }) = &data.payload else {
                    return Err(err("has no members"));
                };
                let Some(field) = child_name else {
                    return Err(err("member access needs a name"));
                };
                let name = self.intern(&field);
                if let Some(object) = definition.as_object() {
                    object.lookup_member_type(&name).ok_or_else(|| {
                        VmError::compile(
                            format!("unknown member '{field}'"),
                            location.clone(),
                        )
                    })
                } else if definition.as_enum().is_some() {
                    // Accessing an enum case yields an instance of the enum.
                    Ok(self.type_instance_of(*definition, false))
                } else {
                    Err(err("has no members"))
                }
            }
            PlaceholderRelation::Instance => match &data.payload {
                Some(TypeUnion::Nominal { definition }) => {
                    Ok(self.type_instance_of(*definition, false))
                }
                _ => Err(err("cannot be instanciated")),
            },
            PlaceholderRelation::Optional => Ok(self.clone_with_optional(resolved, true)),
            PlaceholderRelation::Unwrap => Ok(self.clone_with_optional(resolved, false)),
        }
    }

    /// Clone a resolved type's data (placeholder payloads never get here).
    fn clone_type_data(&self, source: &ObjRef) -> TypeDefData {
        let ty = source.as_type().expect("type object");
        let data = ty.data();
        TypeDefData {
            optional: data.optional,
            kind: data.kind,
            payload: data.payload.as_ref().map(clone_payload),
        }
    }

    /// The same type with a different `optional` flag, canonicalized.
    pub fn clone_with_optional(&self, source: &ObjRef, optional: bool) -> ObjRef {
        let mut data = self.clone_type_data(source);
        data.optional = optional;
        self.intern_type(data)
    }

    // ---- Member caches ----------------------------------------------------

    /// Look up a cached native-member wrapper.
    pub fn cached_member(&self, kind: ObjKind, name: ObjRef) -> Option<ObjRef> {
        self.member_cache.borrow().get(&(kind, name)).copied()
    }

    /// Cache a native-member wrapper.
    pub fn cache_member(&self, kind: ObjKind, name: ObjRef, native: ObjRef) {
        self.member_cache.borrow_mut().insert((kind, name), native);
    }

    /// Look up a cached member signature.
    pub fn cached_member_def(&self, receiver: ObjRef, name: ObjRef) -> Option<ObjRef> {
        self.member_def_cache
            .borrow()
            .get(&(receiver, name))
            .copied()
    }

    /// Cache a member signature.
    pub fn cache_member_def(&self, receiver: ObjRef, name: ObjRef, def: ObjRef) {
        self.member_def_cache
            .borrow_mut()
            .insert((receiver, name), def);
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn clone_payload(payload: &TypeUnion) -> TypeUnion {
    match payload {
        TypeUnion::Function {
            parameters,
            return_type,
            yield_type,
        } => TypeUnion::Function {
            parameters: parameters.clone(),
            return_type: *return_type,
            yield_type: *yield_type,
        },
        TypeUnion::List { item } => TypeUnion::List { item: *item },
        TypeUnion::Map { key, value } => TypeUnion::Map {
            key: *key,
            value: *value,
        },
        TypeUnion::Fiber {
            return_type,
            yield_type,
        } => TypeUnion::Fiber {
            return_type: *return_type,
            yield_type: *yield_type,
        },
        TypeUnion::Nominal { definition } => TypeUnion::Nominal {
            definition: *definition,
        },
        TypeUnion::Placeholder(def) => TypeUnion::Placeholder(PlaceholderDef::new(
            def.name.clone(),
            def.location.clone(),
        )),
    }
}
