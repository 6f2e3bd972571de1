//! The heap object model
//!
//! Every heap value is one variant of the [`Obj`] sum. Dispatch (tracing,
//! equality, type tests, rendering) is a static `match` on the tag; there
//! are no trait objects at the language level.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use buzz_vm_gc::{Gc, GcHeader, GcTraceable};
use rustc_hash::FxHashMap;

use buzz_vm_bytecode::FunctionProto;

use crate::containers::{ObjList, ObjMap};
use crate::fiber::ObjFiber;
use crate::pattern::ObjPattern;
use crate::string::ObjString;
use crate::typedef::{self, ObjTypeDef, TypeKind, TypeUnion};
use crate::value::Value;

/// A pointer to a heap object.
pub type ObjRef = Gc<Obj>;

/// A host-native function, following the host library contract: it
/// manipulates the VM's current fiber stack directly and returns `-1`
/// (error value on the stack), `0` (no value pushed), or `N > 0` (N values
/// pushed).
pub type NativeFn = fn(&mut crate::vm::Vm) -> i32;

/// Object kind tags, stored in the GC header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjKind {
    /// Interned string
    String = 0,
    /// Compiled pattern
    Pattern,
    /// Type descriptor
    Type,
    /// Closure capture slot
    UpValue,
    /// Function + captured upvalues
    Closure,
    /// Compiled function
    Function,
    /// Object (class) definition
    Object,
    /// Instance of an object definition
    ObjectInstance,
    /// Ordered value sequence
    List,
    /// Insertion-ordered map
    Map,
    /// Enum definition
    Enum,
    /// Instance of an enum case
    EnumInstance,
    /// Receiver + callable pair
    Bound,
    /// Host-native function
    Native,
    /// Opaque host data
    UserData,
    /// Cooperative coroutine
    Fiber,
}

/// A compiled function.
#[derive(Debug)]
pub struct ObjFunction {
    /// The compiled prototype (shared with the chunk's constant pool)
    pub proto: Rc<FunctionProto>,
    /// Declared signature, when the front-end provided one
    pub type_def: Option<ObjRef>,
}

impl ObjFunction {
    /// Function name for stack traces.
    pub fn name(&self) -> &str {
        &self.proto.name
    }
}

/// A function bundled with its captured upvalues.
#[derive(Debug)]
pub struct ObjClosure {
    /// The `Obj::Function` this closure executes
    pub function: ObjRef,
    /// Captured upvalues, indexed by the chunk's upvalue operands
    pub upvalues: Vec<ObjRef>,
}

/// Where an upvalue's value currently lives.
#[derive(Debug)]
pub enum UpvalueState {
    /// Still on a fiber stack
    Open {
        /// The fiber whose stack holds the slot
        fiber: ObjRef,
        /// Absolute stack slot
        slot: usize,
    },
    /// Captured into the upvalue itself after the frame returned
    Closed(Value),
}

/// A capture slot referenced by one or more closures. The transition
/// open → closed is monotonic.
#[derive(Debug)]
pub struct ObjUpValue {
    state: RefCell<UpvalueState>,
}

impl ObjUpValue {
    /// Create an open upvalue pointing at a live stack slot.
    pub fn open(fiber: ObjRef, slot: usize) -> Self {
        Self {
            state: RefCell::new(UpvalueState::Open { fiber, slot }),
        }
    }

    /// The stack slot if still open.
    pub fn open_slot(&self) -> Option<usize> {
        match &*self.state.borrow() {
            UpvalueState::Open { slot, .. } => Some(*slot),
            UpvalueState::Closed(_) => None,
        }
    }

    /// Read through the upvalue.
    pub fn read(&self) -> Value {
        match &*self.state.borrow() {
            UpvalueState::Open { fiber, slot } => fiber
                .as_fiber()
                .expect("upvalue fiber")
                .slot(*slot),
            UpvalueState::Closed(value) => *value,
        }
    }

    /// Write through the upvalue.
    pub fn write(&self, value: Value) {
        let mut state = self.state.borrow_mut();
        match &mut *state {
            UpvalueState::Open { fiber, slot } => {
                fiber
                    .as_fiber()
                    .expect("upvalue fiber")
                    .set_slot(*slot, value);
            }
            UpvalueState::Closed(slot) => *slot = value,
        }
    }

    /// Capture the current stack value and detach from the stack.
    pub fn close(&self) {
        let value = self.read();
        *self.state.borrow_mut() = UpvalueState::Closed(value);
    }

    /// Whether the upvalue has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(&*self.state.borrow(), UpvalueState::Closed(_))
    }
}

/// An object (class) definition. Nominal: two definitions with identical
/// shape are distinct types.
#[derive(Debug)]
pub struct ObjObject {
    /// Class name (interned string)
    pub name: ObjRef,
    /// Superclass definition, if any. The chain is acyclic.
    pub super_class: Option<ObjRef>,
    /// Methods by interned name
    pub methods: RefCell<FxHashMap<ObjRef, Value>>,
    /// Instance field defaults by interned name
    pub field_defaults: RefCell<FxHashMap<ObjRef, Value>>,
    /// Static fields by interned name
    pub static_fields: RefCell<FxHashMap<ObjRef, Value>>,
    /// Declared member types by interned name (drives field-access
    /// placeholder resolution)
    pub member_types: RefCell<FxHashMap<ObjRef, ObjRef>>,
    /// This definition's TypeDef, set right after allocation (the two
    /// objects reference each other)
    pub type_def: Cell<Option<ObjRef>>,
}

impl ObjObject {
    /// Create an empty definition.
    pub fn new(name: ObjRef, super_class: Option<ObjRef>) -> Self {
        Self {
            name,
            super_class,
            methods: RefCell::new(FxHashMap::default()),
            field_defaults: RefCell::new(FxHashMap::default()),
            static_fields: RefCell::new(FxHashMap::default()),
            member_types: RefCell::new(FxHashMap::default()),
            type_def: Cell::new(None),
        }
    }

    /// Look up a method, walking the super chain.
    pub fn lookup_method(&self, name: &ObjRef) -> Option<Value> {
        if let Some(method) = self.methods.borrow().get(name) {
            return Some(*method);
        }
        self.super_class
            .as_ref()
            .and_then(|sup| sup.as_object()?.lookup_method(name))
    }

    /// Look up a declared member type, walking the super chain.
    pub fn lookup_member_type(&self, name: &ObjRef) -> Option<ObjRef> {
        if let Some(ty) = self.member_types.borrow().get(name) {
            return Some(*ty);
        }
        self.super_class
            .as_ref()
            .and_then(|sup| sup.as_object()?.lookup_member_type(name))
    }

    /// Whether `ancestor` is this definition or one of its supers.
    pub fn is_subclass_of(&self, self_ref: &ObjRef, ancestor: &ObjRef) -> bool {
        if self_ref.ptr_eq(ancestor) {
            return true;
        }
        let mut current = self.super_class;
        while let Some(class) = current {
            if class.ptr_eq(ancestor) {
                return true;
            }
            current = class.as_object().and_then(|o| o.super_class);
        }
        false
    }
}

/// An instance of an object definition. Fields are keyed by interned
/// string pointers.
#[derive(Debug)]
pub struct ObjObjectInstance {
    /// The definition this is an instance of. Every instance keeps this
    /// link alive so a class is never swept before its instances.
    pub class: ObjRef,
    /// Instance fields by interned name
    pub fields: RefCell<FxHashMap<ObjRef, Value>>,
}

impl ObjObjectInstance {
    /// Instantiate with the class's field defaults.
    pub fn new(class: ObjRef) -> Self {
        let defaults = class
            .as_object()
            .map(|def| def.field_defaults.borrow().clone())
            .unwrap_or_default();
        Self {
            class,
            fields: RefCell::new(defaults),
        }
    }

    /// Field read: instance fields, then class methods, then the super
    /// chain.
    pub fn lookup(&self, name: &ObjRef) -> Option<Value> {
        if let Some(field) = self.fields.borrow().get(name) {
            return Some(*field);
        }
        self.class.as_object()?.lookup_method(name)
    }
}

/// An enum definition. Nominal, like object definitions.
#[derive(Debug)]
pub struct ObjEnum {
    /// Enum name (interned string)
    pub name: ObjRef,
    /// Case names, in declaration order (interned strings)
    pub case_names: Vec<ObjRef>,
    /// Case payload values, parallel to `case_names`
    pub case_values: Vec<Value>,
    /// This definition's TypeDef
    pub type_def: Cell<Option<ObjRef>>,
}

/// An enum case instance: `(enum, case index)`.
#[derive(Debug)]
pub struct ObjEnumInstance {
    /// The enum definition
    pub enum_ref: ObjRef,
    /// Case index
    pub case: u8,
}

/// A method read off an instance: receiver plus the callable to invoke.
/// Calling a bound value prepends the receiver to the argument slots.
#[derive(Debug)]
pub struct ObjBound {
    /// The receiver captured at member-read time
    pub receiver: Value,
    /// An `Obj::Closure` or `Obj::Native` value
    pub callable: Value,
}

/// A host-native function wrapper.
pub struct ObjNative {
    /// Name, for rendering and traces
    pub name: String,
    /// The function pointer
    pub function: NativeFn,
}

impl std::fmt::Debug for ObjNative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjNative({})", self.name)
    }
}

/// Opaque host data handed through the VM untouched.
pub struct ObjUserData {
    /// The host payload
    pub data: Rc<dyn std::any::Any>,
}

impl std::fmt::Debug for ObjUserData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ObjUserData")
    }
}

/// A heap object: one of sixteen kinds.
#[derive(Debug)]
pub enum Obj {
    /// Interned string
    String(ObjString),
    /// Compiled pattern
    Pattern(ObjPattern),
    /// Type descriptor
    Type(ObjTypeDef),
    /// Closure capture slot
    UpValue(ObjUpValue),
    /// Function + upvalues
    Closure(ObjClosure),
    /// Compiled function
    Function(ObjFunction),
    /// Object definition
    Object(ObjObject),
    /// Object instance
    ObjectInstance(ObjObjectInstance),
    /// List
    List(ObjList),
    /// Map
    Map(ObjMap),
    /// Enum definition
    Enum(ObjEnum),
    /// Enum case instance
    EnumInstance(ObjEnumInstance),
    /// Bound method
    Bound(ObjBound),
    /// Native function
    Native(ObjNative),
    /// Host data
    UserData(ObjUserData),
    /// Fiber
    Fiber(ObjFiber),
}

impl Obj {
    /// The object's kind tag.
    pub fn kind(&self) -> ObjKind {
        match self {
            Obj::String(_) => ObjKind::String,
            Obj::Pattern(_) => ObjKind::Pattern,
            Obj::Type(_) => ObjKind::Type,
            Obj::UpValue(_) => ObjKind::UpValue,
            Obj::Closure(_) => ObjKind::Closure,
            Obj::Function(_) => ObjKind::Function,
            Obj::Object(_) => ObjKind::Object,
            Obj::ObjectInstance(_) => ObjKind::ObjectInstance,
            Obj::List(_) => ObjKind::List,
            Obj::Map(_) => ObjKind::Map,
            Obj::Enum(_) => ObjKind::Enum,
            Obj::EnumInstance(_) => ObjKind::EnumInstance,
            Obj::Bound(_) => ObjKind::Bound,
            Obj::Native(_) => ObjKind::Native,
            Obj::UserData(_) => ObjKind::UserData,
            Obj::Fiber(_) => ObjKind::Fiber,
        }
    }

    // ---- Accessors --------------------------------------------------------

    /// As a string payload.
    pub fn as_string(&self) -> Option<&ObjString> {
        match self {
            Obj::String(s) => Some(s),
            _ => None,
        }
    }

    /// As a pattern payload.
    pub fn as_pattern(&self) -> Option<&ObjPattern> {
        match self {
            Obj::Pattern(p) => Some(p),
            _ => None,
        }
    }

    /// As a type payload.
    pub fn as_type(&self) -> Option<&ObjTypeDef> {
        match self {
            Obj::Type(t) => Some(t),
            _ => None,
        }
    }

    /// As an upvalue payload.
    pub fn as_upvalue(&self) -> Option<&ObjUpValue> {
        match self {
            Obj::UpValue(u) => Some(u),
            _ => None,
        }
    }

    /// As a closure payload.
    pub fn as_closure(&self) -> Option<&ObjClosure> {
        match self {
            Obj::Closure(c) => Some(c),
            _ => None,
        }
    }

    /// As a function payload.
    pub fn as_function(&self) -> Option<&ObjFunction> {
        match self {
            Obj::Function(f) => Some(f),
            _ => None,
        }
    }

    /// As an object-definition payload.
    pub fn as_object(&self) -> Option<&ObjObject> {
        match self {
            Obj::Object(o) => Some(o),
            _ => None,
        }
    }

    /// As an instance payload.
    pub fn as_instance(&self) -> Option<&ObjObjectInstance> {
        match self {
            Obj::ObjectInstance(i) => Some(i),
            _ => None,
        }
    }

    /// As a list payload.
    pub fn as_list(&self) -> Option<&ObjList> {
        match self {
            Obj::List(l) => Some(l),
            _ => None,
        }
    }

    /// As a map payload.
    pub fn as_map(&self) -> Option<&ObjMap> {
        match self {
            Obj::Map(m) => Some(m),
            _ => None,
        }
    }

    /// As an enum-definition payload.
    pub fn as_enum(&self) -> Option<&ObjEnum> {
        match self {
            Obj::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// As an enum-instance payload.
    pub fn as_enum_instance(&self) -> Option<&ObjEnumInstance> {
        match self {
            Obj::EnumInstance(e) => Some(e),
            _ => None,
        }
    }

    /// As a bound-method payload.
    pub fn as_bound(&self) -> Option<&ObjBound> {
        match self {
            Obj::Bound(b) => Some(b),
            _ => None,
        }
    }

    /// As a native payload.
    pub fn as_native(&self) -> Option<&ObjNative> {
        match self {
            Obj::Native(n) => Some(n),
            _ => None,
        }
    }

    /// As a fiber payload.
    pub fn as_fiber(&self) -> Option<&ObjFiber> {
        match self {
            Obj::Fiber(f) => Some(f),
            _ => None,
        }
    }

    // ---- Equality ---------------------------------------------------------

    /// Object equality.
    ///
    /// Strings by identity (interning makes identity equivalent to byte
    /// equality); patterns by source text; types by `(optional,
    /// structural)`; enum instances by `(enum, case)`; upvalues by their
    /// unwrapped value; everything else by identity.
    pub fn eql(a: ObjRef, b: ObjRef) -> bool {
        if a.ptr_eq(&b) {
            return true;
        }
        if let Obj::UpValue(upvalue) = &*a {
            return upvalue.read().eql(&Value::Obj(b));
        }
        if let Obj::UpValue(upvalue) = &*b {
            return Value::Obj(a).eql(&upvalue.read());
        }
        match (&*a, &*b) {
            (Obj::Pattern(x), Obj::Pattern(y)) => x.source() == y.source(),
            (Obj::Type(_), Obj::Type(_)) => typedef::eql(&a, &b),
            (Obj::EnumInstance(x), Obj::EnumInstance(y)) => {
                x.enum_ref.ptr_eq(&y.enum_ref) && x.case == y.case
            }
            _ => false,
        }
    }
}

/// Runtime type test: `value is type`.
pub fn value_is_type(value: &Value, type_obj: &ObjRef) -> bool {
    let Some(ty) = type_obj.as_type() else {
        return false;
    };
    match value {
        Value::Null => ty.optional() || ty.kind() == TypeKind::Void,
        Value::Boolean(_) => ty.kind() == TypeKind::Bool,
        Value::Integer(_) | Value::Float(_) => ty.kind() == TypeKind::Number,
        Value::Obj(obj) => obj_is_type(obj, type_obj),
    }
}

fn obj_is_type(obj: &ObjRef, type_obj: &ObjRef) -> bool {
    let ty = type_obj.as_type().expect("type object");
    let kind = ty.kind();
    match &**obj {
        Obj::String(_) => kind == TypeKind::String,
        Obj::Pattern(_) => kind == TypeKind::Pattern,
        Obj::Fiber(_) => kind == TypeKind::Fiber,
        Obj::UserData(_) => kind == TypeKind::UserData,
        // Definitions used as values are type values.
        Obj::Type(_) | Obj::Object(_) | Obj::Enum(_) => kind == TypeKind::Type,
        Obj::ObjectInstance(instance) => {
            if kind != TypeKind::ObjectInstance && kind != TypeKind::Object {
                return false;
            }
            match nominal_definition(ty) {
                Some(definition) => instance
                    .class
                    .as_object()
                    .map(|class| class.is_subclass_of(&instance.class, &definition))
                    .unwrap_or(false),
                None => true,
            }
        }
        Obj::EnumInstance(instance) => {
            if kind != TypeKind::EnumInstance {
                return false;
            }
            match nominal_definition(ty) {
                Some(definition) => instance.enum_ref.ptr_eq(&definition),
                None => true,
            }
        }
        Obj::Function(function) => {
            kind == TypeKind::Function && signature_matches(function.type_def, type_obj)
        }
        Obj::Closure(closure) => {
            kind == TypeKind::Function
                && signature_matches(
                    closure
                        .function
                        .as_function()
                        .and_then(|f| f.type_def),
                    type_obj,
                )
        }
        Obj::Bound(bound) => match bound.callable {
            Value::Obj(callable) => obj_is_type(&callable, type_obj),
            _ => false,
        },
        Obj::Native(_) => kind == TypeKind::Function,
        Obj::List(list) => {
            if kind != TypeKind::List {
                return false;
            }
            match &ty.data().payload {
                Some(TypeUnion::List { item }) => typedef::eql(&list.item_type, item),
                _ => true,
            }
        }
        Obj::Map(map) => {
            if kind != TypeKind::Map {
                return false;
            }
            match &ty.data().payload {
                Some(TypeUnion::Map { key, value }) => {
                    typedef::eql(&map.key_type, key) && typedef::eql(&map.value_type, value)
                }
                _ => true,
            }
        }
        Obj::UpValue(upvalue) => value_is_type(&upvalue.read(), type_obj),
    }
}

fn nominal_definition(ty: &ObjTypeDef) -> Option<ObjRef> {
    match &ty.data().payload {
        Some(TypeUnion::Nominal { definition }) => Some(*definition),
        _ => None,
    }
}

fn signature_matches(declared: Option<ObjRef>, type_obj: &ObjRef) -> bool {
    match declared {
        Some(signature) => typedef::eql(&signature, type_obj),
        // No declared signature: only a payload-free Function type matches.
        None => type_obj
            .as_type()
            .map(|ty| ty.data().payload.is_none())
            .unwrap_or(false),
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Human-readable rendering of a value, used by error reporting and the
/// debug surface.
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Float(n) => {
            if n.fract() == 0.0 && n.is_finite() {
                format!("{n:.1}")
            } else {
                n.to_string()
            }
        }
        Value::Obj(obj) => obj_display_string(obj),
    }
}

fn obj_display_string(obj: &ObjRef) -> String {
    match &**obj {
        Obj::String(s) => s.as_str().to_string(),
        Obj::Pattern(p) => format!("pat(\"{}\")", p.source()),
        Obj::Type(t) => format!("type({:?})", t.kind()),
        Obj::UpValue(u) => to_display_string(&u.read()),
        Obj::Closure(c) => {
            let name = c
                .function
                .as_function()
                .map(|f| f.name().to_string())
                .unwrap_or_default();
            format!("fun {name}")
        }
        Obj::Function(f) => format!("fun {}", f.name()),
        Obj::Object(o) => format!("object {}", string_text(&o.name)),
        Obj::ObjectInstance(i) => {
            let class = i
                .class
                .as_object()
                .map(|o| string_text(&o.name))
                .unwrap_or_default();
            format!("{class} instance")
        }
        Obj::List(l) => {
            let items: Vec<String> = l
                .items
                .borrow()
                .iter()
                .map(to_display_string)
                .collect();
            format!("[{}]", items.join(", "))
        }
        Obj::Map(m) => {
            let data = m.data.borrow();
            let entries: Vec<String> = data
                .keys()
                .into_iter()
                .map(|k| {
                    let key = k.into_value();
                    let value = data.get(&k).unwrap_or(Value::Null);
                    format!(
                        "{}: {}",
                        to_display_string(&key),
                        to_display_string(&value)
                    )
                })
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        Obj::Enum(e) => format!("enum {}", string_text(&e.name)),
        Obj::EnumInstance(e) => {
            let enum_def = e.enum_ref.as_enum();
            let enum_name = enum_def
                .map(|d| string_text(&d.name))
                .unwrap_or_default();
            let case_name = enum_def
                .and_then(|d| d.case_names.get(e.case as usize))
                .map(string_text)
                .unwrap_or_default();
            format!("{enum_name}.{case_name}")
        }
        Obj::Bound(b) => format!("bound {}", to_display_string(&b.callable)),
        Obj::Native(n) => format!("native {}", n.name),
        Obj::UserData(_) => "userdata".to_string(),
        Obj::Fiber(_) => "fiber".to_string(),
    }
}

fn string_text(obj: &ObjRef) -> String {
    obj.as_string()
        .map(|s| s.as_str().to_string())
        .unwrap_or_default()
}

// ============================================================================
// GC tracing
// ============================================================================

/// Trace a value's heap reference, if it has one.
pub fn trace_value(value: &Value, tracer: &mut dyn FnMut(*const GcHeader)) {
    if let Value::Obj(obj) = value {
        tracer(obj.header_ptr());
    }
}

impl GcTraceable for Obj {
    const NEEDS_TRACE: bool = true;

    fn kind(&self) -> u8 {
        Obj::kind(self) as u8
    }

    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        match self {
            Obj::String(_) | Obj::Pattern(_) | Obj::Native(_) | Obj::UserData(_) => {}
            Obj::Type(ty) => {
                let data = ty.data();
                match &data.payload {
                    None => {}
                    Some(TypeUnion::Function {
                        parameters,
                        return_type,
                        yield_type,
                    }) => {
                        for param in parameters {
                            tracer(param.type_def.header_ptr());
                        }
                        tracer(return_type.header_ptr());
                        tracer(yield_type.header_ptr());
                    }
                    Some(TypeUnion::List { item }) => tracer(item.header_ptr()),
                    Some(TypeUnion::Map { key, value }) => {
                        tracer(key.header_ptr());
                        tracer(value.header_ptr());
                    }
                    Some(TypeUnion::Fiber {
                        return_type,
                        yield_type,
                    }) => {
                        tracer(return_type.header_ptr());
                        tracer(yield_type.header_ptr());
                    }
                    Some(TypeUnion::Nominal { definition }) => {
                        tracer(definition.header_ptr())
                    }
                    Some(TypeUnion::Placeholder(placeholder)) => {
                        if let Some(parent) = placeholder.parent.get() {
                            tracer(parent.header_ptr());
                        }
                        for child in placeholder.children.borrow().iter() {
                            tracer(child.header_ptr());
                        }
                    }
                }
            }
            Obj::UpValue(upvalue) => match &*upvalue.state.borrow() {
                UpvalueState::Open { fiber, .. } => tracer(fiber.header_ptr()),
                UpvalueState::Closed(value) => trace_value(value, tracer),
            },
            Obj::Closure(closure) => {
                tracer(closure.function.header_ptr());
                for upvalue in &closure.upvalues {
                    tracer(upvalue.header_ptr());
                }
            }
            Obj::Function(function) => {
                if let Some(type_def) = function.type_def {
                    tracer(type_def.header_ptr());
                }
            }
            Obj::Object(object) => {
                tracer(object.name.header_ptr());
                if let Some(super_class) = object.super_class {
                    tracer(super_class.header_ptr());
                }
                for (name, method) in object.methods.borrow().iter() {
                    tracer(name.header_ptr());
                    trace_value(method, tracer);
                }
                for (name, default) in object.field_defaults.borrow().iter() {
                    tracer(name.header_ptr());
                    trace_value(default, tracer);
                }
                for (name, value) in object.static_fields.borrow().iter() {
                    tracer(name.header_ptr());
                    trace_value(value, tracer);
                }
                for (name, ty) in object.member_types.borrow().iter() {
                    tracer(name.header_ptr());
                    tracer(ty.header_ptr());
                }
                if let Some(type_def) = object.type_def.get() {
                    tracer(type_def.header_ptr());
                }
            }
            Obj::ObjectInstance(instance) => {
                tracer(instance.class.header_ptr());
                for (name, value) in instance.fields.borrow().iter() {
                    tracer(name.header_ptr());
                    trace_value(value, tracer);
                }
            }
            Obj::List(list) => {
                tracer(list.item_type.header_ptr());
                for item in list.items.borrow().iter() {
                    trace_value(item, tracer);
                }
            }
            Obj::Map(map) => {
                tracer(map.key_type.header_ptr());
                tracer(map.value_type.header_ptr());
                let data = map.data.borrow();
                for key in data.keys() {
                    trace_value(&key.into_value(), tracer);
                }
                for value in data.values() {
                    trace_value(&value, tracer);
                }
            }
            Obj::Enum(enum_def) => {
                tracer(enum_def.name.header_ptr());
                for case_name in &enum_def.case_names {
                    tracer(case_name.header_ptr());
                }
                for case_value in &enum_def.case_values {
                    trace_value(case_value, tracer);
                }
                if let Some(type_def) = enum_def.type_def.get() {
                    tracer(type_def.header_ptr());
                }
            }
            Obj::EnumInstance(instance) => tracer(instance.enum_ref.header_ptr()),
            Obj::Bound(bound) => {
                trace_value(&bound.receiver, tracer);
                trace_value(&bound.callable, tracer);
            }
            Obj::Fiber(fiber) => {
                if let Some(parent) = fiber.parent.get() {
                    tracer(parent.header_ptr());
                }
                for value in fiber.stack.borrow().iter() {
                    trace_value(value, tracer);
                }
                for frame in fiber.frames.borrow().iter() {
                    tracer(frame.closure.header_ptr());
                }
                for upvalue in fiber.open_upvalues.borrow().iter() {
                    tracer(upvalue.header_ptr());
                }
                trace_value(&fiber.transfer.get(), tracer);
                if let Some(error) = fiber.error.get() {
                    trace_value(&error, tracer);
                }
            }
        }
    }
}
