//! # Buzz VM Core
//!
//! Core execution engine for the Buzz runtime: the value/object model, the
//! string intern table, the type registry with placeholder resolution, the
//! cooperative fiber scheduler, and the bytecode interpreter.
//!
//! ## Design Principles
//!
//! - **One object sum**: every heap value is a variant of `Obj`; dispatch
//!   is a static match on the kind tag
//! - **Explicit runtime context**: the GC heap, intern table, and type
//!   registry live on [`Heap`] and are passed explicitly, no ambient
//!   globals
//! - **Re-entrant per fiber**: execution state lives in fiber objects, so
//!   yield/resume are pointer swaps, not stack gymnastics
//! - **Single mutator thread**: fibers are cooperative; there is exactly
//!   one OS-level execution stream

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod containers;
pub mod error;
pub mod fiber;
pub mod heap;
pub mod members;
pub mod object;
pub mod pattern;
pub mod placeholder;
pub mod string;
pub mod typedef;
pub mod value;
pub mod vm;

pub use containers::{MapData, ObjList, ObjMap};
pub use error::{
    RuntimeError, RuntimeErrorKind, SourceLocation, StackFrame, VmError, VmResult,
};
pub use fiber::{CallFrame, CatchPoint, FiberStatus, ObjFiber};
pub use heap::Heap;
pub use object::{
    NativeFn, Obj, ObjBound, ObjClosure, ObjEnum, ObjEnumInstance, ObjFunction, ObjKind,
    ObjNative, ObjObject, ObjObjectInstance, ObjRef, ObjUpValue,
};
pub use pattern::ObjPattern;
pub use placeholder::{PlaceholderDef, PlaceholderRelation};
pub use string::{ObjString, StringTable};
pub use typedef::{ObjTypeDef, ParameterDef, TypeDefData, TypeKind, TypeRegistry, TypeUnion};
pub use value::{HashableValue, Value};
pub use vm::Vm;
