//! The bytecode interpreter
//!
//! One dispatch loop, re-entrant per fiber: all execution state (stack,
//! frames, instruction pointers) lives in the fiber objects, so suspending
//! at a yield point and resuming another fiber is a pointer swap. The loop
//! reaches a GC safepoint between instructions, when every live value is
//! rooted.

use std::rc::Rc;

use buzz_vm_bytecode::{Chunk, Constant, FunctionKind, FunctionProto, Op, UpvalueCapture};

use crate::error::{RuntimeErrorKind, SourceLocation, StackFrame, VmError, VmResult};
use crate::fiber::{CallFrame, CatchPoint, FiberStatus, MAX_FRAMES};
use crate::heap::Heap;
use crate::members;
use crate::object::{self, NativeFn, Obj, ObjKind, ObjRef};
use crate::value::{HashableValue, Value};

/// The virtual machine: a heap plus the native-call scratch state.
pub struct Vm {
    heap: Heap,
    /// The fiber that `interpret`/`call` started; `isMain` compares
    /// against it
    root_fiber: Option<ObjRef>,
    /// Stack slot of the receiver during a native call
    native_base: usize,
    /// Argument count during a native call
    native_argc: usize,
    /// Error kind a failing native reported
    native_error_kind: Option<RuntimeErrorKind>,
}

impl Vm {
    /// Create a VM with a fresh heap.
    pub fn new() -> Self {
        Self {
            heap: Heap::new(),
            root_fiber: None,
            native_base: 0,
            native_argc: 0,
            native_error_kind: None,
        }
    }

    /// The VM's heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Register a host library: a symbol table of native functions, each
    /// becoming a global.
    pub fn register_library(&mut self, symbols: &[(&str, NativeFn)]) {
        for (name, function) in symbols {
            let native = self.heap.alloc_native(name, *function);
            let slot = self.heap.define_global(name);
            self.heap.set_global(slot, Value::Obj(native));
        }
    }

    /// Compile-side hook: fail if any placeholder type never resolved.
    pub fn finish_compilation(&self) -> VmResult<()> {
        self.heap.ensure_resolved()
    }

    /// Run a compiled script prototype on a fresh root fiber.
    pub fn interpret(&mut self, proto: FunctionProto) -> VmResult<Value> {
        tracing::debug!(target: "buzz::vm", source = %proto.chunk.source, "interpreting script");
        let function = self.heap.alloc_function(Rc::new(proto), None);
        let closure = self.heap.alloc_closure(function, Vec::new());
        self.call(Value::Obj(closure), Vec::new())
    }

    /// Call a callable value on a fresh root fiber and run it to
    /// completion.
    pub fn call(&mut self, callee: Value, args: Vec<Value>) -> VmResult<Value> {
        // Bare function objects are wrapped into capture-free closures.
        let callee = match callee.as_obj_kind(ObjKind::Function) {
            Some(function) => Value::Obj(self.heap.alloc_closure(function, Vec::new())),
            None => callee,
        };
        let argc = args.len();
        let fiber_ref = self.heap.alloc_fiber(callee, args);
        let fiber = fiber_ref.as_fiber().expect("fiber");
        fiber.status.set(FiberStatus::Running);

        let closure = match callee.as_obj_kind(ObjKind::Closure) {
            Some(closure) => closure,
            None => return Err(VmError::internal("callee is not a closure")),
        };
        self.check_arity(&closure, argc)
            .map_err(|msg| VmError::runtime(RuntimeErrorKind::Custom, msg))?;
        fiber.push_frame(CallFrame::new(closure, 0));

        let previous_root = self.root_fiber.replace(fiber_ref);
        let previous_fiber = self.heap.current_fiber();
        self.heap.set_current_fiber(Some(fiber_ref));

        let result = self.run();

        self.heap.set_current_fiber(previous_fiber);
        self.root_fiber = previous_root;
        result
    }

    /// Whether `fiber` is the fiber `interpret`/`call` started.
    pub fn is_root_fiber(&self, fiber: &ObjRef) -> bool {
        self.root_fiber
            .as_ref()
            .map(|root| root.ptr_eq(fiber))
            .unwrap_or(false)
    }

    // ---- Native-call surface ---------------------------------------------

    /// The receiver of the running native call.
    pub fn native_receiver(&self) -> Value {
        self.current_fiber().slot(self.native_base)
    }

    /// Argument `index` of the running native call.
    pub fn native_arg(&self, index: usize) -> Option<Value> {
        if index < self.native_argc {
            Some(self.current_fiber().slot(self.native_base + 1 + index))
        } else {
            None
        }
    }

    /// Argument count of the running native call.
    pub fn native_argc(&self) -> usize {
        self.native_argc
    }

    /// Push a native result onto the current fiber's stack.
    pub fn push(&self, value: Value) {
        self.current_fiber().push(value);
    }

    /// Report a native error: pushes the message as the error value and
    /// returns the `-1` status.
    pub fn native_error(&mut self, kind: RuntimeErrorKind, message: &str) -> i32 {
        self.native_error_kind = Some(kind);
        let value = self.heap.string_value(message);
        self.push(value);
        -1
    }

    // ---- Dispatch loop ----------------------------------------------------

    fn current_fiber_ref(&self) -> ObjRef {
        self.heap.current_fiber().expect("no active fiber")
    }

    fn current_fiber(&self) -> &crate::fiber::ObjFiber {
        // SAFETY of lifetime: the fiber is rooted via the heap's fiber
        // chain for as long as it is current.
        let fiber_ref = self.current_fiber_ref();
        let fiber: &crate::fiber::ObjFiber =
            unsafe { &*(fiber_ref.as_ptr() as *const Obj) }
                .as_fiber()
                .expect("current object is not a fiber");
        fiber
    }

    fn run(&mut self) -> VmResult<Value> {
        loop {
            self.heap.safepoint();
            if let Some(result) = self.step()? {
                return Ok(result);
            }
        }
    }

    /// Execute one instruction. Returns the program result when the root
    /// fiber's last frame returns.
    fn step(&mut self) -> VmResult<Option<Value>> {
        let fiber_ref = self.current_fiber_ref();
        let fiber = fiber_ref.as_fiber().expect("fiber");
        let closure_ref = fiber.frame_closure();
        let proto = closure_proto(&closure_ref);
        let ip = fiber.ip();

        if ip >= proto.chunk.code.len() {
            // Implicit `return null` at the end of a chunk.
            fiber.push(Value::Null);
            return self.do_return();
        }
        let op = proto.chunk.code[ip];
        fiber.set_ip(ip + 1);

        match op {
            Op::Constant(idx) => {
                let value = self.load_constant(&proto.chunk, idx)?;
                fiber.push(value);
            }
            Op::Null => fiber.push(Value::Null),
            Op::Void => fiber.push(Value::Null),
            Op::True => fiber.push(Value::Boolean(true)),
            Op::False => fiber.push(Value::Boolean(false)),
            Op::Pop => {
                fiber.pop();
            }

            Op::GetLocal(slot) => {
                let base = fiber.frame_slots();
                let value = fiber.slot(base + slot as usize);
                fiber.push(value);
            }
            Op::SetLocal(slot) => {
                let base = fiber.frame_slots();
                let value = fiber.peek(0);
                fiber.set_slot(base + slot as usize, value);
            }
            Op::DefineGlobal(slot) => {
                let value = fiber.pop();
                self.heap.set_global(slot, value);
            }
            Op::GetGlobal(slot) => {
                let value = self
                    .heap
                    .get_global(slot)
                    .ok_or_else(|| VmError::internal(format!("undefined global {slot}")))?;
                fiber.push(value);
            }
            Op::SetGlobal(slot) => {
                let value = fiber.peek(0);
                self.heap.set_global(slot, value);
            }
            Op::GetUpvalue(index) => {
                let upvalue = closure_upvalue(&closure_ref, index as usize)?;
                let value = upvalue.as_upvalue().expect("upvalue").read();
                fiber.push(value);
            }
            Op::SetUpvalue(index) => {
                let upvalue = closure_upvalue(&closure_ref, index as usize)?;
                let value = fiber.peek(0);
                upvalue.as_upvalue().expect("upvalue").write(value);
                self.heap.barrier(upvalue);
            }
            Op::CloseUpvalue => {
                let top = fiber.stack_len() - 1;
                self.close_upvalues(fiber_ref, top);
                fiber.pop();
            }

            Op::Add => self.binary_add()?,
            Op::Subtract => self.binary_arith(op)?,
            Op::Multiply => self.binary_arith(op)?,
            Op::Divide => self.binary_arith(op)?,
            Op::Modulo => self.binary_arith(op)?,
            Op::Negate => self.unary_negate()?,

            Op::Equal => {
                let b = fiber.pop();
                let a = fiber.pop();
                fiber.push(Value::Boolean(a.eql(&b)));
            }
            Op::Greater => self.binary_compare(true)?,
            Op::Less => self.binary_compare(false)?,
            Op::Not => {
                let value = fiber.pop();
                fiber.push(Value::Boolean(!value.is_truthy()));
            }
            Op::Is => {
                let ty = fiber.pop();
                let value = fiber.pop();
                let result = match ty.as_obj_kind(ObjKind::Type) {
                    Some(type_obj) => object::value_is_type(&value, &type_obj),
                    None => false,
                };
                fiber.push(Value::Boolean(result));
            }
            Op::Unwrap => {
                if fiber.peek(0).is_null() {
                    return self
                        .throw_message(
                            RuntimeErrorKind::UnexpectedNull,
                            "dereference of null in a non-optional context",
                        )
                        .map(|_| None);
                }
            }

            Op::Jump(offset) => {
                fiber.set_ip(fiber.ip() + offset as usize);
            }
            Op::JumpIfFalse(offset) => {
                let condition = fiber.pop();
                if !condition.is_truthy() {
                    fiber.set_ip(fiber.ip() + offset as usize);
                }
            }
            Op::Loop(offset) => {
                fiber.set_ip(fiber.ip() - offset as usize);
            }

            Op::Closure(idx) => self.make_closure(&proto.chunk, idx)?,
            Op::Call(argc) => {
                let callee = fiber.peek(argc as usize);
                self.call_value(callee, argc as usize)?;
            }
            Op::Invoke(name_idx, argc) => self.invoke(&proto.chunk, name_idx, argc as usize)?,
            Op::Return => return self.do_return(),

            Op::NewInstance => self.new_instance()?,
            Op::GetField(name_idx) => self.get_field(&proto.chunk, name_idx)?,
            Op::SetField(name_idx) => self.set_field(&proto.chunk, name_idx)?,
            Op::Member(name_idx) => self.read_member(&proto.chunk, name_idx)?,
            Op::EnumCase(case) => self.enum_case(case)?,

            Op::List(count) => {
                let count = count as usize;
                let item_type = if count > 0 {
                    let first = fiber.peek(count - 1);
                    self.heap.type_of_value(&first)
                } else {
                    self.heap
                        .type_basic(crate::typedef::TypeKind::Void, true)
                };
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(fiber.pop());
                }
                items.reverse();
                let list = self.heap.alloc_list(items, item_type);
                fiber.push(Value::Obj(list));
            }
            Op::Map(count) => self.make_map(count as usize)?,
            Op::Subscript => self.subscript_get()?,
            Op::SubscriptSet => self.subscript_set()?,

            Op::NewFiber(argc) => self.new_fiber(argc as usize)?,
            Op::Resume => {
                let value = fiber.pop();
                let target = fiber.pop();
                self.resume_fiber(target, value)?;
            }
            Op::Yield => {
                let value = fiber.pop();
                self.yield_fiber(value)?;
            }

            Op::PushTry(offset) => {
                fiber.push_catch(CatchPoint {
                    handler: fiber.ip() + offset as usize,
                    stack_len: fiber.stack_len(),
                });
            }
            Op::PopTry => {
                fiber.pop_catch();
            }
            Op::Throw => {
                let value = fiber.pop();
                return self
                    .throw_value(RuntimeErrorKind::Custom, value)
                    .map(|_| None);
            }
        }
        Ok(None)
    }

    // ---- Constants & closures --------------------------------------------

    fn load_constant(&mut self, chunk: &Chunk, idx: u16) -> VmResult<Value> {
        match chunk
            .constants
            .get(idx as usize)
            .ok_or_else(|| VmError::internal(format!("bad constant index {idx}")))?
        {
            Constant::Integer(n) => Ok(Value::Integer(*n)),
            Constant::Float(n) => Ok(Value::Float(*n)),
            Constant::Boolean(b) => Ok(Value::Boolean(*b)),
            Constant::String(s) => Ok(self.heap.string_value(s)),
            Constant::Pattern(source) => {
                let location = SourceLocation::new(chunk.source.clone(), 0, 0);
                let pattern = self.heap.alloc_pattern(source, location)?;
                Ok(Value::Obj(pattern))
            }
            Constant::Function(proto) => {
                let function = self.heap.alloc_function(Rc::new(proto.clone()), None);
                Ok(Value::Obj(function))
            }
        }
    }

    fn make_closure(&mut self, chunk: &Chunk, idx: u16) -> VmResult<()> {
        let proto = match chunk.constants.get(idx as usize) {
            Some(Constant::Function(proto)) => proto.clone(),
            _ => return Err(VmError::internal("closure operand is not a function")),
        };
        let fiber_ref = self.current_fiber_ref();
        let fiber = fiber_ref.as_fiber().expect("fiber");
        let enclosing = fiber.frame_closure();
        let base = fiber.frame_slots();

        let mut upvalues = Vec::with_capacity(proto.captures.len());
        for capture in &proto.captures {
            let upvalue = match capture {
                UpvalueCapture::Local(slot) => {
                    self.capture_upvalue(fiber_ref, base + *slot as usize)
                }
                UpvalueCapture::Upvalue(index) => {
                    closure_upvalue(&enclosing, *index as usize)?
                }
            };
            upvalues.push(upvalue);
        }

        let function = self.heap.alloc_function(Rc::new(proto), None);
        let closure = self.heap.alloc_closure(function, upvalues);
        fiber.push(Value::Obj(closure));
        Ok(())
    }

    fn capture_upvalue(&mut self, fiber_ref: ObjRef, slot: usize) -> ObjRef {
        let fiber = fiber_ref.as_fiber().expect("fiber");
        {
            let open = fiber.open_upvalues.borrow();
            if let Some(existing) = open.iter().find(|uv| {
                uv.as_upvalue()
                    .and_then(|u| u.open_slot())
                    .map(|s| s == slot)
                    .unwrap_or(false)
            }) {
                return *existing;
            }
        }
        let upvalue = self.heap.alloc_upvalue(fiber_ref, slot);
        let mut open = fiber.open_upvalues.borrow_mut();
        let position = open
            .iter()
            .position(|uv| {
                uv.as_upvalue()
                    .and_then(|u| u.open_slot())
                    .map(|s| s > slot)
                    .unwrap_or(true)
            })
            .unwrap_or(open.len());
        open.insert(position, upvalue);
        upvalue
    }

    fn close_upvalues(&mut self, fiber_ref: ObjRef, from_slot: usize) {
        let fiber = fiber_ref.as_fiber().expect("fiber");
        let to_close: Vec<ObjRef> = {
            let open = fiber.open_upvalues.borrow();
            open.iter()
                .filter(|uv| {
                    uv.as_upvalue()
                        .and_then(|u| u.open_slot())
                        .map(|s| s >= from_slot)
                        .unwrap_or(false)
                })
                .copied()
                .collect()
        };
        for upvalue in &to_close {
            self.heap.close_upvalue(*upvalue);
        }
        fiber
            .open_upvalues
            .borrow_mut()
            .retain(|uv| !uv.as_upvalue().map(|u| u.is_closed()).unwrap_or(false));
    }

    // ---- Calls ------------------------------------------------------------

    fn check_arity(&self, closure: &ObjRef, argc: usize) -> Result<(), String> {
        let proto = closure_proto(closure);
        if proto.arity as usize != argc {
            Err(format!(
                "expected {} arguments but got {argc}",
                proto.arity
            ))
        } else {
            Ok(())
        }
    }

    fn call_value(&mut self, callee: Value, argc: usize) -> VmResult<()> {
        let Some(obj) = callee.as_obj() else {
            return self.throw_message(
                RuntimeErrorKind::Custom,
                "can only call functions and methods",
            );
        };
        match &*obj {
            Obj::Closure(_) => self.call_closure(obj, argc),
            Obj::Native(native) => self.call_native(native.function, argc),
            Obj::Bound(bound) => {
                // Calling a bound value prepends the receiver: it takes the
                // callee slot, becoming local 0 of the callee frame.
                let fiber = self.current_fiber();
                let receiver_slot = fiber.stack_len() - argc - 1;
                fiber.set_slot(receiver_slot, bound.receiver);
                let callable = bound.callable;
                self.call_value(callable, argc)
            }
            Obj::Function(_) => {
                let closure = self.heap.alloc_closure(obj, Vec::new());
                let fiber = self.current_fiber();
                let callee_slot = fiber.stack_len() - argc - 1;
                fiber.set_slot(callee_slot, Value::Obj(closure));
                self.call_closure(closure, argc)
            }
            _ => self.throw_message(
                RuntimeErrorKind::Custom,
                "can only call functions and methods",
            ),
        }
    }

    fn call_closure(&mut self, closure: ObjRef, argc: usize) -> VmResult<()> {
        if let Err(message) = self.check_arity(&closure, argc) {
            return self.throw_message(RuntimeErrorKind::Custom, message);
        }
        let fiber = self.current_fiber();
        if fiber.frame_count() >= MAX_FRAMES {
            return self.throw_message(RuntimeErrorKind::Custom, "call stack overflow");
        }
        let slots = fiber.stack_len() - argc - 1;
        fiber.push_frame(CallFrame::new(closure, slots));
        Ok(())
    }

    fn call_native(&mut self, function: NativeFn, argc: usize) -> VmResult<()> {
        let fiber = self.current_fiber();
        let base = fiber.stack_len() - argc - 1;
        let previous_base = self.native_base;
        let previous_argc = self.native_argc;
        self.native_base = base;
        self.native_argc = argc;

        let status = function(self);

        self.native_base = previous_base;
        self.native_argc = previous_argc;

        let fiber = self.current_fiber();
        if status < 0 {
            let error = fiber.pop();
            fiber.truncate(base);
            let kind = self
                .native_error_kind
                .take()
                .unwrap_or(RuntimeErrorKind::Custom);
            return self.throw_value(kind, error);
        }

        let pushed = status as usize;
        let mut results = Vec::with_capacity(pushed);
        for _ in 0..pushed {
            results.push(fiber.pop());
        }
        fiber.truncate(base);
        if results.is_empty() {
            fiber.push(Value::Null);
        } else {
            for result in results.into_iter().rev() {
                fiber.push(result);
            }
        }
        Ok(())
    }

    fn do_return(&mut self) -> VmResult<Option<Value>> {
        let fiber_ref = self.current_fiber_ref();
        let fiber = fiber_ref.as_fiber().expect("fiber");
        let result = fiber.pop();
        let slots = fiber.frame_slots();
        self.close_upvalues(fiber_ref, slots);
        fiber.pop_frame();
        fiber.truncate(slots);

        if fiber.frame_count() > 0 {
            fiber.push(result);
            return Ok(None);
        }

        // The fiber finished: hand the result to the parent, or finish the
        // program when this is the bottom of the chain.
        fiber.status.set(FiberStatus::Over);
        fiber.transfer.set(result);
        match fiber.parent.get() {
            Some(parent) => {
                let parent_fiber = parent.as_fiber().expect("fiber");
                parent_fiber.push(result);
                self.heap.set_current_fiber(Some(parent));
                Ok(None)
            }
            None => Ok(Some(result)),
        }
    }

    // ---- Members & dispatch ----------------------------------------------

    fn constant_name(&mut self, chunk: &Chunk, idx: u16) -> VmResult<ObjRef> {
        match chunk.constants.get(idx as usize) {
            Some(Constant::String(s)) => Ok(self.heap.intern(s)),
            _ => Err(VmError::internal("member name is not a string constant")),
        }
    }

    fn invoke(&mut self, chunk: &Chunk, name_idx: u16, argc: usize) -> VmResult<()> {
        let name = self.constant_name(chunk, name_idx)?;
        let fiber = self.current_fiber();
        let receiver = fiber.peek(argc);

        let Some(obj) = receiver.as_obj() else {
            if receiver.is_null() {
                return self.throw_message(
                    RuntimeErrorKind::UnexpectedNull,
                    "dereference of null in a non-optional context",
                );
            }
            return self.throw_message(
                RuntimeErrorKind::Custom,
                format!("value has no member '{}'", name_text(&name)),
            );
        };

        match &*obj {
            Obj::ObjectInstance(instance) => {
                // Field reads shadow methods; a callable field is invoked
                // without an implicit receiver.
                let field = instance.fields.borrow().get(&name).copied();
                if let Some(field) = field {
                    let fiber = self.current_fiber();
                    let slot = fiber.stack_len() - argc - 1;
                    fiber.set_slot(slot, field);
                    return self.call_value(field, argc);
                }
                let method = instance
                    .class
                    .as_object()
                    .and_then(|class| class.lookup_method(&name));
                match method {
                    Some(method) => self.call_value(method, argc),
                    None => self.throw_message(
                        RuntimeErrorKind::Custom,
                        format!("undefined member '{}'", name_text(&name)),
                    ),
                }
            }
            Obj::Object(class) => {
                let callable = class
                    .static_fields
                    .borrow()
                    .get(&name)
                    .copied()
                    .or_else(|| class.lookup_method(&name));
                match callable {
                    Some(callable) => self.call_value(callable, argc),
                    None => self.throw_message(
                        RuntimeErrorKind::Custom,
                        format!("undefined member '{}'", name_text(&name)),
                    ),
                }
            }
            Obj::String(_)
            | Obj::List(_)
            | Obj::Map(_)
            | Obj::Pattern(_)
            | Obj::Fiber(_) => {
                let native = members::member(&self.heap, obj.kind(), name);
                match native {
                    Some(native) => {
                        let function = native.as_native().expect("native").function;
                        self.call_native(function, argc)
                    }
                    None => self.throw_message(
                        RuntimeErrorKind::Custom,
                        format!("undefined member '{}'", name_text(&name)),
                    ),
                }
            }
            _ => self.throw_message(
                RuntimeErrorKind::Custom,
                format!("value has no member '{}'", name_text(&name)),
            ),
        }
    }

    fn read_member(&mut self, chunk: &Chunk, name_idx: u16) -> VmResult<()> {
        let name = self.constant_name(chunk, name_idx)?;
        let fiber = self.current_fiber();
        let receiver = fiber.pop();

        let Some(obj) = receiver.as_obj() else {
            if receiver.is_null() {
                return self.throw_message(
                    RuntimeErrorKind::UnexpectedNull,
                    "dereference of null in a non-optional context",
                );
            }
            return self.throw_message(
                RuntimeErrorKind::Custom,
                format!("value has no member '{}'", name_text(&name)),
            );
        };

        match &*obj {
            Obj::ObjectInstance(instance) => {
                let field = instance.fields.borrow().get(&name).copied();
                if let Some(field) = field {
                    self.current_fiber().push(field);
                    return Ok(());
                }
                let method = instance
                    .class
                    .as_object()
                    .and_then(|class| class.lookup_method(&name));
                match method {
                    Some(method) => {
                        let bound = self.heap.alloc_bound(receiver, method);
                        self.current_fiber().push(Value::Obj(bound));
                        Ok(())
                    }
                    None => self.throw_message(
                        RuntimeErrorKind::Custom,
                        format!("undefined member '{}'", name_text(&name)),
                    ),
                }
            }
            Obj::Object(class) => {
                let member = class
                    .static_fields
                    .borrow()
                    .get(&name)
                    .copied()
                    .or_else(|| class.lookup_method(&name));
                match member {
                    Some(member) => {
                        self.current_fiber().push(member);
                        Ok(())
                    }
                    None => self.throw_message(
                        RuntimeErrorKind::Custom,
                        format!("undefined member '{}'", name_text(&name)),
                    ),
                }
            }
            Obj::Enum(enum_def) => {
                let case = enum_def
                    .case_names
                    .iter()
                    .position(|case_name| case_name.ptr_eq(&name));
                match case {
                    Some(case) => {
                        let instance = self.heap.alloc_enum_instance(obj, case as u8);
                        self.current_fiber().push(Value::Obj(instance));
                        Ok(())
                    }
                    None => self.throw_message(
                        RuntimeErrorKind::Custom,
                        format!("enum has no case '{}'", name_text(&name)),
                    ),
                }
            }
            Obj::String(_)
            | Obj::List(_)
            | Obj::Map(_)
            | Obj::Pattern(_)
            | Obj::Fiber(_) => {
                let native = members::member(&self.heap, obj.kind(), name);
                match native {
                    Some(native) => {
                        let bound = self.heap.alloc_bound(receiver, Value::Obj(native));
                        self.current_fiber().push(Value::Obj(bound));
                        Ok(())
                    }
                    None => self.throw_message(
                        RuntimeErrorKind::Custom,
                        format!("undefined member '{}'", name_text(&name)),
                    ),
                }
            }
            _ => self.throw_message(
                RuntimeErrorKind::Custom,
                format!("value has no member '{}'", name_text(&name)),
            ),
        }
    }

    fn get_field(&mut self, chunk: &Chunk, name_idx: u16) -> VmResult<()> {
        let name = self.constant_name(chunk, name_idx)?;
        let fiber = self.current_fiber();
        let receiver = fiber.pop();

        if receiver.is_null() {
            return self.throw_message(
                RuntimeErrorKind::UnexpectedNull,
                "dereference of null in a non-optional context",
            );
        }
        let lookup = receiver
            .as_obj()
            .and_then(|obj| obj.as_instance().map(|instance| instance.lookup(&name)));
        match lookup {
            Some(Some(value)) => {
                self.current_fiber().push(value);
                Ok(())
            }
            Some(None) => self.throw_message(
                RuntimeErrorKind::Custom,
                format!("undefined field '{}'", name_text(&name)),
            ),
            None => self.throw_message(
                RuntimeErrorKind::Custom,
                "field access on a non-instance value",
            ),
        }
    }

    fn set_field(&mut self, chunk: &Chunk, name_idx: u16) -> VmResult<()> {
        let name = self.constant_name(chunk, name_idx)?;
        let fiber = self.current_fiber();
        let value = fiber.pop();
        let receiver = fiber.pop();

        if receiver.is_null() {
            return self.throw_message(
                RuntimeErrorKind::UnexpectedNull,
                "dereference of null in a non-optional context",
            );
        }
        match receiver.as_obj_kind(ObjKind::ObjectInstance) {
            Some(instance) => {
                // Writes always target the instance and fire the barrier,
                // even when a method of the same name exists.
                self.heap.instance_set_field(instance, name, value);
                self.current_fiber().push(value);
                Ok(())
            }
            None => self.throw_message(
                RuntimeErrorKind::Custom,
                "field assignment on a non-instance value",
            ),
        }
    }

    fn new_instance(&mut self) -> VmResult<()> {
        let fiber = self.current_fiber();
        let class = fiber.pop();
        match class.as_obj_kind(ObjKind::Object) {
            Some(class) => {
                let instance = self.heap.alloc_instance(class);
                self.current_fiber().push(Value::Obj(instance));
                Ok(())
            }
            None => self.throw_message(
                RuntimeErrorKind::Custom,
                "can only instanciate object definitions",
            ),
        }
    }

    fn enum_case(&mut self, case: u8) -> VmResult<()> {
        let fiber = self.current_fiber();
        let value = fiber.pop();
        match value.as_obj_kind(ObjKind::Enum) {
            Some(enum_ref) => {
                let case_count = enum_ref.as_enum().expect("enum").case_names.len();
                if (case as usize) >= case_count {
                    return self.throw_message(
                        RuntimeErrorKind::OutOfBound,
                        format!("enum case {case} is out of bound"),
                    );
                }
                let instance = self.heap.alloc_enum_instance(enum_ref, case);
                self.current_fiber().push(Value::Obj(instance));
                Ok(())
            }
            None => self.throw_message(RuntimeErrorKind::Custom, "not an enum"),
        }
    }

    // ---- Containers -------------------------------------------------------

    fn make_map(&mut self, count: usize) -> VmResult<()> {
        let fiber = self.current_fiber();
        let (key_type, value_type) = if count > 0 {
            let key = fiber.peek(2 * count - 1);
            let value = fiber.peek(2 * count - 2);
            (
                self.heap.type_of_value(&key),
                self.heap.type_of_value(&value),
            )
        } else {
            let unknown = self
                .heap
                .type_basic(crate::typedef::TypeKind::Void, true);
            (unknown, unknown)
        };
        let map = self.heap.alloc_map(key_type, value_type);

        let fiber = self.current_fiber();
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            let value = fiber.pop();
            let key = fiber.pop();
            pairs.push((key, value));
        }
        for (key, value) in pairs.into_iter().rev() {
            let Some(key) = HashableValue::from_value(key) else {
                return self.throw_message(
                    RuntimeErrorKind::Custom,
                    "value cannot be used as a map key",
                );
            };
            self.heap.map_set(map, key, value);
        }
        self.current_fiber().push(Value::Obj(map));
        Ok(())
    }

    fn subscript_get(&mut self) -> VmResult<()> {
        let fiber = self.current_fiber();
        let key = fiber.pop();
        let container = fiber.pop();

        if container.is_null() {
            return self.throw_message(
                RuntimeErrorKind::UnexpectedNull,
                "dereference of null in a non-optional context",
            );
        }
        let Some(obj) = container.as_obj() else {
            return self.throw_message(RuntimeErrorKind::Custom, "value is not subscriptable");
        };
        match &*obj {
            Obj::List(list) => {
                let Some(index) = key.as_integer() else {
                    return self
                        .throw_message(RuntimeErrorKind::BadNumber, "list index must be an integer");
                };
                match usize::try_from(index).ok().and_then(|i| list.get(i)) {
                    Some(item) => {
                        self.current_fiber().push(item);
                        Ok(())
                    }
                    None => self.throw_message(
                        RuntimeErrorKind::OutOfBound,
                        format!("index {index} is out of bound"),
                    ),
                }
            }
            Obj::Map(map) => {
                let Some(key) = HashableValue::from_value(key) else {
                    return self.throw_message(
                        RuntimeErrorKind::Custom,
                        "value cannot be used as a map key",
                    );
                };
                let value = map.data.borrow().get(&key).unwrap_or(Value::Null);
                self.current_fiber().push(value);
                Ok(())
            }
            Obj::String(string) => {
                let Some(index) = key.as_integer() else {
                    return self.throw_message(
                        RuntimeErrorKind::BadNumber,
                        "string index must be an integer",
                    );
                };
                let ch = usize::try_from(index)
                    .ok()
                    .and_then(|i| string.as_str().chars().nth(i));
                match ch {
                    Some(ch) => {
                        let value = self.heap.string_value(&ch.to_string());
                        self.current_fiber().push(value);
                        Ok(())
                    }
                    None => self.throw_message(
                        RuntimeErrorKind::OutOfBound,
                        format!("index {index} is out of bound"),
                    ),
                }
            }
            _ => self.throw_message(RuntimeErrorKind::Custom, "value is not subscriptable"),
        }
    }

    fn subscript_set(&mut self) -> VmResult<()> {
        let fiber = self.current_fiber();
        let value = fiber.pop();
        let key = fiber.pop();
        let container = fiber.pop();

        let Some(obj) = container.as_obj() else {
            return self.throw_message(RuntimeErrorKind::Custom, "value is not subscriptable");
        };
        match &*obj {
            Obj::List(_) => {
                let Some(index) = key.as_integer() else {
                    return self
                        .throw_message(RuntimeErrorKind::BadNumber, "list index must be an integer");
                };
                let in_bounds = usize::try_from(index)
                    .ok()
                    .map(|i| self.heap.list_set(obj, i, value))
                    .unwrap_or(false);
                if !in_bounds {
                    return self.throw_message(
                        RuntimeErrorKind::OutOfBound,
                        format!("index {index} is out of bound"),
                    );
                }
                self.current_fiber().push(value);
                Ok(())
            }
            Obj::Map(_) => {
                let Some(key) = HashableValue::from_value(key) else {
                    return self.throw_message(
                        RuntimeErrorKind::Custom,
                        "value cannot be used as a map key",
                    );
                };
                self.heap.map_set(obj, key, value);
                self.current_fiber().push(value);
                Ok(())
            }
            _ => self.throw_message(RuntimeErrorKind::Custom, "value is not subscriptable"),
        }
    }

    // ---- Fibers -----------------------------------------------------------

    fn new_fiber(&mut self, argc: usize) -> VmResult<()> {
        let fiber = self.current_fiber();
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(fiber.pop());
        }
        args.reverse();
        let entry = fiber.pop();
        if entry.as_obj_kind(ObjKind::Closure).is_none() {
            return self.throw_message(RuntimeErrorKind::Custom, "fiber entry must be a closure");
        }
        let new_fiber = self.heap.alloc_fiber(entry, args);
        self.current_fiber().push(Value::Obj(new_fiber));
        Ok(())
    }

    fn resume_fiber(&mut self, target: Value, value: Value) -> VmResult<()> {
        let Some(fiber_obj) = target.as_obj_kind(ObjKind::Fiber) else {
            return self.throw_message(RuntimeErrorKind::Custom, "can only resume fibers");
        };
        let target_fiber = fiber_obj.as_fiber().expect("fiber");
        let current = self.current_fiber_ref();

        match target_fiber.status.get() {
            FiberStatus::Over => self.throw_message(
                RuntimeErrorKind::Custom,
                "cannot resume a fiber that is over",
            ),
            FiberStatus::Running => self.throw_message(
                RuntimeErrorKind::Custom,
                "cannot resume a running fiber",
            ),
            FiberStatus::Instanciated => {
                let entry = target_fiber.entry();
                let closure = entry.as_obj_kind(ObjKind::Closure).expect("closure entry");
                let argc = target_fiber.stack_len() - 1;
                if let Err(message) = self.check_arity(&closure, argc) {
                    return self.throw_message(RuntimeErrorKind::Custom, message);
                }
                target_fiber.status.set(FiberStatus::Running);
                target_fiber.parent.set(Some(current));
                self.heap.barrier(fiber_obj);
                target_fiber.push_frame(CallFrame::new(closure, 0));
                self.heap.set_current_fiber(Some(fiber_obj));
                Ok(())
            }
            FiberStatus::Yielded => {
                target_fiber.status.set(FiberStatus::Running);
                target_fiber.parent.set(Some(current));
                self.heap.barrier(fiber_obj);
                // The resume argument becomes the yield expression's value.
                target_fiber.push(value);
                self.heap.set_current_fiber(Some(fiber_obj));
                Ok(())
            }
        }
    }

    fn yield_fiber(&mut self, value: Value) -> VmResult<()> {
        let fiber_ref = self.current_fiber_ref();
        let fiber = fiber_ref.as_fiber().expect("fiber");

        let Some(parent) = fiber.parent.get() else {
            return self.throw_message(
                RuntimeErrorKind::Custom,
                "cannot yield from the root fiber",
            );
        };

        // Only the entry closure of a yielding anonymous function may
        // suspend the fiber.
        let entry_yields = fiber
            .entry()
            .as_obj_kind(ObjKind::Closure)
            .map(|closure| {
                let proto = closure_proto(&closure);
                proto.yields && proto.kind == FunctionKind::Anonymous
            })
            .unwrap_or(false);
        if !entry_yields {
            return self.throw_message(
                RuntimeErrorKind::Custom,
                "cannot yield outside a yielding function",
            );
        }

        fiber.status.set(FiberStatus::Yielded);
        fiber.transfer.set(value);
        let parent_fiber = parent.as_fiber().expect("fiber");
        parent_fiber.push(value);
        self.heap.set_current_fiber(Some(parent));
        Ok(())
    }

    // ---- Arithmetic -------------------------------------------------------

    fn binary_add(&mut self) -> VmResult<()> {
        let fiber = self.current_fiber();
        let b = fiber.peek(0);
        let a = fiber.peek(1);
        let result = match (a, b) {
            (Value::Integer(x), Value::Integer(y)) => match x.checked_add(y) {
                Some(sum) => Value::Integer(sum),
                None => {
                    return self.throw_message(
                        RuntimeErrorKind::NumberOverflow,
                        format!("{x} + {y} overflows"),
                    )
                }
            },
            (Value::Float(x), Value::Float(y)) => Value::Float(x + y),
            (Value::Obj(x), Value::Obj(y)) => match (&*x, &*y) {
                (Obj::String(sx), Obj::String(sy)) => {
                    let mut combined = String::with_capacity(sx.len() + sy.len());
                    combined.push_str(sx.as_str());
                    combined.push_str(sy.as_str());
                    self.heap.string_value(&combined)
                }
                (Obj::List(lx), Obj::List(ly)) => {
                    let mut items = lx.items.borrow().clone();
                    items.extend(ly.items.borrow().iter().copied());
                    Value::Obj(self.heap.alloc_list(items, lx.item_type))
                }
                _ => {
                    return self
                        .throw_message(RuntimeErrorKind::BadNumber, "operands cannot be added")
                }
            },
            _ => {
                return self.throw_message(
                    RuntimeErrorKind::BadNumber,
                    "operands must share a numeric shape",
                )
            }
        };
        let fiber = self.current_fiber();
        fiber.pop();
        fiber.pop();
        fiber.push(result);
        Ok(())
    }

    fn binary_arith(&mut self, op: Op) -> VmResult<()> {
        let fiber = self.current_fiber();
        let b = fiber.peek(0);
        let a = fiber.peek(1);
        let result = match (a, b) {
            (Value::Integer(x), Value::Integer(y)) => {
                let computed = match op {
                    Op::Subtract => x.checked_sub(y),
                    Op::Multiply => x.checked_mul(y),
                    Op::Divide => {
                        if y == 0 {
                            return self.throw_divide_by_zero();
                        }
                        x.checked_div(y)
                    }
                    Op::Modulo => {
                        if y == 0 {
                            return self.throw_divide_by_zero();
                        }
                        x.checked_rem(y)
                    }
                    _ => unreachable!("not an arithmetic op"),
                };
                match computed {
                    Some(n) => Value::Integer(n),
                    None => {
                        return self.throw_message(
                            RuntimeErrorKind::NumberOverflow,
                            "integer operation overflows",
                        )
                    }
                }
            }
            (Value::Float(x), Value::Float(y)) => Value::Float(match op {
                Op::Subtract => x - y,
                Op::Multiply => x * y,
                Op::Divide => x / y,
                Op::Modulo => x % y,
                _ => unreachable!("not an arithmetic op"),
            }),
            _ => {
                return self.throw_message(
                    RuntimeErrorKind::BadNumber,
                    "operands must share a numeric shape",
                )
            }
        };
        let fiber = self.current_fiber();
        fiber.pop();
        fiber.pop();
        fiber.push(result);
        Ok(())
    }

    fn throw_divide_by_zero(&mut self) -> VmResult<()> {
        self.throw_message(RuntimeErrorKind::DivisionByZero, "division by zero")
    }

    fn unary_negate(&mut self) -> VmResult<()> {
        let fiber = self.current_fiber();
        let value = fiber.peek(0);
        let result = match value {
            Value::Integer(n) => match n.checked_neg() {
                Some(negated) => Value::Integer(negated),
                None => {
                    return self.throw_message(
                        RuntimeErrorKind::NumberOverflow,
                        "negation overflows",
                    )
                }
            },
            Value::Float(n) => Value::Float(-n),
            _ => {
                return self
                    .throw_message(RuntimeErrorKind::BadNumber, "operand must be a number")
            }
        };
        let fiber = self.current_fiber();
        fiber.pop();
        fiber.push(result);
        Ok(())
    }

    fn binary_compare(&mut self, greater: bool) -> VmResult<()> {
        let fiber = self.current_fiber();
        let b = fiber.peek(0);
        let a = fiber.peek(1);
        let result = match (a, b) {
            (Value::Integer(x), Value::Integer(y)) => {
                if greater {
                    x > y
                } else {
                    x < y
                }
            }
            (Value::Float(x), Value::Float(y)) => {
                if greater {
                    x > y
                } else {
                    x < y
                }
            }
            _ => {
                return self.throw_message(
                    RuntimeErrorKind::BadNumber,
                    "operands must share a numeric shape",
                )
            }
        };
        let fiber = self.current_fiber();
        fiber.pop();
        fiber.pop();
        fiber.push(Value::Boolean(result));
        Ok(())
    }

    // ---- Throwing ---------------------------------------------------------

    /// Throw a message value with the given kind.
    fn throw_message(
        &mut self,
        kind: RuntimeErrorKind,
        message: impl Into<String>,
    ) -> VmResult<()> {
        let value = self.heap.string_value(&message.into());
        self.throw_value(kind, value)
    }

    /// Throw `value`: walk catch clauses in the current fiber; an uncaught
    /// error flips the fiber to `Over` and re-raises in its parent at the
    /// parent's last resume point. Uncaught in the root fiber, it becomes
    /// a `VmError::Runtime` carrying the stack trace.
    fn throw_value(&mut self, kind: RuntimeErrorKind, value: Value) -> VmResult<()> {
        tracing::trace!(target: "buzz::vm", kind = %kind, "throw");
        let trace = self.stack_trace();
        let mut fiber_ref = self.current_fiber_ref();

        loop {
            let fiber = fiber_ref.as_fiber().expect("fiber");

            while fiber.frame_count() > 0 {
                if let Some(catch) = fiber.pop_catch() {
                    fiber.truncate(catch.stack_len);
                    fiber.push(value);
                    fiber.set_ip(catch.handler);
                    self.heap.set_current_fiber(Some(fiber_ref));
                    return Ok(());
                }
                let slots = fiber.frame_slots();
                self.close_upvalues(fiber_ref, slots);
                fiber.pop_frame();
                fiber.truncate(slots);
            }

            fiber.status.set(FiberStatus::Over);
            fiber.error.set(Some(value));
            match fiber.parent.get() {
                Some(parent) => {
                    self.heap.set_current_fiber(Some(parent));
                    fiber_ref = parent;
                }
                None => {
                    return Err(VmError::Runtime(Box::new(crate::error::RuntimeError {
                        kind,
                        message: object::to_display_string(&value),
                        stack: trace,
                    })))
                }
            }
        }
    }

    /// Collect the stack trace of the current fiber chain: frame closures
    /// and source locations from chunk metadata, innermost first.
    fn stack_trace(&self) -> Vec<StackFrame> {
        let mut trace = Vec::new();
        let mut fiber_ref = self.heap.current_fiber();
        while let Some(current) = fiber_ref {
            let fiber = current.as_fiber().expect("fiber");
            for frame in fiber.frames.borrow().iter().rev() {
                let proto = closure_proto(&frame.closure);
                let line = proto.chunk.line_at(frame.ip.saturating_sub(1));
                trace.push(StackFrame {
                    function_name: proto.name.clone(),
                    file: proto.chunk.source.clone(),
                    line,
                });
            }
            fiber_ref = fiber.parent.get();
        }
        trace
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn closure_proto(closure: &ObjRef) -> Rc<FunctionProto> {
    closure
        .as_closure()
        .map(|c| {
            c.function
                .as_function()
                .expect("closure function")
                .proto
                .clone()
        })
        .or_else(|| closure.as_function().map(|f| f.proto.clone()))
        .expect("not a callable object")
}

fn closure_upvalue(closure: &ObjRef, index: usize) -> VmResult<ObjRef> {
    closure
        .as_closure()
        .and_then(|c| c.upvalues.get(index).copied())
        .ok_or_else(|| VmError::internal(format!("bad upvalue index {index}")))
}

fn name_text(name: &ObjRef) -> String {
    name.as_string()
        .map(|s| s.as_str().to_string())
        .unwrap_or_default()
}
