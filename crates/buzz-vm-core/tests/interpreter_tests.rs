//! Interpreter behavior: arithmetic rules, the error taxonomy, closures,
//! container members, and string interning observed through execution.

mod common;

use std::rc::Rc;

use buzz_vm_bytecode::{Constant, FunctionKind, Op, UpvalueCapture};
use buzz_vm_core::{RuntimeErrorKind, Value, Vm, VmError};
use common::{function, script};

fn expect_runtime(result: Result<Value, VmError>) -> buzz_vm_core::RuntimeError {
    match result {
        Err(VmError::Runtime(err)) => *err,
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn integer_arithmetic() {
    let mut vm = Vm::new();
    let result = vm
        .interpret(script(|chunk| {
            let a = chunk.add_constant(Constant::Integer(40));
            let b = chunk.add_constant(Constant::Integer(2));
            chunk.emit(Op::Constant(a), 1);
            chunk.emit(Op::Constant(b), 1);
            chunk.emit(Op::Add, 1);
            chunk.emit(Op::Return, 1);
        }))
        .unwrap();
    assert_eq!(result.as_integer(), Some(42));
}

#[test]
fn mixed_numeric_shapes_are_bad_number() {
    let mut vm = Vm::new();
    let err = expect_runtime(vm.interpret(script(|chunk| {
        let a = chunk.add_constant(Constant::Integer(1));
        let b = chunk.add_constant(Constant::Float(1.0));
        chunk.emit(Op::Constant(a), 1);
        chunk.emit(Op::Constant(b), 1);
        chunk.emit(Op::Add, 1);
        chunk.emit(Op::Return, 1);
    })));
    assert_eq!(err.kind, RuntimeErrorKind::BadNumber);
}

#[test]
fn integer_overflow_is_checked() {
    let mut vm = Vm::new();
    let err = expect_runtime(vm.interpret(script(|chunk| {
        let a = chunk.add_constant(Constant::Integer(i64::MAX));
        let b = chunk.add_constant(Constant::Integer(1));
        chunk.emit(Op::Constant(a), 1);
        chunk.emit(Op::Constant(b), 1);
        chunk.emit(Op::Add, 1);
        chunk.emit(Op::Return, 1);
    })));
    assert_eq!(err.kind, RuntimeErrorKind::NumberOverflow);
}

#[test]
fn integer_division_by_zero() {
    let mut vm = Vm::new();
    let err = expect_runtime(vm.interpret(script(|chunk| {
        let a = chunk.add_constant(Constant::Integer(1));
        let b = chunk.add_constant(Constant::Integer(0));
        chunk.emit(Op::Constant(a), 1);
        chunk.emit(Op::Constant(b), 1);
        chunk.emit(Op::Divide, 1);
        chunk.emit(Op::Return, 1);
    })));
    assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
}

#[test]
fn float_division_is_ieee() {
    let mut vm = Vm::new();
    let result = vm
        .interpret(script(|chunk| {
            let a = chunk.add_constant(Constant::Float(1.0));
            let b = chunk.add_constant(Constant::Float(0.0));
            chunk.emit(Op::Constant(a), 1);
            chunk.emit(Op::Constant(b), 1);
            chunk.emit(Op::Divide, 1);
            chunk.emit(Op::Return, 1);
        }))
        .unwrap();
    assert_eq!(result.as_float(), Some(f64::INFINITY));
}

#[test]
fn integer_and_float_are_never_equal() {
    let mut vm = Vm::new();
    let result = vm
        .interpret(script(|chunk| {
            let a = chunk.add_constant(Constant::Integer(1));
            let b = chunk.add_constant(Constant::Float(1.0));
            chunk.emit(Op::Constant(a), 1);
            chunk.emit(Op::Constant(b), 1);
            chunk.emit(Op::Equal, 1);
            chunk.emit(Op::Return, 1);
        }))
        .unwrap();
    assert_eq!(result.as_boolean(), Some(false));
}

#[test]
fn sub_out_of_bound_start_names_the_parameter() {
    // [1, 2, 3].sub(5, 1) throws OutOfBound mentioning `start`.
    let mut vm = Vm::new();
    let err = expect_runtime(vm.interpret(script(|chunk| {
        let one = chunk.add_constant(Constant::Integer(1));
        let two = chunk.add_constant(Constant::Integer(2));
        let three = chunk.add_constant(Constant::Integer(3));
        let five = chunk.add_constant(Constant::Integer(5));
        let sub = chunk.add_constant(Constant::String("sub".into()));
        chunk.emit(Op::Constant(one), 1);
        chunk.emit(Op::Constant(two), 1);
        chunk.emit(Op::Constant(three), 1);
        chunk.emit(Op::List(3), 1);
        chunk.emit(Op::Constant(five), 1);
        chunk.emit(Op::Constant(one), 1);
        chunk.emit(Op::Invoke(sub, 2), 1);
        chunk.emit(Op::Return, 1);
    })));
    assert_eq!(err.kind, RuntimeErrorKind::OutOfBound);
    assert!(
        err.message.contains("`start` is out of bound"),
        "message was: {}",
        err.message
    );
}

#[test]
fn concatenation_produces_the_same_interned_string() {
    // "ab" + "c" and "a" + "bc" are the same object pointer.
    let mut vm = Vm::new();

    let first = vm
        .interpret(script(|chunk| {
            let ab = chunk.add_constant(Constant::String("ab".into()));
            let c = chunk.add_constant(Constant::String("c".into()));
            chunk.emit(Op::Constant(ab), 1);
            chunk.emit(Op::Constant(c), 1);
            chunk.emit(Op::Add, 1);
            chunk.emit(Op::Return, 1);
        }))
        .unwrap();

    let second = vm
        .interpret(script(|chunk| {
            let a = chunk.add_constant(Constant::String("a".into()));
            let bc = chunk.add_constant(Constant::String("bc".into()));
            chunk.emit(Op::Constant(a), 1);
            chunk.emit(Op::Constant(bc), 1);
            chunk.emit(Op::Add, 1);
            chunk.emit(Op::Return, 1);
        }))
        .unwrap();

    let first = first.as_obj().unwrap();
    let second = second.as_obj().unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(first.as_string().unwrap().as_str(), "abc");
}

#[test]
fn try_catch_receives_the_thrown_value() {
    let mut vm = Vm::new();
    let result = vm
        .interpret(script(|chunk| {
            let boom = chunk.add_constant(Constant::String("boom".into()));
            // try { throw "boom" } catch -> the value is the result
            let push_try = chunk.emit(Op::PushTry(0), 1);
            chunk.emit(Op::Constant(boom), 2);
            chunk.emit(Op::Throw, 2);
            // handler lands here (offset patched below)
            let handler = chunk.code.len();
            chunk.emit(Op::Return, 3);
            chunk.code[push_try] = Op::PushTry((handler - push_try - 1) as u16);
        }))
        .unwrap();
    let obj = result.as_obj().unwrap();
    assert_eq!(obj.as_string().unwrap().as_str(), "boom");
}

#[test]
fn uncaught_throw_reports_custom_kind_and_stack() {
    let mut vm = Vm::new();
    let err = expect_runtime(vm.interpret(script(|chunk| {
        let boom = chunk.add_constant(Constant::String("boom".into()));
        chunk.emit(Op::Constant(boom), 7);
        chunk.emit(Op::Throw, 7);
    })));
    assert_eq!(err.kind, RuntimeErrorKind::Custom);
    assert_eq!(err.message, "boom");
    assert_eq!(err.stack.len(), 1);
    assert_eq!(err.stack[0].file, "test.buzz");
    assert_eq!(err.stack[0].line, 7);
}

#[test]
fn upvalues_share_a_counter_cell() {
    // let x = 0; let inc = fn() { x = x + 1; return x; }; inc(); inc()
    let mut vm = Vm::new();

    let mut inc = function("inc", 0, FunctionKind::Function, |chunk| {
        let one = chunk.add_constant(Constant::Integer(1));
        chunk.emit(Op::GetUpvalue(0), 1);
        chunk.emit(Op::Constant(one), 1);
        chunk.emit(Op::Add, 1);
        chunk.emit(Op::SetUpvalue(0), 1);
        chunk.emit(Op::Return, 1);
    });
    inc.captures = vec![UpvalueCapture::Local(1)];

    let result = vm
        .interpret(script(move |chunk| {
            let zero = chunk.add_constant(Constant::Integer(0));
            let inc_const = chunk.add_constant(Constant::Function(inc.clone()));
            chunk.emit(Op::Constant(zero), 1); // slot 1: x
            chunk.emit(Op::Closure(inc_const), 2); // slot 2: inc
            chunk.emit(Op::GetLocal(2), 3);
            chunk.emit(Op::Call(0), 3);
            chunk.emit(Op::Pop, 3);
            chunk.emit(Op::GetLocal(2), 4);
            chunk.emit(Op::Call(0), 4);
            chunk.emit(Op::Return, 4);
        }))
        .unwrap();
    assert_eq!(result.as_integer(), Some(2));
}

#[test]
fn string_members_produce_interned_results() {
    let mut vm = Vm::new();
    let result = vm
        .interpret(script(|chunk| {
            let hello = chunk.add_constant(Constant::String("  Hello  ".into()));
            let trim = chunk.add_constant(Constant::String("trim".into()));
            let upper = chunk.add_constant(Constant::String("upper".into()));
            chunk.emit(Op::Constant(hello), 1);
            chunk.emit(Op::Invoke(trim, 0), 1);
            chunk.emit(Op::Invoke(upper, 0), 1);
            chunk.emit(Op::Return, 1);
        }))
        .unwrap();
    let obj = result.as_obj().unwrap();
    assert_eq!(obj.as_string().unwrap().as_str(), "HELLO");

    // The result is the same object the intern table hands out directly.
    let interned = vm.heap().intern("HELLO");
    assert!(obj.ptr_eq(&interned));
}

#[test]
fn base64_round_trip() {
    let input = "hëllo wörld ✓";
    let mut vm = Vm::new();
    let result = vm
        .interpret(script(|chunk| {
            let text = chunk.add_constant(Constant::String(input.into()));
            let encode = chunk.add_constant(Constant::String("encodeBase64".into()));
            let decode = chunk.add_constant(Constant::String("decodeBase64".into()));
            chunk.emit(Op::Constant(text), 1);
            chunk.emit(Op::Invoke(encode, 0), 1);
            chunk.emit(Op::Invoke(decode, 0), 1);
            chunk.emit(Op::Return, 1);
        }))
        .unwrap();
    let obj = result.as_obj().unwrap();
    assert_eq!(obj.as_string().unwrap().as_str(), input);
    // Interning makes the round trip return the original object.
    assert!(obj.ptr_eq(&vm.heap().intern(input)));
}

#[test]
fn list_append_returns_the_list_and_join_renders() {
    let mut vm = Vm::new();
    let result = vm
        .interpret(script(|chunk| {
            let one = chunk.add_constant(Constant::Integer(1));
            let two = chunk.add_constant(Constant::Integer(2));
            let three = chunk.add_constant(Constant::Integer(3));
            let append = chunk.add_constant(Constant::String("append".into()));
            let join = chunk.add_constant(Constant::String("join".into()));
            let dash = chunk.add_constant(Constant::String("-".into()));
            chunk.emit(Op::Constant(one), 1);
            chunk.emit(Op::Constant(two), 1);
            chunk.emit(Op::List(2), 1);
            chunk.emit(Op::Constant(three), 2);
            chunk.emit(Op::Invoke(append, 1), 2);
            chunk.emit(Op::Constant(dash), 3);
            chunk.emit(Op::Invoke(join, 1), 3);
            chunk.emit(Op::Return, 3);
        }))
        .unwrap();
    let obj = result.as_obj().unwrap();
    assert_eq!(obj.as_string().unwrap().as_str(), "1-2-3");
}

#[test]
fn map_iteration_follows_insertion_order() {
    let mut vm = Vm::new();
    // {10: "a", 5: "b"}.rawNext(null) is 10, then 5, then null.
    let result = vm
        .interpret(script(|chunk| {
            let ten = chunk.add_constant(Constant::Integer(10));
            let five = chunk.add_constant(Constant::Integer(5));
            let a = chunk.add_constant(Constant::String("a".into()));
            let b = chunk.add_constant(Constant::String("b".into()));
            let raw_next = chunk.add_constant(Constant::String("rawNext".into()));
            chunk.emit(Op::Constant(ten), 1);
            chunk.emit(Op::Constant(a), 1);
            chunk.emit(Op::Constant(five), 1);
            chunk.emit(Op::Constant(b), 1);
            chunk.emit(Op::Map(2), 1); // slot 1: map
            chunk.emit(Op::GetLocal(1), 2);
            chunk.emit(Op::Null, 2);
            chunk.emit(Op::Invoke(raw_next, 1), 2); // slot 2: first key
            chunk.emit(Op::GetLocal(1), 3);
            chunk.emit(Op::GetLocal(2), 3);
            chunk.emit(Op::Invoke(raw_next, 1), 3); // slot 3: second key
            chunk.emit(Op::GetLocal(1), 4);
            chunk.emit(Op::GetLocal(3), 4);
            chunk.emit(Op::Invoke(raw_next, 1), 4); // slot 4: null
            chunk.emit(Op::GetLocal(2), 5);
            chunk.emit(Op::GetLocal(3), 5);
            chunk.emit(Op::GetLocal(4), 5);
            chunk.emit(Op::List(3), 5);
            chunk.emit(Op::Return, 5);
        }))
        .unwrap();
    let list = result.as_obj().unwrap();
    let items = list.as_list().unwrap().items.borrow().clone();
    assert_eq!(items[0].as_integer(), Some(10));
    assert_eq!(items[1].as_integer(), Some(5));
    assert!(items[2].is_null());
}

#[test]
fn pattern_match_captures_through_the_vm() {
    let mut vm = Vm::new();

    // Register the pattern as a global the script reads.
    let location = buzz_vm_core::SourceLocation::new("test.buzz", 1, 1);
    let pattern = vm
        .heap()
        .alloc_pattern(r"(\w+)@(\w+)", location)
        .unwrap();
    let slot = vm.heap().define_global("p");
    vm.heap().set_global(slot, Value::Obj(pattern));

    let result = vm
        .interpret(script(move |chunk| {
            let subject = chunk.add_constant(Constant::String("joe@example".into()));
            let match_name = chunk.add_constant(Constant::String("match".into()));
            chunk.emit(Op::GetGlobal(slot), 1);
            chunk.emit(Op::Constant(subject), 1);
            chunk.emit(Op::Invoke(match_name, 1), 1);
            chunk.emit(Op::Return, 1);
        }))
        .unwrap();

    let captures = result.as_obj().unwrap();
    let items = captures.as_list().unwrap().items.borrow().clone();
    assert_eq!(items.len(), 3);
    assert_eq!(
        items[1].as_obj().unwrap().as_string().unwrap().as_str(),
        "joe"
    );
    assert_eq!(
        items[2].as_obj().unwrap().as_string().unwrap().as_str(),
        "example"
    );
}

#[test]
fn unwrap_of_null_is_unexpected_null() {
    let mut vm = Vm::new();
    let err = expect_runtime(vm.interpret(script(|chunk| {
        chunk.emit(Op::Null, 1);
        chunk.emit(Op::Unwrap, 1);
        chunk.emit(Op::Return, 1);
    })));
    assert_eq!(err.kind, RuntimeErrorKind::UnexpectedNull);
}

#[test]
fn native_error_status_threads_into_the_fiber() {
    // A host native that always fails with -1 surfaces as a throw.
    fn failing(vm: &mut Vm) -> i32 {
        vm.native_error(RuntimeErrorKind::Custom, "host failure")
    }

    let mut vm = Vm::new();
    vm.register_library(&[("fail", failing)]);
    let slot = vm.heap().global_slot("fail").unwrap();

    let err = expect_runtime(vm.interpret(script(move |chunk| {
        chunk.emit(Op::GetGlobal(slot), 1);
        chunk.emit(Op::Call(0), 1);
        chunk.emit(Op::Return, 1);
    })));
    assert_eq!(err.kind, RuntimeErrorKind::Custom);
    assert_eq!(err.message, "host failure");
}

#[test]
fn function_constants_are_callable() {
    // A Function value (not wrapped in Closure at compile time) can be
    // called; the VM wraps it on the fly.
    let mut vm = Vm::new();
    let inner = function("three", 0, FunctionKind::Function, |chunk| {
        let three = chunk.add_constant(Constant::Integer(3));
        chunk.emit(Op::Constant(three), 1);
        chunk.emit(Op::Return, 1);
    });
    let function_proto = Rc::new(inner);
    let function_obj = vm.heap().alloc_function(function_proto, None);
    let slot = vm.heap().define_global("three");
    vm.heap().set_global(slot, Value::Obj(function_obj));

    let result = vm
        .interpret(script(move |chunk| {
            chunk.emit(Op::GetGlobal(slot), 1);
            chunk.emit(Op::Call(0), 1);
            chunk.emit(Op::Return, 1);
        }))
        .unwrap();
    assert_eq!(result.as_integer(), Some(3));
}
