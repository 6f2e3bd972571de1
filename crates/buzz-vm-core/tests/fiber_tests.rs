//! Fiber scheduler behavior: yield/resume sequencing, terminal states,
//! cancellation, and error propagation across the fiber chain.

mod common;

use buzz_vm_bytecode::{Constant, FunctionKind, Op};
use buzz_vm_core::{FiberStatus, RuntimeErrorKind, Value, Vm, VmError};
use common::{function, script};

/// An anonymous yielding closure producing 1, 2, 3.
fn counter_proto() -> buzz_vm_bytecode::FunctionProto {
    let mut proto = function("", 0, FunctionKind::Anonymous, |chunk| {
        let one = chunk.add_constant(Constant::Integer(1));
        let two = chunk.add_constant(Constant::Integer(2));
        let three = chunk.add_constant(Constant::Integer(3));
        chunk.emit(Op::Constant(one), 1);
        chunk.emit(Op::Yield, 1);
        chunk.emit(Op::Pop, 1);
        chunk.emit(Op::Constant(two), 2);
        chunk.emit(Op::Yield, 2);
        chunk.emit(Op::Pop, 2);
        chunk.emit(Op::Constant(three), 3);
        chunk.emit(Op::Yield, 3);
        chunk.emit(Op::Pop, 3);
        chunk.emit(Op::Null, 4);
        chunk.emit(Op::Return, 4);
    });
    proto.yields = true;
    proto
}

#[test]
fn yield_resume_produces_one_two_three_then_null() {
    let mut vm = Vm::new();
    let counter = counter_proto();

    let result = vm
        .interpret(script(move |chunk| {
            let counter_const = chunk.add_constant(Constant::Function(counter.clone()));
            let over = chunk.add_constant(Constant::String("over".into()));

            chunk.emit(Op::Closure(counter_const), 1);
            chunk.emit(Op::NewFiber(0), 1); // slot 1: the fiber
            for line in 2..=5 {
                chunk.emit(Op::GetLocal(1), line);
                chunk.emit(Op::Null, line);
                chunk.emit(Op::Resume, line); // slots 2..=5: 1, 2, 3, null
            }
            chunk.emit(Op::GetLocal(1), 6);
            chunk.emit(Op::Invoke(over, 0), 6); // slot 6: true
            for slot in 2..=6 {
                chunk.emit(Op::GetLocal(slot), 7);
            }
            chunk.emit(Op::List(5), 7);
            chunk.emit(Op::Return, 7);
        }))
        .unwrap();

    let list = result.as_obj().unwrap();
    let items = list.as_list().unwrap().items.borrow().clone();
    assert_eq!(items[0].as_integer(), Some(1));
    assert_eq!(items[1].as_integer(), Some(2));
    assert_eq!(items[2].as_integer(), Some(3));
    assert!(items[3].is_null());
    assert_eq!(items[4].as_boolean(), Some(true));
}

#[test]
fn resuming_a_finished_fiber_is_an_error() {
    let mut vm = Vm::new();
    let empty = {
        let mut proto = function("", 0, FunctionKind::Anonymous, |chunk| {
            chunk.emit(Op::Null, 1);
            chunk.emit(Op::Return, 1);
        });
        proto.yields = true;
        proto
    };

    let result = vm.interpret(script(move |chunk| {
        let entry = chunk.add_constant(Constant::Function(empty.clone()));
        chunk.emit(Op::Closure(entry), 1);
        chunk.emit(Op::NewFiber(0), 1); // slot 1
        chunk.emit(Op::GetLocal(1), 2);
        chunk.emit(Op::Null, 2);
        chunk.emit(Op::Resume, 2); // runs to completion
        chunk.emit(Op::GetLocal(1), 3);
        chunk.emit(Op::Null, 3);
        chunk.emit(Op::Resume, 3); // fiber is over: error
        chunk.emit(Op::Return, 3);
    }));

    match result {
        Err(VmError::Runtime(err)) => {
            assert_eq!(err.kind, RuntimeErrorKind::Custom);
            assert!(err.message.contains("over"), "message: {}", err.message);
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn cancelled_fiber_never_executes() {
    let mut vm = Vm::new();
    let counter = counter_proto();

    let result = vm.interpret(script(move |chunk| {
        let entry = chunk.add_constant(Constant::Function(counter.clone()));
        let cancel = chunk.add_constant(Constant::String("cancel".into()));
        chunk.emit(Op::Closure(entry), 1);
        chunk.emit(Op::NewFiber(0), 1); // slot 1
        chunk.emit(Op::GetLocal(1), 2);
        chunk.emit(Op::Invoke(cancel, 0), 2);
        chunk.emit(Op::Pop, 2);
        chunk.emit(Op::GetLocal(1), 3);
        chunk.emit(Op::Null, 3);
        chunk.emit(Op::Resume, 3); // pending frames discarded: error
        chunk.emit(Op::Return, 3);
    }));

    assert!(matches!(result, Err(VmError::Runtime(_))));
}

#[test]
fn yield_from_root_fiber_is_an_error() {
    let mut vm = Vm::new();
    let result = vm.interpret(script(|chunk| {
        let one = chunk.add_constant(Constant::Integer(1));
        chunk.emit(Op::Constant(one), 1);
        chunk.emit(Op::Yield, 1);
        chunk.emit(Op::Return, 1);
    }));
    match result {
        Err(VmError::Runtime(err)) => {
            assert_eq!(err.kind, RuntimeErrorKind::Custom);
            assert!(err.message.contains("root fiber"));
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn yield_outside_a_yielding_closure_is_an_error() {
    // The entry closure is Anonymous but declares no yield type.
    let mut vm = Vm::new();
    let silent = function("", 0, FunctionKind::Anonymous, |chunk| {
        let one = chunk.add_constant(Constant::Integer(1));
        chunk.emit(Op::Constant(one), 1);
        chunk.emit(Op::Yield, 1);
        chunk.emit(Op::Return, 1);
    });

    let result = vm.interpret(script(move |chunk| {
        let entry = chunk.add_constant(Constant::Function(silent.clone()));
        chunk.emit(Op::Closure(entry), 1);
        chunk.emit(Op::NewFiber(0), 1);
        chunk.emit(Op::Null, 2);
        chunk.emit(Op::Resume, 2);
        chunk.emit(Op::Return, 2);
    }));

    match result {
        Err(VmError::Runtime(err)) => {
            assert!(err.message.contains("yield"), "message: {}", err.message);
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn resume_argument_becomes_the_yield_result() {
    // The fiber yields its input + 10 twice, reading resume arguments.
    let mut vm = Vm::new();
    let echo = {
        let mut proto = function("", 1, FunctionKind::Anonymous, |chunk| {
            let ten = chunk.add_constant(Constant::Integer(10));
            chunk.emit(Op::GetLocal(1), 1); // the initial argument
            chunk.emit(Op::Constant(ten), 1);
            chunk.emit(Op::Add, 1);
            chunk.emit(Op::Yield, 1); // parent gets arg+10; resume value lands here
            chunk.emit(Op::Constant(ten), 2);
            chunk.emit(Op::Add, 2);
            chunk.emit(Op::Return, 2); // returns resume-value + 10
        });
        proto.yields = true;
        proto
    };

    let result = vm
        .interpret(script(move |chunk| {
            let entry = chunk.add_constant(Constant::Function(echo.clone()));
            let one = chunk.add_constant(Constant::Integer(1));
            let five = chunk.add_constant(Constant::Integer(5));
            chunk.emit(Op::Closure(entry), 1);
            chunk.emit(Op::Constant(one), 1);
            chunk.emit(Op::NewFiber(1), 1); // slot 1: fiber(1)
            chunk.emit(Op::GetLocal(1), 2);
            chunk.emit(Op::Null, 2);
            chunk.emit(Op::Resume, 2); // slot 2: 11
            chunk.emit(Op::GetLocal(1), 3);
            chunk.emit(Op::Constant(five), 3);
            chunk.emit(Op::Resume, 3); // slot 3: 15
            chunk.emit(Op::GetLocal(2), 4);
            chunk.emit(Op::GetLocal(3), 4);
            chunk.emit(Op::List(2), 4);
            chunk.emit(Op::Return, 4);
        }))
        .unwrap();

    let items = result
        .as_obj()
        .unwrap()
        .as_list()
        .unwrap()
        .items
        .borrow()
        .clone();
    assert_eq!(items[0].as_integer(), Some(11));
    assert_eq!(items[1].as_integer(), Some(15));
}

#[test]
fn uncaught_error_in_child_reraises_in_parent() {
    // The child throws; the parent catches at its resume point.
    let mut vm = Vm::new();
    let thrower = {
        let mut proto = function("", 0, FunctionKind::Anonymous, |chunk| {
            let boom = chunk.add_constant(Constant::String("child failed".into()));
            chunk.emit(Op::Constant(boom), 1);
            chunk.emit(Op::Throw, 1);
        });
        proto.yields = true;
        proto
    };

    let result = vm
        .interpret(script(move |chunk| {
            let entry = chunk.add_constant(Constant::Function(thrower.clone()));
            chunk.emit(Op::Closure(entry), 1);
            chunk.emit(Op::NewFiber(0), 1); // slot 1
            let push_try = chunk.emit(Op::PushTry(0), 2);
            chunk.emit(Op::GetLocal(1), 2);
            chunk.emit(Op::Null, 2);
            chunk.emit(Op::Resume, 2);
            chunk.emit(Op::PopTry, 2);
            let handler = chunk.code.len();
            chunk.emit(Op::Return, 3); // returns the caught error value
            chunk.code[push_try] = Op::PushTry((handler - push_try - 1) as u16);
        }))
        .unwrap();

    let obj = result.as_obj().unwrap();
    assert_eq!(obj.as_string().unwrap().as_str(), "child failed");
}

#[test]
fn fiber_states_through_the_api() {
    let heap = buzz_vm_core::Heap::new();
    let fiber = heap.alloc_fiber(Value::Null, vec![]);
    let inner = fiber.as_fiber().unwrap();
    assert_eq!(inner.status.get(), FiberStatus::Instanciated);
    inner.cancel();
    assert_eq!(inner.status.get(), FiberStatus::Over);
}
