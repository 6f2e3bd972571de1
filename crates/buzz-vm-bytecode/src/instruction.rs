//! Bytecode instructions

use serde::{Deserialize, Serialize};

/// Bytecode instructions.
///
/// Stack-based instruction set: operands come from the running fiber's
/// value stack, results are pushed back. `u16` indexes address the current
/// chunk's constant pool or the frame's stack window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Op {
    // ==================== Constants ====================
    /// Push constants\[idx\]
    Constant(u16),
    /// Push null
    Null,
    /// Push void (absence of a value in a void-returning call)
    Void,
    /// Push true
    True,
    /// Push false
    False,
    /// Pop and discard the top of stack
    Pop,

    // ==================== Variables ====================
    /// Push the local at frame slot idx
    GetLocal(u16),
    /// Store top of stack into frame slot idx (value stays on the stack)
    SetLocal(u16),
    /// Define a global: pop the value into global slot idx
    DefineGlobal(u16),
    /// Push global slot idx
    GetGlobal(u16),
    /// Store top of stack into global slot idx (value stays on the stack)
    SetGlobal(u16),
    /// Push the upvalue at idx of the running closure
    GetUpvalue(u8),
    /// Store top of stack into upvalue idx (value stays on the stack)
    SetUpvalue(u8),
    /// Close every open upvalue at or above the top stack slot, then pop it
    CloseUpvalue,

    // ==================== Arithmetic ====================
    /// a + b; also concatenates strings and lists
    Add,
    /// a - b
    Subtract,
    /// a * b
    Multiply,
    /// a / b
    Divide,
    /// a % b
    Modulo,
    /// -a
    Negate,

    // ==================== Comparison & logic ====================
    /// a == b (value equality per the object model)
    Equal,
    /// a > b
    Greater,
    /// a < b
    Less,
    /// !a
    Not,
    /// `a is T`: runtime type test against a Type object
    Is,
    /// Unwrap a non-null value; throws UnexpectedNull on null
    Unwrap,

    // ==================== Control flow ====================
    /// Jump forward by offset
    Jump(u16),
    /// Pop condition; jump forward by offset when false
    JumpIfFalse(u16),
    /// Jump backward by offset
    Loop(u16),

    // ==================== Functions ====================
    /// Build a closure from the function constant at idx, capturing
    /// upvalues per the function's capture list
    Closure(u16),
    /// Call the callee below `argc` arguments
    Call(u8),
    /// Invoke the member named constants\[name\] on the receiver below
    /// `argc` arguments
    Invoke(u16, u8),
    /// Return the top of stack to the caller
    Return,

    // ==================== Objects ====================
    /// Pop a class, push a new instance with its field defaults
    NewInstance,
    /// Push receiver.field where field is constants\[idx\]
    GetField(u16),
    /// receiver.field = value (value stays on the stack)
    SetField(u16),
    /// Push the built-in member named constants\[idx\] of the receiver
    /// (string/list/map/pattern/fiber member tables)
    Member(u16),
    /// Pop an enum, push the instance for case `idx`
    EnumCase(u8),

    // ==================== Containers ====================
    /// Pop `count` values, push a list of them
    List(u16),
    /// Pop `count` (key, value) pairs, push a map of them
    Map(u16),
    /// container\[key\]
    Subscript,
    /// container\[key\] = value (value stays on the stack)
    SubscriptSet,

    // ==================== Fibers ====================
    /// Pop `argc` arguments and a closure; push a new Instanciated fiber
    NewFiber(u8),
    /// Pop a value and a fiber; resume the fiber with the value
    Resume,
    /// Pop a value; suspend the current fiber, delivering it to the parent
    Yield,

    // ==================== Errors ====================
    /// Install a catch handler at the given code offset
    PushTry(u16),
    /// Remove the innermost catch handler
    PopTry,
    /// Pop a value and throw it
    Throw,
}
