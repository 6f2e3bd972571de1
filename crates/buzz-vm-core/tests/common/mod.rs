//! Shared helpers for building chunks by hand in tests.

use buzz_vm_bytecode::{Chunk, FunctionKind, FunctionProto};

/// Build a top-level script prototype.
pub fn script(build: impl FnOnce(&mut Chunk)) -> FunctionProto {
    let mut proto = FunctionProto::new("", 0, FunctionKind::Script, "test.buzz");
    build(&mut proto.chunk);
    proto
}

/// Build a named function prototype.
#[allow(dead_code)]
pub fn function(
    name: &str,
    arity: u8,
    kind: FunctionKind,
    build: impl FnOnce(&mut Chunk),
) -> FunctionProto {
    let mut proto = FunctionProto::new(name, arity, kind, "test.buzz");
    build(&mut proto.chunk);
    proto
}
