//! # Buzz VM Bytecode
//!
//! This crate defines the bytecode format executed by the Buzz VM.
//!
//! ## Design Principles
//!
//! - **Stack-based**: instructions push and pop an operand stack owned by
//!   the running fiber
//! - **Chunk-oriented**: each function compiles to a [`Chunk`] carrying its
//!   code, constant pool, and line table
//! - **Serializable**: chunks can be cached to disk; cache files start with
//!   a magic and a format version

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod chunk;
pub mod error;
pub mod instruction;

pub use chunk::{Chunk, Constant, FunctionKind, FunctionProto, UpvalueCapture};
pub use error::BytecodeError;
pub use instruction::Op;

/// Magic bytes at the start of a bytecode cache file.
pub const BYTECODE_MAGIC: [u8; 4] = *b"BZZC";

/// Bytecode format version, written right after the magic.
pub const BYTECODE_VERSION: u32 = 1;
