//! VM error types

use thiserror::Error;

/// A position in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// File path
    pub file: String,
    /// 1-based line number
    pub line: u32,
    /// 1-based column number
    pub column: u32,
}

impl SourceLocation {
    /// Create a source location.
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// The runtime error taxonomy surfaced by the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// List/string/map index outside the valid range
    OutOfBound,
    /// Arithmetic on incompatible numeric shapes, or a non-integer where an
    /// integer is required
    BadNumber,
    /// Dereference of null in a non-optional context
    UnexpectedNull,
    /// Integer overflow in a checked operation
    NumberOverflow,
    /// Integer division or modulo by zero
    DivisionByZero,
    /// A user-thrown value
    Custom,
}

impl std::fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OutOfBound => "OutOfBound",
            Self::BadNumber => "BadNumber",
            Self::UnexpectedNull => "UnexpectedNull",
            Self::NumberOverflow => "NumberOverflow",
            Self::DivisionByZero => "DivisionByZero",
            Self::Custom => "Custom",
        };
        f.write_str(name)
    }
}

/// A stack frame in an error trace.
#[derive(Debug, Clone)]
pub struct StackFrame {
    /// Function name ("" for the script body)
    pub function_name: String,
    /// Source file
    pub file: String,
    /// Line number
    pub line: u32,
}

impl std::fmt::Display for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = if self.function_name.is_empty() {
            "<script>"
        } else {
            &self.function_name
        };
        write!(f, "at {} ({}:{})", name, self.file, self.line)
    }
}

/// An error that escaped every catch clause of every fiber.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    /// Which taxonomy entry this error belongs to
    pub kind: RuntimeErrorKind,
    /// Rendering of the thrown value
    pub message: String,
    /// Stack trace: fiber chain, innermost frame first
    pub stack: Vec<StackFrame>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// VM errors
#[derive(Debug, Error)]
pub enum VmError {
    /// A runtime error that no fiber caught
    #[error("{0}")]
    Runtime(Box<RuntimeError>),

    /// A compile-time diagnostic (unresolved placeholder, bad signature)
    #[error("compile error at {location}: {message}")]
    Compile {
        /// Human-readable diagnostic
        message: String,
        /// Where in the source the error was detected
        location: SourceLocation,
    },

    /// Bytecode image problem
    #[error(transparent)]
    Bytecode(#[from] buzz_vm_bytecode::BytecodeError),

    /// A bug in the VM itself
    #[error("internal error: {0}")]
    Internal(String),
}

impl VmError {
    /// Create an uncaught runtime error.
    pub fn runtime(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self::Runtime(Box::new(RuntimeError {
            kind,
            message: message.into(),
            stack: Vec::new(),
        }))
    }

    /// Create a compile diagnostic.
    pub fn compile(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::Compile {
            message: message.into(),
            location,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Runtime(_) => 65,
            Self::Compile { .. } => 64,
            Self::Bytecode(_) | Self::Internal(_) => 70,
        }
    }
}

/// Result type for VM operations.
pub type VmResult<T> = std::result::Result<T, VmError>;
