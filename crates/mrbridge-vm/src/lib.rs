//! mrbridge VM
//!
//! A small embeddable VM for a Ruby-like scripting language:
//! - Tagged value representation ([`RawValue`]) and interned symbols
//! - Index-addressed object heap with a mark/sweep collector
//! - Classes, modules, method tables and the core library
//! - Lexer, parser and bytecode compiler for the script subset
//! - Bytecode interpreter with `begin/rescue` handler tables
//! - Binary image dump and load
//!
//! Raising is a non-local exit: the exception goes into the VM's exception
//! slot and control unwinds to the innermost recovery point registered with
//! [`Vm::set_jump_target`]. Hosts must install one before calling anything
//! that can raise.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod ast;
mod builtins;
pub mod codegen;
pub mod dump;
mod exception;
pub mod heap;
mod interpreter;
pub mod irep;
pub mod jump;
pub mod lexer;
pub mod object;
pub mod opcode;
pub mod parser;
pub mod symbol;
pub mod value;
pub mod vm;

pub use builtins::format_float;
pub use dump::{ByteOrder, ImageBuffer, ImageHeader};
pub use heap::{GcStats, ObjRef};
pub use irep::{CatchHandler, DebugInfo, Irep, LineEntry, PoolValue};
pub use jump::{FrameMark, JumpId, VmJump};
pub use object::{DataFree, DataType, InstanceTt, NativeFn};
pub use opcode::{Instruction, Opcode};
pub use symbol::{Sym, SymbolTable};
pub use value::{RawValue, ValueType};
pub use vm::{CompileOptions, CoreClasses, Vm, VmOptions, MAX_CALL_DEPTH_LIMIT};

use std::fmt;

/// Errors decoding instructions or binary images
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Input ended inside an item starting at the offset
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEnd(usize),

    /// Unknown opcode byte
    #[error("invalid opcode 0x{0:02x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Operand indexes past a table
    #[error("operand out of range at offset {0}")]
    OperandOutOfRange(usize),

    /// Structurally invalid record
    #[error("malformed procedure: {0}")]
    Malformed(&'static str),

    /// Identifier or format version not recognized
    #[error("invalid image header")]
    InvalidHeader,

    /// Declared size does not fit the buffer
    #[error("declared size {declared} does not fit buffer of {actual} bytes")]
    SizeMismatch {
        /// Size from the header
        declared: u32,
        /// Bytes available
        actual: usize,
    },

    /// Body checksum mismatch
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum from the header
        expected: u32,
        /// Checksum of the body
        actual: u32,
    },

    /// Compiler name or version not recognized
    #[error("unknown compiler")]
    UnknownCompiler,

    /// Body not closed by `END\0`
    #[error("missing end marker")]
    MissingEndMarker,

    /// Bytes after the end marker
    #[error("{0} trailing bytes after end marker")]
    TrailingBytes(usize),
}

/// Syntax error with the 1-based line it was found on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Source line
    pub line: u32,
    /// Description
    pub message: String,
}

impl ParseError {
    /// New error at `line`
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}
