//! mrbridge - safety shim for an embedded scripting VM
//!
//! The VM signals errors by unwinding to a registered recovery point and
//! stores values in a tagged union. This crate turns both into ordinary
//! Rust: a closed [`Value`] enum, guarded calls that return normally, host
//! payloads with destructors the collector runs exactly once, validated
//! binary image loading and read-only procedure introspection.
//!
//! # Example
//!
//! ```ignore
//! use mrbridge::{trampoline, Context, CompileContext, Value};
//!
//! let mut ctx = Context::open();
//! let v = trampoline::load_script_suppressed(&mut ctx, b"1 + 2", &CompileContext::default());
//! assert_eq!(v, Value::FixedInt(3));
//!
//! let v = trampoline::load_script_suppressed(&mut ctx, b"nil.oops", &CompileContext::default());
//! assert!(v.is_nil());
//! let report = trampoline::get_current_exception(&mut ctx).unwrap();
//! assert!(report.starts_with("undefined method 'oops'"));
//! ```
//!
//! # Threading
//!
//! A [`Context`] belongs to the thread that opened it. It is neither `Send`
//! nor `Sync`.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod context;
pub mod data;
pub mod error;
pub mod introspect;
pub mod loader;
pub mod trampoline;
pub mod value;

pub use context::{Context, ContextOptions, ReprSizes};
pub use data::{make_descriptor, TypeDescriptor};
pub use error::{ShimError, ShimResult};
pub use introspect::{Instructions, Procedure};
pub use trampoline::{CompileContext, Raised};
pub use value::{Value, VariantTag};

pub use mrbridge_vm::{
    ByteOrder, CatchHandler, DataFree, Instruction, ObjRef, Opcode, Sym, MAX_CALL_DEPTH_LIMIT,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
