//! Subcommand implementations

pub mod compile;
pub mod disasm;
pub mod eval;
pub mod run;

use anyhow::Context as _;
use mrbridge::trampoline::{self, CompileContext};
use mrbridge::{loader, ByteOrder, Context, ShimError, Value};
use std::path::Path;

/// Whether `bytes` start with an image identifier
pub fn is_image(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && ByteOrder::from_ident(&bytes[..4]).is_some()
}

pub fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Turn a `Nil` failure result into the pending exception
pub fn check_slot(ctx: &mut Context, v: Value) -> anyhow::Result<Value> {
    if v.is_nil() {
        if let Some(msg) = trampoline::get_current_exception(ctx) {
            return Err(ShimError::ScriptError(msg).into());
        }
    }
    Ok(v)
}

/// Top-level proc of a source file or image, not yet run
pub fn load_proc(ctx: &mut Context, path: &Path) -> anyhow::Result<Value> {
    let bytes = read_file(path)?;
    let proc = if is_image(&bytes) {
        loader::read_image(ctx, &bytes)?
    } else {
        let cc = CompileContext::new(path.display().to_string());
        trampoline::compile(ctx, &bytes, &cc)
    };
    let proc = check_slot(ctx, proc)?;
    tracing::debug!(path = %path.display(), "loaded proc");
    Ok(proc)
}
