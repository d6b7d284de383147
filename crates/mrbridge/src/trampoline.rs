//! Exception Trampoline
//!
//! The VM reports failure by unwinding to the innermost registered recovery
//! point. Every entry into the VM from this crate goes through [`protect`],
//! which installs a fresh point, runs the call and restores the previous
//! point on both outcomes. Guards nest strictly: a host method called from a
//! script may open its own guard without disturbing the caller's.
//!
//! Failures then surface in one of two ways:
//! - `Value::Nil` plus a populated exception slot ([`funcall`],
//!   [`load_script_suppressed`], [`compile`], [`run_proc`])
//! - [`ShimError::ScriptError`] carrying the rendered exception ([`call`],
//!   [`eval`], [`inspect`])

use crate::context::Context;
use crate::error::{ShimError, ShimResult};
use crate::value::Value;
use mrbridge_vm::{CompileOptions, RawValue, VmJump};
use std::panic::{self, AssertUnwindSafe};

/// The guarded call raised; the exception is in the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Raised;

/// How source text is compiled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileContext {
    /// Name used in syntax errors and backtraces
    pub filename: Option<String>,
    /// Compile only; the result is the proc instead of its value
    pub no_exec: bool,
    /// Record line information
    pub debug_info: bool,
}

impl Default for CompileContext {
    fn default() -> Self {
        Self {
            filename: None,
            no_exec: false,
            debug_info: true,
        }
    }
}

impl CompileContext {
    /// Context naming `filename`
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            filename: self.filename.clone(),
            debug_info: self.debug_info,
        }
    }
}

/// Run `f` under a fresh recovery point.
///
/// Returns `Ok(Err(Raised))` when `f` raised, with the exception left in the
/// slot, and [`ShimError::StaleJumpState`] when an inner guard did not
/// restore the recovery point it replaced. Panics that are not VM jumps are
/// resumed once the frames they abandoned are dropped.
pub fn protect<T, F>(ctx: &mut Context, f: F) -> ShimResult<Result<T, Raised>>
where
    F: FnOnce(&mut Context) -> T,
{
    let vm = ctx.vm_mut();
    let prev = vm.jump_target();
    let id = vm.new_jump_id();
    vm.set_jump_target(Some(id));
    let mark = vm.frame_mark();
    tracing::trace!(%id, depth = mark.call_depth(), "guard enter");

    let result = panic::catch_unwind(AssertUnwindSafe(|| f(&mut *ctx)));

    let vm = ctx.vm_mut();
    let current = vm.jump_target();
    vm.set_jump_target(prev);

    match result {
        Ok(v) if current == Some(id) => {
            tracing::trace!(%id, "guard exit");
            Ok(Ok(v))
        }
        Ok(_) => {
            tracing::error!(%id, ?current, "recovery point not restored by inner guard");
            Err(ShimError::StaleJumpState)
        }
        Err(payload) => match payload.downcast::<VmJump>() {
            Ok(jump) if jump.target == id => {
                vm.unwind_to(mark);
                tracing::debug!(%id, "guarded call raised");
                Ok(Err(Raised))
            }
            Ok(jump) => {
                vm.unwind_to(mark);
                tracing::error!(%id, target = %jump.target, "jump aimed at a foreign recovery point");
                Err(ShimError::StaleJumpState)
            }
            Err(other) => {
                vm.unwind_to(mark);
                panic::resume_unwind(other)
            }
        },
    }
}

/// Render and clear the pending exception.
///
/// The first line is the result of the exception's `inspect` method,
/// followed by one backtrace frame per line, most recent first. An
/// `inspect` that raises or returns a non-string falls back to the built-in
/// rendering. `None` when the slot is empty.
pub fn get_current_exception(ctx: &mut Context) -> Option<String> {
    let exc = ctx.vm_mut().take_exception()?;
    let value = ctx.vm().exception_value(exc);
    let ai = ctx.vm().arena_save();
    ctx.vm_mut().arena_protect(value);

    let inspected = match protect(ctx, |c| {
        let s = c.vm_mut().funcall_name(value, "inspect", &[]);
        c.vm().string_lossy(s)
    }) {
        Ok(Ok(Some(s))) => Some(s),
        Ok(Ok(None)) => None,
        Ok(Err(Raised)) => {
            ctx.vm_mut().take_exception();
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "exception inspect abandoned");
            None
        }
    };

    let vm = ctx.vm_mut();
    let mut lines = vec![inspected.unwrap_or_else(|| vm.exc_inspect(exc))];
    lines.extend(vm.exc_backtrace(exc));
    vm.arena_restore(ai);
    Some(lines.join("\n"))
}

/// Re-throw the pending exception; no-op when the slot is empty.
///
/// Only meaningful inside a guarded call such as a host method body.
pub fn raise_and_propagate(ctx: &mut Context) {
    if ctx.vm().exception().is_some() {
        ctx.vm_mut().throw();
    }
}

/// Raise a new exception of class `class_name`.
///
/// Never returns. Must run inside a guarded call.
pub fn raise_new(ctx: &mut Context, class_name: &str, message: &str) -> ! {
    ctx.vm_mut().raise_by_name(class_name, message)
}

/// Raise and catch immediately: the slot is set and control returns
pub fn raise_suppressed(ctx: &mut Context, class_name: &str, message: &str) -> ShimResult<()> {
    let _ = protect(ctx, |c| {
        c.vm_mut().raise_by_name(class_name, message);
    })?;
    Ok(())
}

fn value_or_nil(ctx: &mut Context, r: ShimResult<Result<RawValue, Raised>>) -> Value {
    match r {
        Ok(Ok(raw)) => Value::from_raw(raw),
        Ok(Err(Raised)) => Value::Nil,
        Err(e) => {
            tracing::error!(error = %e, live = ctx.live_objects(), "guarded call abandoned");
            Value::Nil
        }
    }
}

fn value_or_error(ctx: &mut Context, r: ShimResult<Result<RawValue, Raised>>) -> ShimResult<Value> {
    match r? {
        Ok(raw) => Ok(Value::from_raw(raw)),
        Err(Raised) => Err(ShimError::ScriptError(
            get_current_exception(ctx).unwrap_or_default(),
        )),
    }
}

/// Compile and run `source`; `Nil` plus a populated slot on failure.
///
/// With `no_exec` set the compiled proc is returned instead.
pub fn load_script_suppressed(ctx: &mut Context, source: &[u8], cc: &CompileContext) -> Value {
    let opts = cc.compile_options();
    let no_exec = cc.no_exec;
    let r = protect(ctx, |c| {
        if no_exec {
            c.vm_mut().compile(source, &opts)
        } else {
            c.vm_mut().load_string(source, &opts)
        }
    });
    value_or_nil(ctx, r)
}

/// Compile `source` into a proc without running it
pub fn compile(ctx: &mut Context, source: &[u8], cc: &CompileContext) -> Value {
    let opts = cc.compile_options();
    let r = protect(ctx, |c| c.vm_mut().compile(source, &opts));
    value_or_nil(ctx, r)
}

/// Call `recv.name(*args)`; `Nil` plus a populated slot on failure
pub fn funcall(ctx: &mut Context, recv: Value, name: &str, args: &[Value]) -> Value {
    let raw_args: Vec<RawValue> = args.iter().map(|a| a.into_raw()).collect();
    let r = protect(ctx, |c| c.vm_mut().funcall_name(recv.into_raw(), name, &raw_args));
    value_or_nil(ctx, r)
}

/// Run a proc at top level; `Nil` plus a populated slot on failure
pub fn run_proc(ctx: &mut Context, proc: Value) -> Value {
    let r = protect(ctx, |c| c.vm_mut().run_proc(proc.into_raw()));
    value_or_nil(ctx, r)
}

/// [`funcall`] with the exception rendered into the error
pub fn call(ctx: &mut Context, recv: Value, name: &str, args: &[Value]) -> ShimResult<Value> {
    let raw_args: Vec<RawValue> = args.iter().map(|a| a.into_raw()).collect();
    let r = protect(ctx, |c| c.vm_mut().funcall_name(recv.into_raw(), name, &raw_args));
    value_or_error(ctx, r)
}

/// Compile and run `source`, with the exception rendered into the error
pub fn eval(ctx: &mut Context, source: &str, cc: &CompileContext) -> ShimResult<Value> {
    let opts = cc.compile_options();
    let r = protect(ctx, |c| c.vm_mut().load_string(source.as_bytes(), &opts));
    value_or_error(ctx, r)
}

/// `v.inspect`
pub fn inspect(ctx: &mut Context, v: Value) -> ShimResult<String> {
    match protect(ctx, |c| c.vm_mut().inspect_string(v.into_raw()))? {
        Ok(s) => Ok(s),
        Err(Raised) => Err(ShimError::ScriptError(
            get_current_exception(ctx).unwrap_or_default(),
        )),
    }
}
