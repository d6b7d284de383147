//! Shared helpers: a minimal recovery point and an output sink

#![allow(dead_code)]

use mrbridge_vm::{CompileOptions, ObjRef, RawValue, Vm, VmJump};
use std::cell::RefCell;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// Run `f` under a fresh recovery point; a raise comes back as the
/// exception reference
pub fn guarded<F>(vm: &mut Vm, f: F) -> Result<RawValue, ObjRef>
where
    F: FnOnce(&mut Vm) -> RawValue,
{
    let prev = vm.jump_target();
    let id = vm.new_jump_id();
    vm.set_jump_target(Some(id));
    let mark = vm.frame_mark();
    let result = panic::catch_unwind(AssertUnwindSafe(|| f(vm)));
    vm.set_jump_target(prev);
    match result {
        Ok(v) => Ok(v),
        Err(payload) => {
            let jump = payload
                .downcast::<VmJump>()
                .unwrap_or_else(|other| panic::resume_unwind(other));
            assert_eq!(jump.target, id);
            vm.unwind_to(mark);
            Err(vm.take_exception().expect("exception slot set by raise"))
        }
    }
}

/// Compile and run `src`, panicking on any exception
pub fn eval(vm: &mut Vm, src: &str) -> RawValue {
    let opts = CompileOptions::default();
    match guarded(vm, |vm| vm.load_string(src.as_bytes(), &opts)) {
        Ok(v) => v,
        Err(exc) => panic!("unexpected exception: {}", vm.exc_inspect(exc)),
    }
}

/// Run `f`, expecting it to raise; returns the inspected exception
pub fn eval_err<F>(vm: &mut Vm, f: F) -> String
where
    F: FnOnce(&mut Vm) -> RawValue,
{
    match guarded(vm, f) {
        Ok(v) => panic!("expected an exception, got {:?}", v),
        Err(exc) => vm.exc_inspect(exc),
    }
}

/// Source variant of [`eval_err`]
pub fn source_err(vm: &mut Vm, src: &str) -> String {
    let opts = CompileOptions::default();
    eval_err(vm, |vm| vm.load_string(src.as_bytes(), &opts))
}

/// Cloneable in-memory writer
#[derive(Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
