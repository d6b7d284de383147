//! Integration tests for garbage collection
//!
//! Tests cover:
//! - Automatic collection while scripts run
//! - Roots: registered values, arena, method tables
//! - Data payload destructors (exactly once, on sweep or on close)

mod common;

use common::eval;
use mrbridge_vm::{DataType, InstanceTt, Vm, VmOptions};
use std::ffi::c_void;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_threshold_triggers_collection() {
    let mut vm = Vm::new(VmOptions {
        gc_threshold: 64,
        ..VmOptions::default()
    });
    let src = "i = 0\nwhile i < 2000\n  s = \"garbage\" + \"!\"\n  i = i + 1\nend\ni";
    assert_eq!(eval(&mut vm, src).as_fixnum(), Some(2000));
    assert!(vm.gc_stats().collections > 0);
    assert!(vm.gc_stats().objects_freed > 1000);
}

#[test]
fn test_methods_survive_collection() {
    let mut vm = Vm::new(VmOptions::default());
    eval(&mut vm, "class Keeper\n  def value\n    \"kept\"\n  end\nend");
    vm.full_gc();
    vm.full_gc();
    let v = eval(&mut vm, "Keeper.new.value");
    assert_eq!(vm.string_lossy(v).as_deref(), Some("kept"));
}

#[test]
fn test_arena_protects_until_restore() {
    let mut vm = Vm::new(VmOptions::default());
    let idx = vm.arena_save();
    let s = vm.str_new(b"temp");
    vm.full_gc();
    assert_eq!(vm.string_bytes(s), Some(&b"temp"[..]));
    vm.arena_restore(idx);
    let before = vm.live_objects();
    assert_eq!(vm.full_gc(), 1);
    assert_eq!(vm.live_objects(), before - 1);
}

static SWEPT: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn free_swept(p: *mut c_void) {
    drop(Box::from_raw(p as *mut u64));
    SWEPT.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_data_destructor_runs_once_on_sweep() {
    let mut vm = Vm::new(VmOptions::default());
    let object = vm.object_class();
    let cls = vm.define_class("Handle", None, object);
    vm.set_instance_tt(cls, InstanceTt::Data);
    let ty = Rc::new(DataType {
        name: "Handle".to_string(),
        dfree: Some(free_swept),
    });

    let idx = vm.arena_save();
    let payload = Box::into_raw(Box::new(7u64)) as *mut c_void;
    let v = vm.data_new(cls, payload, Some(ty));
    assert_eq!(vm.data(v).map(|d| d.ptr), Some(payload));
    vm.arena_restore(idx);

    vm.full_gc();
    assert_eq!(SWEPT.load(Ordering::SeqCst), 1);
    vm.full_gc();
    drop(vm);
    assert_eq!(SWEPT.load(Ordering::SeqCst), 1);
}

static CLOSED: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn free_closed(p: *mut c_void) {
    drop(Box::from_raw(p as *mut u64));
    CLOSED.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_data_destructor_runs_on_close() {
    let mut vm = Vm::new(VmOptions::default());
    let object = vm.object_class();
    let cls = vm.define_class("Pinned", None, object);
    vm.set_instance_tt(cls, InstanceTt::Data);
    let ty = Rc::new(DataType {
        name: "Pinned".to_string(),
        dfree: Some(free_closed),
    });
    let payload = Box::into_raw(Box::new(1u64)) as *mut c_void;
    let v = vm.data_new(cls, payload, Some(ty));
    vm.gc_register(v);
    vm.full_gc();
    assert_eq!(CLOSED.load(Ordering::SeqCst), 0);
    drop(vm);
    assert_eq!(CLOSED.load(Ordering::SeqCst), 1);
}

#[test]
fn test_script_new_on_data_class_allocates_empty_cell() {
    let mut vm = Vm::new(VmOptions::default());
    let object = vm.object_class();
    let cls = vm.define_class("Blob", None, object);
    vm.set_instance_tt(cls, InstanceTt::Data);
    let v = eval(&mut vm, "Blob.new");
    let data = vm.data(v).unwrap();
    assert!(data.ptr.is_null());
    assert!(data.ty.is_none());
}
