//! Exception handling tests
//!
//! These tests verify raise/rescue semantics of the interpreter:
//! - Rescue by class, default StandardError rescue, propagation
//! - Rescue across method frames
//! - Operand stack restoration at handlers
//! - Messages of core errors and captured backtraces

mod common;

use common::{eval, guarded, source_err};
use mrbridge_vm::{CompileOptions, Vm, VmOptions, MAX_CALL_DEPTH_LIMIT};

#[test]
fn test_rescue_binds_exception() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "begin\n  raise ArgumentError, \"bad\"\nrescue ArgumentError => e\n  e.message\nend";
    let v = eval(&mut vm, src);
    assert_eq!(vm.string_lossy(v).as_deref(), Some("bad"));
}

#[test]
fn test_bare_rescue_catches_standard_error_only() {
    let mut vm = Vm::new(VmOptions::default());
    let v = eval(&mut vm, "begin\n  raise \"x\"\nrescue\n  :caught\nend");
    assert_eq!(vm.sym_str(v.as_sym().unwrap()), "caught");

    let err = source_err(&mut vm, "begin\n  raise Exception, \"top\"\nrescue\n  1\nend");
    assert_eq!(err, "top (Exception)");
}

#[test]
fn test_unmatched_rescue_propagates() {
    let mut vm = Vm::new(VmOptions::default());
    let err = source_err(&mut vm, "begin\n  raise \"x\"\nrescue TypeError\n  1\nend");
    assert_eq!(err, "x (RuntimeError)");
}

#[test]
fn test_rescue_class_list_and_subclasses() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "begin\n  nil.nope\nrescue TypeError, NameError => e\n  e.class\nend";
    let v = eval(&mut vm, src);
    assert_eq!(vm.inspect_string(v), "NoMethodError");
}

#[test]
fn test_rescue_across_method_frames() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "def boom\n  1 / 0\nend\ndef middle\n  boom\nend\nbegin\n  middle\nrescue ZeroDivisionError => e\n  e.message\nend";
    let v = eval(&mut vm, src);
    assert_eq!(vm.string_lossy(v).as_deref(), Some("divided by 0"));
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn test_handler_keeps_outer_operands() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "x = 1 + begin\n  raise \"a\"\nrescue\n  2\nend\nx";
    assert_eq!(eval(&mut vm, src).as_fixnum(), Some(3));
}

#[test]
fn test_rescue_in_method_body() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "def safe_div(a, b)\n  a / b\nrescue ZeroDivisionError\n  0\nend\nsafe_div(10, 2) + safe_div(1, 0)";
    assert_eq!(eval(&mut vm, src).as_fixnum(), Some(5));
}

#[test]
fn test_reraise_from_handler() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "begin\n  begin\n    raise TypeError, \"inner\"\n  rescue => e\n    raise e\n  end\nrescue TypeError => outer\n  outer.message\nend";
    let v = eval(&mut vm, src);
    assert_eq!(vm.string_lossy(v).as_deref(), Some("inner"));
}

#[test]
fn test_core_error_messages() {
    let mut vm = Vm::new(VmOptions::default());
    assert_eq!(
        source_err(&mut vm, "nil.foo"),
        "undefined method 'foo' for nil (NoMethodError)"
    );
    assert_eq!(
        source_err(&mut vm, "Missing"),
        "uninitialized constant Missing (NameError)"
    );
    assert_eq!(
        source_err(&mut vm, "1 + \"a\""),
        "String can't be coerced into Integer (TypeError)"
    );
    assert_eq!(
        source_err(&mut vm, "1 < nil"),
        "comparison of Integer with NilClass failed (ArgumentError)"
    );
    assert_eq!(
        source_err(&mut vm, "def two(a, b)\n  a\nend\ntwo(1)"),
        "wrong number of arguments (given 1, expected 2) (ArgumentError)"
    );
    assert_eq!(
        source_err(&mut vm, "class A\nend\nclass A < String\nend"),
        "superclass mismatch for class A (TypeError)"
    );
}

#[test]
fn test_syntax_error_names_file_and_line() {
    let mut vm = Vm::new(VmOptions::default());
    let opts = CompileOptions {
        filename: Some("bad.rb".to_string()),
        debug_info: true,
    };
    let exc = guarded(&mut vm, |vm| vm.compile(b"x = 1\ndef\n", &opts)).unwrap_err();
    let text = vm.exc_inspect(exc);
    assert!(text.starts_with("bad.rb:2:"), "{}", text);
    assert!(text.ends_with("(SyntaxError)"), "{}", text);
}

#[test]
fn test_stack_depth_limit() {
    let mut vm = Vm::new(VmOptions {
        max_call_depth: 48,
        ..VmOptions::default()
    });
    let err = source_err(&mut vm, "def down(n)\n  down(n + 1)\nend\ndown(0)");
    assert_eq!(err, "stack level too deep (SystemStackError)");
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn test_call_depth_clamped_to_limit() {
    let vm = Vm::new(VmOptions {
        max_call_depth: 1_000_000,
        ..VmOptions::default()
    });
    assert_eq!(vm.options().max_call_depth, MAX_CALL_DEPTH_LIMIT);
}

#[test]
fn test_stack_depth_limit_at_ceiling() {
    // The ceiling is sized for an 8 MiB stack; test threads default to less.
    let handle = std::thread::Builder::new()
        .stack_size(8 << 20)
        .spawn(|| {
            let mut vm = Vm::new(VmOptions {
                max_call_depth: MAX_CALL_DEPTH_LIMIT,
                ..VmOptions::default()
            });
            let err = source_err(&mut vm, "def down(n)\n  down(n + 1)\nend\ndown(0)");
            (err, vm.call_depth())
        })
        .unwrap();
    let (err, depth) = handle.join().unwrap();
    assert_eq!(err, "stack level too deep (SystemStackError)");
    assert_eq!(depth, 0);
}

#[test]
fn test_backtrace_frames() {
    let mut vm = Vm::new(VmOptions::default());
    let opts = CompileOptions {
        filename: Some("bt.rb".to_string()),
        debug_info: true,
    };
    let src = b"def inner\n  raise \"x\"\nend\ndef outer\n  inner\nend\nouter\n";
    let exc = guarded(&mut vm, |vm| vm.load_string(src, &opts)).unwrap_err();
    assert_eq!(
        vm.exc_backtrace(exc),
        vec!["bt.rb:2:in inner", "bt.rb:5:in outer", "bt.rb:7"]
    );
}

#[test]
fn test_no_debug_info_means_empty_backtrace() {
    let mut vm = Vm::new(VmOptions::default());
    let opts = CompileOptions {
        filename: None,
        debug_info: false,
    };
    let exc = guarded(&mut vm, |vm| vm.load_string(b"raise \"x\"", &opts)).unwrap_err();
    assert!(vm.exc_backtrace(exc).is_empty());
}

#[test]
fn test_vm_without_debug_info_ignores_compile_request() {
    let mut vm = Vm::new(VmOptions {
        debug_info: false,
        ..VmOptions::default()
    });
    let opts = CompileOptions {
        filename: Some("x.rb".to_string()),
        debug_info: true,
    };
    let exc = guarded(&mut vm, |vm| vm.load_string(b"def f\n  1 / 0\nend\nf", &opts)).unwrap_err();
    assert_eq!(vm.exc_inspect(exc), "divided by 0 (ZeroDivisionError)");
    assert!(vm.exc_backtrace(exc).is_empty());
}

#[test]
fn test_raise_by_name_validates_class() {
    let mut vm = Vm::new(VmOptions::default());
    let exc = guarded(&mut vm, |vm| vm.raise_by_name("Nope", "m")).unwrap_err();
    assert_eq!(vm.exc_inspect(exc), "uninitialized constant Nope (NameError)");
    let exc = guarded(&mut vm, |vm| vm.raise_by_name("String", "m")).unwrap_err();
    assert_eq!(vm.exc_inspect(exc), "exception class/object expected (TypeError)");
    let exc = guarded(&mut vm, |vm| vm.raise_by_name("RuntimeError", "m")).unwrap_err();
    assert_eq!(vm.exc_inspect(exc), "m (RuntimeError)");
}

#[test]
fn test_exception_without_message_inspects_as_class() {
    let mut vm = Vm::new(VmOptions::default());
    assert_eq!(source_err(&mut vm, "raise TypeError"), "TypeError");
    let v = eval(&mut vm, "begin\n  raise TypeError\nrescue => e\n  e.message\nend");
    assert_eq!(vm.string_lossy(v).as_deref(), Some("TypeError"));
}
