//! Integration tests for the interpreter
//!
//! Tests cover:
//! - Arithmetic, locals, control flow
//! - Method definition and recursion
//! - Classes, modules, constants
//! - Class methods and arrays
//! - Output through `puts`
//! - Binary image round trips through the VM

mod common;

use common::{eval, eval_err, source_err, SharedBuf};
use mrbridge_vm::{ByteOrder, CompileOptions, ValueType, Vm, VmOptions};

#[test]
fn test_arithmetic_precedence() {
    let mut vm = Vm::new(VmOptions::default());
    assert_eq!(eval(&mut vm, "1 + 2 * 3").as_fixnum(), Some(7));
    assert_eq!(eval(&mut vm, "(1 + 2) * 3").as_fixnum(), Some(9));
    assert_eq!(eval(&mut vm, "7 / 2").as_fixnum(), Some(3));
    assert_eq!(eval(&mut vm, "-7 / 2").as_fixnum(), Some(-4));
    assert_eq!(eval(&mut vm, "10 % 3").as_fixnum(), Some(1));
    assert_eq!(eval(&mut vm, "1.5 + 1").as_float(), Some(2.5));
}

#[test]
fn test_comparison_and_logic() {
    let mut vm = Vm::new(VmOptions::default());
    assert!(eval(&mut vm, "1 < 2 && 3 >= 3").is_truthy());
    assert!(!eval(&mut vm, "1 == 2 || false").is_truthy());
    assert!(eval(&mut vm, "1 != 2").is_truthy());
    assert!(eval(&mut vm, "!nil").is_truthy());
    assert!(eval(&mut vm, "nil").is_nil());
}

#[test]
fn test_locals_and_while() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "i = 0\nsum = 0\nwhile i < 5\n  sum = sum + i\n  i = i + 1\nend\nsum";
    assert_eq!(eval(&mut vm, src).as_fixnum(), Some(10));
}

#[test]
fn test_if_elsif_else() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "def sign(n)\n  if n < 0\n    -1\n  elsif n == 0\n    0\n  else\n    1\n  end\nend\nsign(-5) + sign(0) * 10 + sign(9) * 100";
    assert_eq!(eval(&mut vm, src).as_fixnum(), Some(99));
}

#[test]
fn test_method_definition_and_recursion() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "def fib(n)\n  if n < 2\n    n\n  else\n    fib(n - 1) + fib(n - 2)\n  end\nend\nfib(15)";
    assert_eq!(eval(&mut vm, src).as_fixnum(), Some(610));
}

#[test]
fn test_explicit_return() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "def first_big(n)\n  return :big if n > 10\n  :small\nend\nfirst_big(11)";
    let v = eval(&mut vm, src);
    assert_eq!(v.tt(), ValueType::Symbol);
    let name = vm.sym_str(v.as_sym().unwrap());
    assert_eq!(name, "big");
}

#[test]
fn test_class_with_methods() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "class Greeter\n  def greet(name)\n    \"hello \" + name\n  end\nend\nGreeter.new.greet(\"bob\")";
    let v = eval(&mut vm, src);
    assert_eq!(vm.string_lossy(v).as_deref(), Some("hello bob"));

    let v = eval(&mut vm, "Greeter.new.is_a?(Greeter)");
    assert!(v.is_truthy());
    let v = eval(&mut vm, "Greeter.superclass == Object");
    assert!(v.is_truthy());
}

#[test]
fn test_inheritance_and_reopening() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "class Animal\n  def legs\n    4\n  end\nend\nclass Bird < Animal\n  def legs\n    2\n  end\nend\nclass Animal\n  def alive?\n    true\n  end\nend\nBird.new.legs * 10 + Animal.new.legs";
    assert_eq!(eval(&mut vm, src).as_fixnum(), Some(24));
    assert!(eval(&mut vm, "Bird.new.alive?").is_truthy());
}

#[test]
fn test_modules_nest_constants() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "module Outer\n  class Inner\n    def where\n      :inner\n    end\n  end\nend\nOuter";
    let v = eval(&mut vm, src);
    assert_eq!(v.tt(), ValueType::Module);

    let inner = vm.class_get("Outer::Inner").unwrap();
    assert_eq!(vm.class_name(inner), "Outer::Inner");
    let outer = vm.class_get("Outer").unwrap();
    assert!(vm.is_module(outer));
    assert!(!vm.is_module(inner));
}

#[test]
fn test_class_methods() {
    let mut vm = Vm::new(VmOptions::default());
    let src = "class Shape
  def self.create(n)
    new.sized(n)
  end
  def self.kind
    self
  end
  def sized(n)
    n * 2
  end
end
class Square < Shape
end
Shape.create(4) + Square.create(1)";
    assert_eq!(eval(&mut vm, src).as_fixnum(), Some(10));
    assert!(eval(&mut vm, "Square.kind == Square").is_truthy());
    assert!(eval(&mut vm, "Shape.respond_to?(:create)").is_truthy());
    assert!(!eval(&mut vm, "Shape.new.respond_to?(:create)").is_truthy());
    assert_eq!(
        source_err(&mut vm, "Shape.new.create(1)"),
        "undefined method 'create' for an instance of Shape (NoMethodError)"
    );
    assert_eq!(
        source_err(&mut vm, "def self.nope
end"),
        "can't define singleton method 'nope' for Object (TypeError)"
    );
}

#[test]
fn test_arrays() {
    let mut vm = Vm::new(VmOptions::default());
    let v = eval(&mut vm, "a = [1, \"two\", :three]\na");
    assert_eq!(v.tt(), ValueType::Array);
    assert_eq!(vm.array_items(v).map(<[_]>::len), Some(3));
    assert_eq!(vm.inspect_string(v), "[1, \"two\", :three]");

    assert_eq!(eval(&mut vm, "[4, 5, 6][-1]").as_fixnum(), Some(6));
    assert!(eval(&mut vm, "[4, 5, 6][3]").is_nil());
    assert_eq!(eval(&mut vm, "a = []\na.push(1, 2)\na.push(3)\na.size").as_fixnum(), Some(3));
    let v = eval(&mut vm, "a = [1]\na[3] = 9\na");
    assert_eq!(vm.inspect_string(v), "[1, nil, nil, 9]");
    assert!(eval(&mut vm, "[1, [2, \"x\"]] == [1, [2, \"x\"]]").is_truthy());
    assert!(!eval(&mut vm, "[1, 2] == [2, 1]").is_truthy());
    let v = eval(&mut vm, "[1, :b, \"c\"].join(\"-\")");
    assert_eq!(vm.string_lossy(v).as_deref(), Some("1-b-c"));
    assert!(eval(&mut vm, "Array.new.empty?").is_truthy());
    assert_eq!(
        source_err(&mut vm, "[1][\"0\"]"),
        "no implicit conversion of String into Integer (TypeError)"
    );
}

#[test]
fn test_self_containing_array_inspect() {
    let mut vm = Vm::new(VmOptions::default());
    let v = eval(&mut vm, "a = [1]\na.push(a)\na.inspect");
    assert_eq!(vm.string_lossy(v).as_deref(), Some("[1, [...]]"));
}

#[test]
fn test_array_elements_survive_collection() {
    let mut vm = Vm::new(VmOptions {
        gc_threshold: 8,
        ..VmOptions::default()
    });
    let src = "keep = []\ni = 0\nwhile i < 200\n  keep.push(\"s\" + \"!\")\n  i = i + 1\nend\nkeep";
    let v = eval(&mut vm, src);
    vm.gc_register(v);
    vm.full_gc();
    let items = vm.array_items(v).unwrap().to_vec();
    assert_eq!(items.len(), 200);
    assert!(items.iter().all(|s| vm.string_bytes(*s) == Some(&b"s!"[..])));
}

#[test]
fn test_string_and_symbol_methods() {
    let mut vm = Vm::new(VmOptions::default());
    assert_eq!(eval(&mut vm, "(\"ab\" + \"c\").size").as_fixnum(), Some(3));
    assert!(eval(&mut vm, "\"x\".to_sym == :x").is_truthy());
    assert!(eval(&mut vm, "\"x\" == \"x\"").is_truthy());
    assert!(eval(&mut vm, "\"a\".respond_to?(:size)").is_truthy());
    let v = eval(&mut vm, ":sym.inspect");
    assert_eq!(vm.string_lossy(v).as_deref(), Some(":sym"));
}

#[test]
fn test_inspect_strings() {
    let mut vm = Vm::new(VmOptions::default());
    let v = eval(&mut vm, "1.0");
    assert_eq!(vm.inspect_string(v), "1.0");
    let v = eval(&mut vm, "nil");
    assert_eq!(vm.inspect_string(v), "nil");
    let v = eval(&mut vm, "Integer");
    assert_eq!(vm.inspect_string(v), "Integer");
    let v = eval(&mut vm, "self");
    assert_eq!(vm.inspect_string(v), "main");
}

#[test]
fn test_puts_writes_to_output() {
    let mut vm = Vm::new(VmOptions::default());
    let out = SharedBuf::default();
    vm.set_output(Box::new(out.clone()));
    eval(&mut vm, "puts 1, \"a\", nil\nputs :sym\nputs 2.5");
    assert_eq!(out.contents(), "1\na\n\nsym\n2.5\n");
}

#[test]
fn test_proc_call_runs_compiled_body() {
    let mut vm = Vm::new(VmOptions::default());
    let proc = common::guarded(&mut vm, |vm| {
        vm.compile(b"40 + 2", &CompileOptions::default())
    })
    .unwrap();
    assert_eq!(proc.tt(), ValueType::Proc);
    let v = common::guarded(&mut vm, |vm| vm.funcall_name(proc, "call", &[])).unwrap();
    assert_eq!(v.as_fixnum(), Some(42));
}

#[test]
fn test_image_round_trip_runs() {
    let mut vm = Vm::new(VmOptions::default());
    let src = b"class K\n  def self.twice(x)\n    x * 2\n  end\nend\n[K.twice(21)][0]";
    let proc = common::guarded(&mut vm, |vm| vm.compile(src, &CompileOptions::default())).unwrap();
    vm.gc_register(proc);

    for order in [ByteOrder::Big, ByteOrder::Little] {
        let image = vm.dump_proc(proc, order, false).unwrap();
        let loaded = common::guarded(&mut vm, |vm| vm.read_image(&image)).unwrap();
        let v = common::guarded(&mut vm, |vm| vm.run_proc(loaded)).unwrap();
        assert_eq!(v.as_fixnum(), Some(42));
    }
}

#[test]
fn test_corrupt_image_raises_script_error() {
    let mut vm = Vm::new(VmOptions::default());
    let proc = common::guarded(&mut vm, |vm| vm.compile(b"1", &CompileOptions::default())).unwrap();
    let mut image = vm.dump_proc(proc, ByteOrder::Big, false).unwrap();
    let last = image.len() - 6;
    image[last] ^= 0x55;
    let err = eval_err(&mut vm, |vm| vm.read_image(&image));
    assert!(err.contains("ScriptError"), "{}", err);
    assert!(err.contains("checksum"), "{}", err);
}
